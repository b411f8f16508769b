use tracing::{debug, warn};

use super::errors::ProviderResult;
use super::ports::CryptoProvider;

/// An open certificate store that is closed exactly once.
///
/// [`close`](Self::close) releases the store on the success path and reports
/// the provider's answer. Any other exit (an early `?` return, a panic, or the
/// owning future being dropped) releases it from `Drop`.
pub(crate) struct StoreGuard<'p, P: CryptoProvider> {
    provider: &'p P,
    store: Option<P::Store>,
}

impl<'p, P: CryptoProvider> StoreGuard<'p, P> {
    pub(crate) fn new(provider: &'p P, store: P::Store) -> Self {
        Self {
            provider,
            store: Some(store),
        }
    }

    pub(crate) fn store(&self) -> &P::Store {
        match self.store.as_ref() {
            Some(store) => store,
            None => unreachable!("the store is only taken when the guard is consumed"),
        }
    }

    pub(crate) fn close(mut self) -> ProviderResult<()> {
        match self.store.take() {
            Some(store) => {
                debug!("Closing certificate store");
                self.provider.close_store(store)
            }
            None => Ok(()),
        }
    }
}

impl<P: CryptoProvider> Drop for StoreGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            debug!("Closing certificate store after an interrupted operation");
            if let Err(error) = self.provider.close_store(store) {
                warn!("Failed to close certificate store: {error}");
            }
        }
    }
}
