pub mod memory;
pub mod openssl;
