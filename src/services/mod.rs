pub mod crypto;
pub mod deletion;
pub mod embed;
pub mod expiry_policy;
pub mod lifecycle;
pub mod list_file;
pub mod name_allocator;
pub mod rate_limiter;
pub mod secret_hash;
pub mod short_links;
pub mod storage_service;
