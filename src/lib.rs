pub mod cache;
pub mod config;
pub mod dns;
pub mod error;

pub use cache::{CachedAnswer, InsertReport, RecordCache};
pub use config::CacheConfig;
pub use dns::DNSPacket;
pub use error::{CacheError, ConfigError};
