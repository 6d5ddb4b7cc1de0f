// sage-core/src/infrastructure/adapters/mod.rs

pub mod http;
pub mod memory;
pub mod sqlx;

pub use self::http::HttpHook;
pub use self::memory::MemoryConnector;
pub use self::sqlx::SqlxConnector;
