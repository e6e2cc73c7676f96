//! Distributed tier backends
//!
//! - `RedisStore`: shared Redis instance behind a connection pool
//! - `InMemoryDistributedStore`: process-local stand-in with outage simulation

mod memory;
mod redis;

pub use self::memory::InMemoryDistributedStore;
pub use self::redis::RedisStore;
