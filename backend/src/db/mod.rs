pub mod chats;
pub mod connection;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod sessions;
pub mod store;
pub mod swipes;

pub use connection::{get_db_pool, DatabaseConfig};
pub use memory::MemoryStore;
pub use store::{PgStore, Store};
