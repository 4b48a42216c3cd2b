pub mod events;
pub mod gateway;
pub mod heartbeat;
pub mod hub;
pub mod session_store;

pub use events::{ClientFrame, PushEvent};
pub use gateway::serve_connection;
pub use heartbeat::start_heartbeat;
pub use hub::{ConnectionHandle, Hub, Outbound};
pub use session_store::{
    generate_token, InMemorySessionStore, RedisSessionStore, SessionError, SessionStore,
};
