pub mod config;
pub mod logging;
pub mod periodic;

pub use config::{Config, SessionBackend};
pub use logging::init_logging;
pub use periodic::PeriodicTask;
