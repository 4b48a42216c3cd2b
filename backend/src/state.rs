use std::sync::Arc;

use crate::auth::Authenticator;
use crate::db::Store;
use crate::realtime::{Hub, SessionStore};
use crate::services::{MatchEngine, Messenger};
use crate::utils::Config;

/// Everything a request handler can reach. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<dyn Authenticator>,
    pub sessions: Arc<dyn SessionStore>,
    pub hub: Arc<Hub>,
    pub matcher: MatchEngine,
    pub messenger: Messenger,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        auth: Arc<dyn Authenticator>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let hub = Arc::new(Hub::new());
        Self {
            config: Arc::new(config),
            auth,
            sessions,
            matcher: MatchEngine::new(store.clone(), hub.clone()),
            messenger: Messenger::new(store, hub.clone()),
            hub,
        }
    }
}
