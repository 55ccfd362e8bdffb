use std::sync::Arc;

use crate::config::Config;
use crate::router::AiRouter;

/// Process-wide handles, built once at startup and cloned into whatever
/// needs them.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub router: Arc<AiRouter>,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        let router = Arc::new(AiRouter::from_config(&config));
        Self {
            config: Arc::new(config),
            router,
        }
    }
}
