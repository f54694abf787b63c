use std::sync::Arc;

use analytics_buffer::DurableBuffer;
use analytics_config::AppConfig;
use analytics_live::LiveHub;
use analytics_security::KeyValueStore;
use analytics_store::Pool;

/// Explicit application context threaded through every handler — no
/// hidden module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub kv: Arc<dyn KeyValueStore>,
    pub buffer: Arc<dyn DurableBuffer>,
    pub hub: Arc<LiveHub>,
    pub config: Arc<AppConfig>,
}
