pub mod preview;
pub mod rules;

use std::sync::Arc;

use crate::config::Config;
use crate::services::ShardingKernel;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<ShardingKernel>,
    pub config: Config,
}
