pub mod config;
pub mod context;
pub mod memory;
pub mod serve;

use cmp_config::AppConfig;
use std::path::Path;

pub(crate) fn load_config(root: &Path) -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load(root).map_err(|e| format!("Failed to load config: {e}").into())
}
