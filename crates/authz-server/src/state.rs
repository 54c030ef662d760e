use std::path::Path;
use std::sync::Arc;

use control_plane::{
    LocalCache, RepositoryReplicationSource, SystemConfig, SystemConfigLoader,
};
use kernel::{CacheRefresher, Kernel, RequestGate};

use crate::error::AppError;

pub struct AppState {
    pub kernel: Arc<Kernel>,
    pub cache: Arc<LocalCache>,
    pub refresher: Arc<CacheRefresher>,
    pub gate: Arc<RequestGate>,
    /// Present when this node owns the repository and serves replication.
    pub local_source: Option<Arc<RepositoryReplicationSource>>,
    pub admin_token: String,
}

pub fn load_config(path: &Path) -> Result<SystemConfig, AppError> {
    Ok(SystemConfigLoader::from_path(path)?)
}

pub fn create_default_config(path: &Path) -> Result<String, AppError> {
    let content = SystemConfigLoader::default_template();
    std::fs::write(path, content.as_bytes())?;
    Ok(content)
}
