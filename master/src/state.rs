// master/src/state.rs

use common::{ClusterConfig, DfsResult};
use worker::FunctionRegistry;

use crate::{coordinator::JobCoordinator, dfs::DfsClient};

/// Estado compartido por los handlers HTTP y el monitor.
#[derive(Clone)]
pub struct AppState {
    pub fs: DfsClient,
    pub jobs: JobCoordinator,
    pub superuser: String,
}

impl AppState {
    /// Abre el sistema de archivos del config y le engancha un coordinador
    /// con las funciones incluidas (wordcount, sum, ...).
    pub fn new(config: &ClusterConfig) -> DfsResult<Self> {
        let fs = DfsClient::open(config)?;
        let jobs = JobCoordinator::new(fs.clone(), FunctionRegistry::with_builtins(), config);
        Ok(Self {
            fs,
            jobs,
            superuser: config.superuser.clone(),
        })
    }

    /// Cliente del DFS que actúa como `user`.
    pub fn fs_for(&self, user: &str) -> DfsClient {
        self.fs.with_user(user)
    }
}
