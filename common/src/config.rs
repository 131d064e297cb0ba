use std::{env, fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{DfsError, DfsResult};

const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;
const DEFAULT_REPLICATION: u32 = 3;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_MAX_TASK_ATTEMPTS: u32 = 3;
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 60;

/// Cuántas réplicas deben confirmar antes de dar un bloque por escrito.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteQuorum {
    All,
    Majority,
}

impl WriteQuorum {
    pub fn required(&self, replicas: usize) -> usize {
        match self {
            WriteQuorum::All => replicas,
            WriteQuorum::Majority => replicas / 2 + 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNodeSpec {
    pub id: String,
    pub rack: String,
    /// Capacidad en bytes; si falta se usa el espacio libre del disco
    #[serde(default)]
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub data_dir: PathBuf,
    pub listen_addr: String,

    pub block_size: u64,
    pub replication: u32,
    pub write_quorum: WriteQuorum,
    pub write_timeout_ms: u64,
    pub write_retries: u32,
    /// Nodos con menos espacio libre que esto no reciben réplicas
    pub min_free_bytes: u64,

    pub superuser: String,
    pub permissions_enabled: bool,

    pub max_task_attempts: u32,
    pub task_timeout_secs: u64,
    pub worker_pool_size: usize,

    pub monitor_interval_secs: u64,
    pub checkpoint_every: usize,

    pub datanodes: Vec<DataNodeSpec>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/minidfs"),
            listen_addr: "0.0.0.0:8080".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            replication: DEFAULT_REPLICATION,
            write_quorum: WriteQuorum::Majority,
            write_timeout_ms: 10_000,
            write_retries: 2,
            min_free_bytes: 0,
            superuser: "root".to_string(),
            permissions_enabled: true,
            max_task_attempts: DEFAULT_MAX_TASK_ATTEMPTS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            worker_pool_size: DEFAULT_WORKERS,
            monitor_interval_secs: 10,
            checkpoint_every: 1000,
            datanodes: vec![
                DataNodeSpec {
                    id: "dn1".to_string(),
                    rack: "rack-a".to_string(),
                    capacity: None,
                },
                DataNodeSpec {
                    id: "dn2".to_string(),
                    rack: "rack-b".to_string(),
                    capacity: None,
                },
                DataNodeSpec {
                    id: "dn3".to_string(),
                    rack: "rack-c".to_string(),
                    capacity: None,
                },
            ],
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl ClusterConfig {
    /// Carga la configuración:
    /// 1. archivo JSON en MINIDFS_CONFIG (si está definida)
    /// 2. variables de entorno MINIDFS_* por encima
    pub fn load() -> DfsResult<Self> {
        let mut cfg = match env::var("MINIDFS_CONFIG") {
            Ok(path) => {
                let raw = fs::read_to_string(&path)?;
                serde_json::from_str::<ClusterConfig>(&raw)?
            }
            Err(_) => ClusterConfig::default(),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(dir) = env::var("MINIDFS_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = env::var("MINIDFS_LISTEN") {
            self.listen_addr = addr;
        }
        self.block_size = env_parse("MINIDFS_BLOCK_SIZE").unwrap_or(self.block_size);
        self.replication = env_parse("MINIDFS_REPLICATION").unwrap_or(self.replication);
        self.worker_pool_size = env_parse("MINIDFS_WORKERS").unwrap_or(self.worker_pool_size);
        self.max_task_attempts =
            env_parse("MINIDFS_MAX_TASK_ATTEMPTS").unwrap_or(self.max_task_attempts);
        self.task_timeout_secs =
            env_parse("MINIDFS_TASK_TIMEOUT_SECS").unwrap_or(self.task_timeout_secs);
    }

    pub fn validate(&self) -> DfsResult<()> {
        if self.block_size == 0 {
            return Err(DfsError::invalid_argument("block_size debe ser > 0"));
        }
        if self.replication == 0 {
            return Err(DfsError::invalid_argument("replication debe ser > 0"));
        }
        if self.worker_pool_size == 0 {
            return Err(DfsError::invalid_argument("worker_pool_size debe ser > 0"));
        }
        if self.max_task_attempts == 0 {
            return Err(DfsError::invalid_argument("max_task_attempts debe ser > 0"));
        }
        if self.datanodes.is_empty() {
            return Err(DfsError::invalid_argument("no hay datanodes configurados"));
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn namespace_dir(&self) -> PathBuf {
        self.data_dir.join("namespace")
    }

    pub fn node_dir(&self, node_id: &str) -> PathBuf {
        self.data_dir.join("nodes").join(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_quorum() {
        assert_eq!(WriteQuorum::Majority.required(3), 2);
        assert_eq!(WriteQuorum::Majority.required(1), 1);
        assert_eq!(WriteQuorum::Majority.required(2), 2);
        assert_eq!(WriteQuorum::All.required(3), 3);
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = ClusterConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.datanodes.len(), 3);
    }

    #[test]
    fn validate_rejects_zero_block_size() {
        let cfg = ClusterConfig {
            block_size: 0,
            ..ClusterConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(DfsError::InvalidArgument(_))));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: ClusterConfig =
            serde_json::from_str(r#"{"block_size": 1024, "write_quorum": "all"}"#).unwrap();
        assert_eq!(cfg.block_size, 1024);
        assert_eq!(cfg.write_quorum, WriteQuorum::All);
        assert_eq!(cfg.replication, DEFAULT_REPLICATION);
    }

    #[test]
    fn env_overrides_block_size() {
        env::set_var("MINIDFS_BLOCK_SIZE", "2048");
        let mut cfg = ClusterConfig::default();
        cfg.apply_env();
        env::remove_var("MINIDFS_BLOCK_SIZE");
        assert_eq!(cfg.block_size, 2048);
    }
}
