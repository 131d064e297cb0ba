use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

use common::{BlockId, DataNodeSpec, DfsError, DfsResult, NodeId, NodeReport};
use sysinfo::{DiskExt, System, SystemExt};
use tracing::{info, warn};

use crate::block_store::BlockStore;

/// Nodo de almacenamiento: un BlockStore más su estado (rack, carga, vida).
#[derive(Debug)]
pub struct DataNode {
    id: NodeId,
    rack: String,
    capacity: Option<u64>,
    store: BlockStore,
    in_flight: Arc<AtomicU32>,
    alive: AtomicBool,
}

/// Mientras vive, cuenta como escritura en curso en el nodo.
pub struct InFlightGuard {
    counter: Arc<AtomicU32>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DataNode {
    pub fn open(spec: &DataNodeSpec, dir: impl Into<PathBuf>) -> DfsResult<Self> {
        let store = BlockStore::open(dir, &spec.id)?;
        info!(
            "datanode {} (rack {}) en {}",
            spec.id,
            spec.rack,
            store.root().display()
        );
        Ok(Self {
            id: spec.id.clone(),
            rack: spec.rack.clone(),
            capacity: spec.capacity,
            store,
            in_flight: Arc::new(AtomicU32::new(0)),
            alive: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rack(&self) -> &str {
        &self.rack
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Marca el nodo como caído o recuperado. Un nodo caído falla toda E/S.
    pub fn set_alive(&self, alive: bool) {
        let prev = self.alive.swap(alive, Ordering::SeqCst);
        if prev != alive {
            if alive {
                info!("datanode {} vuelve a estar disponible", self.id);
            } else {
                warn!("datanode {} marcado como caído", self.id);
            }
        }
    }

    fn ensure_alive(&self) -> DfsResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(DfsError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("datanode {} no responde", self.id),
            )))
        }
    }

    pub fn begin_write(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            counter: self.in_flight.clone(),
        }
    }

    pub fn in_flight_writes(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Escribe una réplica; devuelve la ruta del archivo de bloque en el nodo.
    pub fn write_block(&self, block_id: BlockId, data: &[u8]) -> DfsResult<String> {
        self.ensure_alive()?;
        let _guard = self.begin_write();
        let path = self.store.write_block(block_id, data)?;
        Ok(path.to_string_lossy().to_string())
    }

    pub fn write_block_from<R: Read>(&self, block_id: BlockId, reader: R) -> DfsResult<String> {
        self.ensure_alive()?;
        let _guard = self.begin_write();
        let path = self.store.write_block_from(block_id, reader)?;
        Ok(path.to_string_lossy().to_string())
    }

    pub fn read_block(&self, block_id: BlockId) -> DfsResult<Vec<u8>> {
        self.ensure_alive()?;
        self.store.read_block(block_id)
    }

    pub fn delete_block(&self, block_id: BlockId) -> DfsResult<()> {
        self.ensure_alive()?;
        self.store.delete_block(block_id)
    }

    pub fn has_block(&self, block_id: BlockId) -> bool {
        self.is_alive() && self.store.has_block(block_id)
    }

    pub fn block_path(&self, block_id: BlockId) -> PathBuf {
        self.store.block_path(block_id)
    }

    /// Espacio libre: capacidad configurada menos lo usado, o lo que diga el disco.
    pub fn free_bytes(&self, used: u64) -> u64 {
        match self.capacity {
            Some(cap) => cap.saturating_sub(used),
            None => disk_available_space(self.store.root()).unwrap_or(u64::MAX),
        }
    }

    pub fn report(&self) -> NodeReport {
        let used = self.store.used_bytes().unwrap_or(0);
        let block_count = self
            .store
            .block_report()
            .map(|ids| ids.len() as u64)
            .unwrap_or(0);

        NodeReport {
            node_id: self.id.clone(),
            rack: self.rack.clone(),
            alive: self.is_alive(),
            free_bytes: self.free_bytes(used),
            used_bytes: used,
            in_flight_writes: self.in_flight_writes(),
            block_count,
        }
    }

    pub fn block_report(&self) -> DfsResult<Vec<BlockId>> {
        self.ensure_alive()?;
        self.store.block_report()
    }
}

/// Espacio disponible del disco que contiene `path` (el punto de montaje
/// más largo que sea prefijo de la ruta).
fn disk_available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let mut sys = System::new();
    sys.refresh_disks_list();

    sys.disks()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}
