use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type BlockId = u64;
pub type NodeId = String;

/// Permisos por defecto, estilo POSIX.
pub const DEFAULT_DIR_PERMISSION: u16 = 0o755;
pub const DEFAULT_FILE_PERMISSION: u16 = 0o644;

/// Una copia de un bloque en un nodo concreto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaLocation {
    pub node_id: NodeId,
    /// Ruta del archivo de bloque dentro del nodo
    pub storage_path: String,
}

/// Referencia a un bloque inmutable de un archivo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub block_id: BlockId,
    pub length: u64,
    pub locations: Vec<ReplicaLocation>,
}

impl BlockRef {
    pub fn hosts(&self) -> Vec<&str> {
        self.locations.iter().map(|l| l.node_id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    File,
    Directory,
}

/// Metadatos de una entrada del namespace, tal como se devuelven al cliente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub kind: FileKind,
    pub length: u64,
    pub replication: u32,
    pub owner: String,
    pub permission: u16,
    pub modification_time: DateTime<Utc>,

    /// Bloques con sus ubicaciones (vacío para directorios)
    #[serde(default)]
    pub blocks: Vec<BlockRef>,
}

impl FileStatus {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

/// Estado de un nodo de almacenamiento, lo que usa la política de ubicación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub rack: String,
    pub alive: bool,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub in_flight_writes: u32,
    pub block_count: u64,
}

/// Resultado de cerrar un handle de escritura.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteSummary {
    pub path: String,
    pub bytes: u64,
    pub blocks: Vec<BlockRef>,
    #[serde(default)]
    pub warnings: Vec<crate::error::DfsWarning>,
}

/// Informe de la revisión de integridad del namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsckReport {
    pub files_checked: u64,
    pub blocks_checked: u64,
    pub under_replicated: Vec<BlockId>,
    pub repaired: Vec<BlockId>,
    /// Archivos con algún bloque sin réplicas sanas
    pub corrupt_files: Vec<String>,
}

impl FsckReport {
    pub fn is_healthy(&self) -> bool {
        self.corrupt_files.is_empty() && self.under_replicated.is_empty()
    }
}
