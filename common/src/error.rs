use std::io;

use thiserror::Error;

use crate::fs::{BlockId, NodeId};

pub type DfsResult<T> = Result<T, DfsError>;

/// Todos los errores del sistema de archivos y del motor de jobs.
#[derive(Debug, Error)]
pub enum DfsError {
    #[error("no existe: {0}")]
    NotFound(String),

    #[error("ya existe: {0}")]
    AlreadyExists(String),

    #[error("no existe el directorio padre de {0}")]
    ParentMissing(String),

    #[error("no es un directorio: {0}")]
    NotADirectory(String),

    #[error("no es un archivo: {0}")]
    NotAFile(String),

    #[error("directorio no vacío: {0}")]
    NotEmpty(String),

    #[error("ruta inválida: {0}")]
    InvalidPath(String),

    #[error("argumento inválido: {0}")]
    InvalidArgument(String),

    /// Fallo de E/S transitorio, se puede reintentar.
    #[error("fallo de E/S: {0}")]
    Io(#[from] io::Error),

    /// Checksum incorrecto: no reintentar en esta réplica, probar otra.
    #[error("bloque {block_id} corrupto en {node}: {reason}")]
    Corrupted {
        block_id: BlockId,
        node: NodeId,
        reason: String,
    },

    #[error("bloque {0} no encontrado")]
    BlockNotFound(BlockId),

    #[error("bloque {0} ya existe")]
    BlockExists(BlockId),

    #[error("quorum no alcanzado para bloque {block_id}: {acked}/{required} réplicas")]
    QuorumNotReached {
        block_id: BlockId,
        acked: usize,
        required: usize,
    },

    #[error("no hay nodos elegibles para el bloque")]
    NoEligibleNodes,

    #[error("permiso denegado: usuario {user} no puede {access} {path}")]
    PermissionDenied {
        user: String,
        path: String,
        access: String,
    },

    #[error("función desconocida: {0}")]
    UnknownFunction(String),

    #[error("job desconocido: {0}")]
    UnknownJob(String),

    #[error("tarea {task_id} falló (intento {attempt}): {message}")]
    TaskFailed {
        task_id: String,
        attempt: u32,
        message: String,
    },

    #[error("job {job_id} falló: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("journal: {0}")]
    Journal(String),

    #[error("serialización: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DfsError {
    /// Errores transitorios que el cliente puede reintentar por su cuenta.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DfsError::Io(_) | DfsError::QuorumNotReached { .. })
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        DfsError::NotFound(path.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DfsError::InvalidArgument(msg.into())
    }
}

/// Avisos no fatales que acompañan a una escritura exitosa.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DfsWarning {
    DegradedReplication {
        block_id: BlockId,
        wanted: u32,
        got: u32,
    },
}

impl std::fmt::Display for DfsWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfsWarning::DegradedReplication {
                block_id,
                wanted,
                got,
            } => write!(
                f,
                "replicación degradada en bloque {}: {}/{} réplicas",
                block_id, got, wanted
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_quorum_errors_are_retryable() {
        let io = DfsError::Io(io::Error::new(io::ErrorKind::TimedOut, "lento"));
        assert!(io.is_retryable());

        let quorum = DfsError::QuorumNotReached {
            block_id: 7,
            acked: 1,
            required: 2,
        };
        assert!(quorum.is_retryable());

        let corrupted = DfsError::Corrupted {
            block_id: 7,
            node: "dn1".to_string(),
            reason: "crc".to_string(),
        };
        assert!(!corrupted.is_retryable());
        assert!(!DfsError::not_found("/a").is_retryable());
    }

    #[test]
    fn warning_display_mentions_block() {
        let w = DfsWarning::DegradedReplication {
            block_id: 3,
            wanted: 3,
            got: 1,
        };
        assert!(w.to_string().contains("bloque 3"));
    }
}
