//! Control de acceso a rutas del namespace.

use std::fmt;

use common::{DfsError, DfsResult, FileStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "leer"),
            Access::Write => write!(f, "escribir"),
        }
    }
}

pub trait AccessPolicy: Send + Sync {
    fn check(&self, user: &str, target: &FileStatus, access: Access) -> DfsResult<()>;
}

/// No comprueba nada.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _user: &str, _target: &FileStatus, _access: Access) -> DfsResult<()> {
        Ok(())
    }
}

/// Permisos al estilo POSIX, sin grupos: los bits de dueño para el dueño y
/// los de "otros" para el resto. El superusuario pasa siempre.
#[derive(Debug, Clone)]
pub struct PosixPolicy {
    superuser: String,
    enabled: bool,
}

impl PosixPolicy {
    pub fn new(superuser: impl Into<String>, enabled: bool) -> Self {
        Self {
            superuser: superuser.into(),
            enabled,
        }
    }
}

impl AccessPolicy for PosixPolicy {
    fn check(&self, user: &str, target: &FileStatus, access: Access) -> DfsResult<()> {
        if !self.enabled || user == self.superuser {
            return Ok(());
        }

        let bits = if user == target.owner {
            (target.permission >> 6) & 0o7
        } else {
            target.permission & 0o7
        };
        let needed = match access {
            Access::Read => 0o4,
            Access::Write => 0o2,
        };

        if bits & needed != 0 {
            Ok(())
        } else {
            Err(DfsError::PermissionDenied {
                user: user.to_string(),
                path: target.path.clone(),
                access: access.to_string(),
            })
        }
    }
}
