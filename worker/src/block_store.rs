//! Almacén de bloques en disco local.
//!
//! Cada bloque es un archivo `current/blk_<id>` con el payload seguido de un
//! registro de checksum (ver `common::checksum::Trailer`). Las escrituras van
//! primero a `tmp/` y se publican con un hard link al terminar, así nunca
//! queda visible un bloque a medias ni se pisa uno que ya existe.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use common::{
    checksum::{StreamingChecksum, Trailer, TRAILER_LEN},
    BlockId, DfsError, DfsResult,
};
use tracing::{debug, warn};

const CURRENT_DIR: &str = "current";
const TMP_DIR: &str = "tmp";
const COPY_BUF: usize = 64 * 1024;

#[derive(Debug)]
pub struct BlockStore {
    root: PathBuf,
    owner: String,
}

impl BlockStore {
    /// Abre (o crea) un almacén en `root`. Borra los temporales que haya
    /// dejado un proceso interrumpido.
    pub fn open(root: impl Into<PathBuf>, owner: &str) -> DfsResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(CURRENT_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;

        let store = Self {
            root,
            owner: owner.to_string(),
        };
        store.clean_tmp()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn block_path(&self, block_id: BlockId) -> PathBuf {
        self.root.join(CURRENT_DIR).join(format!("blk_{}", block_id))
    }

    fn tmp_path(&self, block_id: BlockId) -> PathBuf {
        self.root
            .join(TMP_DIR)
            .join(format!("blk_{}.{}.tmp", block_id, uuid::Uuid::new_v4()))
    }

    fn clean_tmp(&self) -> DfsResult<()> {
        for entry in fs::read_dir(self.root.join(TMP_DIR))?.flatten() {
            warn!(
                "{}: borrando temporal huérfano {}",
                self.owner,
                entry.path().display()
            );
            let _ = fs::remove_file(entry.path());
        }
        Ok(())
    }

    pub fn write_block(&self, block_id: BlockId, data: &[u8]) -> DfsResult<PathBuf> {
        self.write_block_from(block_id, data)
    }

    /// Escribe un bloque leyendo de `reader`. Si el reader falla a mitad,
    /// el temporal se borra y el bloque no existe.
    pub fn write_block_from<R: Read>(&self, block_id: BlockId, mut reader: R) -> DfsResult<PathBuf> {
        let final_path = self.block_path(block_id);
        // atajo; la comprobación que vale es la del link
        if final_path.exists() {
            return Err(DfsError::BlockExists(block_id));
        }

        let tmp_path = self.tmp_path(block_id);
        let res = (|| -> io::Result<()> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            let mut checksum = StreamingChecksum::new();
            let mut buf = vec![0u8; COPY_BUF];

            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                checksum.update(&buf[..n]);
                writer.write_all(&buf[..n])?;
            }

            writer.write_all(&checksum.trailer().encode())?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = res {
            let _ = fs::remove_file(&tmp_path);
            warn!("{}: escritura del bloque {} falló: {}", self.owner, block_id, e);
            return Err(DfsError::Io(e));
        }

        // link(2) falla si el destino existe: dos escritores del mismo id no
        // se pisan
        let linked = fs::hard_link(&tmp_path, &final_path);
        if let Err(e) = fs::remove_file(&tmp_path) {
            warn!("{}: no se pudo borrar {}: {}", self.owner, tmp_path.display(), e);
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(DfsError::BlockExists(block_id));
            }
            Err(e) => return Err(DfsError::Io(e)),
        }
        sync_dir(&self.root.join(CURRENT_DIR))?;

        debug!("{}: bloque {} escrito en {}", self.owner, block_id, final_path.display());
        Ok(final_path)
    }

    /// Lee un bloque y verifica su checksum.
    pub fn read_block(&self, block_id: BlockId) -> DfsResult<Vec<u8>> {
        let path = self.block_path(block_id);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DfsError::BlockNotFound(block_id))
            }
            Err(e) => return Err(DfsError::Io(e)),
        };

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        if raw.len() < TRAILER_LEN {
            return Err(self.corrupted(block_id, "archivo más corto que el trailer"));
        }
        let split = raw.len() - TRAILER_LEN;
        let trailer = Trailer::decode(&raw[split..])
            .ok_or_else(|| self.corrupted(block_id, "trailer ilegible"))?;

        raw.truncate(split);
        if !trailer.verify(&raw) {
            warn!("{}: checksum incorrecto en bloque {}", self.owner, block_id);
            return Err(self.corrupted(block_id, "checksum no coincide"));
        }
        Ok(raw)
    }

    fn corrupted(&self, block_id: BlockId, reason: &str) -> DfsError {
        DfsError::Corrupted {
            block_id,
            node: self.owner.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn delete_block(&self, block_id: BlockId) -> DfsResult<()> {
        match fs::remove_file(self.block_path(block_id)) {
            Ok(()) => {
                debug!("{}: bloque {} borrado", self.owner, block_id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(DfsError::BlockNotFound(block_id)),
            Err(e) => Err(DfsError::Io(e)),
        }
    }

    pub fn has_block(&self, block_id: BlockId) -> bool {
        self.block_path(block_id).is_file()
    }

    /// Ids de todos los bloques presentes (block report).
    pub fn block_report(&self) -> DfsResult<Vec<BlockId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(CURRENT_DIR))?.flatten() {
            let name = entry.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("blk_"))
                .and_then(|n| n.parse::<BlockId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Bytes ocupados en disco (payload + trailers).
    pub fn used_bytes(&self) -> DfsResult<u64> {
        let mut total = 0;
        for entry in fs::read_dir(self.root.join(CURRENT_DIR))?.flatten() {
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
        Ok(total)
    }
}

/// Persiste las entradas de un directorio (el link recién creado).
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
