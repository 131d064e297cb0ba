//! Persistencia del namespace: imagen completa (fsimage.json) más un log de
//! ediciones en JSONL (edits.log) con las mutaciones posteriores.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use common::{BlockId, BlockRef, DfsError, DfsResult, FileKind, ReplicaLocation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const IMAGE_FILE: &str = "fsimage.json";
const EDITS_FILE: &str = "edits.log";

/// Una mutación del namespace, tal como se guarda en el log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    Mkdir {
        path: String,
        owner: String,
        permission: u16,
        mtime: DateTime<Utc>,
    },
    CreateFile {
        path: String,
        owner: String,
        permission: u16,
        replication: u32,
        mtime: DateTime<Utc>,
    },
    AddBlock {
        path: String,
        block: BlockRef,
    },
    CompleteFile {
        path: String,
        mtime: DateTime<Utc>,
    },
    Delete {
        path: String,
        recursive: bool,
        mtime: DateTime<Utc>,
    },
    Rename {
        src: String,
        dst: String,
        mtime: DateTime<Utc>,
    },
    SetPermission {
        path: String,
        permission: u16,
    },
    SetOwner {
        path: String,
        owner: String,
    },
    SetLocations {
        path: String,
        block_id: BlockId,
        locations: Vec<ReplicaLocation>,
    },
}

/// Entrada de la imagen; las entradas van en pre-orden (padres primero).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub path: String,
    pub kind: FileKind,
    pub owner: String,
    pub permission: u16,
    pub mtime: DateTime<Utc>,
    #[serde(default)]
    pub replication: u32,
    #[serde(default)]
    pub blocks: Vec<BlockRef>,
    #[serde(default)]
    pub under_construction: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsImage {
    pub next_block_id: BlockId,
    pub entries: Vec<ImageEntry>,
}

pub trait Journal: Send + Sync {
    /// Añade una edición; cuando vuelve Ok la edición es durable.
    fn append(&self, op: &EditOp) -> DfsResult<()>;

    /// Última imagen (si hay) y ediciones posteriores, en orden.
    fn load(&self) -> DfsResult<(Option<FsImage>, Vec<EditOp>)>;

    /// Guarda una imagen nueva y vacía el log.
    fn checkpoint(&self, image: &FsImage) -> DfsResult<()>;

    /// Ediciones en el log desde el último checkpoint.
    fn pending_edits(&self) -> usize;
}

/// Journal que no guarda nada (namespace sólo en memoria).
#[derive(Debug, Default)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn append(&self, _op: &EditOp) -> DfsResult<()> {
        Ok(())
    }

    fn load(&self) -> DfsResult<(Option<FsImage>, Vec<EditOp>)> {
        Ok((None, Vec::new()))
    }

    fn checkpoint(&self, _image: &FsImage) -> DfsResult<()> {
        Ok(())
    }

    fn pending_edits(&self) -> usize {
        0
    }
}

#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    log: Mutex<File>,
    edits: AtomicUsize,
}

impl FileJournal {
    pub fn open(dir: impl Into<PathBuf>) -> DfsResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let edits_path = dir.join(EDITS_FILE);
        let existing = drop_torn_tail(&edits_path)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&edits_path)?;

        Ok(Self {
            dir,
            log: Mutex::new(log),
            edits: AtomicUsize::new(existing),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Corta el log justo después del último salto de línea, para que la próxima
/// edición no quede pegada a una línea a medias. Devuelve cuántas ediciones
/// completas quedan.
fn drop_torn_tail(edits_path: &Path) -> DfsResult<usize> {
    let raw = match fs::read(edits_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let keep = raw.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    if keep < raw.len() {
        warn!(
            "journal: descartando {} bytes de una edición incompleta",
            raw.len() - keep
        );
        let f = OpenOptions::new().write(true).open(edits_path)?;
        f.set_len(keep as u64)?;
        f.sync_all()?;
    }

    Ok(raw[..keep]
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .count())
}

fn journal_err(e: impl std::fmt::Display) -> DfsError {
    DfsError::Journal(e.to_string())
}

impl Journal for FileJournal {
    fn append(&self, op: &EditOp) -> DfsResult<()> {
        let mut line = serde_json::to_vec(op)?;
        line.push(b'\n');

        let mut log = self.log.lock();
        log.write_all(&line).map_err(journal_err)?;
        log.sync_data().map_err(journal_err)?;
        self.edits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> DfsResult<(Option<FsImage>, Vec<EditOp>)> {
        let image_path = self.dir.join(IMAGE_FILE);
        let image = if image_path.exists() {
            let raw = fs::read(&image_path)?;
            Some(serde_json::from_slice::<FsImage>(&raw)?)
        } else {
            None
        };

        let mut ops = Vec::new();
        let edits_path = self.dir.join(EDITS_FILE);
        if edits_path.exists() {
            let lines: Vec<String> = BufReader::new(File::open(&edits_path)?)
                .lines()
                .collect::<Result<_, _>>()?;
            let total = lines.len();

            for (idx, line) in lines.into_iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EditOp>(&line) {
                    Ok(op) => ops.push(op),
                    // la última línea puede quedar a medias si el proceso murió escribiendo
                    Err(e) if idx + 1 == total => {
                        warn!("ignorando última edición incompleta del journal: {}", e);
                    }
                    Err(e) => return Err(journal_err(format!("edición {} ilegible: {}", idx, e))),
                }
            }
        }

        info!(
            "journal cargado: imagen={} ediciones={}",
            image.is_some(),
            ops.len()
        );
        Ok((image, ops))
    }

    fn checkpoint(&self, image: &FsImage) -> DfsResult<()> {
        let tmp = self.dir.join(format!("{}.tmp", IMAGE_FILE));
        let data = serde_json::to_vec(image)?;
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&data)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(IMAGE_FILE))?;

        let log = self.log.lock();
        log.set_len(0).map_err(journal_err)?;
        log.sync_all().map_err(journal_err)?;
        self.edits.store(0, Ordering::SeqCst);

        info!("checkpoint del namespace: {} entradas", image.entries.len());
        Ok(())
    }

    fn pending_edits(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkdir(path: &str) -> EditOp {
        EditOp::Mkdir {
            path: path.to_string(),
            owner: "root".to_string(),
            permission: 0o755,
            mtime: Utc::now(),
        }
    }

    #[test]
    fn edits_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let j = FileJournal::open(dir.path()).unwrap();
            j.append(&mkdir("/test")).unwrap();
            j.append(&mkdir("/test/input")).unwrap();
            assert_eq!(j.pending_edits(), 2);
        }

        let j = FileJournal::open(dir.path()).unwrap();
        assert_eq!(j.pending_edits(), 2);
        let (image, ops) = j.load().unwrap();
        assert!(image.is_none());
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[1], EditOp::Mkdir { path, .. } if path == "/test/input"));
    }

    #[test]
    fn checkpoint_truncates_log() {
        let dir = TempDir::new().unwrap();
        let j = FileJournal::open(dir.path()).unwrap();
        j.append(&mkdir("/a")).unwrap();

        let image = FsImage {
            next_block_id: 42,
            entries: Vec::new(),
        };
        j.checkpoint(&image).unwrap();
        assert_eq!(j.pending_edits(), 0);

        j.append(&mkdir("/b")).unwrap();
        let (image, ops) = j.load().unwrap();
        assert_eq!(image.unwrap().next_block_id, 42);
        assert_eq!(ops, vec![mkdir_with_same_mtime(&ops[0], "/b")]);
    }

    fn mkdir_with_same_mtime(op: &EditOp, path: &str) -> EditOp {
        match op {
            EditOp::Mkdir { mtime, .. } => EditOp::Mkdir {
                path: path.to_string(),
                owner: "root".to_string(),
                permission: 0o755,
                mtime: *mtime,
            },
            other => other.clone(),
        }
    }

    #[test]
    fn torn_last_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        {
            let j = FileJournal::open(dir.path()).unwrap();
            j.append(&mkdir("/a")).unwrap();
        }
        let mut f = OpenOptions::new()
            .append(true)
            .open(dir.path().join(EDITS_FILE))
            .unwrap();
        f.write_all(b"{\"op\":\"mkdir\",\"pa").unwrap();

        let j = FileJournal::open(dir.path()).unwrap();
        let (_, ops) = j.load().unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn appends_after_a_torn_line_survive_restart() {
        let dir = TempDir::new().unwrap();
        {
            let j = FileJournal::open(dir.path()).unwrap();
            j.append(&mkdir("/a")).unwrap();
        }
        let mut f = OpenOptions::new()
            .append(true)
            .open(dir.path().join(EDITS_FILE))
            .unwrap();
        f.write_all(b"{\"op\":\"mkdir\",\"pa").unwrap();
        drop(f);

        {
            let j = FileJournal::open(dir.path()).unwrap();
            assert_eq!(j.pending_edits(), 1);
            assert_eq!(j.load().unwrap().1.len(), 1);
            j.append(&mkdir("/b")).unwrap();
            j.append(&mkdir("/c")).unwrap();
        }

        let j = FileJournal::open(dir.path()).unwrap();
        assert_eq!(j.pending_edits(), 3);
        let (_, ops) = j.load().unwrap();
        let paths: Vec<&str> = ops
            .iter()
            .map(|op| match op {
                EditOp::Mkdir { path, .. } => path.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(paths, vec!["/a", "/b", "/c"]);
    }
}
