//! Árbol de nombres del sistema de archivos (el "namenode").
//!
//! Los inodos viven en una arena indexada por `InodeId`; cada directorio
//! guarda a sus hijos por nombre. Todas las mutaciones se hacen con el lock de
//! escritura tomado durante el cambio completo y se registran en el journal
//! antes de devolver, así que un lector nunca ve un nodo a medio enlazar.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use common::{
    path, BlockId, BlockRef, DfsError, DfsResult, FileKind, FileStatus, ReplicaLocation,
    DEFAULT_DIR_PERMISSION,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::journal::{EditOp, FsImage, ImageEntry, Journal, NullJournal};

pub type InodeId = u64;

const ROOT_ID: InodeId = 0;

#[derive(Debug, Clone)]
pub enum INodeKind {
    Directory {
        children: BTreeMap<String, InodeId>,
    },
    File {
        blocks: Vec<BlockRef>,
        replication: u32,
        size: u64,
        under_construction: bool,
    },
}

#[derive(Debug, Clone)]
pub struct INode {
    pub id: InodeId,
    pub parent: Option<InodeId>,
    pub name: String,
    pub owner: String,
    pub permission: u16,
    pub mtime: DateTime<Utc>,
    pub kind: INodeKind,
}

impl INode {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, INodeKind::Directory { .. })
    }
}

/// Un archivo completo con sus bloques, tal como lo recorre fsck.
#[derive(Debug, Clone)]
pub struct FileBlocks {
    pub path: String,
    pub replication: u32,
    pub blocks: Vec<BlockRef>,
}

/* =========================
   Arena
   ========================= */

#[derive(Debug)]
struct Tree {
    inodes: HashMap<InodeId, INode>,
    next_inode: InodeId,
}

impl Tree {
    fn new(superuser: &str) -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(
            ROOT_ID,
            INode {
                id: ROOT_ID,
                parent: None,
                name: String::new(),
                owner: superuser.to_string(),
                permission: DEFAULT_DIR_PERMISSION,
                mtime: Utc::now(),
                kind: INodeKind::Directory {
                    children: BTreeMap::new(),
                },
            },
        );
        Self {
            inodes,
            next_inode: ROOT_ID + 1,
        }
    }

    fn node(&self, id: InodeId) -> DfsResult<&INode> {
        self.inodes
            .get(&id)
            .ok_or_else(|| DfsError::Journal(format!("inodo {} inexistente", id)))
    }

    fn node_mut(&mut self, id: InodeId) -> DfsResult<&mut INode> {
        self.inodes
            .get_mut(&id)
            .ok_or_else(|| DfsError::Journal(format!("inodo {} inexistente", id)))
    }

    fn children(&self, id: InodeId) -> Option<&BTreeMap<String, InodeId>> {
        match &self.inodes.get(&id)?.kind {
            INodeKind::Directory { children } => Some(children),
            INodeKind::File { .. } => None,
        }
    }

    fn children_mut(&mut self, id: InodeId) -> DfsResult<&mut BTreeMap<String, InodeId>> {
        match &mut self.node_mut(id)?.kind {
            INodeKind::Directory { children } => Ok(children),
            INodeKind::File { .. } => Err(DfsError::NotADirectory(id.to_string())),
        }
    }

    /// Resuelve una ruta ya normalizada, componente a componente.
    fn lookup(&self, path: &str) -> DfsResult<InodeId> {
        let mut cur = ROOT_ID;
        let mut walked = String::from(path::ROOT);

        for comp in path::components(path) {
            let children = self
                .children(cur)
                .ok_or_else(|| DfsError::NotADirectory(walked.clone()))?;
            cur = *children
                .get(comp)
                .ok_or_else(|| DfsError::NotFound(path.to_string()))?;
            walked = path::join(&walked, comp);
        }
        Ok(cur)
    }

    /// Padre (que debe existir y ser directorio) y nombre final de `path`.
    fn lookup_parent<'p>(&self, path: &'p str) -> DfsResult<(InodeId, &'p str)> {
        let parent_path = path::parent(path)
            .ok_or_else(|| DfsError::invalid_argument("la raíz no tiene padre"))?;

        let parent = match self.lookup(parent_path) {
            Ok(id) => id,
            Err(DfsError::NotFound(_)) => return Err(DfsError::ParentMissing(path.to_string())),
            Err(e) => return Err(e),
        };
        if self.children(parent).is_none() {
            return Err(DfsError::NotADirectory(parent_path.to_string()));
        }
        Ok((parent, path::file_name(path)))
    }

    fn insert(
        &mut self,
        parent: InodeId,
        name: &str,
        owner: &str,
        permission: u16,
        mtime: DateTime<Utc>,
        kind: INodeKind,
    ) -> DfsResult<InodeId> {
        let id = self.next_inode;
        self.next_inode += 1;

        self.children_mut(parent)?.insert(name.to_string(), id);
        self.node_mut(parent)?.mtime = mtime;
        self.inodes.insert(
            id,
            INode {
                id,
                parent: Some(parent),
                name: name.to_string(),
                owner: owner.to_string(),
                permission,
                mtime,
                kind,
            },
        );
        Ok(id)
    }

    /// Quita `id` y todo lo que cuelga de él; devuelve los bloques liberados.
    fn remove_subtree(&mut self, id: InodeId) -> Vec<BlockRef> {
        let mut freed = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.inodes.remove(&cur) {
                match node.kind {
                    INodeKind::Directory { children } => stack.extend(children.into_values()),
                    INodeKind::File { blocks, .. } => freed.extend(blocks),
                }
            }
        }
        freed
    }

    fn file_mut(&mut self, path: &str) -> DfsResult<&mut INode> {
        let id = self.lookup(path)?;
        let node = self.node_mut(id)?;
        if node.is_dir() {
            return Err(DfsError::NotAFile(path.to_string()));
        }
        Ok(node)
    }

    fn status(&self, id: InodeId, path: String) -> DfsResult<FileStatus> {
        let node = self.node(id)?;
        let (kind, length, replication, blocks) = match &node.kind {
            INodeKind::Directory { .. } => (FileKind::Directory, 0, 0, Vec::new()),
            INodeKind::File {
                blocks,
                replication,
                size,
                ..
            } => (FileKind::File, *size, *replication, blocks.clone()),
        };
        Ok(FileStatus {
            path,
            kind,
            length,
            replication,
            owner: node.owner.clone(),
            permission: node.permission,
            modification_time: node.mtime,
            blocks,
        })
    }

    fn file(&self, path: &str) -> DfsResult<&INode> {
        let node = self.node(self.lookup(path)?)?;
        if node.is_dir() {
            return Err(DfsError::NotAFile(path.to_string()));
        }
        Ok(node)
    }

    /// Comprueba que `op` se puede aplicar sin tocar nada. Si pasa, `apply`
    /// no falla por las precondiciones de la edición.
    fn check(&self, op: &EditOp) -> DfsResult<()> {
        match op {
            EditOp::Mkdir { path, .. } | EditOp::CreateFile { path, .. } => {
                let (parent, name) = self.lookup_parent(path)?;
                if self.children(parent).is_some_and(|c| c.contains_key(name)) {
                    return Err(DfsError::AlreadyExists(path.clone()));
                }
            }

            EditOp::AddBlock { path, block } => {
                if block.locations.is_empty() {
                    return Err(DfsError::invalid_argument(format!(
                        "bloque {} sin réplicas",
                        block.block_id
                    )));
                }
                self.file(path)?;
            }

            EditOp::CompleteFile { path, .. } => {
                self.file(path)?;
            }

            EditOp::Delete {
                path, recursive, ..
            } => {
                if path == path::ROOT {
                    return Err(DfsError::invalid_argument("no se puede borrar la raíz"));
                }
                let node = self.node(self.lookup(path)?)?;
                if let INodeKind::Directory { children } = &node.kind {
                    if !children.is_empty() && !recursive {
                        return Err(DfsError::NotEmpty(path.clone()));
                    }
                }
            }

            EditOp::Rename { src, dst, .. } => {
                if src == path::ROOT {
                    return Err(DfsError::invalid_argument("no se puede renombrar la raíz"));
                }
                self.lookup(src)?;
                if path::is_under(dst, src) {
                    return Err(DfsError::invalid_argument(format!(
                        "{} no puede moverse dentro de sí mismo ({})",
                        src, dst
                    )));
                }
                let (new_parent, new_name) = self.lookup_parent(dst)?;
                if self.children(new_parent).is_some_and(|c| c.contains_key(new_name)) {
                    return Err(DfsError::AlreadyExists(dst.clone()));
                }
            }

            EditOp::SetPermission { path, .. } | EditOp::SetOwner { path, .. } => {
                self.lookup(path)?;
            }

            EditOp::SetLocations { path, block_id, .. } => {
                if let INodeKind::File { blocks, .. } = &self.file(path)?.kind {
                    if !blocks.iter().any(|b| b.block_id == *block_id) {
                        return Err(DfsError::BlockNotFound(*block_id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Aplica una edición. Es lo mismo al operar que al reproducir el journal.
    /// Devuelve los bloques que quedan libres (sólo al borrar).
    fn apply(&mut self, op: &EditOp) -> DfsResult<Vec<BlockRef>> {
        self.check(op)?;

        match op {
            EditOp::Mkdir {
                path,
                owner,
                permission,
                mtime,
            } => {
                let (parent, name) = self.lookup_parent(path)?;
                let kind = INodeKind::Directory {
                    children: BTreeMap::new(),
                };
                self.insert(parent, name, owner, *permission, *mtime, kind)?;
            }

            EditOp::CreateFile {
                path,
                owner,
                permission,
                replication,
                mtime,
            } => {
                let (parent, name) = self.lookup_parent(path)?;
                let kind = INodeKind::File {
                    blocks: Vec::new(),
                    replication: *replication,
                    size: 0,
                    under_construction: true,
                };
                self.insert(parent, name, owner, *permission, *mtime, kind)?;
            }

            EditOp::AddBlock { path, block } => {
                let node = self.file_mut(path)?;
                if let INodeKind::File { blocks, .. } = &mut node.kind {
                    blocks.push(block.clone());
                }
            }

            EditOp::CompleteFile { path, mtime } => {
                let node = self.file_mut(path)?;
                node.mtime = *mtime;
                if let INodeKind::File {
                    blocks,
                    size,
                    under_construction,
                    ..
                } = &mut node.kind
                {
                    *size = blocks.iter().map(|b| b.length).sum();
                    *under_construction = false;
                }
            }

            EditOp::Delete { path, mtime, .. } => {
                let id = self.lookup(path)?;
                let node = self.node(id)?;
                let parent = node.parent;
                let name = node.name.clone();
                if let Some(parent) = parent {
                    self.children_mut(parent)?.remove(&name);
                    self.node_mut(parent)?.mtime = *mtime;
                }
                return Ok(self.remove_subtree(id));
            }

            EditOp::Rename { src, dst, mtime } => {
                let id = self.lookup(src)?;
                let (new_parent, new_name) = self.lookup_parent(dst)?;

                let node = self.node(id)?;
                let old_parent = node.parent;
                let old_name = node.name.clone();
                if let Some(old_parent) = old_parent {
                    self.children_mut(old_parent)?.remove(&old_name);
                    self.node_mut(old_parent)?.mtime = *mtime;
                }
                self.children_mut(new_parent)?.insert(new_name.to_string(), id);
                self.node_mut(new_parent)?.mtime = *mtime;

                let node = self.node_mut(id)?;
                node.parent = Some(new_parent);
                node.name = new_name.to_string();
            }

            EditOp::SetPermission { path, permission } => {
                let id = self.lookup(path)?;
                self.node_mut(id)?.permission = *permission;
            }

            EditOp::SetOwner { path, owner } => {
                let id = self.lookup(path)?;
                self.node_mut(id)?.owner = owner.clone();
            }

            EditOp::SetLocations {
                path,
                block_id,
                locations,
            } => {
                let node = self.file_mut(path)?;
                if let INodeKind::File { blocks, .. } = &mut node.kind {
                    let block = blocks
                        .iter_mut()
                        .find(|b| b.block_id == *block_id)
                        .ok_or(DfsError::BlockNotFound(*block_id))?;
                    block.locations = locations.clone();
                }
            }
        }
        Ok(Vec::new())
    }

    /// Recorrido en pre-orden: (ruta, id), hijos en orden de nombre.
    fn walk(&self, from: InodeId, from_path: &str) -> Vec<(String, InodeId)> {
        let mut out = Vec::new();
        let mut stack = vec![(from_path.to_string(), from)];
        while let Some((p, id)) = stack.pop() {
            if let Some(children) = self.children(id) {
                // al revés para que la pila los saque en orden
                for (name, child) in children.iter().rev() {
                    stack.push((path::join(&p, name), *child));
                }
            }
            out.push((p, id));
        }
        out
    }
}

/* =========================
   NameTree
   ========================= */

pub struct NameTree {
    tree: RwLock<Tree>,
    next_block_id: AtomicU64,
    journal: Arc<dyn Journal>,
}

impl std::fmt::Debug for NameTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameTree")
            .field("inodes", &self.tree.read().inodes.len())
            .field("next_block_id", &self.next_block_id.load(Ordering::SeqCst))
            .finish()
    }
}

impl NameTree {
    /// Árbol vacío en memoria, sin persistencia.
    pub fn new(superuser: &str) -> Self {
        Self::with_journal(superuser, Arc::new(NullJournal))
    }

    fn with_journal(superuser: &str, journal: Arc<dyn Journal>) -> Self {
        Self {
            tree: RwLock::new(Tree::new(superuser)),
            next_block_id: AtomicU64::new(1),
            journal,
        }
    }

    /// Reconstruye el árbol desde el journal: imagen más ediciones.
    /// Los archivos que quedaron en construcción se descartan.
    pub fn recover(superuser: &str, journal: Arc<dyn Journal>) -> DfsResult<Self> {
        let (image, edits) = journal.load()?;
        let names = Self::with_journal(superuser, journal);

        {
            let mut tree = names.tree.write();
            if let Some(image) = image {
                names.load_image(&mut tree, image)?;
            }
            for op in &edits {
                if let EditOp::AddBlock { block, .. } = op {
                    names.bump_block_id(block.block_id + 1);
                }
                tree.apply(op)?;
            }
        }

        let abandoned: Vec<String> = {
            let tree = names.tree.read();
            tree.walk(ROOT_ID, path::ROOT)
                .into_iter()
                .filter(|(_, id)| {
                    matches!(
                        tree.inodes.get(id).map(|n| &n.kind),
                        Some(INodeKind::File {
                            under_construction: true,
                            ..
                        })
                    )
                })
                .map(|(p, _)| p)
                .collect()
        };
        for p in abandoned {
            warn!("descartando archivo sin cerrar tras reinicio: {}", p);
            names.delete(&p, false)?;
        }

        info!(
            "namespace recuperado: {} ediciones reproducidas, próximo bloque {}",
            edits.len(),
            names.next_block_id.load(Ordering::SeqCst)
        );
        Ok(names)
    }

    fn load_image(&self, tree: &mut Tree, image: FsImage) -> DfsResult<()> {
        self.bump_block_id(image.next_block_id);

        for entry in image.entries {
            if entry.path == path::ROOT {
                let root = tree.node_mut(ROOT_ID)?;
                root.owner = entry.owner;
                root.permission = entry.permission;
                root.mtime = entry.mtime;
                continue;
            }

            let (parent, name) = tree.lookup_parent(&entry.path)?;
            let kind = match entry.kind {
                FileKind::Directory => INodeKind::Directory {
                    children: BTreeMap::new(),
                },
                FileKind::File => INodeKind::File {
                    size: entry.blocks.iter().map(|b| b.length).sum(),
                    blocks: entry.blocks,
                    replication: entry.replication,
                    under_construction: entry.under_construction,
                },
            };
            tree.insert(parent, name, &entry.owner, entry.permission, entry.mtime, kind)?;
        }
        Ok(())
    }

    /// Registra y aplica una edición con el lock de escritura ya tomado.
    /// La edición va al journal antes de tocar la memoria: si el journal
    /// falla, el árbol queda como estaba.
    fn commit(&self, tree: &mut Tree, op: EditOp) -> DfsResult<Vec<BlockRef>> {
        tree.check(&op)?;
        self.journal.append(&op)?;
        let freed = tree.apply(&op)?;
        debug!("namespace: {:?}", op);
        Ok(freed)
    }

    pub fn resolve(&self, path: &str) -> DfsResult<INode> {
        let path = path::normalize(path)?;
        let tree = self.tree.read();
        let id = tree.lookup(&path)?;
        tree.node(id).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    pub fn status(&self, path: &str) -> DfsResult<FileStatus> {
        let path = path::normalize(path)?;
        let tree = self.tree.read();
        let id = tree.lookup(&path)?;
        tree.status(id, path)
    }

    pub fn create(
        &self,
        path: &str,
        is_dir: bool,
        owner: &str,
        permission: u16,
        replication: u32,
    ) -> DfsResult<FileStatus> {
        let path = path::normalize(path)?;
        let mtime = Utc::now();
        let op = if is_dir {
            EditOp::Mkdir {
                path: path.clone(),
                owner: owner.to_string(),
                permission,
                mtime,
            }
        } else {
            EditOp::CreateFile {
                path: path.clone(),
                owner: owner.to_string(),
                permission,
                replication,
                mtime,
            }
        };

        let mut tree = self.tree.write();
        self.commit(&mut tree, op)?;
        let id = tree.lookup(&path)?;
        tree.status(id, path)
    }

    /// Crea `path` y los directorios intermedios que falten. Si ya existe
    /// como directorio no hace nada.
    pub fn mkdirs(&self, path: &str, owner: &str, permission: u16) -> DfsResult<FileStatus> {
        let path = path::normalize(path)?;
        let mut tree = self.tree.write();

        let mut cur = String::from(path::ROOT);
        for comp in path::components(&path) {
            cur = path::join(&cur, comp);
            match tree.lookup(&cur) {
                Ok(id) => {
                    if !tree.node(id)?.is_dir() {
                        return Err(DfsError::NotADirectory(cur));
                    }
                }
                Err(DfsError::NotFound(_)) => {
                    let op = EditOp::Mkdir {
                        path: cur.clone(),
                        owner: owner.to_string(),
                        permission,
                        mtime: Utc::now(),
                    };
                    self.commit(&mut tree, op)?;
                }
                Err(e) => return Err(e),
            }
        }

        let id = tree.lookup(&path)?;
        tree.status(id, path)
    }

    /// Borra `path`; devuelve los bloques que quedaron sin dueño.
    pub fn delete(&self, path: &str, recursive: bool) -> DfsResult<Vec<BlockRef>> {
        let path = path::normalize(path)?;
        let mut tree = self.tree.write();
        let op = EditOp::Delete {
            path,
            recursive,
            mtime: Utc::now(),
        };
        let freed = self.commit(&mut tree, op)?;
        Ok(freed)
    }

    /// Hijos directos de un directorio, ordenados por nombre.
    pub fn list(&self, path: &str) -> DfsResult<Vec<FileStatus>> {
        let path = path::normalize(path)?;
        let tree = self.tree.read();
        let id = tree.lookup(&path)?;
        let children = tree
            .children(id)
            .ok_or_else(|| DfsError::NotADirectory(path.clone()))?;

        children
            .iter()
            .map(|(name, child)| tree.status(*child, path::join(&path, name)))
            .collect()
    }

    pub fn append_block(&self, path: &str, block: BlockRef) -> DfsResult<()> {
        let path = path::normalize(path)?;
        self.bump_block_id(block.block_id + 1);
        let mut tree = self.tree.write();
        self.commit(&mut tree, EditOp::AddBlock { path, block })?;
        Ok(())
    }

    /// Cierra un archivo. `size` tiene que ser la suma de sus bloques.
    pub fn complete_file(&self, path: &str, size: u64) -> DfsResult<FileStatus> {
        let path = path::normalize(path)?;
        let mut tree = self.tree.write();

        let id = tree.lookup(&path)?;
        match &tree.node(id)?.kind {
            INodeKind::File { blocks, .. } => {
                let total: u64 = blocks.iter().map(|b| b.length).sum();
                if total != size {
                    return Err(DfsError::invalid_argument(format!(
                        "{}: tamaño {} no coincide con sus bloques ({})",
                        path, size, total
                    )));
                }
            }
            INodeKind::Directory { .. } => return Err(DfsError::NotAFile(path)),
        }

        let op = EditOp::CompleteFile {
            path: path.clone(),
            mtime: Utc::now(),
        };
        self.commit(&mut tree, op)?;
        tree.status(id, path)
    }

    pub fn rename(&self, src: &str, dst: &str) -> DfsResult<()> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        let mut tree = self.tree.write();
        self.commit(
            &mut tree,
            EditOp::Rename {
                src,
                dst,
                mtime: Utc::now(),
            },
        )?;
        Ok(())
    }

    pub fn set_permission(&self, path: &str, permission: u16) -> DfsResult<()> {
        let path = path::normalize(path)?;
        let mut tree = self.tree.write();
        self.commit(&mut tree, EditOp::SetPermission { path, permission })?;
        Ok(())
    }

    pub fn set_owner(&self, path: &str, owner: &str) -> DfsResult<()> {
        let path = path::normalize(path)?;
        let mut tree = self.tree.write();
        let op = EditOp::SetOwner {
            path,
            owner: owner.to_string(),
        };
        self.commit(&mut tree, op)?;
        Ok(())
    }

    pub fn allocate_block_id(&self) -> BlockId {
        self.next_block_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Garantiza que los próximos ids sean >= `min_next`.
    pub fn bump_block_id(&self, min_next: BlockId) {
        self.next_block_id.fetch_max(min_next, Ordering::SeqCst);
    }

    pub fn set_block_locations(
        &self,
        path: &str,
        block_id: BlockId,
        locations: Vec<ReplicaLocation>,
    ) -> DfsResult<()> {
        let path = path::normalize(path)?;
        let mut tree = self.tree.write();
        let op = EditOp::SetLocations {
            path,
            block_id,
            locations,
        };
        self.commit(&mut tree, op)?;
        Ok(())
    }

    /// Todos los archivos cerrados con sus bloques.
    pub fn files_with_blocks(&self) -> Vec<FileBlocks> {
        let tree = self.tree.read();
        tree.walk(ROOT_ID, path::ROOT)
            .into_iter()
            .filter_map(|(p, id)| match &tree.inodes.get(&id)?.kind {
                INodeKind::File {
                    blocks,
                    replication,
                    under_construction: false,
                    ..
                } => Some(FileBlocks {
                    path: p,
                    replication: *replication,
                    blocks: blocks.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Imagen completa del árbol, en pre-orden.
    pub fn image(&self) -> FsImage {
        let tree = self.tree.read();
        self.image_of(&tree)
    }

    fn image_of(&self, tree: &Tree) -> FsImage {
        let entries = tree
            .walk(ROOT_ID, path::ROOT)
            .into_iter()
            .filter_map(|(p, id)| {
                let node = tree.inodes.get(&id)?;
                let (kind, replication, blocks, under_construction) = match &node.kind {
                    INodeKind::Directory { .. } => (FileKind::Directory, 0, Vec::new(), false),
                    INodeKind::File {
                        blocks,
                        replication,
                        under_construction,
                        ..
                    } => (FileKind::File, *replication, blocks.clone(), *under_construction),
                };
                Some(ImageEntry {
                    path: p,
                    kind,
                    owner: node.owner.clone(),
                    permission: node.permission,
                    mtime: node.mtime,
                    replication,
                    blocks,
                    under_construction,
                })
            })
            .collect();

        FsImage {
            next_block_id: self.next_block_id.load(Ordering::SeqCst),
            entries,
        }
    }

    /// Escribe una imagen nueva y vacía el log de ediciones.
    pub fn checkpoint(&self) -> DfsResult<()> {
        // con el lock de lectura tomado nadie añade ediciones entre la imagen y el truncado
        let tree = self.tree.read();
        let image = self.image_of(&tree);
        self.journal.checkpoint(&image)
    }

    pub fn pending_edits(&self) -> usize {
        self.journal.pending_edits()
    }
}
