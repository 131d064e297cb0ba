//! Fachada del sistema de archivos: lo que usan el coordinador de jobs, la
//! API HTTP y los tests. Junta el namespace, los datanodes, la política de
//! ubicación y el control de acceso.

use std::{
    collections::{HashSet, VecDeque},
    fs::File,
    io::{self, Cursor, Read, Write},
    path::Path,
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use common::{
    path, BlockId, BlockRef, ClusterConfig, DfsError, DfsResult, DfsWarning, FileStatus,
    FsckReport, NodeId, NodeReport, ReplicaLocation, WriteQuorum, WriteSummary,
    DEFAULT_DIR_PERMISSION, DEFAULT_FILE_PERMISSION,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    access::{Access, AccessPolicy, PosixPolicy},
    cluster::Cluster,
    journal::FileJournal,
    namespace::NameTree,
    placement::PlacementPolicy,
};

/// Ubicación de un bloque dentro de un archivo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocation {
    pub block_id: BlockId,
    pub offset: u64,
    pub length: u64,
    pub hosts: Vec<NodeId>,
}

#[derive(Clone)]
pub struct DfsClient {
    names: Arc<NameTree>,
    cluster: Arc<Cluster>,
    placement: PlacementPolicy,
    access: Arc<dyn AccessPolicy>,

    user: String,
    local_node: Option<NodeId>,

    block_size: u64,
    replication: u32,
    quorum: WriteQuorum,
    write_timeout: Duration,
    write_retries: u32,
}

impl std::fmt::Debug for DfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DfsClient")
            .field("user", &self.user)
            .field("local_node", &self.local_node)
            .field("block_size", &self.block_size)
            .field("replication", &self.replication)
            .finish()
    }
}

fn to_io(e: DfsError) -> io::Error {
    match e {
        DfsError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl DfsClient {
    /// Arranca el sistema de archivos persistente descrito por `config`:
    /// datanodes en disco y namespace recuperado desde su journal.
    pub fn open(config: &ClusterConfig) -> DfsResult<Self> {
        let cluster = Arc::new(Cluster::open(config)?);
        let journal = Arc::new(FileJournal::open(config.namespace_dir())?);
        let names = Arc::new(NameTree::recover(&config.superuser, journal)?);

        // ids ya usados en disco pero que el namespace no conoce
        if let Some(max) = cluster.max_block_id() {
            names.bump_block_id(max + 1);
        }
        Ok(Self::new(names, cluster, config))
    }

    pub fn new(names: Arc<NameTree>, cluster: Arc<Cluster>, config: &ClusterConfig) -> Self {
        Self {
            names,
            cluster,
            placement: PlacementPolicy::new(config.min_free_bytes),
            access: Arc::new(PosixPolicy::new(
                config.superuser.clone(),
                config.permissions_enabled,
            )),
            user: config.superuser.clone(),
            local_node: None,
            block_size: config.block_size,
            replication: config.replication,
            quorum: config.write_quorum,
            write_timeout: config.write_timeout(),
            write_retries: config.write_retries,
        }
    }

    /// Mismo sistema de archivos, operando como otro usuario.
    pub fn with_user(&self, user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..self.clone()
        }
    }

    /// Nodo "cercano" al cliente; las lecturas lo prefieren.
    pub fn with_local_node(&self, node: impl Into<NodeId>) -> Self {
        Self {
            local_node: Some(node.into()),
            ..self.clone()
        }
    }

    pub fn with_access_policy(&self, access: Arc<dyn AccessPolicy>) -> Self {
        Self {
            access,
            ..self.clone()
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn names(&self) -> &Arc<NameTree> {
        &self.names
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn nodes(&self) -> Vec<NodeReport> {
        self.cluster.reports()
    }

    /* ---------------- permisos ---------------- */

    fn check(&self, status: &FileStatus, access: Access) -> DfsResult<()> {
        self.access.check(&self.user, status, access)
    }

    fn check_parent(&self, path: &str, access: Access) -> DfsResult<()> {
        let parent = path::parent(path)
            .ok_or_else(|| DfsError::invalid_argument("la raíz no tiene padre"))?;
        match self.names.status(parent) {
            Ok(status) => self.check(&status, access),
            Err(DfsError::NotFound(_)) => Err(DfsError::ParentMissing(path.to_string())),
            Err(e) => Err(e),
        }
    }

    /* ---------------- metadatos ---------------- */

    pub fn get_file_status(&self, path: &str) -> DfsResult<FileStatus> {
        self.names.status(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.names.exists(path)
    }

    /// Crea el directorio y los padres que falten. Hace falta permiso de
    /// escritura sobre el ancestro más profundo que ya existe.
    pub fn mkdirs(&self, path: &str) -> DfsResult<FileStatus> {
        let path = path::normalize(path)?;

        let mut ancestor = path.as_str();
        let existing = loop {
            match self.names.status(ancestor) {
                Ok(status) => break status,
                Err(DfsError::NotFound(_)) => {
                    ancestor = path::parent(ancestor).unwrap_or(path::ROOT);
                }
                Err(e) => return Err(e),
            }
        };

        if existing.path == path {
            if existing.is_dir() {
                return Ok(existing);
            }
            return Err(DfsError::AlreadyExists(path));
        }
        if !existing.is_dir() {
            return Err(DfsError::NotADirectory(existing.path));
        }
        self.check(&existing, Access::Write)?;

        let status = self.names.mkdirs(&path, &self.user, DEFAULT_DIR_PERMISSION)?;
        info!("{}: mkdirs {}", self.user, path);
        Ok(status)
    }

    /// Un nivel del árbol. Sobre un archivo devuelve sólo ese archivo.
    pub fn list_status(&self, path: &str) -> DfsResult<Vec<FileStatus>> {
        let status = self.names.status(path)?;
        if status.is_file() {
            return Ok(vec![status]);
        }
        self.check(&status, Access::Read)?;
        self.names.list(&status.path)
    }

    /// Recorrido perezoso en profundidad; devuelve sólo archivos.
    pub fn list_files(&self, path: &str, recursive: bool) -> DfsResult<FileIter> {
        let root = self.names.status(path)?;
        let mut iter = FileIter {
            client: self.clone(),
            root,
            recursive,
            stack: Vec::new(),
        };
        iter.restart()?;
        Ok(iter)
    }

    pub fn rename(&self, src: &str, dst: &str) -> DfsResult<()> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        self.check_parent(&src, Access::Write)?;
        self.check_parent(&dst, Access::Write)?;

        self.names.rename(&src, &dst)?;
        info!("{}: rename {} -> {}", self.user, src, dst);
        Ok(())
    }

    /// Borra del namespace y después, sin garantías, las réplicas de los
    /// bloques liberados.
    pub fn delete(&self, path: &str, recursive: bool) -> DfsResult<()> {
        let path = path::normalize(path)?;
        if path != path::ROOT {
            self.check_parent(&path, Access::Write)?;
        }

        let freed = self.names.delete(&path, recursive)?;
        info!(
            "{}: delete {} (recursive={}, {} bloques)",
            self.user,
            path,
            recursive,
            freed.len()
        );
        self.drop_replicas(&freed);
        Ok(())
    }

    fn drop_replicas(&self, blocks: &[BlockRef]) {
        for block in blocks {
            for loc in &block.locations {
                if let Some(node) = self.cluster.get(&loc.node_id) {
                    if let Err(e) = node.delete_block(block.block_id) {
                        debug!(
                            "no se pudo borrar bloque {} en {}: {}",
                            block.block_id, loc.node_id, e
                        );
                    }
                }
            }
        }
    }

    /// Bloques que cubren el rango `[offset, offset + len)` del archivo.
    pub fn get_block_locations(
        &self,
        path: &str,
        offset: u64,
        len: u64,
    ) -> DfsResult<Vec<BlockLocation>> {
        let status = self.names.status(path)?;
        if status.is_dir() {
            return Err(DfsError::NotAFile(status.path));
        }
        self.check(&status, Access::Read)?;

        let end = offset.saturating_add(len);
        let mut out = Vec::new();
        let mut start = 0u64;
        for block in &status.blocks {
            let block_end = start + block.length;
            if block_end > offset && start < end {
                out.push(BlockLocation {
                    block_id: block.block_id,
                    offset: start,
                    length: block.length,
                    hosts: block.locations.iter().map(|l| l.node_id.clone()).collect(),
                });
            }
            start = block_end;
        }
        Ok(out)
    }

    /* ---------------- escritura ---------------- */

    /// Abre un archivo nuevo para escribir. El archivo no es visible como
    /// completo hasta `DfsWriter::close`.
    pub fn create(&self, path: &str, overwrite: bool) -> DfsResult<DfsWriter> {
        let path = path::normalize(path)?;
        self.check_parent(&path, Access::Write)?;

        match self.names.status(&path) {
            Ok(existing) if existing.is_dir() => return Err(DfsError::NotAFile(path)),
            Ok(_) if !overwrite => return Err(DfsError::AlreadyExists(path)),
            Ok(existing) => {
                self.check(&existing, Access::Write)?;
                let freed = self.names.delete(&path, false)?;
                self.drop_replicas(&freed);
            }
            Err(DfsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.names.create(
            &path,
            false,
            &self.user,
            DEFAULT_FILE_PERMISSION,
            self.replication,
        )?;
        debug!("{}: create {}", self.user, path);

        Ok(DfsWriter {
            client: self.clone(),
            path,
            buf: Vec::new(),
            blocks: Vec::new(),
            bytes: 0,
            warnings: Vec::new(),
            closed: false,
        })
    }

    pub fn write_all_to(&self, path: &str, data: &[u8], overwrite: bool) -> DfsResult<WriteSummary> {
        let mut writer = self.create(path, overwrite)?;
        writer.write_all(data)?;
        writer.close()
    }

    /// Escribe un bloque con sus réplicas. Si no se llega al quorum reintenta
    /// con otros nodos, excluyendo los que fallaron.
    fn write_block(&self, data: Vec<u8>) -> DfsResult<(BlockRef, Option<DfsWarning>)> {
        let length = data.len() as u64;
        let data = Arc::new(data);
        let mut excluded: Vec<NodeId> = Vec::new();
        let mut last_err = None;

        for attempt in 0..=self.write_retries {
            let placement = match self.placement.choose_placements(
                length,
                self.replication,
                &self.cluster.reports(),
                &excluded,
            ) {
                Ok(p) => p,
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            };

            // id nuevo por intento: un réplica lenta del intento anterior no choca
            let block_id = self.names.allocate_block_id();
            match self.write_replicas(block_id, &data, &placement.nodes) {
                Ok(locations) => {
                    let got = locations.len() as u32;
                    let warning = (got < self.replication).then(|| {
                        let w = DfsWarning::DegradedReplication {
                            block_id,
                            wanted: self.replication,
                            got,
                        };
                        warn!("{}", w);
                        w
                    });
                    return Ok((
                        BlockRef {
                            block_id,
                            length,
                            locations,
                        },
                        warning,
                    ));
                }
                Err((failed, e)) => {
                    warn!(
                        "bloque {}: intento {} falló ({}), excluyendo {:?}",
                        block_id, attempt, e, failed
                    );
                    excluded.extend(failed);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(DfsError::NoEligibleNodes))
    }

    /// Escribe en paralelo en `nodes` y espera confirmaciones hasta el
    /// timeout. Si no hay quorum borra lo escrito y devuelve los nodos que
    /// fallaron o no contestaron.
    ///
    /// Una vez cerrada la espera, la réplica que termine tarde se borra sola:
    /// ningún bloque queda en disco sin estar registrado en el namespace.
    fn write_replicas(
        &self,
        block_id: BlockId,
        data: &Arc<Vec<u8>>,
        nodes: &[NodeId],
    ) -> Result<Vec<ReplicaLocation>, (Vec<NodeId>, DfsError)> {
        let required = self.quorum.required(nodes.len());
        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(Mutex::new(false));

        for id in nodes {
            let tx = tx.clone();
            let id = id.clone();
            let node = self.cluster.get(&id);
            let data = Arc::clone(data);
            let closed = Arc::clone(&closed);
            thread::spawn(move || {
                let res = match &node {
                    Some(node) => node.write_block(block_id, &data),
                    None => Err(DfsError::not_found(format!("datanode {}", id))),
                };
                // el envío va bajo el lock: o lo ve el que espera o se borra
                let closed = closed.lock();
                if *closed {
                    if let (Some(node), Ok(_)) = (&node, &res) {
                        debug!("bloque {}: réplica tardía en {}, se borra", block_id, id);
                        if let Err(e) = node.delete_block(block_id) {
                            warn!("bloque {}: no se pudo borrar réplica tardía en {}: {}", block_id, id, e);
                        }
                    }
                    return;
                }
                let _ = tx.send((id, res));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.write_timeout;
        let mut acked: Vec<ReplicaLocation> = Vec::new();
        let mut answered: HashSet<NodeId> = HashSet::new();
        let mut last_err = None;

        let mut take = |msg: (NodeId, DfsResult<String>),
                        acked: &mut Vec<ReplicaLocation>,
                        answered: &mut HashSet<NodeId>| match msg {
            (id, Ok(storage_path)) => {
                answered.insert(id.clone());
                acked.push(ReplicaLocation {
                    node_id: id,
                    storage_path,
                });
            }
            (id, Err(e)) => {
                warn!("réplica del bloque {} en {} falló: {}", block_id, id, e);
                answered.insert(id);
                last_err = Some(e);
            }
        };

        while answered.len() < nodes.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(msg) => take(msg, &mut acked, &mut answered),
                Err(_) => break,
            }
        }

        // cerrar la espera y recoger lo que llegó mientras tanto
        *closed.lock() = true;
        while let Ok(msg) = rx.try_recv() {
            take(msg, &mut acked, &mut answered);
        }
        drop(take);

        if acked.len() >= required {
            // conservar el orden de la ubicación elegida
            acked.sort_by_key(|l| nodes.iter().position(|n| *n == l.node_id));
            return Ok(acked);
        }

        for loc in &acked {
            if let Some(node) = self.cluster.get(&loc.node_id) {
                if let Err(e) = node.delete_block(block_id) {
                    warn!("bloque {}: no se pudo borrar réplica en {}: {}", block_id, loc.node_id, e);
                }
            }
        }
        let acked_ids: HashSet<&str> = acked.iter().map(|l| l.node_id.as_str()).collect();
        let failed: Vec<NodeId> = nodes
            .iter()
            .filter(|n| !acked_ids.contains(n.as_str()))
            .cloned()
            .collect();

        debug!("bloque {}: último error de réplica {:?}", block_id, last_err);
        Err((
            failed,
            DfsError::QuorumNotReached {
                block_id,
                acked: acked.len(),
                required,
            },
        ))
    }

    /* ---------------- lectura ---------------- */

    pub fn open_read(&self, path: &str) -> DfsResult<DfsReader> {
        let status = self.names.status(path)?;
        if status.is_dir() {
            return Err(DfsError::NotAFile(status.path));
        }
        self.check(&status, Access::Read)?;

        Ok(DfsReader {
            client: self.clone(),
            path: status.path,
            blocks: status.blocks.into(),
            current: Cursor::new(Vec::new()),
        })
    }

    pub fn read_to_vec(&self, path: &str) -> DfsResult<Vec<u8>> {
        let mut reader = self.open_read(path)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Réplicas en orden de cercanía: el nodo local, luego su rack, luego el
    /// resto en el orden registrado.
    fn replicas_by_distance<'b>(&self, block: &'b BlockRef) -> Vec<&'b ReplicaLocation> {
        let mut replicas: Vec<&ReplicaLocation> = block.locations.iter().collect();
        if let Some(local) = &self.local_node {
            let local_rack = self.cluster.rack_of(local);
            replicas.sort_by_key(|loc| {
                if loc.node_id == *local {
                    0
                } else if local_rack.is_some() && self.cluster.rack_of(&loc.node_id) == local_rack {
                    1
                } else {
                    2
                }
            });
        }
        replicas
    }

    /// Lee un bloque de la primera réplica sana. Corrupción o fallo de E/S
    /// en una réplica hace pasar a la siguiente.
    pub fn read_block(&self, block: &BlockRef) -> DfsResult<Vec<u8>> {
        let mut last_err = DfsError::BlockNotFound(block.block_id);

        for loc in self.replicas_by_distance(block) {
            let node = match self.cluster.get(&loc.node_id) {
                Some(n) => n,
                None => continue,
            };
            match node.read_block(block.block_id) {
                Ok(data) if data.len() as u64 == block.length => return Ok(data),
                Ok(data) => {
                    warn!(
                        "bloque {} en {}: longitud {} en vez de {}",
                        block.block_id,
                        loc.node_id,
                        data.len(),
                        block.length
                    );
                    last_err = DfsError::Corrupted {
                        block_id: block.block_id,
                        node: loc.node_id.clone(),
                        reason: "longitud distinta a la registrada".to_string(),
                    };
                }
                Err(e @ (DfsError::Corrupted { .. } | DfsError::Io(_) | DfsError::BlockNotFound(_))) => {
                    warn!(
                        "bloque {} en {} ilegible ({}), probando otra réplica",
                        block.block_id, loc.node_id, e
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /* ---------------- copias con el disco local ---------------- */

    /// Sube un archivo local. Si `dst` es un directorio existente el archivo
    /// queda dentro con su mismo nombre.
    pub fn copy_in(&self, local: &Path, dst: &str, overwrite: bool) -> DfsResult<WriteSummary> {
        let mut target = path::normalize(dst)?;
        if let Ok(status) = self.names.status(&target) {
            if status.is_dir() {
                let name = local
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| DfsError::invalid_argument("archivo local sin nombre"))?;
                target = path::join(&target, name);
            }
        }

        let mut file = File::open(local)?;
        let mut writer = self.create(&target, overwrite)?;
        io::copy(&mut file, &mut writer)?;
        let summary = writer.close()?;
        info!("{} -> {} ({} bytes)", local.display(), target, summary.bytes);
        Ok(summary)
    }

    /// Baja un archivo del DFS. Devuelve los bytes copiados.
    pub fn copy_out(&self, src: &str, local: &Path) -> DfsResult<u64> {
        let mut reader = self.open_read(src)?;
        let target = if local.is_dir() {
            local.join(path::file_name(&reader.path))
        } else {
            local.to_path_buf()
        };

        let mut file = File::create(&target)?;
        let n = io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        info!("{} -> {} ({} bytes)", reader.path, target.display(), n);
        Ok(n)
    }

    /* ---------------- integridad ---------------- */

    /// Revisa todos los bloques leyendo cada réplica. Sin `repair` sólo
    /// informa. Con `repair` vuelve a copiar los bloques sub-replicados desde
    /// una réplica sana y recién entonces descarta las réplicas malas.
    ///
    /// Un bloque sin ninguna réplica sana no se toca: sus copias se quedan en
    /// disco y en el namespace para recuperarlas a mano, y el archivo sale en
    /// `corrupt_files`.
    pub fn fsck(&self, repair: bool) -> DfsResult<FsckReport> {
        let mut report = FsckReport::default();

        for file in self.names.files_with_blocks() {
            report.files_checked += 1;
            let mut file_corrupt = false;

            for block in &file.blocks {
                report.blocks_checked += 1;

                let mut healthy: Vec<ReplicaLocation> = Vec::new();
                let mut bad: Vec<ReplicaLocation> = Vec::new();
                let mut source: Option<Vec<u8>> = None;
                for loc in &block.locations {
                    let node = match self.cluster.get(&loc.node_id) {
                        Some(n) if n.is_alive() => n,
                        _ => continue,
                    };
                    match node.read_block(block.block_id) {
                        Ok(data) if data.len() as u64 == block.length => {
                            healthy.push(loc.clone());
                            source.get_or_insert(data);
                        }
                        Err(DfsError::BlockNotFound(_)) => {
                            warn!("fsck: bloque {} falta en {}", block.block_id, loc.node_id);
                        }
                        Ok(_) | Err(_) => {
                            warn!(
                                "fsck: réplica mala del bloque {} en {}",
                                block.block_id, loc.node_id
                            );
                            bad.push(loc.clone());
                        }
                    }
                }

                let wanted = file.replication as usize;
                let data = match source {
                    Some(d) => d,
                    None => {
                        file_corrupt = true;
                        report.under_replicated.push(block.block_id);
                        continue;
                    }
                };

                if !repair {
                    if healthy.len() < wanted {
                        report.under_replicated.push(block.block_id);
                    }
                    continue;
                }

                if healthy.len() < wanted {
                    let copied = self.re_replicate(block, &data, &healthy, wanted - healthy.len());
                    if !copied.is_empty() {
                        healthy.extend(copied);
                        if healthy.len() >= wanted {
                            report.repaired.push(block.block_id);
                        }
                    }
                }
                if healthy.len() < wanted {
                    report.under_replicated.push(block.block_id);
                }

                // hay al menos una copia sana: las malas que no se
                // sobrescribieron ya pueden irse
                for loc in bad.iter().filter(|l| !healthy.iter().any(|h| h.node_id == l.node_id)) {
                    if let Some(node) = self.cluster.get(&loc.node_id) {
                        if let Err(e) = node.delete_block(block.block_id) {
                            warn!(
                                "fsck: no se pudo borrar réplica mala del bloque {} en {}: {}",
                                block.block_id, loc.node_id, e
                            );
                        }
                    }
                }

                if healthy != block.locations {
                    self.names
                        .set_block_locations(&file.path, block.block_id, healthy)?;
                }
            }

            if file_corrupt {
                warn!("fsck: {} tiene bloques sin réplicas sanas", file.path);
                report.corrupt_files.push(file.path);
            }
        }

        info!(
            "fsck: {} archivos, {} bloques, {} sub-replicados, {} reparados, {} corruptos",
            report.files_checked,
            report.blocks_checked,
            report.under_replicated.len(),
            report.repaired.len(),
            report.corrupt_files.len()
        );
        Ok(report)
    }

    fn re_replicate(
        &self,
        block: &BlockRef,
        data: &[u8],
        healthy: &[ReplicaLocation],
        missing: usize,
    ) -> Vec<ReplicaLocation> {
        let exclude: Vec<NodeId> = healthy.iter().map(|l| l.node_id.clone()).collect();
        let placement = match self.placement.choose_placements(
            block.length,
            missing as u32,
            &self.cluster.reports(),
            &exclude,
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!("fsck: no se puede re-replicar bloque {}: {}", block.block_id, e);
                return Vec::new();
            }
        };

        let mut copied = Vec::new();
        for id in placement.nodes {
            let Some(node) = self.cluster.get(&id) else {
                continue;
            };
            // una copia vieja (mala) en el nodo impediría escribir; hay
            // fuente sana, así que se puede reemplazar
            match node.delete_block(block.block_id) {
                Ok(()) | Err(DfsError::BlockNotFound(_)) => {}
                Err(e) => {
                    warn!("fsck: no se pudo borrar copia vieja del bloque {} en {}: {}", block.block_id, id, e);
                    continue;
                }
            }
            match node.write_block(block.block_id, data) {
                Ok(storage_path) => {
                    info!("fsck: bloque {} copiado a {}", block.block_id, id);
                    copied.push(ReplicaLocation {
                        node_id: id,
                        storage_path,
                    });
                }
                Err(e) => warn!("fsck: copia del bloque {} a {} falló: {}", block.block_id, id, e),
            }
        }
        copied
    }
}

/* =========================
   Handles de E/S
   ========================= */

/// Handle de escritura. Corta los datos en bloques de `block_size` y los
/// replica a medida que se llenan.
pub struct DfsWriter {
    client: DfsClient,
    path: String,
    buf: Vec<u8>,
    blocks: Vec<BlockRef>,
    bytes: u64,
    warnings: Vec<DfsWarning>,
    closed: bool,
}

impl DfsWriter {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn flush_block(&mut self, data: Vec<u8>) -> DfsResult<()> {
        let len = data.len() as u64;
        let (block, warning) = self.client.write_block(data)?;
        debug!(
            "{}: bloque {} ({} bytes) en {:?}",
            self.path,
            block.block_id,
            len,
            block.hosts()
        );
        self.bytes += len;
        self.blocks.push(block);
        self.warnings.extend(warning);
        Ok(())
    }

    /// Escribe el último bloque, registra los bloques en orden y completa el
    /// archivo.
    pub fn close(mut self) -> DfsResult<WriteSummary> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.flush_block(rest)?;
        }

        for block in &self.blocks {
            self.client.names.append_block(&self.path, block.clone())?;
        }
        self.client.names.complete_file(&self.path, self.bytes)?;
        self.closed = true;

        info!(
            "{}: {} cerrado ({} bytes, {} bloques)",
            self.client.user,
            self.path,
            self.bytes,
            self.blocks.len()
        );
        Ok(WriteSummary {
            path: self.path.clone(),
            bytes: self.bytes,
            blocks: std::mem::take(&mut self.blocks),
            warnings: std::mem::take(&mut self.warnings),
        })
    }
}

impl Write for DfsWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        let block_size = self.client.block_size as usize;
        while self.buf.len() >= block_size {
            let rest = self.buf.split_off(block_size);
            let full = std::mem::replace(&mut self.buf, rest);
            self.flush_block(full).map_err(to_io)?;
        }
        Ok(data.len())
    }

    /// Los bloques sólo se cortan al llenarse o al cerrar.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DfsWriter {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("{}: escritura abandonada, se descarta el archivo", self.path);
        self.client.drop_replicas(&self.blocks);
        if let Err(e) = self.client.names.delete(&self.path, false) {
            debug!("no se pudo descartar {}: {}", self.path, e);
        }
    }
}

/// Handle de lectura secuencial, bloque a bloque.
pub struct DfsReader {
    client: DfsClient,
    path: String,
    blocks: VecDeque<BlockRef>,
    current: Cursor<Vec<u8>>,
}

impl DfsReader {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Read for DfsReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            match self.blocks.pop_front() {
                None => return Ok(0),
                Some(block) => {
                    let data = self.client.read_block(&block).map_err(to_io)?;
                    self.current = Cursor::new(data);
                }
            }
        }
    }
}

/// Iterador perezoso de archivos bajo una ruta. Lista cada directorio recién
/// cuando llega a él.
pub struct FileIter {
    client: DfsClient,
    root: FileStatus,
    recursive: bool,
    stack: Vec<VecDeque<FileStatus>>,
}

impl FileIter {
    /// Vuelve a empezar desde la raíz del recorrido.
    pub fn restart(&mut self) -> DfsResult<()> {
        self.stack.clear();
        if self.root.is_file() {
            self.client.check(&self.root, Access::Read)?;
            self.stack.push(VecDeque::from(vec![self.root.clone()]));
        } else {
            let children = self.client.list_status(&self.root.path)?;
            self.stack.push(children.into());
        }
        Ok(())
    }
}

impl Iterator for FileIter {
    type Item = DfsResult<FileStatus>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.pop_front() {
                None => {
                    self.stack.pop();
                }
                Some(status) if status.is_dir() => {
                    if self.recursive {
                        match self.client.list_status(&status.path) {
                            Ok(children) => self.stack.push(children.into()),
                            Err(e) => return Some(Err(e)),
                        }
                    }
                }
                Some(status) => return Some(Ok(status)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client(block_size: u64) -> (TempDir, DfsClient) {
        let dir = TempDir::new().unwrap();
        let config = ClusterConfig {
            data_dir: dir.path().to_path_buf(),
            block_size,
            write_timeout_ms: 5_000,
            ..ClusterConfig::default()
        };
        let client = DfsClient::open(&config).unwrap();
        (dir, client)
    }

    #[test]
    fn write_then_read_across_blocks() {
        let (_dir, fs) = client(8);
        fs.mkdirs("/test/input").unwrap();

        let data = b"hello,hadoop\nhello,hdfs\n";
        let summary = fs.write_all_to("/test/input/hello.txt", data, false).unwrap();
        assert_eq!(summary.bytes, data.len() as u64);
        assert_eq!(summary.blocks.len(), 3);
        assert!(summary.warnings.is_empty());

        let status = fs.get_file_status("/test/input/hello.txt").unwrap();
        assert_eq!(status.length, data.len() as u64);
        assert!(status.blocks.iter().all(|b| b.locations.len() == 3));

        assert_eq!(fs.read_to_vec("/test/input/hello.txt").unwrap(), data);
    }

    #[test]
    fn empty_file_has_no_blocks() {
        let (_dir, fs) = client(8);
        let summary = fs.write_all_to("/vacio", b"", false).unwrap();
        assert_eq!(summary.bytes, 0);
        assert!(summary.blocks.is_empty());
        assert!(fs.read_to_vec("/vacio").unwrap().is_empty());
    }

    #[test]
    fn create_refuses_existing_unless_overwrite() {
        let (_dir, fs) = client(1024);
        fs.write_all_to("/f", b"uno", false).unwrap();
        assert!(matches!(
            fs.write_all_to("/f", b"dos", false),
            Err(DfsError::AlreadyExists(_))
        ));
        fs.write_all_to("/f", b"dos", true).unwrap();
        assert_eq!(fs.read_to_vec("/f").unwrap(), b"dos");
    }

    #[test]
    fn dropped_writer_leaves_nothing() {
        let (_dir, fs) = client(4);
        {
            let mut w = fs.create("/a_medias", false).unwrap();
            w.write_all(b"123456789").unwrap();
        }
        assert!(!fs.exists("/a_medias"));
    }

    #[test]
    fn dead_node_gives_degraded_write_and_reads_still_work() {
        let (_dir, fs) = client(1024);
        fs.cluster().get("dn3").unwrap().set_alive(false);

        let summary = fs.write_all_to("/f", b"datos", false).unwrap();
        assert_eq!(summary.blocks[0].locations.len(), 2);
        assert!(matches!(
            summary.warnings[0],
            DfsWarning::DegradedReplication { wanted: 3, got: 2, .. }
        ));
        assert_eq!(fs.read_to_vec("/f").unwrap(), b"datos");
    }

    #[test]
    fn read_prefers_local_node() {
        let (_dir, fs) = client(1024);
        fs.write_all_to("/f", b"x", false).unwrap();
        let block = fs.get_file_status("/f").unwrap().blocks.remove(0);

        let local = fs.with_local_node("dn2");
        let order: Vec<&str> = local
            .replicas_by_distance(&block)
            .into_iter()
            .map(|l| l.node_id.as_str())
            .collect();
        assert_eq!(order[0], "dn2");
    }

    #[test]
    fn list_files_walks_lazily_in_name_order() {
        let (_dir, fs) = client(1024);
        fs.mkdirs("/r/b/c").unwrap();
        fs.write_all_to("/r/z.txt", b"1", false).unwrap();
        fs.write_all_to("/r/b/y.txt", b"2", false).unwrap();
        fs.write_all_to("/r/b/c/x.txt", b"3", false).unwrap();
        fs.write_all_to("/r/a.txt", b"4", false).unwrap();

        let mut it = fs.list_files("/r", true).unwrap();
        let paths: Vec<String> = it.by_ref().map(|s| s.unwrap().path).collect();
        assert_eq!(paths, vec!["/r/a.txt", "/r/b/c/x.txt", "/r/b/y.txt", "/r/z.txt"]);

        it.restart().unwrap();
        assert_eq!(it.next().unwrap().unwrap().path, "/r/a.txt");

        let flat: Vec<String> = fs
            .list_files("/r", false)
            .unwrap()
            .map(|s| s.unwrap().path)
            .collect();
        assert_eq!(flat, vec!["/r/a.txt", "/r/z.txt"]);
    }

    #[test]
    fn block_locations_cover_requested_range() {
        let (_dir, fs) = client(4);
        fs.write_all_to("/f", b"0123456789", false).unwrap();

        let locs = fs.get_block_locations("/f", 5, 2).unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].offset, 4);
        assert_eq!(locs[0].length, 4);
        assert_eq!(locs[0].hosts.len(), 3);

        assert_eq!(fs.get_block_locations("/f", 0, 100).unwrap().len(), 3);
    }

    #[test]
    fn delete_removes_replicas() {
        let (_dir, fs) = client(1024);
        let summary = fs.write_all_to("/f", b"abc", false).unwrap();
        let block_id = summary.blocks[0].block_id;
        fs.delete("/f", false).unwrap();

        for node in fs.cluster().nodes() {
            assert!(!node.has_block(block_id));
        }
    }

    #[test]
    fn fsck_repairs_lost_replica() {
        let (_dir, fs) = client(1024);
        let summary = fs.write_all_to("/f", b"abc", false).unwrap();
        let block_id = summary.blocks[0].block_id;

        let victim = summary.blocks[0].locations[0].node_id.clone();
        fs.cluster().get(&victim).unwrap().delete_block(block_id).unwrap();

        let report = fs.fsck(true).unwrap();
        assert_eq!(report.repaired, vec![block_id]);
        assert!(report.is_healthy());
        assert_eq!(fs.get_file_status("/f").unwrap().blocks[0].locations.len(), 3);
    }

    #[test]
    fn copy_in_and_out() {
        let (dir, fs) = client(16);
        let local = dir.path().join("hello.txt");
        std::fs::write(&local, b"hello,hadoop\nhello,hdfs\n").unwrap();

        fs.mkdirs("/test/input").unwrap();
        let summary = fs.copy_in(&local, "/test/input", false).unwrap();
        assert_eq!(summary.path, "/test/input/hello.txt");

        let back = dir.path().join("back.txt");
        let n = fs.copy_out("/test/input/hello.txt", &back).unwrap();
        assert_eq!(n, 24);
        assert_eq!(std::fs::read(back).unwrap(), b"hello,hadoop\nhello,hdfs\n");
    }

    #[test]
    fn open_read_streams_in_small_chunks() {
        let (_dir, fs) = client(5);
        let data: Vec<u8> = (b'a'..=b'z').collect();
        fs.write_all_to("/abc", &data, false).unwrap();

        let mut reader = fs.open_read("/abc").unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 3];
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 3);
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, data);

        assert!(matches!(fs.open_read("/"), Err(DfsError::NotAFile(_))));
    }
}
