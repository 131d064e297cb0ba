//! Coordinador de jobs map/reduce.
//!
//! Cada job corre en su propia tarea de tokio ("driver") que pasa por las
//! fases MAPPING -> SHUFFLING -> REDUCING. Las tareas map y reduce se ejecutan
//! en un pool acotado (semáforo) sobre hilos bloqueantes, con timeout y
//! reintentos. Todo lo intermedio vive en `<salida>/_temporary` dentro del
//! DFS: un intento escribe en su propio directorio y sólo se publica con un
//! rename cuando terminó bien, así un reintento reemplaza y nunca duplica.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use common::{
    engine::{
        contiguous_splits, decode_pairs_jsonl, encode_pairs_jsonl, format_text_output,
        sort_by_key, text_records, InputRecord, Pair,
    },
    path, ClusterConfig, DfsError, DfsResult, JobError, JobId, JobInfo, JobRequest, JobResults,
    JobStatus, Task, TaskId, TaskKind, TaskStatus,
};
use glob::{MatchOptions, Pattern};
use parking_lot::Mutex;
use tokio::{
    sync::{watch, Semaphore},
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, error, info, warn};
use worker::{
    cancel_token,
    executor::{execute_map, execute_reduce},
    CancelToken, FunctionRegistry,
};

use crate::dfs::DfsClient;

const TEMP_DIR: &str = "_temporary";
const SUCCESS_MARKER: &str = "_SUCCESS";

/// Cuerpo de un intento: recibe el número de intento y su token de cancelación.
type TaskBody = Arc<dyn Fn(u32, CancelToken) -> Result<u64, String> + Send + Sync>;
/// Publica el resultado de un intento exitoso.
type CommitFn = Arc<dyn Fn(u32) -> DfsResult<()> + Send + Sync>;

/* =========================
   Tabla de tareas
   ========================= */

/// Estado de todas las tareas. Los cambios de estado son compare-and-swap:
/// sólo se aplican si la tarea está en el estado esperado.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl TaskTable {
    pub fn insert(&self, task: Task) {
        self.tasks.lock().insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().get(id).cloned()
    }

    pub fn transition(&self, id: &str, expected: TaskStatus, next: TaskStatus) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(task) if task.status == expected => {
                task.status = next;
                true
            }
            _ => false,
        }
    }

    /// SCHEDULED -> RUNNING; devuelve el número del intento que empieza.
    pub fn begin_attempt(&self, id: &str) -> Option<u32> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(id)?;
        if task.status != TaskStatus::Scheduled {
            return None;
        }
        task.status = TaskStatus::Running;
        task.attempt += 1;
        Some(task.attempt)
    }

    /// Anota un intento fallido. Vuelve a SCHEDULED si quedan intentos, si
    /// no queda en FAILED. Devuelve el estado resultante.
    pub fn record_failure(&self, id: &str, message: &str, max_attempts: u32) -> Option<TaskStatus> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(id)?;
        if task.status != TaskStatus::Running {
            return None;
        }
        task.last_error = Some(message.to_string());
        task.status = if task.attempt >= max_attempts {
            TaskStatus::Failed
        } else {
            TaskStatus::Scheduled
        };
        Some(task.status)
    }

    pub fn for_job(&self, job_id: &str) -> Vec<Task> {
        let mut out: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/* =========================
   Rutas de un job
   ========================= */

#[derive(Debug, Clone)]
struct JobPaths {
    output: String,
    temp: String,
    /// Se marca antes de borrar `temp` al cerrar el job, bien o mal.
    closing: Arc<AtomicBool>,
}

impl JobPaths {
    fn new(output: &str) -> Self {
        Self {
            output: output.to_string(),
            temp: path::join(output, TEMP_DIR),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn attempt_dir(&self, kind: TaskKind, partition: u32, attempt: u32) -> String {
        path::join(
            &self.temp,
            &format!("attempt-{}-{:05}-{}", kind.letter(), partition, attempt),
        )
    }

    /// Salida ya publicada de la tarea map `partition`.
    fn map_dir(&self, partition: u32) -> String {
        path::join(&self.temp, &format!("map-{:05}", partition))
    }

    fn map_part(dir: &str, reduce_partition: u32) -> String {
        path::join(dir, &format!("part-{:05}.jsonl", reduce_partition))
    }

    fn sorted_run(&self, reduce_partition: u32) -> String {
        path::join(&self.temp, &format!("sorted-{:05}.jsonl", reduce_partition))
    }

    fn part_name(reduce_partition: u32) -> String {
        format!("part-r-{:05}", reduce_partition)
    }

    fn success_marker(&self) -> String {
        path::join(&self.output, SUCCESS_MARKER)
    }
}

/// Corta el intento si ya venció. Se llama antes de cada escritura al DFS.
fn ensure_live(cancel: &CancelToken) -> Result<(), String> {
    if cancel.load(Ordering::SeqCst) {
        return Err("tarea cancelada".to_string());
    }
    Ok(())
}

fn job_error(message: impl Display) -> JobError {
    JobError {
        task_id: None,
        kind: None,
        partition: None,
        attempts: 0,
        message: message.to_string(),
    }
}

async fn blocking<T, F>(f: F) -> DfsResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DfsResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DfsError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
}

/* =========================
   Coordinador
   ========================= */

struct JobEntry {
    info: JobInfo,
    status_tx: watch::Sender<JobStatus>,
}

struct Inner {
    fs: DfsClient,
    registry: FunctionRegistry,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    tasks: TaskTable,
    pool: Arc<Semaphore>,
    max_attempts: u32,
    task_timeout: Duration,
}

#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
}

impl JobCoordinator {
    pub fn new(fs: DfsClient, registry: FunctionRegistry, config: &ClusterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                fs,
                registry,
                jobs: Mutex::new(HashMap::new()),
                tasks: TaskTable::default(),
                pool: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
                max_attempts: config.max_task_attempts.max(1),
                task_timeout: config.task_timeout(),
            }),
        }
    }

    pub fn fs(&self) -> &DfsClient {
        &self.inner.fs
    }

    pub fn submit_job(&self, req: JobRequest) -> DfsResult<JobId> {
        self.submit_job_as(self.inner.fs.user(), req)
    }

    /// Valida y registra el job como PENDING, y lanza su driver.
    /// Tiene que llamarse dentro de un runtime de tokio.
    pub fn submit_job_as(&self, user: &str, mut req: JobRequest) -> DfsResult<JobId> {
        let fs = self.inner.fs.with_user(user);

        if req.partition_count == 0 {
            return Err(DfsError::invalid_argument("partition_count debe ser >= 1"));
        }
        if req.input_paths.is_empty() {
            return Err(DfsError::invalid_argument("el job no tiene rutas de entrada"));
        }
        self.inner.registry.mapper(&req.mapper_id)?;
        self.inner.registry.reducer(&req.reducer_id)?;

        req.output_path = path::normalize(&req.output_path)?;
        if fs.exists(&req.output_path) {
            return Err(DfsError::AlreadyExists(req.output_path));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let info = JobInfo::new(job_id.clone(), req.clone());
        let (status_tx, _) = watch::channel(JobStatus::Pending);

        for p in 0..req.partition_count {
            self.inner.tasks.insert(Task::new(&job_id, TaskKind::Map, p));
            self.inner.tasks.insert(Task::new(&job_id, TaskKind::Reduce, p));
        }
        self.inner
            .jobs
            .lock()
            .insert(job_id.clone(), JobEntry { info, status_tx });

        info!(
            "job {} recibido: {:?} -> {} ({} particiones, {}/{})",
            job_id,
            req.input_paths,
            req.output_path,
            req.partition_count,
            req.mapper_id,
            req.reducer_id
        );

        let inner = self.inner.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            inner.run_job(id, fs, req).await;
        });

        Ok(job_id)
    }

    pub fn job_info(&self, job_id: &str) -> DfsResult<JobInfo> {
        self.inner
            .jobs
            .lock()
            .get(job_id)
            .map(|e| e.info.clone())
            .ok_or_else(|| DfsError::UnknownJob(job_id.to_string()))
    }

    pub fn job_status(&self, job_id: &str) -> DfsResult<JobStatus> {
        self.job_info(job_id).map(|i| i.status)
    }

    /// Todos los jobs, del más viejo al más nuevo.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .inner
            .jobs
            .lock()
            .values()
            .map(|e| e.info.clone())
            .collect();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs
    }

    pub fn tasks(&self, job_id: &str) -> Vec<Task> {
        self.inner.tasks.for_job(job_id)
    }

    /// Espera a que el job llegue a SUCCEEDED o FAILED.
    pub async fn wait_for_job(&self, job_id: &str) -> DfsResult<JobInfo> {
        let mut rx = {
            let jobs = self.inner.jobs.lock();
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| DfsError::UnknownJob(job_id.to_string()))?;
            entry.status_tx.subscribe()
        };

        while !rx.borrow_and_update().is_terminal() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.job_info(job_id)
    }

    /// Archivos part-r-NNNNN que dejó el job.
    pub fn job_results(&self, job_id: &str) -> DfsResult<JobResults> {
        let info = self.job_info(job_id)?;
        let mut files = Vec::new();
        if info.status == JobStatus::Succeeded {
            files = self
                .inner
                .fs
                .list_status(&info.output_path)?
                .into_iter()
                .filter(|s| s.is_file() && path::file_name(&s.path).starts_with("part-"))
                .map(|s| s.path)
                .collect();
        }
        Ok(JobResults {
            job_id: info.id,
            status: info.status,
            output_path: info.output_path,
            files,
        })
    }
}

impl Inner {
    fn update(&self, job_id: &str, f: impl FnOnce(&mut JobInfo)) {
        if let Some(entry) = self.jobs.lock().get_mut(job_id) {
            f(&mut entry.info);
        }
    }

    fn advance(&self, job_id: &str, next: JobStatus) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        if !entry.info.status.can_advance_to(next) {
            warn!(
                "job {}: transición inválida {:?} -> {:?}",
                job_id, entry.info.status, next
            );
            return false;
        }
        entry.info.status = next;
        if next.is_terminal() {
            entry.info.finished_at = Some(Utc::now());
        }
        entry.status_tx.send_replace(next);
        info!("job {} -> {:?}", job_id, next);
        true
    }

    fn fail(&self, job_id: &str, err: JobError) {
        error!("job {} falló: {}", job_id, err.message);
        self.update(job_id, |info| info.error = Some(err));
        self.advance(job_id, JobStatus::Failed);
    }

    async fn run_job(self: Arc<Self>, job_id: JobId, fs: DfsClient, req: JobRequest) {
        self.update(&job_id, |info| info.started_at = Some(Utc::now()));
        let paths = JobPaths::new(&req.output_path);

        match self.clone().drive(&job_id, &fs, &req, &paths).await {
            Ok(()) => {
                self.advance(&job_id, JobStatus::Succeeded);
            }
            Err(err) => {
                paths.closing.store(true, Ordering::SeqCst);
                let temp = paths.temp.clone();
                let cleanup_fs = fs.clone();
                if let Err(e) = blocking(move || {
                    if cleanup_fs.exists(&temp) {
                        cleanup_fs.delete(&temp, true)?;
                    }
                    Ok(())
                })
                .await
                {
                    warn!("job {}: no se pudo limpiar {}: {}", job_id, paths.temp, e);
                }
                self.fail(&job_id, err);
            }
        }
    }

    async fn drive(
        self: Arc<Self>,
        job_id: &str,
        fs: &DfsClient,
        req: &JobRequest,
        paths: &JobPaths,
    ) -> Result<(), JobError> {
        let mapper = self.registry.mapper(&req.mapper_id).map_err(job_error)?;
        let reducer = self.registry.reducer(&req.reducer_id).map_err(job_error)?;
        let partitions = req.partition_count;

        // entradas -> registros -> splits contiguos
        let records = {
            let fs = fs.clone();
            let inputs = req.input_paths.clone();
            let temp = paths.temp.clone();
            blocking(move || {
                let files = resolve_inputs(&fs, &inputs)?;
                let mut records = Vec::new();
                for file in &files {
                    records.extend(text_records(&fs.read_to_vec(file)?));
                }
                fs.mkdirs(&temp)?;
                Ok(records)
            })
            .await
            .map_err(job_error)?
        };
        self.update(job_id, |info| info.input_records = records.len() as u64);
        let splits = contiguous_splits(records, partitions);

        // MAPPING
        self.advance(job_id, JobStatus::Mapping);
        let mut set = JoinSet::new();
        for (p, split) in splits.into_iter().enumerate() {
            let p = p as u32;
            let split: Arc<Vec<InputRecord>> = Arc::new(split);
            let body: TaskBody = {
                let fs = fs.clone();
                let mapper = mapper.clone();
                let mapper_id = req.mapper_id.clone();
                let paths = paths.clone();
                Arc::new(move |attempt: u32, cancel: CancelToken| -> Result<u64, String> {
                    let out = execute_map(&mapper_id, mapper.as_ref(), &split, partitions, &cancel)
                        .map_err(|e| e.to_string())?;
                    let dir = paths.attempt_dir(TaskKind::Map, p, attempt);
                    let mut emitted = 0u64;
                    for (r, pairs) in out.iter().enumerate() {
                        emitted += pairs.len() as u64;
                        let data = encode_pairs_jsonl(pairs).map_err(|e| e.to_string())?;
                        ensure_live(&cancel)?;
                        fs.mkdirs(&dir).map_err(|e| e.to_string())?;
                        ensure_live(&cancel)?;
                        fs.write_all_to(&JobPaths::map_part(&dir, r as u32), &data, true)
                            .map_err(|e| e.to_string())?;
                    }
                    Ok(emitted)
                })
            };
            let commit: CommitFn = {
                let fs = fs.clone();
                let paths = paths.clone();
                Arc::new(move |attempt: u32| -> DfsResult<()> {
                    let final_dir = paths.map_dir(p);
                    if fs.exists(&final_dir) {
                        fs.delete(&final_dir, true)?;
                    }
                    fs.rename(&paths.attempt_dir(TaskKind::Map, p, attempt), &final_dir)
                })
            };

            let task_id = Task::new(job_id, TaskKind::Map, p).id;
            let me = self.clone();
            let attempt_fs = fs.clone();
            let attempt_paths = paths.clone();
            set.spawn(async move {
                me.run_task(task_id, attempt_fs, attempt_paths, body, commit)
                    .await
            });
        }
        collect_phase(&mut set).await?;

        // SHUFFLING
        self.advance(job_id, JobStatus::Shuffling);
        {
            let fs = fs.clone();
            let paths = paths.clone();
            blocking(move || {
                for r in 0..partitions {
                    let mut run: Vec<Pair> = Vec::new();
                    for m in 0..partitions {
                        let part = JobPaths::map_part(&paths.map_dir(m), r);
                        run.extend(decode_pairs_jsonl(&fs.read_to_vec(&part)?)?);
                    }
                    sort_by_key(&mut run);
                    debug!("shuffle: partición {} con {} pares", r, run.len());
                    fs.write_all_to(&paths.sorted_run(r), &encode_pairs_jsonl(&run)?, true)?;
                }
                Ok(())
            })
            .await
            .map_err(job_error)?;
        }

        // REDUCING
        self.advance(job_id, JobStatus::Reducing);
        let mut set = JoinSet::new();
        for r in 0..partitions {
            let body: TaskBody = {
                let fs = fs.clone();
                let reducer = reducer.clone();
                let reducer_id = req.reducer_id.clone();
                let paths = paths.clone();
                Arc::new(move |attempt: u32, cancel: CancelToken| -> Result<u64, String> {
                    let raw = fs.read_to_vec(&paths.sorted_run(r)).map_err(|e| e.to_string())?;
                    let sorted = decode_pairs_jsonl(&raw).map_err(|e| e.to_string())?;
                    let out = execute_reduce(&reducer_id, reducer.as_ref(), sorted, &cancel)
                        .map_err(|e| e.to_string())?;
                    let dir = paths.attempt_dir(TaskKind::Reduce, r, attempt);
                    let text = format_text_output(&out);
                    ensure_live(&cancel)?;
                    fs.mkdirs(&dir).map_err(|e| e.to_string())?;
                    ensure_live(&cancel)?;
                    fs.write_all_to(&path::join(&dir, &JobPaths::part_name(r)), text.as_bytes(), true)
                        .map_err(|e| e.to_string())?;
                    Ok(out.len() as u64)
                })
            };
            let commit: CommitFn = {
                let fs = fs.clone();
                let paths = paths.clone();
                Arc::new(move |attempt: u32| -> DfsResult<()> {
                    let name = JobPaths::part_name(r);
                    let src = path::join(&paths.attempt_dir(TaskKind::Reduce, r, attempt), &name);
                    let dst = path::join(&paths.output, &name);
                    if fs.exists(&dst) {
                        fs.delete(&dst, false)?;
                    }
                    fs.rename(&src, &dst)
                })
            };

            let task_id = Task::new(job_id, TaskKind::Reduce, r).id;
            let me = self.clone();
            let attempt_fs = fs.clone();
            let attempt_paths = paths.clone();
            set.spawn(async move {
                me.run_task(task_id, attempt_fs, attempt_paths, body, commit)
                    .await
            });
        }
        let output_records = collect_phase(&mut set).await?;
        self.update(job_id, |info| info.output_records = output_records);

        // commit del job
        let fs = fs.clone();
        let paths = paths.clone();
        blocking(move || {
            fs.write_all_to(&paths.success_marker(), b"", true)?;
            paths.closing.store(true, Ordering::SeqCst);
            fs.delete(&paths.temp, true)?;
            Ok(())
        })
        .await
        .map_err(job_error)?;

        Ok(())
    }

    /// Corre una tarea hasta que un intento termine bien o se agoten los
    /// intentos. Cada intento ocupa un lugar del pool.
    async fn run_task(
        self: Arc<Self>,
        task_id: TaskId,
        fs: DfsClient,
        paths: JobPaths,
        body: TaskBody,
        commit: CommitFn,
    ) -> Result<u64, JobError> {
        loop {
            let permit = self
                .pool
                .clone()
                .acquire_owned()
                .await
                .map_err(job_error)?;

            let Some(attempt) = self.tasks.begin_attempt(&task_id) else {
                return Err(job_error(format!("tarea {} no está programada", task_id)));
            };
            let task = self
                .tasks
                .get(&task_id)
                .ok_or_else(|| job_error(format!("tarea {} desconocida", task_id)))?;
            debug!("{}: intento {}", task_id, attempt);

            let cancel = cancel_token();
            let mut handle = {
                let body = body.clone();
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || body(attempt, cancel))
            };

            let mut res = match timeout(self.task_timeout, &mut handle).await {
                Ok(Ok(r)) => r,
                Ok(Err(join_err)) => Err(format!("el hilo de la tarea terminó mal: {}", join_err)),
                Err(_) => {
                    cancel.store(true, Ordering::SeqCst);
                    reap_late_attempt(
                        handle,
                        fs.clone(),
                        paths.clone(),
                        paths.attempt_dir(task.kind, task.partition, attempt),
                    );
                    Err(format!("timeout después de {:?}", self.task_timeout))
                }
            };
            drop(permit);

            if res.is_ok() {
                let commit = commit.clone();
                if let Err(e) = blocking(move || commit(attempt)).await {
                    res = Err(format!("no se pudo publicar el intento: {}", e));
                }
            }

            match res {
                Ok(n) => {
                    self.tasks
                        .transition(&task_id, TaskStatus::Running, TaskStatus::Succeeded);
                    self.update(&task.job_id, |info| info.completed_tasks += 1);
                    info!("{}: terminada en el intento {}", task_id, attempt);
                    return Ok(n);
                }
                Err(message) => {
                    warn!("{}: intento {} falló: {}", task_id, attempt, message);
                    self.update(&task.job_id, |info| info.failed_attempts += 1);

                    let dir = paths.attempt_dir(task.kind, task.partition, attempt);
                    let cleanup_fs = fs.clone();
                    let _ = blocking(move || {
                        if cleanup_fs.exists(&dir) {
                            cleanup_fs.delete(&dir, true)?;
                        }
                        Ok(())
                    })
                    .await;

                    match self.tasks.record_failure(&task_id, &message, self.max_attempts) {
                        Some(TaskStatus::Scheduled) => {
                            self.update(&task.job_id, |info| info.retries += 1);
                        }
                        _ => {
                            return Err(JobError {
                                task_id: Some(task_id.clone()),
                                kind: Some(task.kind),
                                partition: Some(task.partition),
                                attempts: attempt,
                                message,
                            });
                        }
                    }
                }
            }
        }
    }
}

/// Un intento vencido sigue en su hilo hasta que ve la cancelación. Cuando
/// por fin termina se borra lo que haya escrito; si el job ya se estaba
/// cerrando también se borra `_temporary`, que el intento pudo recrear.
fn reap_late_attempt(
    handle: JoinHandle<Result<u64, String>>,
    fs: DfsClient,
    paths: JobPaths,
    dir: String,
) {
    tokio::spawn(async move {
        let _ = handle.await;
        let res = blocking(move || {
            if fs.exists(&dir) {
                fs.delete(&dir, true)?;
            }
            if paths.closing.load(Ordering::SeqCst) && fs.exists(&paths.temp) {
                fs.delete(&paths.temp, true)?;
            }
            Ok(())
        })
        .await;
        match res {
            Ok(()) | Err(DfsError::NotFound(_)) => {}
            Err(e) => warn!("no se pudo limpiar un intento vencido: {}", e),
        }
    });
}

/// Espera todas las tareas de una fase. Si alguna falló devuelve el error
/// de la de menor partición; si no, la suma de lo que devolvieron.
async fn collect_phase(set: &mut JoinSet<Result<u64, JobError>>) -> Result<u64, JobError> {
    let mut total = 0;
    let mut first_err: Option<JobError> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(n)) => total += n,
            Ok(Err(e)) => {
                let better = match &first_err {
                    None => true,
                    Some(prev) => e.partition < prev.partition,
                };
                if better {
                    first_err = Some(e);
                }
            }
            Err(join_err) => {
                first_err.get_or_insert_with(|| job_error(join_err));
            }
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(total),
    }
}

fn is_glob(input: &str) -> bool {
    input.contains(&['*', '?', '['][..])
}

/// Archivos de entrada del job. Acepta archivos, directorios (recorridos
/// entero, saltando los nombres que empiezan con `_` o `.`) y patrones glob.
pub fn resolve_inputs(fs: &DfsClient, inputs: &[String]) -> DfsResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    let visible = |p: &str| {
        path::components(p)
            .iter()
            .all(|c| !c.starts_with('_') && !c.starts_with('.'))
    };

    for input in inputs {
        let mut found: Vec<String> = Vec::new();

        if is_glob(input) {
            let pattern = Pattern::new(input)
                .map_err(|e| DfsError::invalid_argument(format!("patrón {}: {}", input, e)))?;
            let opts = MatchOptions {
                require_literal_separator: true,
                ..MatchOptions::new()
            };

            // directorio fijo antes del primer comodín
            let prefix_end = input.find(&['*', '?', '['][..]).unwrap_or(input.len());
            let base = match input[..prefix_end].rfind('/') {
                Some(0) | None => path::ROOT.to_string(),
                Some(idx) => input[..idx].to_string(),
            };
            if !fs.exists(&base) {
                continue;
            }
            for status in fs.list_files(&base, true)? {
                let status = status?;
                if pattern.matches_with(&status.path, opts) {
                    found.push(status.path);
                }
            }
        } else {
            let status = fs.get_file_status(input)?;
            if status.is_dir() {
                for child in fs.list_files(&status.path, true)? {
                    let child = child?;
                    if visible(&child.path[status.path.len()..]) {
                        found.push(child.path);
                    }
                }
            } else {
                found.push(status.path);
            }
        }

        found.sort();
        for f in found {
            if seen.insert(f.clone()) {
                files.push(f);
            }
        }
    }

    if files.is_empty() {
        return Err(DfsError::invalid_argument(format!(
            "ningún archivo de entrada en {:?}",
            inputs
        )));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_table_cas() {
        let table = TaskTable::default();
        let task = Task::new("job", TaskKind::Map, 0);
        let id = task.id.clone();
        table.insert(task);

        assert!(!table.transition(&id, TaskStatus::Running, TaskStatus::Succeeded));
        assert_eq!(table.begin_attempt(&id), Some(1));
        assert_eq!(table.begin_attempt(&id), None);

        assert_eq!(
            table.record_failure(&id, "boom", 2),
            Some(TaskStatus::Scheduled)
        );
        assert_eq!(table.begin_attempt(&id), Some(2));
        assert_eq!(table.record_failure(&id, "boom", 2), Some(TaskStatus::Failed));

        let task = table.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempt, 2);
        assert_eq!(task.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn attempt_paths() {
        let paths = JobPaths::new("/test/output");
        assert_eq!(paths.temp, "/test/output/_temporary");
        assert_eq!(
            paths.attempt_dir(TaskKind::Map, 3, 2),
            "/test/output/_temporary/attempt-m-00003-2"
        );
        assert_eq!(paths.map_dir(1), "/test/output/_temporary/map-00001");
        assert_eq!(JobPaths::part_name(0), "part-r-00000");
    }

    #[test]
    fn glob_detection() {
        assert!(is_glob("/test/input/*.txt"));
        assert!(is_glob("/logs/2024-0[1-3]"));
        assert!(!is_glob("/test/input"));
    }
}
