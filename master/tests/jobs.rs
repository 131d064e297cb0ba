use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::bail;
use common::{
    engine::Emitter, wordcount, ClusterConfig, DfsError, JobRequest, JobStatus, TaskKind,
    TaskStatus,
};
use master::{DfsClient, JobCoordinator};
use tempfile::TempDir;
use worker::FunctionRegistry;

fn setup(registry: FunctionRegistry) -> (TempDir, DfsClient, JobCoordinator) {
    setup_with(registry, |_| {})
}

fn setup_with(
    registry: FunctionRegistry,
    tweak: impl FnOnce(&mut ClusterConfig),
) -> (TempDir, DfsClient, JobCoordinator) {
    let dir = TempDir::new().unwrap();
    let mut config = ClusterConfig {
        data_dir: dir.path().to_path_buf(),
        block_size: 1024,
        write_timeout_ms: 5_000,
        max_task_attempts: 3,
        task_timeout_secs: 30,
        ..ClusterConfig::default()
    };
    tweak(&mut config);
    let fs = DfsClient::open(&config).unwrap();
    fs.mkdirs("/test/input").unwrap();
    fs.write_all_to("/test/input/data.txt", b"a,b\na,c", false)
        .unwrap();
    let jobs = JobCoordinator::new(fs.clone(), registry, &config);
    (dir, fs, jobs)
}

fn request(mapper: &str, partitions: u32) -> JobRequest {
    JobRequest {
        input_paths: vec!["/test/input".to_string()],
        mapper_id: mapper.to_string(),
        reducer_id: "sum".to_string(),
        partition_count: partitions,
        output_path: "/test/output".to_string(),
    }
}

/// Registro con un mapper "flaky" que falla las primeras `failures` veces
/// que se lo llama y después se comporta como wordcount.
fn flaky_registry(failures: u32) -> (FunctionRegistry, Arc<AtomicU32>) {
    let left = Arc::new(AtomicU32::new(failures));
    let mut registry = FunctionRegistry::with_builtins();
    let counter = left.clone();
    registry.register_mapper(
        "flaky",
        move |offset: &str, line: &str, emit: &mut dyn Emitter| {
            let failed = counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                bail!("fallo inyectado");
            }
            wordcount::wordcount_map(offset, line, emit)
        },
    );
    (registry, left)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wordcount_single_partition() {
    let (_dir, fs, jobs) = setup(FunctionRegistry::with_builtins());

    let id = jobs.submit_job(request("wordcount", 1)).unwrap();
    let info = jobs.wait_for_job(&id).await.unwrap();
    assert_eq!(info.status, JobStatus::Succeeded, "{:?}", info.error);
    assert_eq!(info.completed_tasks, info.total_tasks);
    assert_eq!(info.input_records, 2);
    assert_eq!(info.output_records, 3);

    let out = fs.read_to_vec("/test/output/part-r-00000").unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "a\t2\nb\t1\nc\t1\n");
    assert!(fs.exists("/test/output/_SUCCESS"));
    assert!(!fs.exists("/test/output/_temporary"));

    let results = jobs.job_results(&id).unwrap();
    assert_eq!(results.files, vec!["/test/output/part-r-00000".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_key_lands_in_exactly_one_partition() {
    let (_dir, fs, jobs) = setup(FunctionRegistry::with_builtins());

    let id = jobs.submit_job(request("wordcount", 3)).unwrap();
    let info = jobs.wait_for_job(&id).await.unwrap();
    assert_eq!(info.status, JobStatus::Succeeded, "{:?}", info.error);
    assert_eq!(info.total_tasks, 6);

    let results = jobs.job_results(&id).unwrap();
    assert_eq!(results.files.len(), 3);

    let mut lines: Vec<String> = Vec::new();
    for f in &results.files {
        let text = String::from_utf8(fs.read_to_vec(f).unwrap()).unwrap();
        lines.extend(text.lines().map(str::to_string));
    }
    lines.sort();
    assert_eq!(lines, vec!["a\t2", "b\t1", "c\t1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retried_task_gives_the_same_output() {
    let (registry, left) = flaky_registry(2);
    let (_dir, fs, jobs) = setup(registry);

    let id = jobs.submit_job(request("flaky", 1)).unwrap();
    let info = jobs.wait_for_job(&id).await.unwrap();
    assert_eq!(info.status, JobStatus::Succeeded, "{:?}", info.error);
    assert_eq!(left.load(Ordering::SeqCst), 0);
    assert_eq!(info.failed_attempts, 2);
    assert_eq!(info.retries, 2);

    let out = fs.read_to_vec("/test/output/part-r-00000").unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "a\t2\nb\t1\nc\t1\n");

    let map = jobs
        .tasks(&id)
        .into_iter()
        .find(|t| t.kind == TaskKind::Map)
        .unwrap();
    assert_eq!(map.status, TaskStatus::Succeeded);
    assert_eq!(map.attempt, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_failing_every_attempt_fails_the_job() {
    let (registry, _left) = flaky_registry(u32::MAX);
    let (_dir, fs, jobs) = setup(registry);

    let id = jobs.submit_job(request("flaky", 1)).unwrap();
    let info = jobs.wait_for_job(&id).await.unwrap();
    assert_eq!(info.status, JobStatus::Failed);

    let err = info.error.expect("un job fallido lleva su error");
    assert_eq!(err.kind, Some(TaskKind::Map));
    assert_eq!(err.partition, Some(0));
    assert_eq!(err.attempts, 3);
    assert!(err.message.contains("fallo inyectado"), "{}", err.message);

    assert!(!fs.exists("/test/output/_SUCCESS"));
    assert!(jobs.job_results(&id).unwrap().files.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submit_rejects_bad_requests() {
    let (_dir, fs, jobs) = setup(FunctionRegistry::with_builtins());

    assert!(matches!(
        jobs.submit_job(request("wordcount", 0)),
        Err(DfsError::InvalidArgument(_))
    ));
    assert!(matches!(
        jobs.submit_job(request("no-existe", 1)),
        Err(DfsError::UnknownFunction(_))
    ));

    fs.mkdirs("/test/output").unwrap();
    assert!(matches!(
        jobs.submit_job(request("wordcount", 1)),
        Err(DfsError::AlreadyExists(_))
    ));

    assert!(matches!(
        jobs.job_info("no-existe"),
        Err(DfsError::UnknownJob(_))
    ));
    assert!(jobs.list_jobs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_input_fails_the_job() {
    let (_dir, _fs, jobs) = setup(FunctionRegistry::with_builtins());

    let mut req = request("wordcount", 1);
    req.input_paths = vec!["/no/hay/nada".to_string()];
    let id = jobs.submit_job(req).unwrap();

    let info = jobs.wait_for_job(&id).await.unwrap();
    assert_eq!(info.status, JobStatus::Failed);
    assert!(info.error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_attempt_leaves_nothing_behind() {
    let mut registry = FunctionRegistry::with_builtins();
    registry.register_mapper(
        "lento",
        |offset: &str, line: &str, emit: &mut dyn Emitter| {
            thread::sleep(Duration::from_millis(1_500));
            wordcount::wordcount_map(offset, line, emit)
        },
    );
    let (_dir, fs, jobs) = setup_with(registry, |c| {
        c.task_timeout_secs = 1;
        c.max_task_attempts = 1;
    });

    let id = jobs.submit_job(request("lento", 1)).unwrap();
    let info = jobs.wait_for_job(&id).await.unwrap();
    assert_eq!(info.status, JobStatus::Failed);
    assert!(info.error.unwrap().message.contains("timeout"));

    // el hilo del intento vencido termina después del fallo del job
    tokio::time::sleep(Duration::from_millis(4_000)).await;
    assert!(!fs.exists("/test/output/_temporary"));
    assert!(!fs.exists("/test/output/_SUCCESS"));
    assert!(!fs.exists("/test/output/part-r-00000"));
}
