use std::{env, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    FileStatus, FsckReport, JobInfo, JobRequest, JobResults, JobStatus, NodeReport, WriteSummary,
};
use reqwest::{Client, RequestBuilder, Response};

const USER_HEADER: &str = "x-minidfs-user";

/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "CLI para el sistema de archivos y los jobs del master")]
struct Cli {
    /// Usuario con el que se hacen las operaciones (o MINIDFS_USER)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crea un directorio y sus padres
    Mkdir { path: String },

    /// Sube un archivo local al DFS
    Put {
        local: PathBuf,
        remote: String,
        #[arg(long)]
        overwrite: bool,
    },

    /// Baja un archivo del DFS
    Get { remote: String, local: PathBuf },

    /// Muestra un archivo del DFS por stdout
    Cat { path: String },

    /// Lista un directorio
    Ls {
        #[arg(default_value = "/")]
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },

    /// Borra un archivo o directorio
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },

    /// Renombra o mueve
    Mv { src: String, dst: String },

    /// Envía un job map/reduce
    Submit {
        /// Archivos, directorios o patrones glob del DFS
        #[arg(long = "input", required = true)]
        inputs: Vec<String>,
        #[arg(long)]
        output: String,
        #[arg(long, default_value_t = 1)]
        partitions: u32,
        #[arg(long, default_value = "wordcount")]
        mapper: String,
        #[arg(long, default_value = "sum")]
        reducer: String,
    },

    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    /// Lista (y opcionalmente muestra) los archivos de salida de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long)]
        show: bool,
    },

    /// Lista todos los jobs
    Jobs,

    /// Estado de los datanodes
    Nodes,

    /// Revisa la integridad de los bloques
    Fsck {
        #[arg(long)]
        repair: bool,
    },
}

struct Master {
    http: Client,
    base_url: String,
    user: String,
}

impl Master {
    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(USER_HEADER, &self.user)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    async fn status(&self, path: &str) -> Result<Option<FileStatus>> {
        let resp = self
            .get("/api/v1/fs/status")
            .query(&[("path", path)])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(ok(resp).await?.json().await?))
    }
}

/// Corta con el mensaje de error del master si la respuesta no es 2xx.
async fn ok(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
    match body.get("error").and_then(|e| e.as_str()) {
        Some(msg) => bail!("{} ({})", msg, status),
        None => bail!("el master respondió {}", status),
    }
}

fn print_status(s: &FileStatus) {
    let kind = if s.is_dir() { "d" } else { "-" };
    println!(
        "{}{:o}  {:<10} {:>2} {:>12}  {}  {}",
        kind,
        s.permission,
        s.owner,
        s.replication,
        s.length,
        s.modification_time.format("%Y-%m-%d %H:%M"),
        s.path
    );
}

fn print_job(job: &JobInfo) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  estado: {:?}", job.status);
    println!("  entradas: {:?}", job.input_paths);
    println!("  salida: {}", job.output_path);
    println!("  funciones: {} / {}", job.mapper_id, job.reducer_id);
    println!("  particiones: {}", job.partition_count);
    println!(
        "  tareas: total={}, completadas={}, intentos fallidos={}, reintentos={}",
        job.total_tasks, job.completed_tasks, job.failed_attempts, job.retries
    );
    if job.total_tasks > 0 {
        let pct = (job.completed_tasks as f64 / job.total_tasks as f64) * 100.0;
        println!("  progreso: {:.1}%", pct);
    }
    println!(
        "  registros: entrada={}, salida={}",
        job.input_records, job.output_records
    );
    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref started) = job.started_at {
        println!("  iniciado: {}", started);
    }
    if let Some(ref done) = job.finished_at {
        println!("  finalizado: {}", done);
    }
    if let Some(ref err) = job.error {
        println!("  error: {}", err.message);
        if let Some(ref task) = err.task_id {
            println!("    tarea: {} (intentos: {})", task, err.attempts);
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let master = Master {
        http: Client::new(),
        base_url: master_base_url(),
        user: cli
            .user
            .or_else(|| env::var("MINIDFS_USER").ok())
            .unwrap_or_else(|| "root".to_string()),
    };

    match cli.command {
        Commands::Mkdir { path } => {
            let resp = master
                .post("/api/v1/fs/mkdirs")
                .query(&[("path", &path)])
                .send()
                .await?;
            let status: FileStatus = ok(resp).await?.json().await?;
            print_status(&status);
        }

        Commands::Put {
            local,
            remote,
            overwrite,
        } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("no se pudo leer {}", local.display()))?;

            // como `hdfs dfs -put`: si el destino es un directorio, va dentro
            let mut target = remote.clone();
            if let Some(st) = master.status(&remote).await? {
                if st.is_dir() {
                    let name = local
                        .file_name()
                        .and_then(|n| n.to_str())
                        .context("archivo local sin nombre")?;
                    target = format!("{}/{}", remote.trim_end_matches('/'), name);
                }
            }

            let resp = master
                .request(reqwest::Method::PUT, "/api/v1/fs/file")
                .query(&[("path", &target)])
                .query(&[("overwrite", overwrite)])
                .body(data)
                .send()
                .await?;
            let summary: WriteSummary = ok(resp).await?.json().await?;
            println!(
                "{} -> {} ({} bytes, {} bloques)",
                local.display(),
                summary.path,
                summary.bytes,
                summary.blocks.len()
            );
            for w in summary.warnings {
                eprintln!("aviso: {}", w);
            }
        }

        Commands::Get { remote, local } => {
            let resp = master
                .get("/api/v1/fs/file")
                .query(&[("path", &remote)])
                .send()
                .await?;
            let bytes = ok(resp).await?.bytes().await?;

            let target = if local.is_dir() {
                let name = remote.rsplit('/').next().unwrap_or("salida");
                local.join(name)
            } else {
                local
            };
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("no se pudo escribir {}", target.display()))?;
            println!("{} -> {} ({} bytes)", remote, target.display(), bytes.len());
        }

        Commands::Cat { path } => {
            let resp = master
                .get("/api/v1/fs/file")
                .query(&[("path", &path)])
                .send()
                .await?;
            let bytes = ok(resp).await?.bytes().await?;
            print!("{}", String::from_utf8_lossy(&bytes));
        }

        Commands::Ls { path, recursive } => {
            let resp = master
                .get("/api/v1/fs/list")
                .query(&[("path", &path)])
                .query(&[("recursive", recursive)])
                .send()
                .await?;
            let listed: Vec<FileStatus> = ok(resp).await?.json().await?;
            if listed.is_empty() {
                println!("(vacío)");
            }
            for s in &listed {
                print_status(s);
            }
        }

        Commands::Rm { path, recursive } => {
            let resp = master
                .request(reqwest::Method::DELETE, "/api/v1/fs")
                .query(&[("path", &path)])
                .query(&[("recursive", recursive)])
                .send()
                .await?;
            ok(resp).await?;
            println!("borrado {}", path);
        }

        Commands::Mv { src, dst } => {
            let resp = master
                .post("/api/v1/fs/rename")
                .query(&[("src", &src), ("dst", &dst)])
                .send()
                .await?;
            ok(resp).await?;
            println!("{} -> {}", src, dst);
        }

        Commands::Submit {
            inputs,
            output,
            partitions,
            mapper,
            reducer,
        } => {
            let req = JobRequest {
                input_paths: inputs,
                mapper_id: mapper,
                reducer_id: reducer,
                partition_count: partitions,
                output_path: output,
            };
            let resp = master.post("/api/v1/jobs").json(&req).send().await?;
            let job: JobInfo = ok(resp).await?.json().await?;

            println!("Job creado:");
            println!("  id: {}", job.id);
            println!("  estado: {:?}", job.status);
            println!("  salida: {}", job.output_path);
            println!("  submitted_at: {}", job.submitted_at);
        }

        Commands::Status { id } => {
            let resp = master.get(&format!("/api/v1/jobs/{}", id)).send().await?;
            let job: JobInfo = ok(resp).await?.json().await?;
            print_job(&job);
        }

        Commands::Results { id, show } => {
            let resp = master
                .get(&format!("/api/v1/jobs/{}/results", id))
                .send()
                .await?;
            let results: JobResults = ok(resp).await?.json().await?;

            println!("Resultados para job {}:", results.job_id);
            println!("  estado: {:?}", results.status);
            println!("  directorio de salida: {}", results.output_path);
            if results.status != JobStatus::Succeeded {
                println!("  (el job no terminó bien todavía)");
            } else if results.files.is_empty() {
                println!("  (sin archivos de salida)");
            } else {
                println!("  archivos:");
                for f in &results.files {
                    println!("    - {}", f);
                }
            }

            if show {
                for f in &results.files {
                    let resp = master
                        .get("/api/v1/fs/file")
                        .query(&[("path", f)])
                        .send()
                        .await?;
                    let bytes = ok(resp).await?.bytes().await?;
                    print!("{}", String::from_utf8_lossy(&bytes));
                }
            }
        }

        Commands::Jobs => {
            let resp = master.get("/api/v1/jobs").send().await?;
            let jobs: Vec<JobInfo> = ok(resp).await?.json().await?;
            if jobs.is_empty() {
                println!("No hay jobs.");
            }
            for job in jobs {
                println!(
                    "{}  {:<10} {}/{} tareas  {}",
                    job.id,
                    format!("{:?}", job.status),
                    job.completed_tasks,
                    job.total_tasks,
                    job.output_path
                );
            }
        }

        Commands::Nodes => {
            let resp = master.get("/api/v1/nodes").send().await?;
            let nodes: Vec<NodeReport> = ok(resp).await?.json().await?;
            for n in nodes {
                println!("Datanode {}", n.node_id);
                println!("  rack           : {}", n.rack);
                println!("  vivo           : {}", n.alive);
                println!("  bloques        : {}", n.block_count);
                println!("  usado          : {} bytes", n.used_bytes);
                println!("  libre          : {} bytes", n.free_bytes);
                println!("  escrituras     : {}", n.in_flight_writes);
                println!();
            }
        }

        Commands::Fsck { repair } => {
            let resp = master
                .get("/api/v1/fsck")
                .query(&[("repair", repair)])
                .send()
                .await?;
            let report: FsckReport = ok(resp).await?.json().await?;
            println!("archivos revisados : {}", report.files_checked);
            println!("bloques revisados  : {}", report.blocks_checked);
            println!("sub-replicados     : {:?}", report.under_replicated);
            println!("reparados          : {:?}", report.repaired);
            println!("archivos corruptos : {:?}", report.corrupt_files);
            println!(
                "estado             : {}",
                if report.is_healthy() { "SANO" } else { "CON PROBLEMAS" }
            );
        }
    }

    Ok(())
}
