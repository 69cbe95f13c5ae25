mod pipelines;
mod utils;
mod config;
mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use std::{env, fs};
use std::io::Write;

use anyhow::Result;
use env_logger::Builder;
use log::{LevelFilter, debug, error, info, warn};
use tokio::sync::Semaphore;

use crate::cli::parse;
use crate::config::defs::{PipelineError, RunConfig};
use crate::pipelines::variant_call::{self, Collaborators};
use crate::utils::command::{docker_presence_check, DockerInvoker};
use crate::utils::file::dated_dir_name;
use crate::utils::partitions::FaiPartitionLister;
use crate::utils::store::{ArtifactStore, LocalArtifactStore, TarballExpander};
use crate::utils::system::{compute_task_parallelism, detect_cores_and_load, detect_ram, get_scratch_dir};
use crate::utils::vcf::LocalVcfMerger;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n VarCall\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    let scratch_dir = get_scratch_dir();
    info!("The scratch directory is {:?}\n", scratch_dir);

    let (max_cores, cpu_load) = detect_cores_and_load(args.threads).await?;
    let parallelism = compute_task_parallelism(max_cores, cpu_load, args.max_tasks);
    debug!("Detected {} physical cores; CPU load {}%; running up to {} tasks at once",
              max_cores, cpu_load, parallelism);

    let maximal_semaphore = Arc::new(Semaphore::new(parallelism));

    let (total_ram, available_ram) = detect_ram()?;
    debug!("Available RAM: {} bytes (~{} GiB)", available_ram, available_ram / 1_073_741_824);
    debug!("Total RAM: {} bytes (~{} GiB)", total_ram, total_ram / 1_073_741_824);

    match docker_presence_check().await {
        Ok(version) => debug!("Found docker {}", version),
        Err(e) => warn!("{}", e),
    }

    let out_dir = setup_output_dir(&args, &dir)?;
    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd: dir,
        scratch_dir,
        out_dir,
        args,
        maximal_semaphore,
        log_level,
    });

    let collab = build_collaborators(&run_config);

    if let Err(e) = match module.as_str() {
        "variant_call" => variant_call_run(run_config, collab).await,
        _ => Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
    } {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn variant_call_run(run_config: Arc<RunConfig>, collab: Collaborators) -> Result<(), PipelineError> {
    let store = collab.store.clone();
    let merged = variant_call::run(run_config.clone(), collab).await?;
    let exported = store.materialize(&merged, &run_config.out_dir).await?;
    info!("Merged VCF written to {}", exported.display());
    Ok(())
}


/// Wires the production collaborators: an on-disk artifact store under
/// the output directory, system tar for archives, docker for the tools.
fn build_collaborators(run_config: &Arc<RunConfig>) -> Collaborators {
    let store: Arc<LocalArtifactStore> = Arc::new(LocalArtifactStore::new(run_config.out_dir.join(".artifacts")));
    let expander = Arc::new(TarballExpander);

    Collaborators {
        store: store.clone(),
        expander: expander.clone(),
        invoker: Arc::new(DockerInvoker {
            dockerhub: run_config.args.dockerhub.clone(),
        }),
        merger: Arc::new(LocalVcfMerger {
            store: store.clone(),
            scratch_dir: run_config.scratch_dir.clone(),
        }),
        lister: Arc::new(FaiPartitionLister {
            store,
            expander,
            scratch_dir: run_config.scratch_dir.clone(),
        }),
    }
}


/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise, creates a directory named `<patient>_YYYYMMDD`.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &cli::args::Arguments, cwd: &Path) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => {
            let base = args.patient.clone().unwrap_or_else(|| "sample".to_string());
            cwd.join(dated_dir_name(&base))
        }
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}
