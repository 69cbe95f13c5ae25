use std::path::PathBuf;
use std::sync::Arc;
use std::collections::HashMap;

use lazy_static::lazy_static;
use log::LevelFilter;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::cli::Arguments;
use crate::utils::partitions::Chromosome;
use crate::utils::resources::SizeMultipliers;

// External software
pub const TARGZ_EXT: &str = "tar.gz";
pub const DOCKER_TAG: &str = "docker";
pub const TAR_TAG: &str = "tar";
pub const OPOSSUM_TAG: &str = "opossum";
pub const PLATYPUS_TAG: &str = "platypus";
pub const FILTER_PLATYPUS_TAG: &str = "filter_platypus";

// Task labels for stages that are not a single external tool
pub const MERGE_TAG: &str = "merge_vcfs";


lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(OPOSSUM_TAG, "0.2");
        m.insert(PLATYPUS_TAG, "1.0.0");
        m.insert(FILTER_PLATYPUS_TAG, "1.0.0");

        m
    };
}

// Static Filenames
pub const OPOSSUM_OUTPUT: &str = "opossum_rna_genome.bam";
pub const MERGED_VCF: &str = "all_merged.vcf";

// Static Parameters

pub const DEFAULT_DOCKERHUB: &str = "aarjunrao";

/// Disk grows with the inputs (see `utils::resources`); memory for a
/// calling or filtering run is pinned the way the source pipeline pinned it.
pub const CALL_TASK_MEMORY_BYTES: u64 = 6 * 1_073_741_824;
pub const LIGHT_TASK_MEMORY_BYTES: u64 = 100 * 1_048_576;
pub const LIGHT_TASK_DISK_BYTES: u64 = 100 * 1_048_576;

pub const DEFAULT_ALIGNMENT_DISK_MULTIPLIER: u64 = 1;
pub const DEFAULT_REFERENCE_DISK_MULTIPLIER: u64 = 5;


pub struct RunConfig {
    pub cwd: PathBuf,
    pub scratch_dir: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub maximal_semaphore: Arc<Semaphore>,
    pub log_level: LevelFilter,
}


/// Options recognized by the variant-calling pipeline. All values are
/// opaque pass-throughs to the external tools except `multipliers`,
/// which feeds disk estimation.
///
/// Defaults: tool versions from `TOOL_VERSIONS`, dockerhub
/// `DEFAULT_DOCKERHUB`, multipliers alignment x1 / reference x5, and an
/// empty chromosome override (derive the list from the reference index).
#[derive(Debug, Clone)]
pub struct VariantCallOptions {
    pub patient: String,
    pub chromosomes: Vec<Chromosome>,
    pub dockerhub: String,
    pub opossum_version: String,
    pub platypus_version: String,
    pub filter_version: String,
    pub multipliers: SizeMultipliers,
}

impl VariantCallOptions {
    pub fn from_args(args: &Arguments) -> Result<Self, PipelineError> {
        let patient = args
            .patient
            .clone()
            .ok_or_else(|| PipelineError::InvalidConfig("Patient short-ID required (--patient)".to_string()))?;

        let chromosomes = match &args.chromosomes {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(Chromosome::new)
                .collect(),
            None => Vec::new(),
        };

        Ok(VariantCallOptions {
            patient,
            chromosomes,
            dockerhub: args.dockerhub.clone(),
            opossum_version: args
                .opossum_version
                .clone()
                .unwrap_or_else(|| TOOL_VERSIONS[OPOSSUM_TAG].to_string()),
            platypus_version: args
                .platypus_version
                .clone()
                .unwrap_or_else(|| TOOL_VERSIONS[PLATYPUS_TAG].to_string()),
            filter_version: args
                .filter_version
                .clone()
                .unwrap_or_else(|| TOOL_VERSIONS[FILTER_PLATYPUS_TAG].to_string()),
            multipliers: SizeMultipliers {
                alignment: args.alignment_disk_multiplier.unwrap_or(DEFAULT_ALIGNMENT_DISK_MULTIPLIER),
                reference: args.reference_disk_multiplier.unwrap_or(DEFAULT_REFERENCE_DISK_MULTIPLIER),
            },
        })
    }
}


/// Failure of one scheduled task, tagged with the task that originated it.
/// Dependents of a failed task complete with the originating failure, so
/// `task`/`chromosome` always name the stage an operator should look at.
#[derive(Debug, Clone, Error)]
#[error("task {task} failed: {source}")]
pub struct TaskFailure {
    pub task: String,
    pub chromosome: Option<Chromosome>,
    pub source: Arc<PipelineError>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("An improperly formatted alignment bundle was supplied: {0}")]
    InputShape(String),

    #[error("Tool execution failed for {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("{0}")]
    Task(#[from] TaskFailure),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}
