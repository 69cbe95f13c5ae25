/// Functions and structs for working with external tool invocations.
///
/// Every heavy tool runs in its own container; the core only assembles
/// argument vectors and hands them to a `ToolInvoker`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::config::defs::{DOCKER_TAG, PipelineError};

/// Container-side mount point for a task's workdir.
pub const DOCKER_DATA_DIR: &str = "/data";

/// Maps a host path inside a task workdir to its container-side path.
pub fn docker_path(path: &Path) -> String {
    match path.file_name() {
        Some(name) => format!("{}/{}", DOCKER_DATA_DIR, name.to_string_lossy()),
        None => DOCKER_DATA_DIR.to_string(),
    }
}

/// One external tool run: container-isolated, non-zero exit is a hard
/// failure for the task that requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: String,
    pub version: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<(), PipelineError>;
}


pub mod opossum {
    use std::path::Path;

    use super::docker_path;

    pub fn arg_generator(patient: &str, bam: &Path, out: &Path, log: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(patient.to_string()); // shortID
        args_vec.push("--BamFile".to_string());
        args_vec.push(docker_path(bam));
        args_vec.push("--OutFile".to_string());
        args_vec.push(docker_path(out));
        args_vec.push("-g".to_string());
        args_vec.push(docker_path(log));
        args_vec
    }
}

pub mod platypus {
    use std::path::Path;

    use super::docker_path;
    use crate::utils::partitions::Chromosome;

    pub fn arg_generator(
        patient: &str,
        chrom: &Chromosome,
        bam: &Path,
        fasta: &Path,
        out: &Path,
        log: &Path,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(patient.to_string()); // shortID
        args_vec.push(chrom.to_string());
        args_vec.push(format!("--bamFiles={}", docker_path(bam)));
        args_vec.push("-refFile".to_string());
        args_vec.push(docker_path(fasta));
        args_vec.push("-o".to_string());
        args_vec.push(docker_path(out));
        args_vec.push("-g".to_string());
        args_vec.push(docker_path(log));
        args_vec
    }
}

pub mod filter_platypus {
    use std::path::Path;

    use super::docker_path;
    use crate::utils::partitions::Chromosome;

    pub fn arg_generator(
        patient: &str,
        chrom: &Chromosome,
        vcf: &Path,
        bam: &Path,
        out: &Path,
        log: &Path,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(patient.to_string()); // shortID
        args_vec.push(chrom.to_string());
        args_vec.push("--VcfFile".to_string());
        args_vec.push(docker_path(vcf));
        args_vec.push("--BamFile".to_string());
        args_vec.push(docker_path(bam));
        args_vec.push("--OutFile".to_string());
        args_vec.push(docker_path(out));
        args_vec.push("-g".to_string());
        args_vec.push(docker_path(log));
        args_vec
    }
}


/// Runs tools as `<dockerhub>/<tool>:<version>` containers with the task
/// workdir mounted at `/data`.
pub struct DockerInvoker {
    pub dockerhub: String,
}

#[async_trait]
impl ToolInvoker for DockerInvoker {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<(), PipelineError> {
        let image = format!("{}/{}:{}", self.dockerhub, invocation.tool, invocation.version);
        let mount = format!("{}:{}", invocation.work_dir.display(), DOCKER_DATA_DIR);
        debug!("docker run --rm -v {} {} {:?}", mount, image, invocation.args);

        let output = Command::new(DOCKER_TAG)
            .arg("run")
            .arg("--rm")
            .arg("-v")
            .arg(&mount)
            .arg("-w")
            .arg(DOCKER_DATA_DIR)
            .arg(&image)
            .args(&invocation.args)
            .output()
            .await
            .map_err(|e| PipelineError::ToolExecution {
                tool: invocation.tool.clone(),
                message: format!("Failed to spawn {}: {}. Is docker installed?", image, e),
            })?;

        if !output.status.success() {
            return Err(PipelineError::ToolExecution {
                tool: invocation.tool.clone(),
                message: format!(
                    "{} exited with status {:?}: {}",
                    image,
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}


pub async fn docker_presence_check() -> anyhow::Result<String> {
    let output = Command::new(DOCKER_TAG)
        .arg("--version")
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to spawn docker: {}. Is docker installed?", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout
        .lines()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No output from docker --version"))?;
    let version = first_line
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| anyhow::anyhow!("Invalid docker --version output: {}", first_line))?
        .trim_end_matches(',')
        .to_string();
    if version.is_empty() {
        return Err(anyhow::anyhow!("Empty version number in docker --version output: {}", first_line));
    }
    Ok(version)
}
