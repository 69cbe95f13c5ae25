/// Artifact storage and archive expansion collaborators.
///
/// Artifacts are content-addressed and immutable once stored; tasks only
/// ever exchange handles and re-materialize content into their own
/// private workdirs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::defs::{PipelineError, TARGZ_EXT, TAR_TAG};
use crate::utils::artifact::ArtifactHandle;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copies the artifact's content into `dest_dir` under its logical
    /// name and returns the local path.
    async fn materialize(&self, handle: &ArtifactHandle, dest_dir: &Path) -> Result<PathBuf, PipelineError>;

    /// Registers a produced file and returns its handle.
    async fn put(&self, local_path: &Path) -> Result<ArtifactHandle, PipelineError>;
}

#[async_trait]
pub trait ArchiveExpander: Send + Sync {
    /// Expands a materialized tarball into `dest_dir`, returning every
    /// member keyed by its archive-relative name.
    async fn expand(&self, tar_path: &Path, dest_dir: &Path) -> Result<HashMap<String, PathBuf>, PipelineError>;
}

/// Looks up the member an archive handle is expected to expand to:
/// `genome.fa.tar.gz` yields `genome.fa`.
pub fn expanded_member(
    members: &HashMap<String, PathBuf>,
    archive: &ArtifactHandle,
) -> Result<PathBuf, PipelineError> {
    let expected = archive
        .name
        .strip_suffix(&format!(".{}", TARGZ_EXT))
        .unwrap_or(&archive.name);

    if let Some(path) = members.get(expected) {
        return Ok(path.clone());
    }
    members
        .iter()
        .find(|(name, _)| name.rsplit('/').next() == Some(expected))
        .map(|(_, path)| path.clone())
        .ok_or_else(|| {
            PipelineError::IOError(format!("Archive {} did not contain expected member {}", archive.name, expected))
        })
}

/// On-disk store rooted at one directory, addressing content by sha256.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalArtifactStore { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn materialize(&self, handle: &ArtifactHandle, dest_dir: &Path) -> Result<PathBuf, PipelineError> {
        let dest = dest_dir.join(&handle.name);
        tokio::fs::copy(&handle.uri, &dest)
            .await
            .map_err(|e| PipelineError::IOError(format!("Failed to materialize {}: {}", handle.name, e)))?;
        Ok(dest)
    }

    async fn put(&self, local_path: &Path) -> Result<ArtifactHandle, PipelineError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::IOError(format!("Cannot store a path with no file name: {}", local_path.display())))?;

        let digest = sha256_file(local_path).await?;
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| PipelineError::IOError(e.to_string()))?
            .len();

        let slot = self.root.join(&digest);
        tokio::fs::create_dir_all(&slot)
            .await
            .map_err(|e| PipelineError::IOError(e.to_string()))?;
        let stored = slot.join(&name);
        if !stored.exists() {
            tokio::fs::copy(local_path, &stored)
                .await
                .map_err(|e| PipelineError::IOError(format!("Failed to store {}: {}", name, e)))?;
        }
        debug!("Stored {} ({} bytes) as {}", name, size, digest);

        Ok(ArtifactHandle::new(name, size, stored.to_string_lossy().into_owned()))
    }
}

async fn sha256_file(path: &Path) -> Result<String, PipelineError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PipelineError::IOError(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1_048_576];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| PipelineError::IOError(e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Expands `.tar.gz` archives with the system tar binary.
pub struct TarballExpander;

#[async_trait]
impl ArchiveExpander for TarballExpander {
    async fn expand(&self, tar_path: &Path, dest_dir: &Path) -> Result<HashMap<String, PathBuf>, PipelineError> {
        let tar_str = tar_path.to_string_lossy();
        let dest_str = dest_dir.to_string_lossy();
        let listing = run_tar(&["-tzf", tar_str.as_ref()]).await?;
        run_tar(&["-xzf", tar_str.as_ref(), "-C", dest_str.as_ref()]).await?;

        let mut members = HashMap::new();
        for line in listing.lines() {
            let member = line.trim().trim_end_matches('/');
            if member.is_empty() {
                continue;
            }
            members.insert(member.to_string(), dest_dir.join(member));
        }
        Ok(members)
    }
}

async fn run_tar(args: &[&str]) -> Result<String, PipelineError> {
    let output = Command::new(TAR_TAG)
        .args(args)
        .output()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: TAR_TAG.to_string(),
            message: format!("Failed to spawn: {}. Is tar installed?", e),
        })?;

    if !output.status.success() {
        return Err(PipelineError::ToolExecution {
            tool: TAR_TAG.to_string(),
            message: format!(
                "exit status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_put_then_materialize_roundtrip() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        let store = LocalArtifactStore::new(root.path());

        let src = work.path().join("rna.bam");
        std::fs::File::create(&src)?.write_all(b"not really a bam")?;

        let handle = store.put(&src).await?;
        assert_eq!(handle.name, "rna.bam");
        assert_eq!(handle.size, 16);

        let dest = tempfile::tempdir()?;
        let local = store.materialize(&handle, dest.path()).await?;
        assert_eq!(std::fs::read(local)?, b"not really a bam");
        Ok(())
    }

    #[tokio::test]
    async fn test_same_content_addresses_same_slot() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        let store = LocalArtifactStore::new(root.path());

        let src = work.path().join("a.vcf");
        std::fs::File::create(&src)?.write_all(b"##fileformat=VCFv4.2\n")?;
        let first = store.put(&src).await?;
        let second = store.put(&src).await?;
        assert_eq!(first.uri, second.uri);
        Ok(())
    }

    #[test]
    fn test_expanded_member_strips_archive_suffix() {
        let mut members = HashMap::new();
        members.insert("genome.fa".to_string(), PathBuf::from("/tmp/x/genome.fa"));
        let archive = ArtifactHandle::new("genome.fa.tar.gz", 5, "test://fa");
        let path = expanded_member(&members, &archive).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x/genome.fa"));
    }

    #[test]
    fn test_expanded_member_matches_nested_paths() {
        let mut members = HashMap::new();
        members.insert("hg19/genome.fa.fai".to_string(), PathBuf::from("/tmp/x/hg19/genome.fa.fai"));
        let archive = ArtifactHandle::new("genome.fa.fai.tar.gz", 5, "test://fai");
        let path = expanded_member(&members, &archive).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x/hg19/genome.fa.fai"));
    }

    #[test]
    fn test_expanded_member_missing_is_error() {
        let members = HashMap::new();
        let archive = ArtifactHandle::new("genome.fa.tar.gz", 5, "test://fa");
        assert!(expanded_member(&members, &archive).is_err());
    }

    #[tokio::test]
    async fn test_tarball_expander_roundtrip() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let payload = work.path().join("genome.fa");
        std::fs::File::create(&payload)?.write_all(b">chr1\nACGT\n")?;

        let tarball = work.path().join("genome.fa.tar.gz");
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(&tarball)
            .arg("-C")
            .arg(work.path())
            .arg("genome.fa")
            .status()?;
        assert!(status.success());

        let dest = tempfile::tempdir()?;
        let members = TarballExpander.expand(&tarball, dest.path()).await?;
        let extracted = members.get("genome.fa").expect("member listed");
        assert_eq!(std::fs::read(extracted)?, b">chr1\nACGT\n");
        Ok(())
    }
}
