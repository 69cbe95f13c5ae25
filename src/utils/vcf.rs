/// VCF handling for the merge stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use crate::config::defs::{MERGED_VCF, PipelineError};
use crate::utils::artifact::ArtifactHandle;
use crate::utils::partitions::Chromosome;
use crate::utils::store::ArtifactStore;

/// Combines the fully-resolved per-chromosome result map into one
/// artifact. Only invoked once every filter output is materialized.
#[async_trait]
pub trait VcfMerger: Send + Sync {
    async fn merge(&self, perchrom: &BTreeMap<Chromosome, ArtifactHandle>) -> Result<ArtifactHandle, PipelineError>;
}

/// Concatenates per-chromosome VCFs in chromosome key order, keeping the
/// header block of the first file only.
///
/// # Arguments
///
/// * `inputs` - Materialized per-chromosome VCFs, already ordered.
/// * `out` - Path the merged VCF is written to.
///
/// # Returns
///
/// Number of (non-header) records written.
pub async fn merge_vcf_files(inputs: &[PathBuf], out: &Path) -> Result<u64, PipelineError> {
    let mut merged = String::new();
    let mut records = 0u64;

    for (index, path) in inputs.iter().enumerate() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::IOError(format!("Failed to read {}: {}", path.display(), e)))?;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('#') {
                if index == 0 {
                    merged.push_str(line);
                    merged.push('\n');
                }
                continue;
            }
            merged.push_str(line);
            merged.push('\n');
            records += 1;
        }
    }

    tokio::fs::write(out, merged)
        .await
        .map_err(|e| PipelineError::IOError(format!("Failed to write {}: {}", out.display(), e)))?;
    Ok(records)
}

pub struct LocalVcfMerger {
    pub store: Arc<dyn ArtifactStore>,
    pub scratch_dir: PathBuf,
}

#[async_trait]
impl VcfMerger for LocalVcfMerger {
    async fn merge(&self, perchrom: &BTreeMap<Chromosome, ArtifactHandle>) -> Result<ArtifactHandle, PipelineError> {
        let work_dir = tempfile::Builder::new()
            .prefix("merge_vcfs_")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| PipelineError::IOError(e.to_string()))?;

        let mut local_vcfs = Vec::with_capacity(perchrom.len());
        for (chrom, handle) in perchrom {
            let chrom_dir = work_dir.path().join(chrom.as_str());
            tokio::fs::create_dir_all(&chrom_dir)
                .await
                .map_err(|e| PipelineError::IOError(e.to_string()))?;
            local_vcfs.push(self.store.materialize(handle, &chrom_dir).await?);
        }

        let merged_path = work_dir.path().join(MERGED_VCF);
        let records = merge_vcf_files(&local_vcfs, &merged_path).await?;
        info!("Merged {} records from {} chromosomes", records, perchrom.len());

        self.store.put(&merged_path).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_merge_keeps_single_header_block() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("platypus_chr1.vcf");
        let second = dir.path().join("platypus_chr2.vcf");
        std::fs::File::create(&first)?
            .write_all(b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\nchr1\t10\t.\tA\tT\n")?;
        std::fs::File::create(&second)?
            .write_all(b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\nchr2\t20\t.\tG\tC\nchr2\t30\t.\tC\tG\n")?;

        let out = dir.path().join("all_merged.vcf");
        let records = merge_vcf_files(&[first, second], &out).await?;
        assert_eq!(records, 3);

        let merged = std::fs::read_to_string(&out)?;
        assert_eq!(merged.matches("##fileformat").count(), 1, "second header must be dropped");
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines[2], "chr1\t10\t.\tA\tT");
        assert_eq!(lines[4], "chr2\t30\t.\tC\tG");
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_skips_blank_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let only = dir.path().join("platypus_chrM.vcf");
        std::fs::File::create(&only)?.write_all(b"#CHROM\tPOS\n\nchrM\t5\t.\tA\tT\n\n")?;

        let out = dir.path().join("all_merged.vcf");
        let records = merge_vcf_files(std::slice::from_ref(&only), &out).await?;
        assert_eq!(records, 1);
        Ok(())
    }
}
