/// Chromosome identifiers and the partition set a calling run fans out over.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::config::defs::PipelineError;
use crate::utils::artifact::ArtifactHandle;
use crate::utils::store::{expanded_member, ArchiveExpander, ArtifactStore};

/// One reference sequence (chromosome/contig); the unit of fan-out.
/// Opaque beyond equality, hashing, and ordering for deterministic maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chromosome(String);

impl Chromosome {
    pub fn new(name: impl Into<String>) -> Self {
        Chromosome(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the ordered chromosome list from a reference index artifact.
#[async_trait]
pub trait PartitionLister: Send + Sync {
    async fn list_partitions(&self, index: &ArtifactHandle) -> Result<Vec<Chromosome>, PipelineError>;
}

/// Determines the partition set for a run.
///
/// A non-empty override wins verbatim, caller order preserved, and the
/// reference index is never consulted. Otherwise the list is derived from
/// the index; having neither is a configuration error.
pub async fn enumerate_partitions(
    override_list: &[Chromosome],
    index: Option<&ArtifactHandle>,
    lister: &dyn PartitionLister,
) -> Result<Vec<Chromosome>, PipelineError> {
    if !override_list.is_empty() {
        debug!("Using {} chromosomes from the configured override", override_list.len());
        return Ok(override_list.to_vec());
    }

    match index {
        Some(handle) => lister.list_partitions(handle).await,
        None => Err(PipelineError::InvalidConfig(
            "No chromosome override and no reference index to derive one from".to_string(),
        )),
    }
}

/// Parses chromosome names from faidx index text: first tab-separated
/// column of each line, file order preserved.
pub fn parse_fai_chromosomes(text: &str) -> Vec<Chromosome> {
    text.lines()
        .filter_map(|line| {
            let name = line.split('\t').next().unwrap_or("").trim();
            if name.is_empty() {
                None
            } else {
                Some(Chromosome::new(name))
            }
        })
        .collect()
}

/// Lists partitions by expanding the fai archive and reading the index.
pub struct FaiPartitionLister {
    pub store: Arc<dyn ArtifactStore>,
    pub expander: Arc<dyn ArchiveExpander>,
    pub scratch_dir: PathBuf,
}

#[async_trait]
impl PartitionLister for FaiPartitionLister {
    async fn list_partitions(&self, index: &ArtifactHandle) -> Result<Vec<Chromosome>, PipelineError> {
        let work_dir = tempfile::Builder::new()
            .prefix("sample_chromosomes_")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| PipelineError::IOError(e.to_string()))?;

        let tar_path = self.store.materialize(index, work_dir.path()).await?;
        let members = self.expander.expand(&tar_path, work_dir.path()).await?;
        let fai_path = expanded_member(&members, index)?;

        let text = tokio::fs::read_to_string(&fai_path)
            .await
            .map_err(|e| PipelineError::IOError(e.to_string()))?;

        let chromosomes = parse_fai_chromosomes(&text);
        if chromosomes.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "Reference index {} lists no sequences",
                index.name
            )));
        }
        debug!("Derived {} chromosomes from {}", chromosomes.len(), index.name);
        Ok(chromosomes)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLister(Vec<Chromosome>);

    #[async_trait]
    impl PartitionLister for FixedLister {
        async fn list_partitions(&self, _index: &ArtifactHandle) -> Result<Vec<Chromosome>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    /// Lister that must never be reached.
    struct PanickingLister;

    #[async_trait]
    impl PartitionLister for PanickingLister {
        async fn list_partitions(&self, _index: &ArtifactHandle) -> Result<Vec<Chromosome>, PipelineError> {
            panic!("reference index consulted despite a non-empty override");
        }
    }

    fn chroms(names: &[&str]) -> Vec<Chromosome> {
        names.iter().map(|n| Chromosome::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_override_returned_verbatim() -> anyhow::Result<()> {
        let index = ArtifactHandle::new("genome.fa.fai.tar.gz", 10, "test://fai");
        let override_list = chroms(&["chr2", "chr1", "chrM"]);

        let got = enumerate_partitions(&override_list, Some(&index), &PanickingLister).await?;
        assert_eq!(got, override_list, "override order must be preserved");
        Ok(())
    }

    #[tokio::test]
    async fn test_derived_from_index_in_order() -> anyhow::Result<()> {
        let index = ArtifactHandle::new("genome.fa.fai.tar.gz", 10, "test://fai");
        let lister = FixedLister(chroms(&["chr1", "chr2", "chrM"]));

        let got = enumerate_partitions(&[], Some(&index), &lister).await?;
        assert_eq!(got, chroms(&["chr1", "chr2", "chrM"]));
        Ok(())
    }

    #[tokio::test]
    async fn test_neither_source_is_config_error() {
        let err = enumerate_partitions(&[], None, &PanickingLister).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)), "got {:?}", err);
    }

    #[test]
    fn test_parse_fai_first_column_in_file_order() {
        let text = "chr1\t248956422\t112\t70\t71\nchr2\t242193529\t252513167\t70\t71\n\nchrM\t16569\t495287skip\t70\t71\n";
        let got = parse_fai_chromosomes(text);
        assert_eq!(got, vec![Chromosome::new("chr1"), Chromosome::new("chr2"), Chromosome::new("chrM")]);
    }
}
