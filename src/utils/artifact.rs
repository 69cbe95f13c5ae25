/// Artifact handles and the alignment input bundle.

use std::collections::BTreeMap;

use crate::config::defs::PipelineError;

/// Opaque reference to a stored file. Produced by exactly one task and
/// never mutated afterwards; `size` is recorded at creation time so
/// resource estimation never needs the content on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub name: String,
    pub size: u64,
    pub uri: String,
}

impl ArtifactHandle {
    pub fn new(name: impl Into<String>, size: u64, uri: impl Into<String>) -> Self {
        ArtifactHandle {
            name: name.into(),
            size,
            uri: uri.into(),
        }
    }
}

/// Size attribute shared by resolved handles and deferred task outputs.
/// Upstream guarantees the value is available before the artifact's
/// content is, so disk requirements can be computed at graph-construction
/// time.
pub trait DeclaredSize {
    fn declared_size(&self) -> u64;
}

impl DeclaredSize for ArtifactHandle {
    fn declared_size(&self) -> u64 {
        self.size
    }
}

/// A genome alignment and its index. An index is never used without its
/// paired alignment, and vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BamPair {
    pub bam: ArtifactHandle,
    pub bai: ArtifactHandle,
}

/// The two reference archives every calling run needs.
#[derive(Debug, Clone)]
pub struct ReferenceArchives {
    pub genome_fasta: ArtifactHandle,
    pub genome_fai: ArtifactHandle,
}

/// Keyed artifact tree, the historical wire shape for alignment inputs
/// handed over by upstream aligner stages.
pub type ArtifactGroup = BTreeMap<String, ArtifactEntry>;

#[derive(Debug, Clone)]
pub enum ArtifactEntry {
    File(ArtifactHandle),
    Group(ArtifactGroup),
}

pub const GENOME_BAM_KEY: &str = "rna_genome_sorted.bam";
pub const GENOME_BAI_KEY: &str = "rna_genome_sorted.bam.bai";
pub const GENOME_GROUP_KEY: &str = "rna_genome";
pub const TRANSCRIPTOME_BAM_KEY: &str = "rna_transcriptome.bam";

/// Incoming alignment data arrives in one of two shapes: the bare genome
/// pair, or the aligner's full output with the pair nested under
/// `rna_genome` next to a transcriptome bam this pipeline never touches.
/// The shape is decided once here, at the boundary, and downstream code
/// only ever sees the typed variants.
#[derive(Debug, Clone)]
pub enum AlignmentBundle {
    Genome(BamPair),
    StarOutput {
        genome: BamPair,
        transcriptome: Option<ArtifactHandle>,
    },
}

impl AlignmentBundle {
    /// Normalizes a raw keyed group into a typed bundle. Any shape other
    /// than the two accepted ones is a fatal input error, never retried.
    pub fn from_group(group: &ArtifactGroup) -> Result<Self, PipelineError> {
        if let Some(entry) = group.get(GENOME_GROUP_KEY) {
            let nested = match entry {
                ArtifactEntry::Group(nested) => nested,
                ArtifactEntry::File(_) => {
                    return Err(PipelineError::InputShape(format!(
                        "'{}' must be a group holding the bam and bai",
                        GENOME_GROUP_KEY
                    )));
                }
            };
            let genome = pair_from_flat(nested)?;
            let transcriptome = match group.get(TRANSCRIPTOME_BAM_KEY) {
                Some(ArtifactEntry::File(handle)) => Some(handle.clone()),
                _ => None,
            };
            return Ok(AlignmentBundle::StarOutput { genome, transcriptome });
        }

        if group.len() == 2 && group.contains_key(GENOME_BAM_KEY) && group.contains_key(GENOME_BAI_KEY) {
            return Ok(AlignmentBundle::Genome(pair_from_flat(group)?));
        }

        let keys: Vec<&str> = group.keys().map(String::as_str).collect();
        Err(PipelineError::InputShape(format!(
            "unrecognized keys {:?}; expected the genome pair or the aligner output bundle",
            keys
        )))
    }

    pub fn bam_pair(&self) -> &BamPair {
        match self {
            AlignmentBundle::Genome(pair) => pair,
            AlignmentBundle::StarOutput { genome, .. } => genome,
        }
    }
}

fn pair_from_flat(group: &ArtifactGroup) -> Result<BamPair, PipelineError> {
    let bam = match group.get(GENOME_BAM_KEY) {
        Some(ArtifactEntry::File(handle)) => handle.clone(),
        _ => {
            return Err(PipelineError::InputShape(format!("missing '{}'", GENOME_BAM_KEY)));
        }
    };
    let bai = match group.get(GENOME_BAI_KEY) {
        Some(ArtifactEntry::File(handle)) => handle.clone(),
        _ => {
            return Err(PipelineError::InputShape(format!("missing '{}'", GENOME_BAI_KEY)));
        }
    };
    Ok(BamPair { bam, bai })
}


#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str, size: u64) -> ArtifactHandle {
        ArtifactHandle::new(name, size, format!("test://{}", name))
    }

    fn flat_group() -> ArtifactGroup {
        let mut group = ArtifactGroup::new();
        group.insert(GENOME_BAM_KEY.to_string(), ArtifactEntry::File(handle("rna.bam", 100)));
        group.insert(GENOME_BAI_KEY.to_string(), ArtifactEntry::File(handle("rna.bam.bai", 10)));
        group
    }

    #[test]
    fn test_flat_shape_passes_through() {
        let bundle = AlignmentBundle::from_group(&flat_group()).unwrap();
        let pair = bundle.bam_pair();
        assert_eq!(pair.bam.name, "rna.bam");
        assert_eq!(pair.bai.name, "rna.bam.bai");
    }

    #[test]
    fn test_nested_shape_ignores_sibling() {
        let mut group = ArtifactGroup::new();
        group.insert(GENOME_GROUP_KEY.to_string(), ArtifactEntry::Group(flat_group()));
        group.insert(
            TRANSCRIPTOME_BAM_KEY.to_string(),
            ArtifactEntry::File(handle("rna_transcriptome.bam", 500)),
        );

        let bundle = AlignmentBundle::from_group(&group).unwrap();
        let pair = bundle.bam_pair();
        assert_eq!(pair.bam.name, "rna.bam");
        assert_eq!(pair.bai.name, "rna.bam.bai");
    }

    #[test]
    fn test_unrecognized_shape_is_fatal() {
        let mut group = ArtifactGroup::new();
        group.insert("tumor_dna.bam".to_string(), ArtifactEntry::File(handle("tumor_dna.bam", 100)));

        let err = AlignmentBundle::from_group(&group).unwrap_err();
        assert!(matches!(err, PipelineError::InputShape(_)), "got {:?}", err);
    }

    #[test]
    fn test_nested_group_missing_index_is_fatal() {
        let mut nested = ArtifactGroup::new();
        nested.insert(GENOME_BAM_KEY.to_string(), ArtifactEntry::File(handle("rna.bam", 100)));
        let mut group = ArtifactGroup::new();
        group.insert(GENOME_GROUP_KEY.to_string(), ArtifactEntry::Group(nested));

        let err = AlignmentBundle::from_group(&group).unwrap_err();
        assert!(matches!(err, PipelineError::InputShape(_)), "got {:?}", err);
    }
}
