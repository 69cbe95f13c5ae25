use clap::Parser;

use crate::config::defs::DEFAULT_DOCKERHUB;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "varcall-pipelines", version = "0.1")]
pub struct Arguments {

    #[arg(short, long)]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "bam", help = "Coordinate-sorted RNA genome alignment (BAM)")]
    pub bam: Option<String>,

    #[arg(short = 'I', long = "bai", help = "Index for the genome alignment (BAM.BAI)")]
    pub bai: Option<String>,

    #[arg(long, help = "Optional transcriptome alignment emitted alongside the genome pair by the aligner; carried in the input bundle but not consumed by this pipeline")]
    pub transcriptome_bam: Option<String>,

    #[arg(short = 'f', long = "genome-fasta", help = "Reference genome archive (fa.tar.gz)")]
    pub genome_fasta: Option<String>,

    #[arg(long = "genome-fai", help = "Reference index archive (fa.fai.tar.gz)")]
    pub genome_fai: Option<String>,

    #[arg(short = 'p', long)]
    pub patient: Option<String>,

    #[arg(short = 'c', long, help = "Comma-separated chromosome override; when given, the reference index is never consulted")]
    pub chromosomes: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named '<patient>_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(long, default_value_t = 64)]
    pub threads: usize,

    #[arg(long, help = "Cap on concurrently running tasks; defaults to the detected physical core count")]
    pub max_tasks: Option<usize>,

    #[arg(long, default_value = DEFAULT_DOCKERHUB)]
    pub dockerhub: String,

    #[arg(long)]
    pub opossum_version: Option<String>,

    #[arg(long)]
    pub platypus_version: Option<String>,

    #[arg(long)]
    pub filter_version: Option<String>,

    #[arg(long)]
    pub alignment_disk_multiplier: Option<u64>,

    #[arg(long)]
    pub reference_disk_multiplier: Option<u64>,
}
