use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use log::{debug, info};

use crate::config::defs::{
    FILTER_PLATYPUS_TAG, MERGE_TAG, OPOSSUM_OUTPUT, OPOSSUM_TAG, PipelineError, PLATYPUS_TAG,
    RunConfig, VariantCallOptions,
};
use crate::utils::artifact::{
    AlignmentBundle, ArtifactEntry, ArtifactGroup, ArtifactHandle, BamPair, ReferenceArchives,
    GENOME_BAI_KEY, GENOME_BAM_KEY, GENOME_GROUP_KEY, TRANSCRIPTOME_BAM_KEY,
};
use crate::utils::command::{self, ToolInvocation, ToolInvoker};
use crate::utils::file::{chrom_scoped_filename, is_gzipped, resolve_input_path};
use crate::utils::partitions::{enumerate_partitions, Chromosome, PartitionLister};
use crate::utils::resources::{estimate_call_disk, TaskResources};
use crate::utils::store::{expanded_member, ArchiveExpander, ArtifactStore};
use crate::utils::tasks::{Deferred, ScheduledTask, TaskGraph, TaskSpec};
use crate::utils::vcf::VcfMerger;

/// The external collaborators the pipeline runs against. Production
/// wiring lives in `main`; tests substitute recording stubs.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ArtifactStore>,
    pub expander: Arc<dyn ArchiveExpander>,
    pub invoker: Arc<dyn ToolInvoker>,
    pub merger: Arc<dyn VcfMerger>,
    pub lister: Arc<dyn PartitionLister>,
}

/// A fully scheduled run: the inspectable task graph, each chromosome's
/// deferred filter output, and the deferred merge output.
pub struct ScheduledRun {
    pub graph: TaskGraph,
    pub perchrom: BTreeMap<Chromosome, Deferred>,
    pub merged: Deferred,
}

/// CLI entry: registers the input files as artifacts and runs the whole
/// calling pipeline.
pub async fn run(config: Arc<RunConfig>, collab: Collaborators) -> Result<ArtifactHandle, PipelineError> {
    println!("\n-------------\n Variant Calling\n-------------\n");

    let opts = VariantCallOptions::from_args(&config.args)?;

    let bam = put_input(&config, &collab, config.args.bam.as_deref(), "--bam").await?;
    let bai = put_input(&config, &collab, config.args.bai.as_deref(), "--bai").await?;
    let genome_fasta = put_archive(&config, &collab, config.args.genome_fasta.as_deref(), "--genome-fasta").await?;
    let genome_fai = put_archive(&config, &collab, config.args.genome_fai.as_deref(), "--genome-fai").await?;

    // The historical bundle shapes: flat genome pair, or the aligner's
    // nested output when a transcriptome bam rides along.
    let mut raw_bundle = ArtifactGroup::new();
    match &config.args.transcriptome_bam {
        Some(path) => {
            let transcriptome = put_input(&config, &collab, Some(path.as_str()), "--transcriptome-bam").await?;
            let mut nested = ArtifactGroup::new();
            nested.insert(GENOME_BAM_KEY.to_string(), ArtifactEntry::File(bam));
            nested.insert(GENOME_BAI_KEY.to_string(), ArtifactEntry::File(bai));
            raw_bundle.insert(GENOME_GROUP_KEY.to_string(), ArtifactEntry::Group(nested));
            raw_bundle.insert(TRANSCRIPTOME_BAM_KEY.to_string(), ArtifactEntry::File(transcriptome));
        }
        None => {
            raw_bundle.insert(GENOME_BAM_KEY.to_string(), ArtifactEntry::File(bam));
            raw_bundle.insert(GENOME_BAI_KEY.to_string(), ArtifactEntry::File(bai));
        }
    }

    let refs = ReferenceArchives { genome_fasta, genome_fai };
    run_with_merge(raw_bundle, refs, opts, config, collab).await
}

/// A wrapper for the entire platypus run: preprocessing, the
/// per-chromosome fan-out, and the merge of every filtered result.
pub async fn run_with_merge(
    raw_bundle: ArtifactGroup,
    refs: ReferenceArchives,
    opts: VariantCallOptions,
    config: Arc<RunConfig>,
    collab: Collaborators,
) -> Result<ArtifactHandle, PipelineError> {
    let patient = opts.patient.clone();
    let ScheduledRun { graph, perchrom, merged } = schedule(raw_bundle, refs, opts, config, collab).await?;
    info!("Scheduled {} tasks across {} chromosomes", graph.plan().len(), perchrom.len());

    let outcome = merged.resolved().await;
    graph.quiesce().await;

    let merged = outcome.map_err(PipelineError::Task)?;
    info!("Ran platypus with merge on {} successfully", patient);
    Ok(merged)
}

/// Builds the task graph for one calling run.
///
/// Structure: one whole-alignment preprocessing task; per chromosome, a
/// calling task depending on preprocessing and a filtering task depending
/// on that chromosome's calling task only; one merge task depending on
/// every filtering task. No chromosome waits on another; the merge
/// barrier is exactly its dependency set.
pub async fn schedule(
    raw_bundle: ArtifactGroup,
    refs: ReferenceArchives,
    opts: VariantCallOptions,
    config: Arc<RunConfig>,
    collab: Collaborators,
) -> Result<ScheduledRun, PipelineError> {
    // Shape errors surface here, before anything is scheduled.
    let bundle = AlignmentBundle::from_group(&raw_bundle)?;
    let pair = bundle.bam_pair().clone();

    let chromosomes =
        enumerate_partitions(&opts.chromosomes, Some(&refs.genome_fai), collab.lister.as_ref()).await?;
    debug!("Fanning out over {} chromosomes", chromosomes.len());

    let scratch = config.scratch_dir.clone();
    let mut graph = TaskGraph::with_semaphore(config.maximal_semaphore.clone());

    let preprocessing = {
        let raw_bundle = raw_bundle.clone();
        let opts = opts.clone();
        let scratch = scratch.clone();
        let store = collab.store.clone();
        let invoker = collab.invoker.clone();
        graph.submit(
            TaskSpec::new(OPOSSUM_TAG)
                .resources(TaskResources::light())
                .declares_output_size(pair.bam.size),
            &[],
            async move { preprocess(raw_bundle, opts, scratch, store, invoker).await },
        )
    };

    let mut perchrom: BTreeMap<Chromosome, Deferred> = BTreeMap::new();
    let mut filter_tasks: Vec<ScheduledTask> = Vec::with_capacity(chromosomes.len());

    for chrom in &chromosomes {
        // Requirements are computed from declared sizes here, at
        // graph-construction time; nothing has been localized yet.
        let disk = estimate_call_disk(&pair.bam, &refs.genome_fasta, &opts.multipliers);

        let call = {
            let pair = pair.clone();
            let refs = refs.clone();
            let opts = opts.clone();
            let chrom = chrom.clone();
            let scratch = scratch.clone();
            let store = collab.store.clone();
            let expander = collab.expander.clone();
            let invoker = collab.invoker.clone();
            graph.submit(
                TaskSpec::new(format!("{}:{}", PLATYPUS_TAG, chrom))
                    .for_chromosome(chrom.clone())
                    .resources(TaskResources::call(disk)),
                &[&preprocessing],
                async move { call_partition(pair, refs, opts, chrom, scratch, store, expander, invoker).await },
            )
        };

        let filter = {
            let pair = pair.clone();
            let call_result = call.output.clone();
            let opts = opts.clone();
            let chrom = chrom.clone();
            let scratch = scratch.clone();
            let store = collab.store.clone();
            let invoker = collab.invoker.clone();
            graph.submit(
                TaskSpec::new(format!("{}:{}", FILTER_PLATYPUS_TAG, chrom))
                    .for_chromosome(chrom.clone())
                    .resources(TaskResources::call(disk)),
                &[&call],
                async move { filter_partition(pair, call_result, opts, chrom, scratch, store, invoker).await },
            )
        };

        perchrom.insert(chrom.clone(), filter.output.clone());
        filter_tasks.push(filter);
    }

    let merge = {
        let perchrom = perchrom.clone();
        let merger = collab.merger.clone();
        let patient = opts.patient.clone();
        let deps: Vec<&ScheduledTask> = filter_tasks.iter().collect();
        graph.submit(
            TaskSpec::new(MERGE_TAG).resources(TaskResources::light()),
            &deps,
            async move { merge_partitions(perchrom, merger, patient).await },
        )
    };

    Ok(ScheduledRun {
        graph,
        perchrom,
        merged: merge.output,
    })
}

/// Conditions the whole alignment once, before any chromosome is called.
async fn preprocess(
    raw_bundle: ArtifactGroup,
    opts: VariantCallOptions,
    scratch: PathBuf,
    store: Arc<dyn ArtifactStore>,
    invoker: Arc<dyn ToolInvoker>,
) -> Result<ArtifactHandle, PipelineError> {
    let bundle = AlignmentBundle::from_group(&raw_bundle)?;
    let pair = bundle.bam_pair();

    let work_dir = task_work_dir(&scratch, OPOSSUM_TAG)?;
    let bam_path = store.materialize(&pair.bam, work_dir.path()).await?;
    store.materialize(&pair.bai, work_dir.path()).await?;

    let opossum_output = work_dir.path().join(OPOSSUM_OUTPUT);
    let opossum_log = work_dir.path().join("opossum.log");
    let parameters = command::opossum::arg_generator(&opts.patient, &bam_path, &opossum_output, &opossum_log);

    invoker
        .invoke(&ToolInvocation {
            tool: OPOSSUM_TAG.to_string(),
            version: opts.opossum_version.clone(),
            args: parameters,
            work_dir: work_dir.path().to_path_buf(),
        })
        .await?;

    let output_file = store.put(&opossum_output).await?;
    info!("Ran opossum on {} successfully", opts.patient);
    Ok(output_file)
}

/// Runs the platypus call on a single chromosome of the input pair.
async fn call_partition(
    pair: BamPair,
    refs: ReferenceArchives,
    opts: VariantCallOptions,
    chrom: Chromosome,
    scratch: PathBuf,
    store: Arc<dyn ArtifactStore>,
    expander: Arc<dyn ArchiveExpander>,
    invoker: Arc<dyn ToolInvoker>,
) -> Result<ArtifactHandle, PipelineError> {
    let work_dir = task_work_dir(&scratch, &format!("{}_{}", PLATYPUS_TAG, chrom))?;

    let bam_path = store.materialize(&pair.bam, work_dir.path()).await?;
    store.materialize(&pair.bai, work_dir.path()).await?;
    let fasta_tar = store.materialize(&refs.genome_fasta, work_dir.path()).await?;
    let fai_tar = store.materialize(&refs.genome_fai, work_dir.path()).await?;

    // The caller wants the index right next to the expanded fasta.
    let fasta_members = expander.expand(&fasta_tar, work_dir.path()).await?;
    expander.expand(&fai_tar, work_dir.path()).await?;
    let fasta_path = expanded_member(&fasta_members, &refs.genome_fasta)?;

    let platypus_output = work_dir.path().join(chrom_scoped_filename(PLATYPUS_TAG, chrom.as_str(), "vcf"));
    let platypus_log = work_dir.path().join(chrom_scoped_filename(PLATYPUS_TAG, chrom.as_str(), "log"));
    let parameters = command::platypus::arg_generator(
        &opts.patient,
        &chrom,
        &bam_path,
        &fasta_path,
        &platypus_output,
        &platypus_log,
    );

    invoker
        .invoke(&ToolInvocation {
            tool: PLATYPUS_TAG.to_string(),
            version: opts.platypus_version.clone(),
            args: parameters,
            work_dir: work_dir.path().to_path_buf(),
        })
        .await?;

    let output_file = store.put(&platypus_output).await?;
    info!("Ran platypus on {}:{} successfully", opts.patient, chrom);
    Ok(output_file)
}

/// Post-processes one chromosome's raw calls. Depends on, and only ever
/// reads, the matching call task's output.
async fn filter_partition(
    pair: BamPair,
    call_result: Deferred,
    opts: VariantCallOptions,
    chrom: Chromosome,
    scratch: PathBuf,
    store: Arc<dyn ArtifactStore>,
    invoker: Arc<dyn ToolInvoker>,
) -> Result<ArtifactHandle, PipelineError> {
    // Resolved by the time this body runs; the scheduling edge is the guarantee.
    let raw_vcf = call_result.resolved().await.map_err(PipelineError::Task)?;

    let work_dir = task_work_dir(&scratch, &format!("{}_{}", FILTER_PLATYPUS_TAG, chrom))?;
    let bam_path = store.materialize(&pair.bam, work_dir.path()).await?;
    store.materialize(&pair.bai, work_dir.path()).await?;
    let vcf_path = store.materialize(&raw_vcf, work_dir.path()).await?;

    let filter_output = work_dir
        .path()
        .join(chrom_scoped_filename(FILTER_PLATYPUS_TAG, chrom.as_str(), "vcf"));
    let filter_log = work_dir
        .path()
        .join(chrom_scoped_filename(FILTER_PLATYPUS_TAG, chrom.as_str(), "log"));
    let parameters = command::filter_platypus::arg_generator(
        &opts.patient,
        &chrom,
        &vcf_path,
        &bam_path,
        &filter_output,
        &filter_log,
    );

    invoker
        .invoke(&ToolInvocation {
            tool: FILTER_PLATYPUS_TAG.to_string(),
            version: opts.filter_version.clone(),
            args: parameters,
            work_dir: work_dir.path().to_path_buf(),
        })
        .await?;

    let output_file = store.put(&filter_output).await?;
    info!("Ran filter_platypus on {}:{} successfully", opts.patient, chrom);
    Ok(output_file)
}

/// Resolves the whole result map and hands it to the merge collaborator.
async fn merge_partitions(
    perchrom: BTreeMap<Chromosome, Deferred>,
    merger: Arc<dyn VcfMerger>,
    patient: String,
) -> Result<ArtifactHandle, PipelineError> {
    let resolved = try_join_all(perchrom.iter().map(|(chrom, deferred)| async move {
        deferred.resolved().await.map(|handle| (chrom.clone(), handle))
    }))
    .await
    .map_err(PipelineError::Task)?;

    let results: BTreeMap<Chromosome, ArtifactHandle> = resolved.into_iter().collect();
    let merged = merger.merge(&results).await?;
    info!("Merged per-chromosome calls for {} successfully", patient);
    Ok(merged)
}

fn task_work_dir(scratch: &PathBuf, prefix: &str) -> Result<tempfile::TempDir, PipelineError> {
    tempfile::Builder::new()
        .prefix(&format!("{}_", prefix))
        .tempdir_in(scratch)
        .map_err(|e| PipelineError::IOError(format!("Failed to create workdir for {}: {}", prefix, e)))
}

async fn put_input(
    config: &Arc<RunConfig>,
    collab: &Collaborators,
    raw: Option<&str>,
    flag: &str,
) -> Result<ArtifactHandle, PipelineError> {
    let raw = raw.ok_or_else(|| PipelineError::InvalidConfig(format!("Missing required input ({})", flag)))?;
    let path = resolve_input_path(raw, &config.cwd);
    if !path.exists() {
        return Err(PipelineError::InvalidConfig(format!("Cannot find input file {} ({})", path.display(), flag)));
    }
    collab.store.put(&path).await
}

async fn put_archive(
    config: &Arc<RunConfig>,
    collab: &Collaborators,
    raw: Option<&str>,
    flag: &str,
) -> Result<ArtifactHandle, PipelineError> {
    let raw = raw.ok_or_else(|| PipelineError::InvalidConfig(format!("Missing required input ({})", flag)))?;
    let path = resolve_input_path(raw, &config.cwd);
    if !path.exists() {
        return Err(PipelineError::InvalidConfig(format!("Cannot find input file {} ({})", path.display(), flag)));
    }
    match is_gzipped(&path) {
        Ok(true) => {}
        Ok(false) => {
            return Err(PipelineError::InvalidConfig(format!(
                "{} ({}) is not a gzipped archive",
                path.display(),
                flag
            )));
        }
        Err(e) => return Err(PipelineError::IOError(e.to_string())),
    }
    collab.store.put(&path).await
}
