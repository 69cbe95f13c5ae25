/// Task-graph scheduling: dependency edges, deferred outputs, and
/// bounded execution on the tokio runtime.
///
/// A scheduled task is a spawned future gated on the resolution of every
/// declared upstream dependency. Concurrency comes entirely from the
/// edges: independent tasks hold no reference to each other and the
/// runtime is free to run them in parallel, capped by the semaphore.
/// Resolution of a `Deferred` output is the only suspension point.

use std::future::Future;
use std::sync::Arc;

use log::debug;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::config::defs::{PipelineError, TaskFailure};
use crate::utils::artifact::{ArtifactHandle, DeclaredSize};
use crate::utils::partitions::Chromosome;
use crate::utils::resources::TaskResources;

pub type TaskId = usize;

type TaskOutcome = Result<ArtifactHandle, TaskFailure>;

/// Declarative description of a task handed to `TaskGraph::submit`.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub label: String,
    pub chromosome: Option<Chromosome>,
    pub resources: TaskResources,
    pub output_size_hint: u64,
}

impl TaskSpec {
    pub fn new(label: impl Into<String>) -> Self {
        TaskSpec {
            label: label.into(),
            chromosome: None,
            resources: TaskResources::light(),
            output_size_hint: 0,
        }
    }

    pub fn for_chromosome(mut self, chromosome: Chromosome) -> Self {
        self.chromosome = Some(chromosome);
        self
    }

    pub fn resources(mut self, resources: TaskResources) -> Self {
        self.resources = resources;
        self
    }

    /// Expected byte size of the task's output, declared up front so
    /// downstream resource estimation can run before the task does.
    pub fn declares_output_size(mut self, bytes: u64) -> Self {
        self.output_size_hint = bytes;
        self
    }
}

/// One recorded node of the graph, inspectable after scheduling.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub label: String,
    pub chromosome: Option<Chromosome>,
    pub resources: TaskResources,
    pub deps: Vec<TaskId>,
}

/// Placeholder for an artifact a task has not produced yet. Resolved
/// exactly once; clones observe the same resolution. The declared size
/// is readable without waiting.
#[derive(Debug, Clone)]
pub struct Deferred {
    task: TaskId,
    label: String,
    chromosome: Option<Chromosome>,
    declared_size: u64,
    rx: watch::Receiver<Option<TaskOutcome>>,
}

impl Deferred {
    pub fn producer(&self) -> TaskId {
        self.task
    }

    /// Suspends until the producing task has finished. A failed producer
    /// (or one that failed upstream of it) yields the originating
    /// failure.
    pub async fn resolved(&self) -> Result<ArtifactHandle, TaskFailure> {
        let mut rx = self.rx.clone();
        match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => match &*outcome {
                Some(resolved) => resolved.clone(),
                None => Err(self.aborted()),
            },
            Err(_) => Err(self.aborted()),
        }
    }

    fn aborted(&self) -> TaskFailure {
        TaskFailure {
            task: self.label.clone(),
            chromosome: self.chromosome.clone(),
            source: Arc::new(PipelineError::IOError(
                "task dropped before producing an output".to_string(),
            )),
        }
    }
}

impl DeclaredSize for Deferred {
    fn declared_size(&self) -> u64 {
        self.declared_size
    }
}

/// A submitted task: its node id plus the deferred output other tasks
/// may depend on.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub output: Deferred,
}

pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    semaphore: Arc<Semaphore>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGraph {
    pub fn new(max_running: usize) -> Self {
        Self::with_semaphore(Arc::new(Semaphore::new(max_running.max(1))))
    }

    pub fn with_semaphore(semaphore: Arc<Semaphore>) -> Self {
        TaskGraph {
            nodes: Vec::new(),
            semaphore,
            handles: Vec::new(),
        }
    }

    /// Records the node with its dependency edges and spawns the gated
    /// future. The body is only polled once every dependency has
    /// resolved successfully and a semaphore permit is held; permits are
    /// never held while suspended on a dependency. If any dependency
    /// failed, the body never runs and the task completes with the
    /// originating failure instead.
    pub fn submit<F>(&mut self, spec: TaskSpec, deps: &[&ScheduledTask], body: F) -> ScheduledTask
    where
        F: Future<Output = Result<ArtifactHandle, PipelineError>> + Send + 'static,
    {
        let id = self.nodes.len();
        let dep_ids: Vec<TaskId> = deps.iter().map(|d| d.id).collect();
        let dep_outputs: Vec<Deferred> = deps.iter().map(|d| d.output.clone()).collect();

        self.nodes.push(TaskNode {
            id,
            label: spec.label.clone(),
            chromosome: spec.chromosome.clone(),
            resources: spec.resources,
            deps: dep_ids,
        });

        let (tx, rx) = watch::channel(None);
        let output = Deferred {
            task: id,
            label: spec.label.clone(),
            chromosome: spec.chromosome.clone(),
            declared_size: spec.output_size_hint,
            rx,
        };

        let semaphore = self.semaphore.clone();
        let label = spec.label;
        let chromosome = spec.chromosome;
        let handle = tokio::spawn(async move {
            for dep in &dep_outputs {
                if let Err(failure) = dep.resolved().await {
                    debug!("Skipping {}: upstream {} failed", label, failure.task);
                    let _ = tx.send(Some(Err(failure)));
                    return;
                }
            }

            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // executor shut down; dependents observe an abort
            };
            let outcome = body.await;
            drop(permit);

            let _ = tx.send(Some(outcome.map_err(|e| TaskFailure {
                task: label,
                chromosome,
                source: Arc::new(e),
            })));
        });
        self.handles.push(handle);

        ScheduledTask { id, output }
    }

    /// The recorded nodes, in submission order.
    pub fn plan(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Waits for every spawned task to settle. After a branch failure the
    /// other partitions keep running; callers that are about to report an
    /// outcome drain them here first.
    pub async fn quiesce(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    pub fn node(&self, id: TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }
}
