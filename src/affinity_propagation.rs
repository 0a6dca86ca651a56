use std::collections::HashMap;
use std::sync::Arc;

use ndarray::Array2;
use num_traits::Float;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

use crate::aggregate::{Aggregator, AggregatorCoordinator, Convergence};
use crate::config::{ApConfig, Placement, Topology};
use crate::dispatch::{Dispatcher, DispatcherCoordinator};
use crate::error::ApError;
use crate::message::Router;
use crate::node::Node;
use crate::similarity::{similarity_matrix, Similarity};
use crate::source::{DenseSimilarity, SimilaritySource};

/// Final cluster assignment of a run.
///
/// `exemplars` holds the stable exemplar ids in ascending order; `clusters`
/// maps each exemplar to its members (itself included), each non-exemplar
/// point joining the exemplar it is most similar to. `iterations` is the
/// last iteration whose global merge completed.
#[derive(Debug, Clone)]
pub struct ClusterResult {
    pub converged: bool,
    pub iterations: u64,
    pub exemplars: Vec<usize>,
    pub clusters: HashMap<usize, Vec<usize>>,
}

/// What a supervised actor task resolved to.
enum ActorExit {
    Routine,
    Converged(Convergence),
}

/// Distributed Affinity Propagation driver.
///
/// Owns a validated configuration; each `predict` call assembles a fresh
/// actor system (nodes, shard dispatchers/reducers, the two coordinators) on
/// an internal tokio runtime and blocks until the system converges or fails.
pub struct AffinityPropagation<F>
where
    F: Float + Send + Sync + 'static,
{
    config: ApConfig<F>,
}

impl<F> AffinityPropagation<F>
where
    F: Float + Send + Sync + 'static,
{
    pub fn new(config: ApConfig<F>) -> Result<Self, ApError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ApConfig<F> {
        &self.config
    }

    /// Cluster row data: build the pairwise similarity matrix with `metric`,
    /// overwrite the diagonal with the configured preference, and run the
    /// system to convergence.
    pub fn predict<S>(&self, x: &Array2<F>, metric: S) -> Result<ClusterResult, ApError>
    where
        S: Similarity<F>,
    {
        if x.nrows() == 0 {
            return Err(ApError::InvalidInput("no data rows provided".to_string()));
        }
        let mut s = similarity_matrix(x, &metric);
        self.config.preference.apply(&mut s)?;
        self.run(s)
    }

    /// Cluster a precomputed similarity matrix. The diagonal is taken
    /// verbatim as the per-point preferences and must be finite; off-diagonal
    /// non-finite entries mark pruned pairs that never exchange messages.
    pub fn predict_precomputed(&self, s: Array2<F>) -> Result<ClusterResult, ApError> {
        self.run(s)
    }

    fn run(&self, s: Array2<F>) -> Result<ClusterResult, ApError> {
        let source = DenseSimilarity::new(s)?;
        let size = source.len();
        if size == 0 {
            return Err(ApError::InvalidInput("no data rows provided".to_string()));
        }
        for (i, v) in source.matrix().diag().iter().enumerate() {
            if !v.is_finite() {
                return Err(ApError::InvalidInput(format!(
                    "preference for point {} must be finite",
                    i
                )));
            }
        }
        // Small graphs take fewer shards rather than leaving one empty and
        // deadlocking the counting barriers.
        let shards = self.config.shards.min(size);
        let topology = Topology::new(size, shards)?;
        let placement = Placement::round_robin(shards, &self.config.workers);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.threads)
            .thread_name("affinitymesh-worker")
            .build()?;
        let convergence = runtime.block_on(run_system(
            &self.config,
            topology,
            placement,
            source.clone(),
        ))?;
        Ok(assemble_result(source.matrix(), convergence))
    }
}

/// Wire and supervise the full actor system for one run.
async fn run_system<F, S>(
    config: &ApConfig<F>,
    topology: Topology,
    placement: Placement,
    source: S,
) -> Result<Convergence, ApError>
where
    F: Float + Send + Sync + 'static,
    S: SimilaritySource<F>,
{
    let size = topology.points();
    let mut node_txs = Vec::with_capacity(size);
    let mut node_rxs = Vec::with_capacity(size);
    for _ in 0..size {
        let (tx, rx) = mpsc::unbounded_channel();
        node_txs.push(tx);
        node_rxs.push(rx);
    }
    let router = Arc::new(Router::new(node_txs));
    let source = Arc::new(source);

    let (startup_tx, startup_rx) = mpsc::unbounded_channel();
    let (global_tx, global_rx) = mpsc::unbounded_channel();

    let mut tasks: JoinSet<Result<ActorExit, ApError>> = JoinSet::new();
    let mut dispatcher_txs = Vec::with_capacity(topology.shards());
    let mut node_rxs = node_rxs.into_iter();

    for (shard, range) in topology.ranges().into_iter().enumerate() {
        debug!(
            shard,
            worker = %placement.worker(shard),
            from = range.start,
            to = range.end,
            "placing shard"
        );
        let (agg_tx, agg_rx) = mpsc::unbounded_channel();
        let (disp_tx, disp_rx) = mpsc::unbounded_channel();
        dispatcher_txs.push(disp_tx.clone());

        let aggregator =
            Aggregator::new(shard, range.clone(), global_tx.clone(), Arc::clone(&router));
        let agg_self = agg_tx.clone();
        tasks.spawn(async move { aggregator.run(agg_self, agg_rx).await.map(|_| ActorExit::Routine) });

        let dispatcher = Dispatcher::new(
            shard,
            range.clone(),
            Arc::clone(&source),
            Arc::clone(&router),
            startup_tx.clone(),
        );
        tasks.spawn(async move { dispatcher.run(disp_tx, disp_rx).await.map(|_| ActorExit::Routine) });

        for _ in range {
            let node = Node::new(
                config.damping,
                config.send_each,
                Arc::clone(&router),
                agg_tx.clone(),
            );
            let inbox = node_rxs.next().expect("one mailbox per node");
            tasks.spawn(async move { node.run(inbox).await.map(|_| ActorExit::Routine) });
        }
    }

    let startup_barrier = DispatcherCoordinator::new(dispatcher_txs);
    tasks.spawn(async move { startup_barrier.run(startup_rx).await.map(|_| ActorExit::Routine) });

    let coordinator: AggregatorCoordinator<F> = AggregatorCoordinator::new(
        topology.shards(),
        config.enough_iterations,
        config.max_iterations,
    );
    tasks.spawn(async move { coordinator.run(global_rx).await.map(ActorExit::Converged) });

    drop(global_tx);
    drop(startup_tx);

    let mut convergence = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(ActorExit::Converged(outcome))) => convergence = Some(outcome),
            Ok(Ok(ActorExit::Routine)) => {}
            Ok(Err(err)) => {
                tasks.abort_all();
                return Err(err);
            }
            Err(join_err) => {
                tasks.abort_all();
                return Err(ApError::ActorPanic(join_err.to_string()));
            }
        }
    }
    convergence.ok_or(ApError::Disconnected {
        actor: "aggregator coordinator",
    })
}

/// Assign every point to its most similar exemplar. Exemplars claim
/// themselves; with an empty exemplar set there is nothing to assign.
fn assemble_result<F>(s: &Array2<F>, convergence: Convergence) -> ClusterResult
where
    F: Float,
{
    let mut exemplars: Vec<usize> = convergence.exemplars.iter().copied().collect();
    exemplars.sort_unstable();
    let mut clusters: HashMap<usize, Vec<usize>> =
        exemplars.iter().map(|&e| (e, Vec::new())).collect();
    if !exemplars.is_empty() {
        for i in 0..s.nrows() {
            let home = if clusters.contains_key(&i) {
                i
            } else {
                let mut best = exemplars[0];
                let mut best_similarity = F::neg_infinity();
                for &k in &exemplars {
                    let similarity = s[[i, k]];
                    if similarity > best_similarity {
                        best_similarity = similarity;
                        best = k;
                    }
                }
                best
            };
            if let Some(members) = clusters.get_mut(&home) {
                members.push(i);
            }
        }
    }
    ClusterResult {
        converged: convergence.converged,
        iterations: convergence.iterations,
        exemplars,
        clusters,
    }
}
