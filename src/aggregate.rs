use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use num_traits::Float;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ApError;
use crate::message::{AggregatorMsg, CoordinatorMsg, NodeMsg, Router};
use crate::node::Control;

/// Per-iteration reduction bucket. Created lazily on the first report for an
/// iteration and destroyed as soon as the iteration completes, so only
/// in-flight iterations occupy memory.
#[derive(Default)]
struct IterationBucket {
    received: usize,
    exemplars: HashSet<usize>,
}

/// Shard-local reducer: folds one `Value` report per iteration from every
/// node in its index range into a partial exemplar set and forwards it
/// upward once the shard is complete.
pub(crate) struct Aggregator<F> {
    shard: usize,
    range: Range<usize>,
    coordinator: mpsc::UnboundedSender<CoordinatorMsg<F>>,
    router: Arc<Router<F>>,
    pending: HashMap<u64, IterationBucket>,
    last_completed: Option<u64>,
}

impl<F> Aggregator<F>
where
    F: Float + Send + Sync + 'static,
{
    pub(crate) fn new(
        shard: usize,
        range: Range<usize>,
        coordinator: mpsc::UnboundedSender<CoordinatorMsg<F>>,
        router: Arc<Router<F>>,
    ) -> Self {
        Self {
            shard,
            range,
            coordinator,
            router,
            pending: HashMap::new(),
            last_completed: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        self_tx: mpsc::UnboundedSender<AggregatorMsg<F>>,
        mut inbox: mpsc::UnboundedReceiver<AggregatorMsg<F>>,
    ) -> Result<(), ApError> {
        // One-time registration so the coordinator can reach us at shutdown.
        let _ = self.coordinator.send(CoordinatorMsg::Hello {
            shard: self.shard,
            aggregator: self_tx,
        });
        while let Some(msg) = inbox.recv().await {
            if let Control::Stop = self.handle(msg)? {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn handle(&mut self, msg: AggregatorMsg<F>) -> Result<Control, ApError> {
        match msg {
            AggregatorMsg::Value {
                value,
                sender,
                iteration,
            } => {
                if !self.range.contains(&sender) {
                    return Err(ApError::ForeignSender {
                        shard: self.shard,
                        sender,
                    });
                }
                if self.last_completed.map_or(false, |t| iteration <= t) {
                    return Err(ApError::StaleIteration {
                        shard: self.shard,
                        iteration,
                    });
                }
                let bucket = self.pending.entry(iteration).or_default();
                bucket.received += 1;
                if value > F::zero() {
                    bucket.exemplars.insert(sender);
                }
                if bucket.received == self.range.len() {
                    let bucket = self
                        .pending
                        .remove(&iteration)
                        .expect("bucket inserted above");
                    self.last_completed = Some(iteration);
                    let _ = self.coordinator.send(CoordinatorMsg::LocalExemplars {
                        iteration,
                        exemplars: bucket.exemplars,
                    });
                }
                Ok(Control::Continue)
            }
            AggregatorMsg::Shutdown => {
                for id in self.range.clone() {
                    self.router.send_to(id, NodeMsg::Shutdown);
                }
                debug!(shard = self.shard, "shard reducer stopped");
                Ok(Control::Stop)
            }
        }
    }
}

/// Outcome of a run, produced by the coordinator once the exemplar set has
/// been stable long enough (or the iteration cap was hit).
#[derive(Debug)]
pub(crate) struct Convergence {
    pub(crate) converged: bool,
    pub(crate) exemplars: HashSet<usize>,
    pub(crate) iterations: u64,
    pub(crate) last_changed: u64,
}

/// Global convergence detector: merges shard partials per iteration, tracks
/// the last iteration at which the exemplar set changed, and broadcasts the
/// terminal Shutdown once the set has held for more than `enough_iterations`
/// completed merges.
pub(crate) struct AggregatorCoordinator<F> {
    num_shards: usize,
    enough_iterations: u64,
    max_iterations: u64,
    pending: HashMap<u64, IterationBucket>,
    registered: Vec<mpsc::UnboundedSender<AggregatorMsg<F>>>,
    current: HashSet<usize>,
    last_changed_exemplars: HashSet<usize>,
    last_changed_iteration: u64,
    last_completed: Option<u64>,
    started: Instant,
}

impl<F> AggregatorCoordinator<F>
where
    F: Float + Send + Sync + 'static,
{
    pub(crate) fn new(num_shards: usize, enough_iterations: u64, max_iterations: u64) -> Self {
        Self {
            num_shards,
            enough_iterations,
            max_iterations,
            pending: HashMap::new(),
            registered: Vec::new(),
            current: HashSet::new(),
            last_changed_exemplars: HashSet::new(),
            last_changed_iteration: 0,
            last_completed: None,
            started: Instant::now(),
        }
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<CoordinatorMsg<F>>,
    ) -> Result<Convergence, ApError> {
        while let Some(msg) = inbox.recv().await {
            if let Some(outcome) = self.handle(msg)? {
                return Ok(outcome);
            }
        }
        Err(ApError::Disconnected {
            actor: "aggregator coordinator",
        })
    }

    pub(crate) fn handle(
        &mut self,
        msg: CoordinatorMsg<F>,
    ) -> Result<Option<Convergence>, ApError> {
        match msg {
            CoordinatorMsg::Hello { shard, aggregator } => {
                if self.registered.len() == self.num_shards {
                    return Err(ApError::UnexpectedMessage {
                        actor: "aggregator coordinator".to_string(),
                        message: "Hello",
                        state: "fully registered",
                    });
                }
                debug!(shard, "shard reducer registered");
                self.registered.push(aggregator);
                Ok(None)
            }
            CoordinatorMsg::LocalExemplars {
                iteration,
                exemplars,
            } => {
                let bucket = self.pending.entry(iteration).or_default();
                bucket.received += 1;
                bucket.exemplars.extend(exemplars);
                if bucket.received < self.num_shards {
                    return Ok(None);
                }
                self.complete(iteration)
            }
        }
    }

    /// All shards reported for `iteration`: the merged set is now the
    /// complete exemplar set for that iteration.
    fn complete(&mut self, iteration: u64) -> Result<Option<Convergence>, ApError> {
        let merged = self
            .pending
            .remove(&iteration)
            .expect("bucket filled by caller")
            .exemplars;
        if let Some(last) = self.last_completed {
            if iteration <= last {
                return Err(ApError::OutOfOrderMerge { iteration, last });
            }
        }
        if merged != self.last_changed_exemplars {
            info!(
                iteration,
                exemplars = merged.len(),
                "exemplar set changed"
            );
            self.last_changed_iteration = iteration;
            self.last_changed_exemplars = merged.clone();
        }
        self.last_completed = Some(iteration);
        self.current = merged;
        if iteration - self.last_changed_iteration > self.enough_iterations {
            info!(
                iterations = iteration,
                stable_since = self.last_changed_iteration,
                exemplars = self.current.len(),
                elapsed = ?self.started.elapsed(),
                "exemplar set stable, shutting down"
            );
            self.broadcast_shutdown();
            return Ok(Some(self.outcome(true, iteration)));
        }
        if iteration + 1 >= self.max_iterations {
            warn!(
                iterations = iteration,
                "iteration limit reached without convergence"
            );
            self.broadcast_shutdown();
            return Ok(Some(self.outcome(false, iteration)));
        }
        Ok(None)
    }

    fn broadcast_shutdown(&self) {
        for aggregator in &self.registered {
            let _ = aggregator.send(AggregatorMsg::Shutdown);
        }
    }

    fn outcome(&self, converged: bool, iteration: u64) -> Convergence {
        Convergence {
            converged,
            exemplars: self.current.clone(),
            iterations: iteration,
            last_changed: self.last_changed_iteration,
        }
    }
}
