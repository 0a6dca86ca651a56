use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use num_traits::Float;
use rayon::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::ApError;
use crate::message::{DispatcherMsg, NodeInit, NodeMsg, Router, StartupMsg};
use crate::source::SimilaritySource;

/// Shard initializer: loads the sparse similarity row/col for every point in
/// its index range, derives the pruned target lists, pushes the one-time
/// init payload to each node, then drives the shard through the startup
/// barrier and terminates.
pub(crate) struct Dispatcher<F, S> {
    shard: usize,
    range: Range<usize>,
    source: Arc<S>,
    router: Arc<Router<F>>,
    coordinator: mpsc::UnboundedSender<StartupMsg>,
}

impl<F, S> Dispatcher<F, S>
where
    F: Float + Send + Sync + 'static,
    S: SimilaritySource<F>,
{
    pub(crate) fn new(
        shard: usize,
        range: Range<usize>,
        source: Arc<S>,
        router: Arc<Router<F>>,
        coordinator: mpsc::UnboundedSender<StartupMsg>,
    ) -> Self {
        Self {
            shard,
            range,
            source,
            router,
            coordinator,
        }
    }

    /// Load and push the init payload for every point in the shard. Any
    /// source error is fatal: a partially initialized shard would wedge the
    /// startup barrier with inconsistent neighbor tables.
    pub(crate) fn initialize(
        &self,
        self_tx: &mpsc::UnboundedSender<DispatcherMsg>,
    ) -> Result<(), ApError> {
        let started = Instant::now();
        let points = self.source.load_shard(self.range.clone())?;
        if points.len() != self.range.len() {
            return Err(ApError::InvalidInput(format!(
                "similarity source returned {} points for shard {} of {}",
                points.len(),
                self.shard,
                self.range.len()
            )));
        }
        let from = self.range.start;
        let inits: Vec<NodeInit<F>> = points
            .into_par_iter()
            .enumerate()
            .map(|(offset, vectors)| {
                let mut resp_targets: Vec<usize> = vectors.row.keys().copied().collect();
                resp_targets.sort_unstable();
                let mut avail_targets: Vec<usize> = vectors.col.keys().copied().collect();
                avail_targets.sort_unstable();
                NodeInit {
                    self_id: from + offset,
                    similarity_row: vectors.row,
                    resp_targets,
                    avail_targets,
                    dispatcher: self_tx.clone(),
                }
            })
            .collect();
        for init in inits {
            let target = init.self_id;
            self.router.send_to(target, NodeMsg::Init(Box::new(init)));
        }
        debug!(
            shard = self.shard,
            nodes = self.range.len(),
            elapsed = ?started.elapsed(),
            "shard dispatched"
        );
        Ok(())
    }

    pub(crate) async fn run(
        self,
        self_tx: mpsc::UnboundedSender<DispatcherMsg>,
        mut inbox: mpsc::UnboundedReceiver<DispatcherMsg>,
    ) -> Result<(), ApError> {
        self.initialize(&self_tx)?;
        drop(self_tx);
        let mut ready = 0usize;
        while let Some(msg) = inbox.recv().await {
            match msg {
                DispatcherMsg::Ready => {
                    ready += 1;
                    if ready > self.range.len() {
                        return Err(ApError::UnexpectedMessage {
                            actor: format!("dispatcher {}", self.shard),
                            message: "Ready",
                            state: "shard already complete",
                        });
                    }
                    if ready == self.range.len() {
                        let _ = self.coordinator.send(StartupMsg::ShardReady);
                    }
                }
                DispatcherMsg::Start => {
                    if ready != self.range.len() {
                        return Err(ApError::UnexpectedMessage {
                            actor: format!("dispatcher {}", self.shard),
                            message: "Start",
                            state: "awaiting node readiness",
                        });
                    }
                    for id in self.range.clone() {
                        self.router.send_to(id, NodeMsg::Start);
                    }
                    info!(shard = self.shard, "shard started");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Startup barrier: once every shard has reported its nodes initialized,
/// release the global Start and terminate. A shard that never reports keeps
/// the system parked by design; liveness is an external concern.
pub(crate) struct DispatcherCoordinator {
    dispatchers: Vec<mpsc::UnboundedSender<DispatcherMsg>>,
}

impl DispatcherCoordinator {
    pub(crate) fn new(dispatchers: Vec<mpsc::UnboundedSender<DispatcherMsg>>) -> Self {
        Self { dispatchers }
    }

    pub(crate) async fn run(
        self,
        mut inbox: mpsc::UnboundedReceiver<StartupMsg>,
    ) -> Result<(), ApError> {
        let mut ready = 0usize;
        while let Some(StartupMsg::ShardReady) = inbox.recv().await {
            ready += 1;
            if ready == self.dispatchers.len() {
                info!(shards = ready, "all shards initialized, releasing start");
                for dispatcher in &self.dispatchers {
                    let _ = dispatcher.send(DispatcherMsg::Start);
                }
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ndarray::arr2;
    use tokio::sync::mpsc;

    use crate::message::{DispatcherMsg, NodeMsg, Router, StartupMsg};
    use crate::source::DenseSimilarity;

    use super::{Dispatcher, DispatcherCoordinator};

    const INF: f64 = f64::NEG_INFINITY;

    fn routed(size: usize) -> (Arc<Router<f64>>, Vec<mpsc::UnboundedReceiver<NodeMsg<f64>>>) {
        let mut txs = Vec::new();
        let mut rxs = Vec::new();
        for _ in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            txs.push(tx);
            rxs.push(rx);
        }
        (Arc::new(Router::new(txs)), rxs)
    }

    /// For a point with `m` infinite-outgoing and `k` infinite-incoming
    /// similarities the target lists must have exactly `n - m` and `n - k`
    /// entries, with no pruned neighbor in either.
    #[test]
    fn pruned_targets_exclude_infinite_neighbors() {
        let s = arr2(&[
            [-5.0, -3.0, INF, INF],
            [INF, -5.0, INF, -2.0],
            [INF, -3.0, -5.0, -2.0],
            [INF, INF, -6.0, -5.0],
        ]);
        let source = Arc::new(DenseSimilarity::new(s).unwrap());
        let (router, mut rxs) = routed(4);
        let (startup_tx, _startup_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(0, 0..4, source, router, startup_tx);
        let (self_tx, _self_rx) = mpsc::unbounded_channel();
        dispatcher.initialize(&self_tx).unwrap();

        let expected_resp: [&[usize]; 4] = [&[0, 1], &[1, 3], &[1, 2, 3], &[2, 3]];
        let expected_avail: [&[usize]; 4] = [&[0], &[0, 1, 2], &[2, 3], &[1, 2, 3]];
        for (id, rx) in rxs.iter_mut().enumerate() {
            let init = match rx.try_recv() {
                Ok(NodeMsg::Init(init)) => init,
                _ => panic!("node {} did not receive its init payload", id),
            };
            assert_eq!(init.self_id, id);
            assert_eq!(init.resp_targets, expected_resp[id]);
            assert_eq!(init.avail_targets, expected_avail[id]);
            // The similarity row carries exactly the non-pruned entries.
            assert_eq!(init.similarity_row.len(), init.resp_targets.len());
            assert!(init.similarity_row.values().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn shard_bounds_outside_source_are_fatal() {
        let s = arr2(&[[-1.0, -2.0], [-2.0, -1.0]]);
        let source = Arc::new(DenseSimilarity::new(s).unwrap());
        let (router, _rxs) = routed(2);
        let (startup_tx, _startup_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(0, 0..5, source, router, startup_tx);
        let (self_tx, _self_rx) = mpsc::unbounded_channel();
        assert!(dispatcher.initialize(&self_tx).is_err());
    }

    #[tokio::test]
    async fn dispatcher_reports_ready_then_rebroadcasts_start() {
        let s = arr2(&[[-1.0, -2.0], [-2.0, -1.0]]);
        let source = Arc::new(DenseSimilarity::new(s).unwrap());
        let (router, mut rxs) = routed(2);
        let (startup_tx, mut startup_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(0, 0..2, source, router, startup_tx);
        let (self_tx, self_rx) = mpsc::unbounded_channel();
        // Stand in for both nodes reporting Ready, then the coordinator
        // releasing Start.
        self_tx.send(DispatcherMsg::Ready).unwrap();
        self_tx.send(DispatcherMsg::Ready).unwrap();
        self_tx.send(DispatcherMsg::Start).unwrap();
        dispatcher.run(self_tx.clone(), self_rx).await.unwrap();
        assert!(matches!(startup_rx.try_recv(), Ok(StartupMsg::ShardReady)));
        for rx in rxs.iter_mut() {
            let mut saw_start = false;
            while let Ok(msg) = rx.try_recv() {
                if matches!(msg, NodeMsg::Start) {
                    saw_start = true;
                }
            }
            assert!(saw_start);
        }
    }

    #[tokio::test]
    async fn premature_start_is_fatal() {
        let s = arr2(&[[-1.0, -2.0], [-2.0, -1.0]]);
        let source = Arc::new(DenseSimilarity::new(s).unwrap());
        let (router, _rxs) = routed(2);
        let (startup_tx, _startup_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(0, 0..2, source, router, startup_tx);
        let (self_tx, self_rx) = mpsc::unbounded_channel();
        self_tx.send(DispatcherMsg::Start).unwrap();
        assert!(dispatcher.run(self_tx.clone(), self_rx).await.is_err());
    }

    #[tokio::test]
    async fn barrier_releases_start_after_all_shards() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let coordinator = DispatcherCoordinator::new(vec![a_tx, b_tx]);
        let (startup_tx, startup_rx) = mpsc::unbounded_channel();
        startup_tx.send(StartupMsg::ShardReady).unwrap();
        startup_tx.send(StartupMsg::ShardReady).unwrap();
        coordinator.run(startup_rx).await.unwrap();
        assert!(matches!(a_rx.try_recv(), Ok(DispatcherMsg::Start)));
        assert!(matches!(b_rx.try_recv(), Ok(DispatcherMsg::Start)));
    }
}
