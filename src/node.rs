use std::collections::HashMap;
use std::sync::Arc;

use num_traits::Float;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ApError;
use crate::message::{AggregatorMsg, DispatcherMsg, NodeInit, NodeMsg, Router};

/// What the actor loop should do after handling a message.
#[derive(Debug)]
pub(crate) enum Control {
    Continue,
    Stop,
}

/// Explicit lifecycle of a point actor. Messages are dispatched on
/// (phase, message type); anything else is a protocol violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Initialized,
    Running,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "Uninitialized",
            Phase::Initialized => "Initialized",
            Phase::Running => "Running",
        }
    }
}

/// Per-point iteration state. Owned exclusively by one `Node`; installed on
/// `Init` and mutated only from the owning actor's message loop.
struct PointState<F> {
    self_id: usize,
    /// s(self, k) for every non-pruned k; keys match `resp_targets`.
    similarity_row: HashMap<usize, F>,
    /// Ids receiving a Responsibility message each round (s(self, k) finite).
    resp_targets: Vec<usize>,
    /// Ids receiving an Availability message each round (s(k, self) finite).
    avail_targets: Vec<usize>,
    /// Last damped r(k, self) per sender; keys match `avail_targets`.
    responsibility_in: HashMap<usize, F>,
    /// Last damped a(self, k) per sender; keys match `resp_targets`.
    availability_in: HashMap<usize, F>,
    responsibilities_received: usize,
    availabilities_received: usize,
    iteration: u64,
    dispatcher: mpsc::UnboundedSender<DispatcherMsg>,
}

impl<F> PointState<F>
where
    F: Float,
{
    fn install(init: NodeInit<F>) -> Self {
        let NodeInit {
            self_id,
            similarity_row,
            resp_targets,
            avail_targets,
            dispatcher,
        } = init;
        let responsibility_in = avail_targets.iter().map(|&q| (q, F::zero())).collect();
        let availability_in = resp_targets.iter().map(|&q| (q, F::zero())).collect();
        Self {
            self_id,
            similarity_row,
            resp_targets,
            avail_targets,
            responsibility_in,
            availability_in,
            responsibilities_received: 0,
            availabilities_received: 0,
            iteration: 0,
            dispatcher,
        }
    }
}

/// One point of the similarity graph, exchanging damped messages with its
/// pruned neighbor set and reporting a convergence signal every
/// `send_each`-th iteration.
pub(crate) struct Node<F> {
    lambda: F,
    send_each: u64,
    router: Arc<Router<F>>,
    aggregator: mpsc::UnboundedSender<AggregatorMsg<F>>,
    phase: Phase,
    state: Option<PointState<F>>,
    /// Data messages from fast peers that raced our own Start signal.
    stash: Vec<NodeMsg<F>>,
}

impl<F> Node<F>
where
    F: Float + Send + Sync + 'static,
{
    pub(crate) fn new(
        lambda: F,
        send_each: u64,
        router: Arc<Router<F>>,
        aggregator: mpsc::UnboundedSender<AggregatorMsg<F>>,
    ) -> Self {
        Self {
            lambda,
            send_each,
            router,
            aggregator,
            phase: Phase::Uninitialized,
            state: None,
            stash: Vec::new(),
        }
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<NodeMsg<F>>,
    ) -> Result<(), ApError> {
        while let Some(msg) = inbox.recv().await {
            if let Control::Stop = self.handle(msg)? {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn handle(&mut self, msg: NodeMsg<F>) -> Result<Control, ApError> {
        match (self.phase, msg) {
            (_, NodeMsg::Shutdown) => return Ok(Control::Stop),
            (Phase::Uninitialized, NodeMsg::Init(init)) => self.on_init(*init),
            (Phase::Initialized, NodeMsg::Start) => self.on_start()?,
            (Phase::Initialized, msg @ (NodeMsg::Responsibility { .. } | NodeMsg::Availability { .. })) => {
                self.stash.push(msg);
            }
            (Phase::Running, NodeMsg::Responsibility { value, sender }) => {
                self.on_responsibility(value, sender)?;
            }
            (Phase::Running, NodeMsg::Availability { value, sender }) => {
                self.on_availability(value, sender)?;
            }
            (phase, msg) => {
                return Err(ApError::UnexpectedMessage {
                    actor: self.describe(),
                    message: msg.name(),
                    state: phase.name(),
                });
            }
        }
        Ok(Control::Continue)
    }

    fn describe(&self) -> String {
        match &self.state {
            Some(state) => format!("node {}", state.self_id),
            None => "uninitialized node".to_string(),
        }
    }

    fn on_init(&mut self, init: NodeInit<F>) {
        let state = PointState::install(init);
        let _ = state.dispatcher.send(DispatcherMsg::Ready);
        self.state = Some(state);
        self.phase = Phase::Initialized;
    }

    /// Enter the iteration: emit the first responsibility round, then replay
    /// any peer messages that arrived before our Start in their order.
    fn on_start(&mut self) -> Result<(), ApError> {
        self.phase = Phase::Running;
        self.broadcast_responsibilities();
        for msg in std::mem::take(&mut self.stash) {
            match msg {
                NodeMsg::Responsibility { value, sender } => self.on_responsibility(value, sender)?,
                NodeMsg::Availability { value, sender } => self.on_availability(value, sender)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn on_responsibility(&mut self, value: F, sender: usize) -> Result<(), ApError> {
        let lambda = self.lambda;
        let state = self.state.as_mut().expect("running node has state");
        let slot = match state.responsibility_in.get_mut(&sender) {
            Some(slot) => slot,
            None => {
                return Err(ApError::UntrackedSender {
                    node: state.self_id,
                    sender,
                    kind: "responsibility",
                })
            }
        };
        *slot = *slot * lambda + value * (F::one() - lambda);
        state.responsibilities_received += 1;
        let round_complete = state.responsibilities_received == state.avail_targets.len();
        if round_complete {
            state.responsibilities_received = 0;
            self.broadcast_availabilities();
        }
        Ok(())
    }

    fn on_availability(&mut self, value: F, sender: usize) -> Result<(), ApError> {
        let lambda = self.lambda;
        let send_each = self.send_each;
        let state = self.state.as_mut().expect("running node has state");
        let slot = match state.availability_in.get_mut(&sender) {
            Some(slot) => slot,
            None => {
                return Err(ApError::UntrackedSender {
                    node: state.self_id,
                    sender,
                    kind: "availability",
                })
            }
        };
        *slot = *slot * lambda + value * (F::one() - lambda);
        state.availabilities_received += 1;
        let round_complete = state.availabilities_received == state.resp_targets.len();
        if round_complete {
            state.availabilities_received = 0;
            let iteration = state.iteration;
            if iteration % send_each == send_each - 1 {
                let value = state.responsibility_in[&state.self_id]
                    + state.availability_in[&state.self_id];
                let _ = self.aggregator.send(AggregatorMsg::Value {
                    value,
                    sender: state.self_id,
                    iteration,
                });
            }
            if state.self_id == 0 {
                debug!(iteration, "iteration completed");
            }
            state.iteration += 1;
            self.broadcast_responsibilities();
        }
        Ok(())
    }

    /// One pass over the active neighbor set tracking the maximum, second
    /// maximum and argmax of a(self, k) + s(self, k); each target k then gets
    /// r(k) = s(self, k) minus the best alternative (the second maximum when
    /// k is the argmax itself).
    fn broadcast_responsibilities(&self) {
        let state = self.state.as_ref().expect("running node has state");
        let mut first_max = F::neg_infinity();
        let mut second_max = F::neg_infinity();
        let mut first_k = usize::MAX;
        for &k in &state.resp_targets {
            let value = state.availability_in[&k] + state.similarity_row[&k];
            if first_max <= value {
                second_max = first_max;
                first_max = value;
                first_k = k;
            } else if second_max <= value {
                second_max = value;
            }
        }
        for &k in &state.resp_targets {
            let max = if k == first_k { second_max } else { first_max };
            self.router.send_to(
                k,
                NodeMsg::Responsibility {
                    value: state.similarity_row[&k] - max,
                    sender: state.self_id,
                },
            );
        }
    }

    /// Batched-sum availability: the positive-responsibility sum is computed
    /// once, then each target subtracts its own (positive) contribution.
    fn broadcast_availabilities(&self) {
        let state = self.state.as_ref().expect("running node has state");
        let zero = F::zero();
        let r_self = state.responsibility_in[&state.self_id];
        let mut sum = r_self;
        for (&q, &r) in &state.responsibility_in {
            if q != state.self_id && r > zero {
                sum = sum + r;
            }
        }
        for &k in &state.avail_targets {
            let value = if k == state.self_id {
                sum - r_self
            } else {
                let r_k = state.responsibility_in[&k];
                let candidate = if r_k > zero { sum - r_k } else { sum };
                candidate.min(zero)
            };
            self.router.send_to(
                k,
                NodeMsg::Availability {
                    value,
                    sender: state.self_id,
                },
            );
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::error::ApError;
    use crate::message::{AggregatorMsg, DispatcherMsg, NodeInit, NodeMsg, Router};

    use super::{Control, Node, Phase};

    const TOL: f64 = 1e-9;

    struct Harness {
        node: Node<f64>,
        peers: Vec<UnboundedReceiver<NodeMsg<f64>>>,
        aggregator: UnboundedReceiver<AggregatorMsg<f64>>,
        dispatcher: UnboundedReceiver<DispatcherMsg>,
    }

    /// Fully-connected harness for `size` points with the node under test at
    /// id 0 and uniform similarity row values.
    fn harness(lambda: f64, send_each: u64, row: &[f64]) -> Harness {
        let size = row.len();
        let mut txs = Vec::new();
        let mut rxs = Vec::new();
        for _ in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            txs.push(tx);
            rxs.push(rx);
        }
        let router = Arc::new(Router::new(txs));
        let (agg_tx, agg_rx) = mpsc::unbounded_channel();
        let (disp_tx, disp_rx) = mpsc::unbounded_channel();
        let mut node = Node::new(lambda, send_each, router, agg_tx);
        let targets: Vec<usize> = (0..size).collect();
        let init = NodeInit {
            self_id: 0,
            similarity_row: row.iter().copied().enumerate().collect(),
            resp_targets: targets.clone(),
            avail_targets: targets,
            dispatcher: disp_tx,
        };
        node.handle(NodeMsg::Init(Box::new(init))).unwrap();
        Harness {
            node,
            peers: rxs,
            aggregator: agg_rx,
            dispatcher: disp_rx,
        }
    }

    fn drain_values(rx: &mut UnboundedReceiver<NodeMsg<f64>>) -> Vec<(f64, &'static str)> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                NodeMsg::Responsibility { value, .. } => out.push((value, "r")),
                NodeMsg::Availability { value, .. } => out.push((value, "a")),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn init_replies_ready_and_start_broadcasts() {
        let mut h = harness(0.5, 1, &[-1.0, -2.0, -3.0]);
        assert!(matches!(h.dispatcher.try_recv(), Ok(DispatcherMsg::Ready)));
        assert_eq!(h.node.phase, Phase::Initialized);
        h.node.handle(NodeMsg::Start).unwrap();
        assert_eq!(h.node.phase, Phase::Running);
        for rx in h.peers.iter_mut() {
            let msgs = drain_values(rx);
            assert_eq!(msgs.len(), 1);
            assert_eq!(msgs[0].1, "r");
        }
    }

    #[test]
    fn responsibility_counter_resets_and_triggers_availability() {
        let mut h = harness(0.5, 1, &[-1.0, -2.0, -3.0]);
        h.node.handle(NodeMsg::Start).unwrap();
        for rx in h.peers.iter_mut() {
            drain_values(rx);
        }
        // One responsibility per tracked sender completes the round.
        for sender in 0..3 {
            h.node
                .handle(NodeMsg::Responsibility {
                    value: 1.0,
                    sender,
                })
                .unwrap();
        }
        let state = h.node.state.as_ref().unwrap();
        assert_eq!(state.responsibilities_received, 0);
        for rx in h.peers.iter_mut() {
            let msgs = drain_values(rx);
            assert_eq!(msgs.len(), 1);
            assert_eq!(msgs[0].1, "a");
        }
    }

    #[test]
    fn damping_blends_old_and_new_values() {
        let mut h = harness(0.8, 1, &[-1.0, -2.0]);
        h.node.handle(NodeMsg::Start).unwrap();
        h.node
            .handle(NodeMsg::Responsibility {
                value: 10.0,
                sender: 1,
            })
            .unwrap();
        let state = h.node.state.as_ref().unwrap();
        // 0 * 0.8 + 10 * 0.2
        assert!((state.responsibility_in[&1] - 2.0).abs() < TOL);
    }

    /// The batched max/second-max computation must agree with the naive
    /// per-target rescan.
    #[test]
    fn batched_responsibility_matches_naive() {
        let row = [-5.0, -3.0, -7.5];
        let mut h = harness(0.5, 1, &row);
        {
            let state = h.node.state.as_mut().unwrap();
            state.availability_in.insert(0, 0.25);
            state.availability_in.insert(1, -1.5);
            state.availability_in.insert(2, 3.0);
        }
        h.node.handle(NodeMsg::Start).unwrap();
        let state = h.node.state.as_ref().unwrap();
        for (k, rx) in h.peers.iter_mut().enumerate() {
            let msgs = drain_values(rx);
            assert_eq!(msgs.len(), 1);
            let naive = row[k]
                - (0..row.len())
                    .filter(|&q| q != k)
                    .map(|q| state.availability_in[&q] + row[q])
                    .fold(f64::NEG_INFINITY, f64::max);
            assert!(
                (msgs[0].0 - naive).abs() < TOL,
                "target {}: batched {} naive {}",
                k,
                msgs[0].0,
                naive
            );
        }
    }

    /// The batched-sum availability computation must agree with the naive
    /// per-target recomputation.
    #[test]
    fn batched_availability_matches_naive() {
        let mut h = harness(0.5, 1, &[-5.0, -3.0, -7.5, -1.0]);
        h.node.handle(NodeMsg::Start).unwrap();
        for rx in h.peers.iter_mut() {
            drain_values(rx);
        }
        let incoming = [0.5, -0.25, 1.5, -2.0];
        // lambda 0.5 over zeroed state halves each incoming value.
        for (sender, &value) in incoming.iter().enumerate() {
            h.node
                .handle(NodeMsg::Responsibility { value, sender })
                .unwrap();
        }
        let state = h.node.state.as_ref().unwrap();
        let r = |q: usize| state.responsibility_in[&q];
        for (k, rx) in h.peers.iter_mut().enumerate() {
            let msgs = drain_values(rx);
            assert_eq!(msgs.len(), 1);
            let naive = if k == 0 {
                (1..4).map(r).filter(|&v| v > 0.0).sum::<f64>()
            } else {
                let alt: f64 = (0..4)
                    .filter(|&q| q != 0 && q != k)
                    .map(r)
                    .filter(|&v| v > 0.0)
                    .sum();
                (r(0) + alt).min(0.0)
            };
            assert!(
                (msgs[0].0 - naive).abs() < TOL,
                "target {}: batched {} naive {}",
                k,
                msgs[0].0,
                naive
            );
        }
    }

    #[test]
    fn value_reported_on_send_each_cadence() {
        let mut h = harness(0.5, 2, &[-1.0, -2.0]);
        h.node.handle(NodeMsg::Start).unwrap();
        // Iteration 0: complete a responsibility and an availability round.
        for sender in 0..2 {
            h.node
                .handle(NodeMsg::Responsibility {
                    value: 1.0,
                    sender,
                })
                .unwrap();
        }
        for sender in 0..2 {
            h.node
                .handle(NodeMsg::Availability {
                    value: 1.0,
                    sender,
                })
                .unwrap();
        }
        assert!(h.aggregator.try_recv().is_err(), "no report at iteration 0");
        // Iteration 1: 1 % 2 == send_each - 1, so the report goes out.
        for sender in 0..2 {
            h.node
                .handle(NodeMsg::Responsibility {
                    value: 1.0,
                    sender,
                })
                .unwrap();
        }
        for sender in 0..2 {
            h.node
                .handle(NodeMsg::Availability {
                    value: 1.0,
                    sender,
                })
                .unwrap();
        }
        match h.aggregator.try_recv() {
            Ok(AggregatorMsg::Value {
                sender, iteration, ..
            }) => {
                assert_eq!(sender, 0);
                assert_eq!(iteration, 1);
            }
            _ => panic!("expected a Value report at iteration 1"),
        }
        assert_eq!(h.node.state.as_ref().unwrap().iteration, 2);
    }

    #[test]
    fn untracked_sender_is_fatal() {
        let mut h = harness(0.5, 1, &[-1.0, -2.0]);
        h.node.handle(NodeMsg::Start).unwrap();
        let err = h
            .node
            .handle(NodeMsg::Responsibility {
                value: 1.0,
                sender: 9,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ApError::UntrackedSender { node: 0, sender: 9, .. }
        ));
    }

    #[test]
    fn early_peer_messages_are_stashed_until_start() {
        let mut h = harness(0.5, 1, &[-1.0, -2.0]);
        // A fast peer's responsibility arrives before our Start.
        h.node
            .handle(NodeMsg::Responsibility {
                value: 4.0,
                sender: 1,
            })
            .unwrap();
        assert_eq!(h.node.stash.len(), 1);
        assert_eq!(h.node.state.as_ref().unwrap().responsibilities_received, 0);
        h.node.handle(NodeMsg::Start).unwrap();
        assert!(h.node.stash.is_empty());
        let state = h.node.state.as_ref().unwrap();
        assert_eq!(state.responsibilities_received, 1);
        assert!((state.responsibility_in[&1] - 2.0).abs() < TOL);
    }

    #[test]
    fn message_in_wrong_state_is_fatal() {
        let mut h = harness(0.5, 1, &[-1.0, -2.0]);
        h.node.handle(NodeMsg::Start).unwrap();
        let err = h.node.handle(NodeMsg::Start).unwrap_err();
        assert!(matches!(err, ApError::UnexpectedMessage { .. }));
    }

    #[test]
    fn shutdown_stops_in_any_phase() {
        let mut h = harness(0.5, 1, &[-1.0, -2.0]);
        assert!(matches!(
            h.node.handle(NodeMsg::Shutdown).unwrap(),
            Control::Stop
        ));
    }
}
