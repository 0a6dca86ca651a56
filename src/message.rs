use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

/// Mailbox traffic for a point actor.
pub(crate) enum NodeMsg<F> {
    /// One-time neighbor-initialization payload from the shard dispatcher.
    Init(Box<NodeInit<F>>),
    /// Global start signal, rebroadcast by the local dispatcher.
    Start,
    /// r(sender, receiver) for the current round.
    Responsibility { value: F, sender: usize },
    /// a(receiver, sender) for the current round.
    Availability { value: F, sender: usize },
    /// Terminal signal; stop processing and release resources.
    Shutdown,
}

impl<F> NodeMsg<F> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            NodeMsg::Init(_) => "Init",
            NodeMsg::Start => "Start",
            NodeMsg::Responsibility { .. } => "Responsibility",
            NodeMsg::Availability { .. } => "Availability",
            NodeMsg::Shutdown => "Shutdown",
        }
    }
}

/// Everything a node needs to join the iteration: its sparse similarity row
/// and the two pruned target lists. Handed exactly once by the dispatcher.
pub(crate) struct NodeInit<F> {
    pub self_id: usize,
    /// s(self, k) for every non-pruned k.
    pub similarity_row: HashMap<usize, F>,
    /// Ids that must receive a Responsibility message each round.
    pub resp_targets: Vec<usize>,
    /// Ids that must receive an Availability message each round.
    pub avail_targets: Vec<usize>,
    /// Where to report Ready once initialized.
    pub dispatcher: mpsc::UnboundedSender<DispatcherMsg>,
}

/// Mailbox traffic for a shard dispatcher.
pub(crate) enum DispatcherMsg {
    /// A local node finished initializing.
    Ready,
    /// The global barrier released; rebroadcast to the local shard.
    Start,
}

/// Shard-level ready report for the startup barrier.
pub(crate) enum StartupMsg {
    ShardReady,
}

/// Mailbox traffic for a shard reducer.
pub(crate) enum AggregatorMsg<F> {
    /// Per-node convergence report: self-responsibility + self-availability.
    Value { value: F, sender: usize, iteration: u64 },
    /// Terminal signal; forward to the shard's nodes and stop.
    Shutdown,
}

/// Mailbox traffic for the global convergence detector.
pub(crate) enum CoordinatorMsg<F> {
    /// One-time registration so shutdown can be broadcast to every reducer.
    Hello {
        shard: usize,
        aggregator: mpsc::UnboundedSender<AggregatorMsg<F>>,
    },
    /// A shard's partial exemplar set for one iteration.
    LocalExemplars {
        iteration: u64,
        exemplars: HashSet<usize>,
    },
}

/// Send-to-address primitive: the mail handles of every point actor, indexed
/// by point id. Sends to terminated actors are dropped, so in-flight traffic
/// during shutdown does not error out the remaining actors.
pub(crate) struct Router<F> {
    nodes: Vec<mpsc::UnboundedSender<NodeMsg<F>>>,
}

impl<F> Router<F> {
    pub(crate) fn new(nodes: Vec<mpsc::UnboundedSender<NodeMsg<F>>>) -> Self {
        Self { nodes }
    }

    pub(crate) fn send_to(&self, target: usize, msg: NodeMsg<F>) {
        debug_assert!(target < self.nodes.len());
        if let Some(tx) = self.nodes.get(target) {
            let _ = tx.send(msg);
        }
    }
}
