use thiserror::Error;

/// Failure modes of a clustering run.
///
/// Configuration and I/O problems are surfaced before any iteration starts;
/// the remaining variants are protocol violations, which indicate a wiring
/// bug and terminate the whole system rather than being retried.
#[derive(Debug, Error)]
pub enum ApError {
    /// A configuration parameter failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input data (similarity matrix, shard bounds) is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The similarity source could not be read.
    #[error("similarity source error: {0}")]
    Io(#[from] std::io::Error),

    /// A node received a message from a peer outside its pruned neighbor set.
    #[error("node {node} received a {kind} message from untracked sender {sender}")]
    UntrackedSender {
        node: usize,
        sender: usize,
        kind: &'static str,
    },

    /// An actor received a message it cannot accept in its current state.
    #[error("{actor} received {message} in state {state}")]
    UnexpectedMessage {
        actor: String,
        message: &'static str,
        state: &'static str,
    },

    /// A shard reducer saw a report for an iteration it already completed.
    #[error("shard {shard} received a late report for completed iteration {iteration}")]
    StaleIteration { shard: usize, iteration: u64 },

    /// A shard reducer saw a report from a node outside its index range.
    #[error("shard {shard} received a report from foreign node {sender}")]
    ForeignSender { shard: usize, sender: usize },

    /// Global merges must complete in strictly increasing iteration order.
    #[error("merge for iteration {iteration} completed after iteration {last}")]
    OutOfOrderMerge { iteration: u64, last: u64 },

    /// An actor channel closed before the protocol reached a terminal state.
    #[error("{actor} channel closed before completion")]
    Disconnected { actor: &'static str },

    /// An actor task panicked or was torn down abnormally.
    #[error("actor task failed: {0}")]
    ActorPanic(String),
}
