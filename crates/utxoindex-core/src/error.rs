//! Error types for the sync and query paths.

use thiserror::Error;

/// Errors returned by a [`NodeClient`](crate::node::NodeClient).
#[derive(Debug, Error)]
pub enum NodeError {
    /// Node unreachable, timed out, or returned a transport-level failure.
    #[error("node unreachable: {0}")]
    Transient(String),

    /// The referenced block hash, height or txid does not exist (any more).
    #[error("not found: {0}")]
    NotFound(String),

    /// The node returned a structurally invalid response.
    #[error("malformed node response: {0}")]
    Malformed(String),

    /// The node rejected the call with a JSON-RPC error.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl NodeError {
    /// Returns `true` if the call may succeed when repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` if the referenced object vanished (usually a concurrent reorg).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors returned by an [`KvStore`](crate::store::KvStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt record in table '{table}': {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Errors raised by the sync loop and the applier.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The fork point lies below the oldest tracked header.
    #[error("reorg deeper than tracked window: new tip {new_tip_height} ({new_tip_hash}) shares no block with the last {window} tracked headers")]
    ReorgTooDeep {
        new_tip_height: u64,
        new_tip_hash: String,
        window: usize,
    },

    /// A block or transaction failed structural validation.
    #[error("malformed data at {context}: {reason}")]
    Malformed { context: String, reason: String },

    #[error("sync aborted: {reason}")]
    Aborted { reason: String },
}

impl SyncError {
    /// Fatal errors stop the sync loop; everything else retries next cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ReorgTooDeep { .. } | Self::Malformed { .. } => true,
            Self::Node(e) => matches!(e, NodeError::Malformed(_)),
            Self::Store(e) => matches!(e, StoreError::Corrupt { .. }),
            Self::Aborted { .. } => false,
        }
    }

    /// Returns `true` if the current step should be re-derived rather than retried.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Node(e) if e.is_not_found())
    }
}

/// Errors surfaced to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid status '{0}': expected one of all, unspent")]
    InvalidStatus(String),

    #[error("invalid source '{0}': expected one of blocks, mempool, any")]
    InvalidSource(String),

    #[error("invalid height '{value}' for '{field}'")]
    InvalidHeight { field: &'static str, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("query deadline of {ms}ms exceeded")]
    DeadlineExceeded { ms: u64 },
}

impl QueryError {
    /// Returns `true` for errors caused by the request itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatus(_) | Self::InvalidSource(_) | Self::InvalidHeight { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let deep = SyncError::ReorgTooDeep {
            new_tip_height: 10,
            new_tip_hash: "aa".into(),
            window: 5,
        };
        assert!(deep.is_fatal());
        assert!(SyncError::Node(NodeError::Malformed("bad".into())).is_fatal());
        assert!(!SyncError::Node(NodeError::Transient("timeout".into())).is_fatal());
        assert!(!SyncError::Node(NodeError::NotFound("blk".into())).is_fatal());
    }

    #[test]
    fn not_found_signal() {
        let e = SyncError::Node(NodeError::NotFound("tx".into()));
        assert!(e.is_not_found());
        assert!(!NodeError::NotFound("x".into()).is_retryable());
        assert!(NodeError::Transient("x".into()).is_retryable());
    }
}
