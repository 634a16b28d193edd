//! Network Abstraction (NA) contract consumed by the RPC core.
//!
//! The core never touches the wire itself. It composes the two-sided
//! messaging primitives below into a request/response protocol: unexpected
//! messages carry requests to listeners that pre-posted receives without
//! knowing the sender, expected messages carry responses over a `(peer, tag)`
//! pair both sides agreed on. Backends queue completion callbacks internally;
//! `progress` blocks until at least one is ready and `trigger` runs them.

use std::fmt;
use std::sync::Arc;

use crate::buffer::MsgBuffer;

/// Small integer distinguishing concurrent expected exchanges between two peers.
pub type Tag = u32;

/// Token identifying a posted operation, held for cancellation only.
pub type OpId = u64;

/// Opaque address of a peer endpoint, minted by the NA backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NaAddr(pub u64);

impl fmt::Display for NaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "na:{}", self.0)
    }
}

/// Error type for NA operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NaError {
    /// No progress within the requested timeout.
    Timeout,
    /// Operation was cancelled before completion.
    Canceled,
    /// No endpoint reachable under the given address.
    UnknownAddr(NaAddr),
    /// Message does not fit the destination buffer or the transport limit.
    MessageTooLarge { size: usize, max: usize },
    /// Backend is shutting down.
    Shutdown,
}

impl fmt::Display for NaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaError::Timeout => write!(f, "NA timeout"),
            NaError::Canceled => write!(f, "operation cancelled"),
            NaError::UnknownAddr(addr) => write!(f, "unknown address {}", addr),
            NaError::MessageTooLarge { size, max } => {
                write!(f, "message too large: {} bytes, max {} bytes", size, max)
            }
            NaError::Shutdown => write!(f, "NA backend shut down"),
        }
    }
}

impl std::error::Error for NaError {}

/// Result type for NA operations.
pub type NaResult<T> = std::result::Result<T, NaError>;

/// Sender information reported when an unexpected receive completes.
#[derive(Debug, Clone, Copy)]
pub struct UnexpectedInfo {
    /// Address of the sending endpoint.
    pub source: NaAddr,
    /// Tag carried by the message.
    pub tag: Tag,
    /// Number of bytes actually transferred.
    pub actual_size: usize,
}

/// Completion record passed to an operation's callback.
#[derive(Debug, Clone)]
pub struct NaCbInfo {
    /// Outcome of the operation.
    pub ret: NaResult<()>,
    /// Populated for unexpected receives only.
    pub unexpected: Option<UnexpectedInfo>,
}

/// Completion callback attached to a posted operation.
pub type NaCallback = Box<dyn FnOnce(NaCbInfo) + Send>;

/// Process-level queries of an NA backend.
pub trait NaClass: Send + Sync {
    /// Largest message the backend can carry in one expected/unexpected send.
    fn max_expected_size(&self) -> usize;

    /// Largest usable tag value.
    fn max_tag(&self) -> Tag;

    /// Whether this endpoint accepts unexpected messages from remote peers.
    fn is_listening(&self) -> bool;

    /// Whether `addr` names this endpoint itself.
    fn addr_is_self(&self, addr: NaAddr) -> bool;

    /// Release an address obtained from an unexpected receive.
    fn addr_free(&self, addr: NaAddr);

    /// Create the operation context used to post messages and make progress.
    fn context_create(&self) -> NaResult<Arc<dyn NaContext>>;
}

/// Operation surface of an NA backend.
///
/// All posting calls are non-blocking; completion is reported through the
/// callback once `trigger` runs it. The returned [`OpId`] is a borrowed
/// token valid until the operation completes, used only for [`cancel`].
///
/// [`cancel`]: NaContext::cancel
pub trait NaContext: Send + Sync {
    /// Post a send towards a peer that has not pre-arranged a tag.
    fn msg_send_unexpected(
        &self,
        cb: NaCallback,
        buf: MsgBuffer,
        len: usize,
        dest: NaAddr,
        tag: Tag,
    ) -> NaResult<OpId>;

    /// Post a receive for a message from any sender with any tag.
    fn msg_recv_unexpected(&self, cb: NaCallback, buf: MsgBuffer) -> NaResult<OpId>;

    /// Post a send bound to a `(peer, tag)` pair the receiver expects.
    fn msg_send_expected(
        &self,
        cb: NaCallback,
        buf: MsgBuffer,
        len: usize,
        dest: NaAddr,
        tag: Tag,
    ) -> NaResult<OpId>;

    /// Post a receive bound to a specific `(peer, tag)` pair.
    fn msg_recv_expected(
        &self,
        cb: NaCallback,
        buf: MsgBuffer,
        source: NaAddr,
        tag: Tag,
    ) -> NaResult<OpId>;

    /// Block until a completion callback is ready, up to `timeout_ms`.
    fn progress(&self, timeout_ms: u32) -> NaResult<()>;

    /// Run up to `max_count` ready completion callbacks, waiting up to
    /// `timeout_ms` for the first one. Returns the number executed.
    fn trigger(&self, timeout_ms: u32, max_count: u32) -> NaResult<u32>;

    /// Cancel a posted operation. Cancelling an operation that already
    /// completed is a no-op; a cancelled operation reports
    /// [`NaError::Canceled`] through its callback exactly once.
    fn cancel(&self, op_id: OpId) -> NaResult<()>;
}
