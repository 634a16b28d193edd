//! Per-call handle carrying the state of one RPC through
//! forward → respond → complete → trigger.
//!
//! A [`Handle`] is a cheap clone of a shared inner object. The user, the
//! server dispatcher and the completion queue each hold an owning clone;
//! the call's resources are released exactly when the last clone drops, so
//! dropping the user's handle inside a server callback only gives up the
//! user's reference, never the in-flight call. `destroy` is `drop`.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::MsgBuffer;
use crate::header::{REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};
use crate::na::{NaAddr, OpId, Tag};
use crate::registry::RpcId;
use crate::rpc::{CallbackInfo, Class, Context};

/// Protocol progress of a single call.
///
/// Transitions only move forward; completion is claimed exactly once, which
/// is what arbitrates between the normal path and cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    /// Handle allocated, nothing posted.
    Created,
    /// NA operations posted (request sent or listen receive armed).
    Posted,
    /// Request header decoded on the serving side.
    Decoded,
    /// Registered handler invocation returned.
    Handled,
    /// Response header encoded and the response send issued.
    Responded,
    /// Queued for user-callback dispatch by `trigger`.
    Completed,
}

/// User callback dispatched by `trigger` once the call completes.
pub type RpcCallback = Box<dyn FnOnce(CallbackInfo) + Send>;

pub(crate) struct HandleMeta {
    pub id: RpcId,
    pub cookie: u32,
    pub tag: Tag,
    pub addr: Option<NaAddr>,
    /// Address obtained from an unexpected receive; released on drop.
    pub addr_mine: bool,
    pub state: CallState,
    /// Return code carried by the decoded response header.
    pub ret_code: u32,
}

pub(crate) struct HandleInner {
    pub class: Class,
    pub context: Context,
    pub meta: Mutex<HandleMeta>,
    pub callback: Mutex<Option<RpcCallback>>,
    pub in_buf: MsgBuffer,
    pub out_buf: MsgBuffer,
    pub send_op: Mutex<Option<OpId>>,
    pub recv_op: Mutex<Option<OpId>>,
}

impl HandleInner {
    /// Monotonic state advance; stale transitions are ignored.
    pub(crate) fn advance(&self, next: CallState) {
        let mut meta = self.meta.lock();
        if next > meta.state {
            meta.state = next;
        }
    }

    /// Claim the transition to [`CallState::Completed`].
    ///
    /// Returns false when another path completed the handle first.
    pub(crate) fn try_claim_completion(&self) -> bool {
        let mut meta = self.meta.lock();
        if meta.state == CallState::Completed {
            false
        } else {
            meta.state = CallState::Completed;
            true
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let meta = self.meta.get_mut();
        if meta.addr_mine {
            if let Some(addr) = meta.addr {
                self.class.na_class().addr_free(addr);
            }
        }
    }
}

/// Snapshot of a handle's identity, as reported by [`Handle::info`].
pub struct HandleInfo {
    pub class: Class,
    pub context: Context,
    pub addr: Option<NaAddr>,
    pub id: RpcId,
}

/// One RPC call.
#[derive(Clone)]
pub struct Handle {
    pub(crate) inner: Arc<HandleInner>,
}

impl Handle {
    pub(crate) fn new(class: &Class, context: &Context, addr: Option<NaAddr>, id: RpcId) -> Handle {
        let buf_size = class.na_class().max_expected_size();
        Handle {
            inner: Arc::new(HandleInner {
                class: class.clone(),
                context: context.clone(),
                meta: Mutex::new(HandleMeta {
                    id,
                    cookie: class.next_cookie(),
                    tag: 0,
                    addr,
                    addr_mine: false,
                    state: CallState::Created,
                    ret_code: 0,
                }),
                callback: Mutex::new(None),
                in_buf: MsgBuffer::new(buf_size),
                out_buf: MsgBuffer::new(buf_size),
                send_op: Mutex::new(None),
                recv_op: Mutex::new(None),
            }),
        }
    }

    /// Identity snapshot: owning class and context, peer address, operation id.
    pub fn info(&self) -> HandleInfo {
        let meta = self.inner.meta.lock();
        HandleInfo {
            class: self.inner.class.clone(),
            context: self.inner.context.clone(),
            addr: meta.addr,
            id: meta.id,
        }
    }

    /// Peer address of the call, if known.
    pub fn addr(&self) -> Option<NaAddr> {
        self.inner.meta.lock().addr
    }

    /// Current protocol state.
    pub fn state(&self) -> CallState {
        self.inner.meta.lock().state
    }

    /// Return code carried by the decoded response header.
    pub fn response_code(&self) -> u32 {
        self.inner.meta.lock().ret_code
    }

    /// Request payload region: the input buffer past the request header.
    pub fn input_buf(&self) -> PayloadBuf<'_> {
        PayloadBuf {
            guard: self.inner.in_buf.lock(),
            offset: REQUEST_HEADER_SIZE,
        }
    }

    /// Response payload region: the output buffer past the response header.
    pub fn output_buf(&self) -> PayloadBuf<'_> {
        PayloadBuf {
            guard: self.inner.out_buf.lock(),
            offset: RESPONSE_HEADER_SIZE,
        }
    }

    pub(crate) fn ptr_eq(a: &Handle, b: &Handle) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// Locked view of the payload region of a handle buffer.
///
/// Dereferences to the bytes past the reserved header prefix; the length is
/// the buffer capacity minus the header size.
pub struct PayloadBuf<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    offset: usize,
}

impl Deref for PayloadBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[self.offset..]
    }
}

impl DerefMut for PayloadBuf<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[self.offset..]
    }
}
