//! In-process NA backend.
//!
//! Endpoints attached to a shared [`Fabric`] exchange messages through
//! in-memory queues. Sends complete as soon as the bytes are parked at the
//! destination; receive completions are deferred to the destination's ready
//! queue, drained by `trigger` and waited on by `progress`. This fills the
//! role a network plugin plays under the core: loopback deployments and
//! tests run the full protocol without touching hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffer::MsgBuffer;
use crate::na::{
    NaAddr, NaCallback, NaCbInfo, NaClass, NaContext, NaError, NaResult, OpId, Tag, UnexpectedInfo,
};

/// Default maximum message size for in-process endpoints.
pub const DEFAULT_MAX_MSG_SIZE: usize = 4096;

/// Default maximum tag value.
pub const DEFAULT_MAX_TAG: Tag = u32::MAX;

/// Configuration for an in-process endpoint.
#[derive(Debug, Clone)]
pub struct InprocConfig {
    /// Maximum message size in bytes.
    /// Default: 4096
    pub max_msg_size: usize,
    /// Maximum tag value.
    /// Default: `u32::MAX`
    pub max_tag: Tag,
}

impl Default for InprocConfig {
    fn default() -> Self {
        Self {
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_tag: DEFAULT_MAX_TAG,
        }
    }
}

impl InprocConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message size.
    pub fn with_max_msg_size(mut self, max_msg_size: usize) -> Self {
        self.max_msg_size = max_msg_size;
        self
    }

    /// Set the maximum tag value.
    pub fn with_max_tag(mut self, max_tag: Tag) -> Self {
        self.max_tag = max_tag;
        self
    }
}

struct InboundMsg {
    source: NaAddr,
    tag: Tag,
    data: Vec<u8>,
}

struct PostedRecv {
    op_id: OpId,
    buf: MsgBuffer,
    cb: NaCallback,
}

struct PostedExpectedRecv {
    op_id: OpId,
    buf: MsgBuffer,
    cb: NaCallback,
    source: NaAddr,
    tag: Tag,
}

#[derive(Default)]
struct EpQueues {
    posted_unexpected: VecDeque<PostedRecv>,
    queued_unexpected: VecDeque<InboundMsg>,
    posted_expected: Vec<PostedExpectedRecv>,
    queued_expected: Vec<InboundMsg>,
}

struct Endpoint {
    addr: NaAddr,
    queues: Mutex<EpQueues>,
    ready: Mutex<VecDeque<(NaCallback, NaCbInfo)>>,
    ready_cond: Condvar,
}

impl Endpoint {
    fn push_ready(&self, cb: NaCallback, info: NaCbInfo) {
        let mut ready = self.ready.lock();
        ready.push_back((cb, info));
        self.ready_cond.notify_all();
    }
}

struct FabricInner {
    endpoints: Mutex<HashMap<u64, Arc<Endpoint>>>,
    next_addr: AtomicU64,
    next_op: AtomicU64,
}

/// Shared in-process fabric; endpoints attached to the same fabric reach
/// each other by address.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FabricInner {
                endpoints: Mutex::new(HashMap::new()),
                next_addr: AtomicU64::new(0),
                next_op: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a new endpoint with default configuration.
    pub fn endpoint(&self, listening: bool) -> Arc<InprocClass> {
        self.endpoint_with(listening, InprocConfig::default())
    }

    /// Attach a new endpoint.
    pub fn endpoint_with(&self, listening: bool, config: InprocConfig) -> Arc<InprocClass> {
        let addr = NaAddr(self.inner.next_addr.fetch_add(1, Ordering::Relaxed) + 1);
        let endpoint = Arc::new(Endpoint {
            addr,
            queues: Mutex::new(EpQueues::default()),
            ready: Mutex::new(VecDeque::new()),
            ready_cond: Condvar::new(),
        });
        self.inner.endpoints.lock().insert(addr.0, endpoint.clone());
        Arc::new(InprocClass {
            fabric: self.inner.clone(),
            endpoint,
            listening,
            config,
        })
    }
}

/// In-process NA endpoint.
pub struct InprocClass {
    fabric: Arc<FabricInner>,
    endpoint: Arc<Endpoint>,
    listening: bool,
    config: InprocConfig,
}

impl InprocClass {
    /// Address remote peers use to reach this endpoint.
    pub fn addr(&self) -> NaAddr {
        self.endpoint.addr
    }
}

impl NaClass for InprocClass {
    fn max_expected_size(&self) -> usize {
        self.config.max_msg_size
    }

    fn max_tag(&self) -> Tag {
        self.config.max_tag
    }

    fn is_listening(&self) -> bool {
        self.listening
    }

    fn addr_is_self(&self, addr: NaAddr) -> bool {
        addr == self.endpoint.addr
    }

    fn addr_free(&self, _addr: NaAddr) {
        // addresses are plain tokens into the fabric map
    }

    fn context_create(&self) -> NaResult<Arc<dyn NaContext>> {
        Ok(Arc::new(InprocContext {
            fabric: self.fabric.clone(),
            endpoint: self.endpoint.clone(),
            max_msg_size: self.config.max_msg_size,
        }))
    }
}

/// Operation context of an in-process endpoint.
pub struct InprocContext {
    fabric: Arc<FabricInner>,
    endpoint: Arc<Endpoint>,
    max_msg_size: usize,
}

impl InprocContext {
    fn lookup(&self, addr: NaAddr) -> NaResult<Arc<Endpoint>> {
        self.fabric
            .endpoints
            .lock()
            .get(&addr.0)
            .cloned()
            .ok_or(NaError::UnknownAddr(addr))
    }

    fn next_op(&self) -> OpId {
        self.fabric.next_op.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self, buf: &MsgBuffer, len: usize) -> NaResult<Vec<u8>> {
        if len > self.max_msg_size {
            return Err(NaError::MessageTooLarge {
                size: len,
                max: self.max_msg_size,
            });
        }
        let data = buf.lock();
        if len > data.len() {
            return Err(NaError::MessageTooLarge {
                size: len,
                max: data.len(),
            });
        }
        Ok(data[..len].to_vec())
    }

    /// Copy a parked message into a posted receive and queue its callback.
    fn complete_recv(endpoint: &Endpoint, buf: MsgBuffer, cb: NaCallback, msg: InboundMsg, unexpected: bool) {
        let copied = {
            let mut dst = buf.lock();
            if msg.data.len() > dst.len() {
                Err(NaError::MessageTooLarge {
                    size: msg.data.len(),
                    max: dst.len(),
                })
            } else {
                dst[..msg.data.len()].copy_from_slice(&msg.data);
                Ok(())
            }
        };
        let info = match copied {
            Ok(()) => NaCbInfo {
                ret: Ok(()),
                unexpected: unexpected.then(|| UnexpectedInfo {
                    source: msg.source,
                    tag: msg.tag,
                    actual_size: msg.data.len(),
                }),
            },
            Err(e) => NaCbInfo {
                ret: Err(e),
                unexpected: None,
            },
        };
        endpoint.push_ready(cb, info);
    }
}

impl NaContext for InprocContext {
    fn msg_send_unexpected(
        &self,
        cb: NaCallback,
        buf: MsgBuffer,
        len: usize,
        dest: NaAddr,
        tag: Tag,
    ) -> NaResult<OpId> {
        let dest_ep = self.lookup(dest)?;
        let msg = InboundMsg {
            source: self.endpoint.addr,
            tag,
            data: self.snapshot(&buf, len)?,
        };

        let mut queues = dest_ep.queues.lock();
        if let Some(posted) = queues.posted_unexpected.pop_front() {
            drop(queues);
            Self::complete_recv(&dest_ep, posted.buf, posted.cb, msg, true);
        } else {
            queues.queued_unexpected.push_back(msg);
            drop(queues);
        }

        self.endpoint.push_ready(
            cb,
            NaCbInfo {
                ret: Ok(()),
                unexpected: None,
            },
        );
        Ok(self.next_op())
    }

    fn msg_recv_unexpected(&self, cb: NaCallback, buf: MsgBuffer) -> NaResult<OpId> {
        let op_id = self.next_op();
        let mut queues = self.endpoint.queues.lock();
        if let Some(msg) = queues.queued_unexpected.pop_front() {
            drop(queues);
            Self::complete_recv(&self.endpoint, buf, cb, msg, true);
        } else {
            queues.posted_unexpected.push_back(PostedRecv { op_id, buf, cb });
        }
        Ok(op_id)
    }

    fn msg_send_expected(
        &self,
        cb: NaCallback,
        buf: MsgBuffer,
        len: usize,
        dest: NaAddr,
        tag: Tag,
    ) -> NaResult<OpId> {
        let dest_ep = self.lookup(dest)?;
        let msg = InboundMsg {
            source: self.endpoint.addr,
            tag,
            data: self.snapshot(&buf, len)?,
        };

        let mut queues = dest_ep.queues.lock();
        let matched = queues
            .posted_expected
            .iter()
            .position(|p| p.source == msg.source && p.tag == tag);
        if let Some(i) = matched {
            let posted = queues.posted_expected.remove(i);
            drop(queues);
            Self::complete_recv(&dest_ep, posted.buf, posted.cb, msg, false);
        } else {
            queues.queued_expected.push(msg);
            drop(queues);
        }

        self.endpoint.push_ready(
            cb,
            NaCbInfo {
                ret: Ok(()),
                unexpected: None,
            },
        );
        Ok(self.next_op())
    }

    fn msg_recv_expected(
        &self,
        cb: NaCallback,
        buf: MsgBuffer,
        source: NaAddr,
        tag: Tag,
    ) -> NaResult<OpId> {
        let op_id = self.next_op();
        let mut queues = self.endpoint.queues.lock();
        let parked = queues
            .queued_expected
            .iter()
            .position(|m| m.source == source && m.tag == tag);
        if let Some(i) = parked {
            let msg = queues.queued_expected.remove(i);
            drop(queues);
            Self::complete_recv(&self.endpoint, buf, cb, msg, false);
        } else {
            queues.posted_expected.push(PostedExpectedRecv {
                op_id,
                buf,
                cb,
                source,
                tag,
            });
        }
        Ok(op_id)
    }

    fn progress(&self, timeout_ms: u32) -> NaResult<()> {
        let mut ready = self.endpoint.ready.lock();
        if !ready.is_empty() {
            return Ok(());
        }
        if timeout_ms == 0 {
            return Err(NaError::Timeout);
        }
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        while ready.is_empty() {
            if self.endpoint.ready_cond.wait_until(&mut ready, deadline).timed_out() {
                return if ready.is_empty() {
                    Err(NaError::Timeout)
                } else {
                    Ok(())
                };
            }
        }
        Ok(())
    }

    fn trigger(&self, timeout_ms: u32, max_count: u32) -> NaResult<u32> {
        let mut count = 0;
        let mut waited = false;
        while count < max_count {
            let next = self.endpoint.ready.lock().pop_front();
            if let Some((cb, info)) = next {
                cb(info);
                count += 1;
                continue;
            }
            if count > 0 || timeout_ms == 0 || waited {
                break;
            }
            waited = true;
            let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
            let mut ready = self.endpoint.ready.lock();
            while ready.is_empty()
                && !self.endpoint.ready_cond.wait_until(&mut ready, deadline).timed_out()
            {}
        }
        Ok(count)
    }

    fn cancel(&self, op_id: OpId) -> NaResult<()> {
        let cancelled = {
            let mut queues = self.endpoint.queues.lock();
            if let Some(i) = queues.posted_unexpected.iter().position(|p| p.op_id == op_id) {
                queues.posted_unexpected.remove(i).map(|p| p.cb)
            } else if let Some(i) = queues.posted_expected.iter().position(|p| p.op_id == op_id) {
                Some(queues.posted_expected.remove(i).cb)
            } else {
                // already completed
                None
            }
        };
        if let Some(cb) = cancelled {
            self.endpoint.push_ready(
                cb,
                NaCbInfo {
                    ret: Err(NaError::Canceled),
                    unexpected: None,
                },
            );
        }
        Ok(())
    }
}
