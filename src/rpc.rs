//! Public API surface and the progress/trigger engine.
//!
//! [`Class`] anchors the runtime for a process: the NA it drives, the
//! function registry and the tag allocator. [`Context`] is the per-loop
//! workspace carrying the completion queue and the listen backlog. A typical
//! deployment runs one `progress` thread and any number of `trigger` threads
//! per context.
//!
//! The four NA completion callbacks (`send_input_cb`, `recv_input_cb`,
//! `send_output_cb`, `recv_output_cb`) drive each handle through
//! `Created → Posted → Decoded → Handled → Responded → Completed`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::bulk::{BulkClass, BulkContext, BulkHandle};
use crate::completion::{CompletionEntry, CompletionQueue, ProcessingList};
use crate::error::{Error, ProtocolError, Result};
use crate::handle::{CallState, Handle};
use crate::header::{
    RequestHeader, ResponseHeader, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};
use crate::na::{NaAddr, NaCbInfo, NaClass, NaContext};
use crate::registry::{RegisteredData, Registry, RpcId};
use crate::tag::TagAllocator;

/// Unexpected receives kept pre-posted per listening context.
pub const MAX_PROCESSING_BACKLOG: usize = 1;

/// Record passed to user callbacks dispatched by [`Class::trigger`].
pub struct CallbackInfo {
    /// Outcome of the call.
    pub ret: Result<()>,
    /// The completed handle; payload buffers stay readable until dropped.
    pub handle: Handle,
}

struct ClassInner {
    na_class: Arc<dyn NaClass>,
    na_context: Arc<dyn NaContext>,
    bulk: BulkClass,
    bulk_external: bool,
    registry: Registry,
    tags: TagAllocator,
    cookies: AtomicU32,
}

/// Process-level runtime anchor.
#[derive(Clone)]
pub struct Class {
    inner: Arc<ClassInner>,
}

impl Class {
    /// Initialize the runtime on an NA endpoint.
    ///
    /// When `bulk` is `None` an internal bulk subsystem is created on the
    /// same NA; passing one keeps its lifetime in the caller's hands.
    pub fn init(
        na_class: Arc<dyn NaClass>,
        na_context: Arc<dyn NaContext>,
        bulk: Option<BulkClass>,
    ) -> Result<Class> {
        let buf_size = na_class.max_expected_size();
        let min_size = REQUEST_HEADER_SIZE.max(RESPONSE_HEADER_SIZE);
        if buf_size <= min_size {
            return Err(Error::Size {
                expected: min_size + 1,
                actual: buf_size,
            });
        }

        let (bulk, bulk_external) = match bulk {
            Some(external) => (external, true),
            None => (
                BulkClass::init(na_class.clone(), na_context.clone())?,
                false,
            ),
        };
        let max_tag = na_class.max_tag();

        Ok(Class {
            inner: Arc::new(ClassInner {
                na_class,
                na_context,
                bulk,
                bulk_external,
                registry: Registry::new(),
                tags: TagAllocator::new(max_tag),
                cookies: AtomicU32::new(0),
            }),
        })
    }

    /// Tear down the runtime: every registry entry is evicted, releasing
    /// handlers and attached data. The bulk subsystem follows unless it was
    /// supplied externally.
    pub fn finalize(self) -> Result<()> {
        self.inner.registry.clear();
        Ok(())
    }

    /// Whether the bulk subsystem was supplied by the caller at init.
    pub fn bulk_is_external(&self) -> bool {
        self.inner.bulk_external
    }

    pub(crate) fn na_class(&self) -> &Arc<dyn NaClass> {
        &self.inner.na_class
    }

    pub(crate) fn na_context(&self) -> &Arc<dyn NaContext> {
        &self.inner.na_context
    }

    pub(crate) fn next_cookie(&self) -> u32 {
        self.inner.cookies.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Register a function under `name`; the returned id is what peers put
    /// in their requests.
    pub fn register_rpc<F>(&self, name: &str, handler: F) -> Result<RpcId>
    where
        F: Fn(Handle) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.registry.register(name, Arc::new(handler))
    }

    /// Look up a name; returns `(present, id)` with `id = 0` when absent.
    pub fn registered_rpc(&self, name: &str) -> (bool, RpcId) {
        self.inner.registry.registered(name)
    }

    /// Attach user data to a registered function.
    pub fn register_data(&self, id: RpcId, data: RegisteredData) -> Result<()> {
        self.inner.registry.attach_data(id, data)
    }

    /// User data attached to a registered function, if any.
    pub fn registered_data(&self, id: RpcId) -> Option<RegisteredData> {
        self.inner.registry.lookup_data(id)
    }

    /// Create a per-loop context bound to this class.
    pub fn context_create(&self) -> Result<Context> {
        let bulk_context = self.inner.bulk.context_create()?;
        Ok(Context {
            inner: Arc::new(ContextInner {
                class: self.clone(),
                bulk_context,
                completion: CompletionQueue::new(),
                processing: ProcessingList::new(),
            }),
        })
    }

    /// Create a handle addressing operation `id` on `addr`.
    pub fn create(&self, context: &Context, addr: NaAddr, id: RpcId) -> Result<Handle> {
        self.check_context(context)?;
        Ok(Handle::new(self, context, Some(addr), id))
    }

    /// Drive the runtime: refill the listen backlog, run ready NA
    /// completion callbacks, then block in the NA up to `timeout_ms` unless
    /// completions are already waiting for [`Class::trigger`].
    pub fn progress(&self, context: &Context, timeout_ms: u32) -> Result<()> {
        self.check_context(context)?;

        if self.inner.na_class.is_listening() {
            listen(self, context)?;
        }

        // Run everything the NA has ready; these callbacks feed the
        // completion queue.
        loop {
            let ran = self.inner.na_context.trigger(0, 1)?;
            if ran == 0 {
                break;
            }
        }

        if !context.inner.completion.is_empty() {
            return Ok(());
        }

        self.inner.na_context.progress(timeout_ms).map_err(Error::from)
    }

    /// Dispatch up to `max_count` completed calls to their user callbacks.
    ///
    /// Blocks up to `timeout_ms` only while nothing has been dispatched yet;
    /// an empty queue after the wait is a timeout. Returns the number of
    /// callbacks executed.
    pub fn trigger(&self, context: &Context, timeout_ms: u32, max_count: u32) -> Result<u32> {
        self.check_context(context)?;

        let mut count = 0;
        while count < max_count {
            let entry = if count == 0 {
                match context
                    .inner
                    .completion
                    .pop_wait(Duration::from_millis(u64::from(timeout_ms)))
                {
                    Some(entry) => entry,
                    None => return Err(Error::Timeout),
                }
            } else {
                match context.inner.completion.try_pop() {
                    Some(entry) => entry,
                    None => break,
                }
            };

            let CompletionEntry { handle, ret } = entry;
            // The queue lock is released here; callbacks may re-enter the
            // API freely.
            let callback = handle.inner.callback.lock().take();
            if let Some(callback) = callback {
                callback(CallbackInfo {
                    ret,
                    handle: handle.clone(),
                });
            }
            // Release the completion path's owning reference.
            drop(handle);
            count += 1;
        }
        Ok(count)
    }

    fn check_context(&self, context: &Context) -> Result<()> {
        if !Arc::ptr_eq(&context.inner.class.inner, &self.inner) {
            return Err(Error::InvalidParam("context does not belong to this class"));
        }
        Ok(())
    }
}

struct ContextInner {
    class: Class,
    bulk_context: BulkContext,
    completion: CompletionQueue,
    processing: ProcessingList,
}

/// Per-progress-loop workspace bound to one class.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Owning class.
    pub fn class(&self) -> &Class {
        &self.inner.class
    }

    /// Bulk workspace of this context.
    pub fn bulk_context(&self) -> &BulkContext {
        &self.inner.bulk_context
    }

    /// Tear down the context.
    ///
    /// Fails with a protocol error while undispatched completions remain;
    /// outstanding listen receives are cancelled.
    pub fn destroy(self) -> Result<()> {
        if !self.inner.completion.is_empty() {
            return Err(Error::Protocol(ProtocolError::ContextBusy));
        }
        for handle in self.inner.processing.drain() {
            let recv_op = handle.inner.recv_op.lock().take();
            if let Some(op) = recv_op {
                if let Err(e) = self.inner.class.na_context().cancel(op) {
                    warn!(error = %e, "could not cancel listen receive");
                }
            }
        }
        Ok(())
    }
}

impl Handle {
    /// Originate the call: encode the request header and either loop back
    /// through the local dispatcher or post the response receive followed by
    /// the request send. `callback` runs from `trigger` once the response
    /// arrives (or the call fails).
    pub fn forward<F>(&self, extra_bulk: Option<BulkHandle>, callback: F) -> Result<()>
    where
        F: FnOnce(CallbackInfo) + Send + 'static,
    {
        let class = self.inner.class.clone();
        let (addr, cookie, id) = {
            let meta = self.inner.meta.lock();
            (meta.addr, meta.cookie, meta.id)
        };
        let addr = addr.ok_or(Error::InvalidParam("handle has no destination address"))?;

        *self.inner.callback.lock() = Some(Box::new(callback));

        let header = RequestHeader::new(id, cookie, extra_bulk.map_or(0, |b| b.0));
        {
            let mut buf = self.inner.in_buf.lock();
            header.encode(&mut buf)?;
        }

        if class.na_class().addr_is_self(addr) {
            // Loopback short-circuit: dispatch synchronously.
            return process(self.clone());
        }

        let tag = class.inner.tags.next();
        self.inner.meta.lock().tag = tag;

        // The response receive must be armed before the request can leave.
        let recv_handle = self.clone();
        let recv_op = class.na_context().msg_recv_expected(
            Box::new(move |info| recv_output_cb(recv_handle, info)),
            self.inner.out_buf.clone(),
            addr,
            tag,
        )?;
        *self.inner.recv_op.lock() = Some(recv_op);

        let send_handle = self.clone();
        let send_op = class.na_context().msg_send_unexpected(
            Box::new(move |info| send_input_cb(send_handle, info)),
            self.inner.in_buf.clone(),
            self.inner.in_buf.capacity(),
            addr,
            tag,
        );
        let send_op = match send_op {
            Ok(op) => op,
            Err(e) => {
                // The request never left; the armed receive must not dangle.
                if let Some(op) = self.inner.recv_op.lock().take() {
                    if let Err(cancel_err) = class.na_context().cancel(op) {
                        warn!(error = %cancel_err, "could not cancel response receive");
                    }
                }
                return Err(Error::from(e));
            }
        };
        *self.inner.send_op.lock() = Some(send_op);

        self.inner.advance(CallState::Posted);
        Ok(())
    }

    /// Answer the call: encode the response header with the request cookie
    /// and either complete directly (loopback) or post the expected send.
    /// `callback` runs from `trigger` once the response send completes.
    pub fn respond<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(CallbackInfo) + Send + 'static,
    {
        let class = self.inner.class.clone();
        let (addr, cookie, tag) = {
            let meta = self.inner.meta.lock();
            (meta.addr, meta.cookie, meta.tag)
        };
        let addr = addr.ok_or(Error::InvalidParam("handle has no source address"))?;

        {
            // A loopback handle already carries the originator's callback;
            // that one is dispatched for the single completion.
            let mut slot = self.inner.callback.lock();
            if slot.is_none() {
                *slot = Some(Box::new(callback));
            }
        }

        let header = ResponseHeader::new(cookie);
        {
            let mut buf = self.inner.out_buf.lock();
            header.encode(&mut buf)?;
        }
        self.inner.advance(CallState::Responded);

        if class.na_class().addr_is_self(addr) {
            complete(self.clone(), Ok(()));
            return Ok(());
        }

        let send_handle = self.clone();
        let send_op = class.na_context().msg_send_expected(
            Box::new(move |info| send_output_cb(send_handle, info)),
            self.inner.out_buf.clone(),
            self.inner.out_buf.capacity(),
            addr,
            tag,
        )?;
        *self.inner.send_op.lock() = Some(send_op);
        Ok(())
    }

    /// Best-effort cancellation of the call's pending NA operations.
    ///
    /// Each operation is cancelled at most once; a cancelled operation flows
    /// through the normal completion path with a failure status.
    pub fn cancel(&self) -> Result<()> {
        let class = self.inner.class.clone();
        let recv_op = self.inner.recv_op.lock().take();
        let send_op = self.inner.send_op.lock().take();
        for op in [recv_op, send_op].into_iter().flatten() {
            class.na_context().cancel(op)?;
        }
        Ok(())
    }
}

/// Refill the pre-posted unexpected receives up to the backlog cap.
fn listen(class: &Class, context: &Context) -> Result<()> {
    let mut list = context.inner.processing.lock();
    while list.len() < MAX_PROCESSING_BACKLOG {
        let handle = Handle::new(class, context, None, 0);
        list.push(handle.clone());

        let cb_handle = handle.clone();
        let op = class.na_context().msg_recv_unexpected(
            Box::new(move |info| recv_input_cb(cb_handle, info)),
            handle.inner.in_buf.clone(),
        )?;
        *handle.inner.recv_op.lock() = Some(op);
        handle.inner.advance(CallState::Posted);
    }
    Ok(())
}

/// Request send completion. Success is a no-op: the response path completes
/// the handle. A failed send can never be answered, so the handle completes
/// with the error and the dangling response receive is cancelled.
fn send_input_cb(handle: Handle, info: NaCbInfo) {
    let Err(e) = info.ret else {
        return;
    };
    warn!(error = %e, "request send failed");
    let recv_op = handle.inner.recv_op.lock().take();
    if let Some(op) = recv_op {
        if let Err(cancel_err) = handle.inner.class.na_context().cancel(op) {
            warn!(error = %cancel_err, "could not cancel response receive");
        }
    }
    complete(handle, Err(Error::from(e)));
}

/// Response arrived on the originator: decode, verify, complete.
fn recv_output_cb(handle: Handle, info: NaCbInfo) {
    if let Err(e) = info.ret {
        warn!(error = %e, "response receive failed");
        complete(handle, Err(Error::from(e)));
        return;
    }
    let ret = decode_response(&handle);
    complete(handle, ret);
}

fn decode_response(handle: &Handle) -> Result<()> {
    let header = {
        let buf = handle.inner.out_buf.lock();
        ResponseHeader::decode(&buf)?
    };
    header.verify()?;

    let mut meta = handle.inner.meta.lock();
    if header.cookie != meta.cookie {
        return Err(Error::Protocol(ProtocolError::CookieMismatch {
            expected: meta.cookie,
            got: header.cookie,
        }));
    }
    meta.ret_code = header.ret_code;
    Ok(())
}

/// Incoming request on a pre-posted listen receive.
fn recv_input_cb(handle: Handle, info: NaCbInfo) {
    let context = handle.inner.context.clone();

    if let Err(e) = info.ret {
        // A listen handle carries no user callback; drop it.
        debug!(error = %e, "listen receive terminated");
        context.inner.processing.remove(&handle);
        return;
    }

    let Some(unexpected) = info.unexpected else {
        error!("unexpected receive completed without sender info");
        context.inner.processing.remove(&handle);
        return;
    };

    let in_size = handle.inner.in_buf.capacity();
    if unexpected.actual_size != in_size {
        error!(
            actual = unexpected.actual_size,
            expected = in_size,
            "buffer size and actual transfer size do not match"
        );
        context.inner.processing.remove(&handle);
        return;
    }

    {
        let mut meta = handle.inner.meta.lock();
        meta.addr = Some(unexpected.source);
        meta.addr_mine = true;
        meta.tag = unexpected.tag;
    }

    if !context.inner.processing.remove(&handle) {
        error!("handle missing from processing list");
        return;
    }

    if let Err(e) = process(handle) {
        warn!(error = %e, "could not process incoming request");
    }
}

/// Response send completion on the server: the call is done.
fn send_output_cb(handle: Handle, info: NaCbInfo) {
    let ret = info.ret.map_err(Error::from);
    if let Err(e) = &ret {
        warn!(error = %e, "response send failed");
    }
    complete(handle, ret);
}

/// Decode an incoming request and dispatch it to its registered handler.
fn process(handle: Handle) -> Result<()> {
    let header = {
        let buf = handle.inner.in_buf.lock();
        RequestHeader::decode(&buf)?
    };
    header.verify()?;

    {
        let mut meta = handle.inner.meta.lock();
        meta.id = header.id;
        meta.cookie = header.cookie;
    }
    handle.inner.advance(CallState::Decoded);

    let handler = handle.inner.class.inner.registry.lookup_handler(header.id)?;

    // The dispatcher keeps its own owning clone, so a drop inside the
    // handler only releases the user's reference.
    let ret = handler(handle.clone());
    handle.inner.advance(CallState::Handled);
    ret
}

/// Queue a finished handle for trigger dispatch. The first completion claims
/// the handle; later ones (a cancelled twin operation) are dropped.
fn complete(handle: Handle, ret: Result<()>) {
    if !handle.inner.try_claim_completion() {
        return;
    }
    let context = handle.inner.context.clone();
    context.inner.completion.push(CompletionEntry { handle, ret });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inproc::Fabric;

    fn listening_class(fabric: &Fabric) -> (Class, Context) {
        let endpoint = fabric.endpoint(true);
        let na_class: Arc<dyn NaClass> = endpoint.clone();
        let na_context = endpoint.context_create().unwrap();
        let class = Class::init(na_class, na_context, None).unwrap();
        let context = class.context_create().unwrap();
        (class, context)
    }

    #[test]
    fn test_listen_fills_backlog_to_cap() {
        let fabric = Fabric::new();
        let (class, context) = listening_class(&fabric);

        listen(&class, &context).unwrap();
        assert_eq!(context.inner.processing.len(), MAX_PROCESSING_BACKLOG);

        // Refill is idempotent while nothing was consumed.
        listen(&class, &context).unwrap();
        assert_eq!(context.inner.processing.len(), MAX_PROCESSING_BACKLOG);
    }

    #[test]
    fn test_progress_refills_backlog() {
        let fabric = Fabric::new();
        let (class, context) = listening_class(&fabric);

        let _ = class.progress(&context, 0);
        assert_eq!(context.inner.processing.len(), MAX_PROCESSING_BACKLOG);
    }

    #[test]
    fn test_context_must_belong_to_class() {
        let fabric = Fabric::new();
        let (class_a, _context_a) = listening_class(&fabric);
        let (_class_b, context_b) = listening_class(&fabric);

        assert!(matches!(
            class_a.progress(&context_b, 0),
            Err(Error::InvalidParam(_))
        ));
        assert!(matches!(
            class_a.create(&context_b, NaAddr(1), 0),
            Err(Error::InvalidParam(_))
        ));
    }

    #[test]
    fn test_version_is_reported() {
        let (major, minor, patch) = crate::version();
        assert_eq!((major, minor, patch), (0, 1, 0));
    }
}
