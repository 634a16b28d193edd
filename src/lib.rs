//! # narpc - RPC runtime core over a pluggable network abstraction
//!
//! This crate implements the core of a general-purpose RPC runtime for
//! high-performance computing environments. Callers register named functions,
//! originate forward requests to remote peers, and servers post listeners
//! that dispatch incoming requests to registered handlers and reply. The
//! runtime never touches the wire: it composes the unexpected/expected
//! two-sided messaging primitives of a Network Abstraction (NA) into a
//! request/response protocol with headers, tag allocation, user-callback
//! completion and progress/trigger semantics.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use narpc::inproc::Fabric;
//! use narpc::{Class, NaClass};
//!
//! // Attach an endpoint to an in-process fabric (a network plugin would
//! // provide its own NaClass implementation instead).
//! let fabric = Fabric::new();
//! let endpoint = fabric.endpoint(true);
//! let addr = endpoint.addr();
//!
//! let na_class: Arc<dyn NaClass> = endpoint.clone();
//! let na_context = endpoint.context_create()?;
//! let class = Class::init(na_class, na_context, None)?;
//! let context = class.context_create()?;
//!
//! // Register a handler and call it.
//! let id = class.register_rpc("echo", |handle| {
//!     let byte = handle.input_buf()[0];
//!     handle.output_buf()[0] = byte;
//!     handle.respond(|_info| {})
//! })?;
//!
//! let handle = class.create(&context, addr, id)?;
//! handle.input_buf()[0] = 42;
//! handle.forward(None, |info| {
//!     assert_eq!(info.handle.output_buf()[0], 42);
//! })?;
//!
//! // One progress thread, any number of trigger threads.
//! loop {
//!     let _ = class.progress(&context, 100);
//!     if class.trigger(&context, 0, 1).is_ok() {
//!         break;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`header`]: request/response header codec
//! - [`registry`]: named function registry keyed by a stable hash
//! - [`tag`]: wrapping tag allocator for expected exchanges
//! - [`buffer`]: message buffers lent to the NA while operations are posted
//! - [`handle`]: per-call state (`Handle`, `CallState`)
//! - [`bulk`]: lifecycle surface of the bulk-transfer collaborator
//! - [`na`]: the NA contract this core consumes
//! - [`inproc`]: in-process NA backend for loopback and tests
//! - [`rpc`]: public API and the progress/trigger engine (`Class`, `Context`)

pub mod buffer;
pub mod bulk;
mod completion;
pub mod error;
pub mod handle;
pub mod header;
pub mod inproc;
pub mod na;
pub mod registry;
pub mod rpc;
pub mod tag;

pub use buffer::MsgBuffer;
pub use bulk::{BulkClass, BulkContext, BulkHandle};
pub use error::{Error, ProtocolError, Result};
pub use handle::{CallState, Handle, HandleInfo, PayloadBuf, RpcCallback};
pub use header::{
    RequestFlags, RequestHeader, ResponseHeader, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};
pub use na::{NaAddr, NaClass, NaContext, NaError, NaResult, OpId, Tag};
pub use registry::{hash_name, RegisteredData, RpcId};
pub use rpc::{CallbackInfo, Class, Context, MAX_PROCESSING_BACKLOG};

/// Major version of the runtime.
pub const VERSION_MAJOR: u32 = 0;
/// Minor version of the runtime.
pub const VERSION_MINOR: u32 = 1;
/// Patch version of the runtime.
pub const VERSION_PATCH: u32 = 0;

/// Version triple of the runtime.
pub fn version() -> (u32, u32, u32) {
    (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
