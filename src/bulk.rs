//! Lifecycle surface of the bulk-transfer subsystem.
//!
//! Large payloads move through one-sided transfers negotiated out of band;
//! that engine lives outside this crate. The core only anchors ownership so
//! that init/finalize order matches the NA lifetime, and carries the opaque
//! descriptor id inside the request header.

use std::sync::Arc;

use crate::error::Result;
use crate::na::{NaClass, NaContext};

/// Opaque descriptor id of a registered bulk region, carried in the request
/// header (0 is reserved for "none").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkHandle(pub u64);

/// Process-level anchor of the bulk subsystem.
pub struct BulkClass {
    na_class: Arc<dyn NaClass>,
    na_context: Arc<dyn NaContext>,
}

impl BulkClass {
    /// Bind the bulk subsystem to the NA it transfers over.
    pub fn init(na_class: Arc<dyn NaClass>, na_context: Arc<dyn NaContext>) -> Result<Self> {
        Ok(Self {
            na_class,
            na_context,
        })
    }

    /// NA this subsystem transfers over.
    pub fn na_class(&self) -> &Arc<dyn NaClass> {
        &self.na_class
    }

    /// Create a per-context workspace for internal transfers.
    pub fn context_create(&self) -> Result<BulkContext> {
        Ok(BulkContext {
            na_context: self.na_context.clone(),
        })
    }
}

/// Per-context workspace of the bulk subsystem.
pub struct BulkContext {
    na_context: Arc<dyn NaContext>,
}

impl BulkContext {
    /// NA context transfers are posted on.
    pub fn na_context(&self) -> &Arc<dyn NaContext> {
        &self.na_context
    }
}
