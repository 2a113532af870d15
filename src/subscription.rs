//! Outbound subscription control for a single contact
//!
//! Used only when no aggregated list subscription covers the contact: one
//! controller drives one outbound SUBSCRIBE dialog.

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::sip::{SipLayer, SubscribeOp};

/// Per-contact outbound subscription state
///
/// States map directly onto (`op`, `active`): no handle means no
/// subscription, a handle with `active == false` is either stopped or
/// suspended by registration gating.
pub struct SubscriptionController {
    op: Option<Arc<dyn SubscribeOp>>,
    active: bool,
}

impl SubscriptionController {
    pub fn new() -> Self {
        Self {
            op: None,
            active: false,
        }
    }

    /// Open a fresh dialog toward `target` and send SUBSCRIBE
    ///
    /// Any prior handle is released first; a (re)subscribe attempt always
    /// gets a clean dialog rather than reusing an old one.
    pub fn start(&mut self, sip: &dyn SipLayer, target: &str, expires: u32) {
        if let Some(old) = self.op.take() {
            debug!("replacing subscription op {} toward {}", old.id(), target);
            old.release();
        }
        let op = sip.create_subscribe_op(target, None);
        op.subscribe(expires);
        self.op = Some(op);
        self.active = true;
    }

    /// Send un-SUBSCRIBE and stop being active
    ///
    /// The handle is kept until [`invalidate`](Self::invalidate); only the
    /// refresh is over.
    pub fn stop(&mut self) {
        if let Some(op) = &self.op {
            op.unsubscribe();
        }
        self.active = false;
    }

    /// Stop periodic refresh without signaling the peer
    ///
    /// Used when registration gating suspends the subscription.
    pub fn suspend(&mut self) {
        if let Some(op) = &self.op {
            op.stop_refreshing();
        }
        self.active = false;
    }

    /// Release the handle entirely; safe to call repeatedly
    pub fn invalidate(&mut self) {
        if let Some(op) = self.op.take() {
            op.release();
        }
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn has_op(&self) -> bool {
        self.op.is_some()
    }
}

impl Default for SubscriptionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated (RFC 4662) subscription state owned by a contact list
pub(crate) struct ListSubscription {
    pub op: Option<Arc<dyn SubscribeOp>>,
    /// SHA-256 of the last resource-list body actually sent; a rebuild that
    /// hashes identically refreshes the dialog instead of replacing it
    pub body_hash: Option<[u8; 32]>,
    pub expected_version: u32,
    pub enabled: bool,
}

impl ListSubscription {
    pub fn new() -> Self {
        Self {
            op: None,
            body_hash: None,
            expected_version: 0,
            enabled: true,
        }
    }

    /// Terminate the aggregated dialog, forgetting the body hash and
    /// resetting version tracking for the next dialog
    pub fn terminate(&mut self) {
        if let Some(op) = self.op.take() {
            op.release();
        }
        self.body_hash = None;
        self.expected_version = 0;
    }

    /// Replace the dialog with a fresh one carrying `body`
    pub fn replace(
        &mut self,
        sip: &dyn SipLayer,
        target: &str,
        body: Option<Bytes>,
        hash: [u8; 32],
        expires: u32,
    ) {
        self.terminate();
        let op = sip.create_subscribe_op(target, body);
        op.subscribe(expires);
        self.op = Some(op);
        self.body_hash = Some(hash);
    }
}
