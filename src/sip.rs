//! Collaborator interfaces
//!
//! The roster engine never talks SIP, parses vCards or stores rows itself.
//! It drives these traits, which the surrounding stack implements: the
//! dialog layer behind [`SipLayer`]/[`SubscribeOp`]/[`NotifyOp`], account
//! registration lookups behind [`AccountResolver`], dial-plan normalization
//! behind [`PhoneNumberNormalizer`], and persistence behind [`ContactStore`].
//!
//! Collaborators are bundled into a [`RosterContext`] that is passed
//! explicitly to every component that needs one; there is no ambient global
//! state in this crate.

use bytes::Bytes;
use std::sync::Arc;

use crate::contact::Contact;
use crate::list::ContactList;
use crate::types::{PresenceModel, RegistrationState};

/// Handle on one outbound SUBSCRIBE dialog
///
/// A released handle is unusable; the engine never calls a method on a
/// handle after [`SubscribeOp::release`].
pub trait SubscribeOp: Send + Sync {
    /// Stable identity of this operation, for logging and fork matching
    fn id(&self) -> u64;

    /// Send the initial SUBSCRIBE, or refresh the dialog if one exists
    fn subscribe(&self, expires: u32);

    /// Send an un-SUBSCRIBE (expires=0) terminating the remote state
    fn unsubscribe(&self);

    /// Stop periodic refresh without signaling the peer
    fn stop_refreshing(&self);

    /// Release the dialog; the handle must not be used afterwards
    fn release(&self);

    /// Whether this operation is a fork of `other`
    fn is_forked_of(&self, _other: &dyn SubscribeOp) -> bool {
        false
    }
}

/// Handle on one inbound subscription (a remote watcher)
pub trait NotifyOp: Send + Sync {
    /// Notify the watcher of a presence document
    fn notify_presence(&self, model: &PresenceModel);

    /// Notify the watcher that the subscription is over (final "closed")
    fn notify_presence_close(&self);

    /// Release the dialog; the handle must not be used afterwards
    fn release(&self);
}

/// Factory for outbound subscription dialogs
pub trait SipLayer: Send + Sync {
    /// Create a new outbound SUBSCRIBE operation toward `target_uri`
    ///
    /// `resource_list` carries the `application/resource-lists+xml` body for
    /// an aggregated (RFC 4662) subscription; `None` for a plain per-contact
    /// subscription or a bodyless server-side list.
    fn create_subscribe_op(&self, target_uri: &str, resource_list: Option<Bytes>)
    -> Arc<dyn SubscribeOp>;
}

/// A configured account, as far as subscription gating cares
pub trait Account: Send + Sync {
    fn registration_state(&self) -> RegistrationState;
}

/// Resolves which account covers a given address
pub trait AccountResolver: Send + Sync {
    /// The account whose identity or proxy matches `uri`, if any
    fn lookup_known_account(&self, uri: &str) -> Option<Arc<dyn Account>>;

    /// The default account, used when no specific match exists
    fn default_account(&self) -> Option<Arc<dyn Account>>;
}

/// Maps raw phone numbers to SIP URIs according to the account's dial plan
///
/// The result is deterministic for a given (account configuration, number)
/// pair, but depends on the account: cached results must be recomputed when
/// the default account may have changed.
pub trait PhoneNumberNormalizer: Send + Sync {
    fn normalize(&self, account: Option<&dyn Account>, raw_number: &str) -> Option<String>;
}

/// Builds the resource-list document sent with an aggregated SUBSCRIBE
///
/// The input is sorted with duplicates already collapsed by the caller.
pub trait ResourceListCodec: Send + Sync {
    fn build_resource_list(&self, uris: &[String]) -> Bytes;
}

/// Persistence collaborator (SQL/vCard store)
///
/// Calls are fire-and-forget: the in-memory model stays authoritative even
/// if a write fails, and failures are logged by the store itself.
pub trait ContactStore: Send + Sync {
    fn store_contact(&self, contact: &Contact);
    fn remove_contact(&self, contact: &Contact);
    fn store_list(&self, list: &ContactList);
}

/// Everything a contact or list needs from the surrounding stack
pub struct RosterContext {
    pub sip: Arc<dyn SipLayer>,
    pub accounts: Arc<dyn AccountResolver>,
    pub phones: Arc<dyn PhoneNumberNormalizer>,
    pub codec: Arc<dyn ResourceListCodec>,
    pub store: Option<Arc<dyn ContactStore>>,
}

impl RosterContext {
    /// The account gating subscriptions toward `uri`: a specific match if
    /// one exists, the default account otherwise
    pub fn account_for(&self, uri: &str) -> Option<Arc<dyn Account>> {
        self.accounts
            .lookup_known_account(uri)
            .or_else(|| self.accounts.default_account())
    }

    /// Whether the account covering `uri` is currently registered
    pub fn is_registered_for(&self, uri: &str) -> bool {
        self.account_for(uri)
            .map(|a| a.registration_state() == RegistrationState::Ok)
            .unwrap_or(false)
    }
}
