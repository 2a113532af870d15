//! A single roster contact
//!
//! A contact carries its SIP addresses and phone numbers, a presence-model
//! cache keyed by URI-or-phone string, the policy for incoming
//! subscriptions, and the outbound/inbound subscription handles. Contacts
//! are shared through `Arc`: the owning list holds a strong reference while
//! the contact is a member, the contact holds only a `Weak` back-reference
//! to its list.
//!
//! While a contact is a list member, every key that resolves from its
//! address/phone set is mirrored into the list's address index; the
//! mutators here keep that in sync.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{ContactEvent, ObserverId, ObserverList};
use crate::list::ContactList;
use crate::sip::{NotifyOp, RosterContext};
use crate::subscription::SubscriptionController;
use crate::types::{ConsolidatedStatus, PresenceModel, SubscribePolicy};
use crate::uri::SipAddress;
use crate::{Result, RosterError, uri};

/// Expiry used for a contact that is not attached to a configured list
const DEFAULT_SUBSCRIBE_EXPIRES: u32 = 600;

struct ContactInner {
    primary_address: Option<SipAddress>,
    addresses: Vec<SipAddress>,
    phone_numbers: Vec<String>,
    /// Normalization cache: raw number -> resolved SIP URI (None when the
    /// dial plan could not resolve it)
    phone_uris: HashMap<String, Option<String>>,
    display_name: Option<String>,
    /// Presence cache. An entry holding `None` means "requested but not yet
    /// received", which is distinct from no entry at all.
    presence: HashMap<String, Option<PresenceModel>>,
    policy: SubscribePolicy,
    send_subscribe: bool,
    presence_received: bool,
    ref_key: Option<String>,
    owner: Weak<ContactList>,
    subscription: SubscriptionController,
    incoming: Vec<Arc<dyn NotifyOp>>,
}

/// A roster contact (see module docs)
pub struct Contact {
    id: Uuid,
    ctx: Arc<RosterContext>,
    inner: RwLock<ContactInner>,
    observers: ObserverList<ContactEvent>,
}

impl Contact {
    /// Create a standalone contact, not yet attached to any list
    pub fn new(ctx: Arc<RosterContext>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            ctx,
            inner: RwLock::new(ContactInner {
                primary_address: None,
                addresses: Vec::new(),
                phone_numbers: Vec::new(),
                phone_uris: HashMap::new(),
                display_name: None,
                presence: HashMap::new(),
                policy: SubscribePolicy::Accept,
                send_subscribe: true,
                presence_received: false,
                ref_key: None,
                owner: Weak::new(),
                subscription: SubscriptionController::new(),
                incoming: Vec::new(),
            }),
            observers: ObserverList::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn context(&self) -> &Arc<RosterContext> {
        &self.ctx
    }

    // ============ Addresses ============

    /// Set the primary SIP address, replacing any previous one
    ///
    /// The raw address is reduced to its canonical form (display name and
    /// instance parameters stripped). If the contact belongs to a list, the
    /// old key leaves the index before the new one is inserted.
    pub fn set_primary_address(self: &Arc<Self>, raw: &str) -> Result<()> {
        let addr = SipAddress::parse(raw)?;
        let canonical = addr.canonical_uri();

        let (old_key, owner) = {
            let mut inner = self.inner.write();
            let old_key = inner
                .primary_address
                .as_ref()
                .map(|a| a.uri.clone())
                .filter(|k| *k != canonical);
            if inner.display_name.is_none() {
                inner.display_name = addr.display_name.clone();
            }
            inner.primary_address = Some(SipAddress {
                display_name: addr.display_name,
                uri: canonical.clone(),
            });
            (old_key, inner.owner.upgrade())
        };

        if let Some(list) = owner {
            if let Some(old) = old_key {
                // An additional address or phone number may still resolve
                // the old key; the index entry stays until no identity does.
                if !self.resolvable_keys().contains(&old) {
                    list.index_erase(&old, self);
                }
            }
            list.index_insert(&canonical, self);
            self.persist();
        }
        Ok(())
    }

    pub fn primary_address(&self) -> Option<SipAddress> {
        self.inner.read().primary_address.clone()
    }

    /// Add an additional SIP address; the primary address is never
    /// overwritten by this
    pub fn add_address(self: &Arc<Self>, raw: &str) -> Result<()> {
        let addr = SipAddress::parse(raw)?;
        let canonical = addr.canonical_uri();

        let owner = {
            let mut inner = self.inner.write();
            if inner.addresses.iter().any(|a| a.uri == canonical) {
                return Ok(());
            }
            inner.addresses.push(SipAddress {
                display_name: addr.display_name,
                uri: canonical.clone(),
            });
            inner.owner.upgrade()
        };

        if let Some(list) = owner {
            list.index_insert(&canonical, self);
            self.persist();
        }
        Ok(())
    }

    /// Remove an additional SIP address; unknown addresses are a no-op
    pub fn remove_address(self: &Arc<Self>, raw: &str) -> Result<()> {
        let canonical = uri::canonical(raw)?;

        let (removed, owner) = {
            let mut inner = self.inner.write();
            let before = inner.addresses.len();
            inner.addresses.retain(|a| a.uri != canonical);
            (inner.addresses.len() != before, inner.owner.upgrade())
        };

        if removed {
            if let Some(list) = owner {
                // The primary address or a phone number may share this key;
                // only erase once no identity resolves it anymore.
                if !self.resolvable_keys().contains(&canonical) {
                    list.index_erase(&canonical, self);
                }
                self.persist();
            }
        }
        Ok(())
    }

    pub fn addresses(&self) -> Vec<SipAddress> {
        self.inner.read().addresses.clone()
    }

    // ============ Phone numbers ============

    /// Add a phone number, resolving it to a SIP URI through the dial plan
    ///
    /// The resolution is cached per number and refreshed by
    /// [`refresh_phone_uris`](Self::refresh_phone_uris) when the default
    /// account may have changed.
    pub fn add_phone_number(self: &Arc<Self>, number: &str) -> Result<()> {
        if number.is_empty() {
            return Err(RosterError::InvalidAddress("empty phone number".to_string()));
        }
        let resolved = self.normalize_phone(number);

        let owner = {
            let mut inner = self.inner.write();
            if inner.phone_numbers.iter().any(|p| p == number) {
                return Ok(());
            }
            inner.phone_numbers.push(number.to_string());
            inner.phone_uris.insert(number.to_string(), resolved.clone());
            inner.owner.upgrade()
        };

        if let Some(list) = owner {
            if let Some(key) = &resolved {
                list.index_insert(key, self);
            }
            self.persist();
        }
        Ok(())
    }

    /// Remove a phone number; unknown numbers are a no-op
    pub fn remove_phone_number(self: &Arc<Self>, number: &str) -> Result<()> {
        let (removed_uri, removed, owner) = {
            let mut inner = self.inner.write();
            let before = inner.phone_numbers.len();
            inner.phone_numbers.retain(|p| p != number);
            let removed = inner.phone_numbers.len() != before;
            let removed_uri = inner.phone_uris.remove(number).flatten();
            (removed_uri, removed, inner.owner.upgrade())
        };

        if removed {
            if let Some(list) = owner {
                if let Some(key) = removed_uri {
                    // A SIP address or another number may resolve to the
                    // same URI; the entry stays while any identity does.
                    if !self.resolvable_keys().contains(&key) {
                        list.index_erase(&key, self);
                    }
                }
                self.persist();
            }
        }
        Ok(())
    }

    pub fn phone_numbers(&self) -> Vec<String> {
        self.inner.read().phone_numbers.clone()
    }

    /// Recompute every cached phone-number resolution
    ///
    /// Normalization depends on the default account's dial plan, so the
    /// cache goes stale whenever that account changes. Index entries follow
    /// the recomputed URIs.
    pub fn refresh_phone_uris(self: &Arc<Self>) {
        let numbers = self.phone_numbers();
        for number in numbers {
            let fresh = self.normalize_phone(&number);
            let (stale, owner) = {
                let mut inner = self.inner.write();
                let stale = inner.phone_uris.insert(number.clone(), fresh.clone()).flatten();
                (stale, inner.owner.upgrade())
            };
            if stale == fresh {
                continue;
            }
            if let Some(list) = owner {
                if let Some(old) = stale {
                    if !self.resolvable_keys().contains(&old) {
                        list.index_erase(&old, self);
                    }
                }
                if let Some(new) = &fresh {
                    list.index_insert(new, self);
                }
            }
        }
    }

    fn normalize_phone(&self, number: &str) -> Option<String> {
        let account = self.ctx.accounts.default_account();
        self.ctx
            .phones
            .normalize(account.as_deref(), number)
    }

    /// The phone number whose resolved URI equals `uri`, if any
    pub(crate) fn phone_for_uri(&self, uri: &str) -> Option<String> {
        let inner = self.inner.read();
        inner
            .phone_numbers
            .iter()
            .find(|number| {
                inner.phone_uris.get(*number).and_then(|u| u.as_deref()) == Some(uri)
            })
            .cloned()
    }

    /// Every index key currently resolving from this contact
    pub(crate) fn resolvable_keys(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut keys = Vec::new();
        if let Some(addr) = &inner.primary_address {
            keys.push(addr.uri.clone());
        }
        keys.extend(inner.addresses.iter().map(|a| a.uri.clone()));
        keys.extend(inner.phone_uris.values().flatten().cloned());
        keys
    }

    /// Address an outbound subscription would target
    fn subscribe_address(&self) -> Option<String> {
        let inner = self.inner.read();
        inner
            .primary_address
            .as_ref()
            .map(|a| a.uri.clone())
            .or_else(|| inner.addresses.first().map(|a| a.uri.clone()))
    }

    // ============ Attributes ============

    pub fn display_name(&self) -> Option<String> {
        self.inner.read().display_name.clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.inner.write().display_name = name;
    }

    pub fn ref_key(&self) -> Option<String> {
        self.inner.read().ref_key.clone()
    }

    /// Set the external storage correlation key
    pub fn set_ref_key(self: &Arc<Self>, key: Option<String>) {
        let (old, owner) = {
            let mut inner = self.inner.write();
            let old = inner.ref_key.take();
            inner.ref_key = key.clone();
            (old, inner.owner.upgrade())
        };
        if let Some(list) = owner {
            if let Some(old) = old {
                list.ref_key_erase(&old, self);
            }
            if let Some(new) = key {
                list.ref_key_insert(&new, self);
            }
        }
    }

    pub fn subscribe_policy(&self) -> SubscribePolicy {
        self.inner.read().policy
    }

    pub fn set_subscribe_policy(&self, policy: SubscribePolicy) {
        self.inner.write().policy = policy;
    }

    pub fn send_subscribe(&self) -> bool {
        self.inner.read().send_subscribe
    }

    /// Whether this contact should be the target of an outgoing
    /// subscription; takes effect on the next `update_subscription`
    pub fn set_send_subscribe(&self, enabled: bool) {
        self.inner.write().send_subscribe = enabled;
    }

    pub fn outbound_subscription_active(&self) -> bool {
        self.inner.read().subscription.is_active()
    }

    pub(crate) fn set_outbound_active(&self, active: bool) {
        self.inner.write().subscription.set_active(active);
    }

    pub fn presence_received(&self) -> bool {
        self.inner.read().presence_received
    }

    // ============ Presence cache ============

    /// The winning presence model: explicit SIP addresses first (primary,
    /// then additional), phone numbers after, first non-null entry wins
    pub fn presence_model(&self) -> Option<PresenceModel> {
        let inner = self.inner.read();
        let address_keys = inner
            .primary_address
            .iter()
            .map(|a| a.uri.clone())
            .chain(inner.addresses.iter().map(|a| a.uri.clone()));
        for key in address_keys.chain(inner.phone_numbers.iter().cloned()) {
            if let Some(Some(model)) = inner.presence.get(&key) {
                return Some(model.clone());
            }
        }
        None
    }

    /// Cached model for one URI-or-phone key
    pub fn presence_model_for(&self, key: &str) -> Option<PresenceModel> {
        self.inner.read().presence.get(key).cloned().flatten()
    }

    /// Replace (or create) the cache entry for `key`
    ///
    /// A `None` model records that presence was requested but is not yet
    /// known, which is distinct from having no entry at all.
    pub fn set_presence_model_for(&self, key: &str, model: Option<PresenceModel>) {
        self.inner.write().presence.insert(key.to_string(), model);
    }

    /// Drop the entire presence cache (full-state resync)
    pub fn clear_presence_models(&self) {
        let mut inner = self.inner.write();
        inner.presence.clear();
        inner.presence_received = false;
    }

    /// Apply a received presence model and notify observers
    pub(crate) fn apply_presence(&self, key: &str, model: PresenceModel) {
        {
            let mut inner = self.inner.write();
            inner.presence.insert(key.to_string(), Some(model.clone()));
            inner.presence_received = true;
        }
        self.observers.notify(&ContactEvent::PresenceReceivedFor {
            key: key.to_string(),
            model: Some(model),
        });
        self.observers.notify(&ContactEvent::PresenceReceived);
    }

    /// Map the winning presence model to a consolidated status
    ///
    /// No cache entry at all means `Offline`; entries that are still
    /// awaiting their first document mean `Pending`.
    pub fn consolidated_status(&self) -> ConsolidatedStatus {
        if let Some(model) = self.presence_model() {
            return model.consolidated_status();
        }
        if self.inner.read().presence.is_empty() {
            ConsolidatedStatus::Offline
        } else {
            ConsolidatedStatus::Pending
        }
    }

    // ============ Subscriptions ============

    /// Drive the outbound subscription state machine
    ///
    /// Only meaningful when no aggregated list subscription covers this
    /// contact. A contact with no resolvable address cannot subscribe; the
    /// call degrades to a warning.
    pub fn update_subscription(self: &Arc<Self>, only_when_registered: bool) {
        let Some(target) = self.subscribe_address() else {
            warn!("contact {} has no address, skipping subscription update", self.id);
            return;
        };
        let expires = self
            .owner()
            .map(|list| list.config().subscribe_expires)
            .unwrap_or(DEFAULT_SUBSCRIBE_EXPIRES);

        if !self.send_subscribe() {
            let mut inner = self.inner.write();
            if inner.subscription.is_active() {
                debug!("stopping subscription toward {}", target);
                inner.subscription.stop();
            }
            return;
        }

        if only_when_registered && !self.ctx.is_registered_for(&target) {
            debug!("account for {} not registered, suspending subscription", target);
            self.inner.write().subscription.suspend();
            return;
        }

        let ctx = self.ctx.clone();
        let mut inner = self.inner.write();
        if inner.subscription.is_active() && inner.subscription.has_op() {
            return;
        }
        debug!("subscribing to {} (expires {}s)", target, expires);
        inner.subscription.start(ctx.sip.as_ref(), &target, expires);
    }

    /// Tear down the outbound subscription and reset cached presence to a
    /// synthetic "closed" status, notifying observers per key
    pub fn invalidate_subscription(&self) {
        let keys: Vec<String> = {
            let mut inner = self.inner.write();
            inner.subscription.invalidate();
            let keys: Vec<String> = inner.presence.keys().cloned().collect();
            for key in &keys {
                inner.presence.insert(key.clone(), Some(PresenceModel::closed()));
            }
            keys
        };
        for key in keys {
            self.observers.notify(&ContactEvent::PresenceReceivedFor {
                key,
                model: Some(PresenceModel::closed()),
            });
        }
        self.observers.notify(&ContactEvent::PresenceReceived);
    }

    /// Terminate the outbound subscription and every inbound one
    ///
    /// Inbound watchers get a final "closed" notify before their handles
    /// are released. Safe to call repeatedly.
    pub fn close_subscriptions(&self) {
        let incoming = {
            let mut inner = self.inner.write();
            if inner.subscription.is_active() {
                inner.subscription.stop();
            }
            inner.subscription.invalidate();
            std::mem::take(&mut inner.incoming)
        };
        for op in incoming {
            op.notify_presence_close();
            op.release();
        }
    }

    /// Retain an inbound subscription handle (a remote watcher)
    pub fn add_incoming_subscription(&self, op: Arc<dyn NotifyOp>) {
        self.inner.write().incoming.push(op);
    }

    /// Notify every inbound watcher of `model` (self-publish path)
    pub fn notify_incoming(&self, model: &PresenceModel) {
        let incoming: Vec<_> = self.inner.read().incoming.clone();
        for op in incoming {
            op.notify_presence(model);
        }
    }

    pub fn incoming_subscription_count(&self) -> usize {
        self.inner.read().incoming.len()
    }

    // ============ Ownership and observers ============

    /// The list this contact belongs to, if any
    pub fn owner(&self) -> Option<Arc<ContactList>> {
        self.inner.read().owner.upgrade()
    }

    pub(crate) fn is_owned(&self) -> bool {
        // A dangling weak also means unowned; strong_count on Weak covers
        // both the never-attached and the detached case.
        self.inner.read().owner.strong_count() > 0
    }

    pub(crate) fn set_owner(&self, owner: Weak<ContactList>) {
        self.inner.write().owner = owner;
    }

    /// Register a contact-level observer
    pub fn add_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ContactEvent) + Send + Sync + 'static,
    {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.observers.remove(id);
    }

    fn persist(&self) {
        if let Some(store) = &self.ctx.store {
            store.store_contact(self);
        }
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.id)
            .field("primary", &self.inner.read().primary_address)
            .finish()
    }
}
