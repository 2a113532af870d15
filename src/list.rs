//! Contact list orchestration
//!
//! A [`ContactList`] owns an ordered collection of contacts, the address
//! and ref-key indices, and — when a Resource List Server address is
//! configured — the single aggregated subscription covering every member
//! (RFC 4662). It dispatches decoded notifications to the right contacts
//! and tracks which contacts an external synchronizer still has to push
//! upstream.

use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::contact::Contact;
use crate::events::{ListEvent, ObserverId, ObserverList};
use crate::index::AddressIndex;
use crate::rlmi;
use crate::sip::{NotifyOp, RosterContext};
use crate::subscription::ListSubscription;
use crate::types::{IncomingSubscriptionDecision, PresenceModel, RosterConfig};
use crate::{Result, RosterError, uri};

/// The orchestration core (see module docs)
pub struct ContactList {
    ctx: Arc<RosterContext>,
    config: RosterConfig,
    contacts: RwLock<Vec<Arc<Contact>>>,
    index: RwLock<AddressIndex<Contact>>,
    ref_keys: RwLock<AddressIndex<Contact>>,
    rls_address: RwLock<Option<String>>,
    sub: RwLock<ListSubscription>,
    dirty: RwLock<Vec<Arc<Contact>>>,
    observers: ObserverList<ListEvent>,
}

impl ContactList {
    /// Create an empty list
    pub fn new(ctx: Arc<RosterContext>, config: RosterConfig) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            config,
            contacts: RwLock::new(Vec::new()),
            index: RwLock::new(AddressIndex::new()),
            ref_keys: RwLock::new(AddressIndex::new()),
            rls_address: RwLock::new(None),
            sub: RwLock::new(ListSubscription::new()),
            dirty: RwLock::new(Vec::new()),
            observers: ObserverList::new(),
        })
    }

    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    /// Configure the Resource List Server address; `None` reverts to
    /// per-contact subscriptions
    pub fn set_rls_address(&self, raw: Option<&str>) -> Result<()> {
        let canonical = match raw {
            Some(raw) => Some(uri::canonical(raw)?),
            None => None,
        };
        *self.rls_address.write() = canonical;
        Ok(())
    }

    pub fn rls_address(&self) -> Option<String> {
        self.rls_address.read().clone()
    }

    // ============ Membership ============

    /// Members in order, most recently imported first
    pub fn contacts(&self) -> Vec<Arc<Contact>> {
        self.contacts.read().clone()
    }

    /// First contact registered under the canonical form of `raw`
    pub fn find_contact_by_uri(&self, raw: &str) -> Option<Arc<Contact>> {
        let key = uri::canonical(raw).ok()?;
        self.index.read().find_first(&key)
    }

    /// Every contact registered under the canonical form of `raw`
    pub fn find_contacts_by_uri(&self, raw: &str) -> Vec<Arc<Contact>> {
        match uri::canonical(raw) {
            Ok(key) => self.index.read().find_all(&key),
            Err(_) => Vec::new(),
        }
    }

    pub fn find_contact_by_ref_key(&self, key: &str) -> Option<Arc<Contact>> {
        self.ref_keys.read().find_first(key)
    }

    /// Attach a contact to this list
    ///
    /// Fails if the contact already belongs to a list (reparenting requires
    /// explicit removal first). Every resolvable URI/phone-derived key and
    /// the ref key enter the indices. With `mark_dirty`, the contact joins
    /// the set an external synchronizer still has to push upstream.
    pub fn import_contact(self: &Arc<Self>, contact: &Arc<Contact>, mark_dirty: bool) -> Result<()> {
        if contact.is_owned() {
            return Err(RosterError::InvalidContact(
                "contact already belongs to a list".to_string(),
            ));
        }
        contact.set_owner(Arc::downgrade(self));
        self.contacts.write().insert(0, contact.clone());

        {
            let mut index = self.index.write();
            for key in contact.resolvable_keys() {
                index.insert_if_absent(&key, contact);
            }
        }
        if let Some(ref_key) = contact.ref_key() {
            self.ref_keys.write().insert_if_absent(&ref_key, contact);
        }
        if mark_dirty {
            self.mark_dirty(contact);
        }

        if let Some(store) = &self.ctx.store {
            store.store_contact(contact);
            store.store_list(self);
        }
        Ok(())
    }

    /// Add a contact, rejecting duplicates, and subscribe immediately when
    /// no aggregated subscription is configured
    pub fn add_contact(self: &Arc<Self>, contact: &Arc<Contact>) -> Result<()> {
        if self
            .contacts
            .read()
            .iter()
            .any(|c| Arc::ptr_eq(c, contact))
        {
            return Err(RosterError::InvalidContact(
                "contact is already present in this list".to_string(),
            ));
        }
        if let Some(ref_key) = contact.ref_key() {
            if self.ref_keys.read().find_first(&ref_key).is_some() {
                return Err(RosterError::InvalidContact(format!(
                    "a contact with ref key '{}' is already present",
                    ref_key
                )));
            }
        }
        self.import_contact(contact, true)?;

        if self.rls_address().is_none() && self.subscriptions_enabled() {
            contact.update_subscription(self.config.only_when_registered);
        }
        Ok(())
    }

    /// Detach a contact: indices cleaned, subscriptions closed, strong
    /// reference released
    pub fn remove_contact(&self, contact: &Arc<Contact>) -> Result<()> {
        let position = self
            .contacts
            .read()
            .iter()
            .position(|c| Arc::ptr_eq(c, contact));
        let Some(position) = position else {
            return Err(RosterError::ContactNotFound(format!("{:?}", contact)));
        };

        contact.close_subscriptions();

        {
            let mut index = self.index.write();
            for key in contact.resolvable_keys() {
                index.erase_exact(&key, contact);
            }
        }
        if let Some(ref_key) = contact.ref_key() {
            self.ref_keys.write().erase_exact(&ref_key, contact);
        }

        contact.set_owner(std::sync::Weak::new());
        self.contacts.write().remove(position);
        self.dirty.write().retain(|c| !Arc::ptr_eq(c, contact));

        if let Some(store) = &self.ctx.store {
            store.remove_contact(contact);
            store.store_list(self);
        }
        Ok(())
    }

    // ============ Index maintenance (called by contact mutators) ============

    pub(crate) fn index_insert(&self, key: &str, contact: &Arc<Contact>) {
        self.index.write().insert_if_absent(key, contact);
    }

    pub(crate) fn index_erase(&self, key: &str, contact: &Arc<Contact>) {
        self.index.write().erase_exact(key, contact);
    }

    pub(crate) fn ref_key_insert(&self, key: &str, contact: &Arc<Contact>) {
        self.ref_keys.write().insert_if_absent(key, contact);
    }

    pub(crate) fn ref_key_erase(&self, key: &str, contact: &Arc<Contact>) {
        self.ref_keys.write().erase_exact(key, contact);
    }

    // ============ Dirty tracking ============

    fn mark_dirty(&self, contact: &Arc<Contact>) {
        let mut dirty = self.dirty.write();
        if !dirty.iter().any(|c| Arc::ptr_eq(c, contact)) {
            dirty.push(contact.clone());
        }
    }

    /// Drain the contacts pending an external synchronization push
    pub fn take_dirty(&self) -> Vec<Arc<Contact>> {
        std::mem::take(&mut *self.dirty.write())
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.read().len()
    }

    // ============ Subscription lifecycle ============

    pub fn subscriptions_enabled(&self) -> bool {
        self.sub.read().enabled
    }

    /// Administratively enable or disable subscriptions; edge-triggered
    ///
    /// Turning them on (re)subscribes, turning them off closes the
    /// aggregated dialog and every contact's subscriptions, inbound ones
    /// included.
    pub fn enable_subscriptions(&self, enabled: bool) {
        let previous = {
            let mut sub = self.sub.write();
            let previous = sub.enabled;
            sub.enabled = enabled;
            previous
        };
        if previous == enabled {
            return;
        }
        if enabled {
            info!("subscriptions enabled, resubscribing");
            self.update_subscriptions();
        } else {
            info!("subscriptions disabled, closing all");
            self.sub.write().terminate();
            for contact in self.contacts() {
                contact.close_subscriptions();
                contact.set_outbound_active(false);
            }
        }
    }

    /// (Re)compute outbound subscriptions to match current state
    ///
    /// With an RLS address configured this maintains the one aggregated
    /// dialog: gated on registration like the per-contact case, refreshed
    /// without a body when the resource list is logically unchanged (hash
    /// short-circuit), replaced otherwise. Without one, each contact drives
    /// its own state machine.
    pub fn update_subscriptions(&self) {
        if !self.subscriptions_enabled() {
            debug!("subscriptions administratively disabled, skipping update");
            return;
        }

        let Some(target) = self.rls_address() else {
            for contact in self.contacts() {
                contact.update_subscription(self.config.only_when_registered);
            }
            return;
        };

        if self.config.only_when_registered && !self.ctx.is_registered_for(&target) {
            debug!("account for {} not registered, terminating aggregated dialog", target);
            self.sub.write().terminate();
            for contact in self.contacts() {
                contact.set_outbound_active(false);
            }
            return;
        }

        let body = if self.config.bodyless_subscription {
            None
        } else {
            let keys = self.index.read().sorted_keys();
            Some(self.ctx.codec.build_resource_list(&keys))
        };
        let hash: [u8; 32] = {
            let mut hasher = Sha256::new();
            if let Some(body) = &body {
                hasher.update(body);
            }
            hasher.finalize().into()
        };

        {
            let mut sub = self.sub.write();
            if sub.op.is_some() && sub.body_hash == Some(hash) {
                debug!("resource list unchanged, refreshing aggregated dialog");
                if let Some(op) = &sub.op {
                    op.subscribe(self.config.subscribe_expires);
                }
            } else {
                debug!("subscribing to resource list server {}", target);
                sub.expected_version = 0;
                sub.replace(
                    self.ctx.sip.as_ref(),
                    &target,
                    body,
                    hash,
                    self.config.subscribe_expires,
                );
            }
        }
        for contact in self.contacts() {
            contact.set_outbound_active(true);
        }
    }

    /// Terminate the aggregated dialog and invalidate every contact's
    /// subscription and cached presence; always safe to call
    pub fn invalidate_subscriptions(&self) {
        self.sub.write().terminate();
        for contact in self.contacts() {
            contact.invalidate_subscription();
        }
    }

    /// Version the next notification of the aggregated dialog is expected
    /// to carry
    pub fn expected_notification_version(&self) -> u32 {
        self.sub.read().expected_version
    }

    // ============ Notification dispatch ============

    /// Apply one inbound aggregated notification
    ///
    /// Structural failures (not multipart/related, missing mandatory RLMI
    /// attributes) return early without mutating any state. Everything else
    /// is applied best-effort: name association first, then presence, so a
    /// resource auto-created while unnamed still picks up its display name
    /// from the same notification.
    pub fn on_notification_received(self: &Arc<Self>, content_type: &str, body: &Bytes) -> Result<()> {
        let expected = self.sub.read().expected_version;
        let decoded = match rlmi::decode(content_type, body, expected) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("dropping undecodable notification: {}", err);
                return Err(err);
            }
        };

        if decoded.full_state {
            // Full resync: no stale entry may survive.
            for contact in self.contacts() {
                contact.clear_presence_models();
            }
        }
        // A peer sitting at u32::MAX must not take the engine down with it.
        self.sub.write().expected_version = decoded.version.saturating_add(1);

        for (raw_uri, name) in &decoded.names {
            let key = uri::strip_instance_param(raw_uri);
            let mut matched = self.index.read().find_all(&key);
            if matched.is_empty() && self.config.bodyless_subscription {
                if let Some(contact) = self.auto_create_contact(&key) {
                    matched.push(contact);
                }
            }
            if let Some(name) = name {
                for contact in &matched {
                    contact.set_display_name(Some(name.clone()));
                }
            }
        }

        let mut affected: Vec<Arc<Contact>> = Vec::new();
        for (raw_uri, model, content_id) in &decoded.presences {
            let Some(model) = model else {
                debug!("no presence part resolved for {} (cid {})", raw_uri, content_id);
                continue;
            };
            let key = uri::strip_instance_param(raw_uri);
            let mut matched = self.index.read().find_all(&key);
            if matched.is_empty() {
                if self.config.bodyless_subscription {
                    if let Some(contact) = self.auto_create_contact(&key) {
                        matched.push(contact);
                    }
                } else {
                    warn!("notification for unknown uri {}, ignoring", key);
                    continue;
                }
            }
            for contact in matched {
                // Presence received for a URI a phone number resolves to is
                // cached under the phone number, so later lookups by number
                // succeed.
                let cache_key = contact
                    .phone_for_uri(&key)
                    .unwrap_or_else(|| key.clone());
                contact.apply_presence(&cache_key, model.clone());
                if !affected.iter().any(|c| Arc::ptr_eq(c, &contact)) {
                    affected.push(contact);
                }
            }
        }

        if !affected.is_empty() {
            self.observers
                .notify(&ListEvent::PresenceReceived { contacts: affected });
        }
        Ok(())
    }

    /// Create and import a contact for a URI the server notified but the
    /// list does not know (bodyless subscriptions only)
    ///
    /// The server is the authoritative source here, so the contact is not
    /// marked dirty for upstream sync.
    fn auto_create_contact(self: &Arc<Self>, canonical_uri: &str) -> Option<Arc<Contact>> {
        let contact = Contact::new(self.ctx.clone());
        if let Err(err) = contact.set_primary_address(canonical_uri) {
            warn!("cannot auto-create contact for '{}': {}", canonical_uri, err);
            return None;
        }
        if let Err(err) = self.import_contact(&contact, false) {
            warn!("cannot import auto-created contact '{}': {}", canonical_uri, err);
            return None;
        }
        info!("auto-created contact for {}", canonical_uri);
        self.observers.notify(&ListEvent::ContactCreated {
            contact: contact.clone(),
        });
        Some(contact)
    }

    // ============ Incoming subscriptions ============

    /// Apply a contact's policy to an incoming subscription request
    pub fn handle_incoming_subscription(
        &self,
        from_uri: &str,
        op: Arc<dyn NotifyOp>,
    ) -> IncomingSubscriptionDecision {
        let Ok(key) = uri::canonical(from_uri) else {
            return IncomingSubscriptionDecision::Unknown;
        };
        let Some(contact) = self.index.read().find_first(&key) else {
            debug!("incoming subscription from unknown watcher {}", key);
            return IncomingSubscriptionDecision::Unknown;
        };
        match contact.subscribe_policy() {
            crate::types::SubscribePolicy::Accept => {
                contact.add_incoming_subscription(op);
                IncomingSubscriptionDecision::Accepted
            }
            crate::types::SubscribePolicy::Deny => {
                op.notify_presence_close();
                op.release();
                IncomingSubscriptionDecision::Denied
            }
            crate::types::SubscribePolicy::Wait => {
                contact.add_incoming_subscription(op);
                IncomingSubscriptionDecision::Pending
            }
        }
    }

    /// Push `model` to every inbound watcher of every member (self-publish)
    pub fn notify_all_watchers(&self, model: &PresenceModel) {
        for contact in self.contacts() {
            contact.notify_incoming(model);
        }
    }

    // ============ Observers ============

    pub fn add_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ListEvent) + Send + Sync + 'static,
    {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.observers.remove(id);
    }
}

impl Drop for ContactList {
    fn drop(&mut self) {
        self.sub.write().terminate();
        for contact in self.contacts.read().iter() {
            contact.close_subscriptions();
        }
    }
}
