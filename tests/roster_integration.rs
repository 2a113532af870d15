//! Integration tests for the roster engine
//!
//! The SIP layer, account resolver, phone normalizer and resource-list
//! codec are replaced by recording mocks, so every test observes exactly
//! what the engine asked the surrounding stack to do.

use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use roster_core::{
    Account, AccountResolver, BasicStatus, ConsolidatedStatus, Contact, ContactList,
    IncomingSubscriptionDecision, ListEvent, NotifyOp, PhoneNumberNormalizer, PresenceModel,
    RegistrationState, ResourceListCodec, RosterConfig, RosterContext, SipLayer, SubscribeOp,
    SubscribePolicy,
};

// ============ Mock collaborators ============

struct MockOp {
    id: u64,
    target: String,
    body: Option<Bytes>,
    subscribes: Mutex<Vec<u32>>,
    unsubscribed: AtomicBool,
    refresh_stopped: AtomicBool,
    released: AtomicBool,
}

impl SubscribeOp for MockOp {
    fn id(&self) -> u64 {
        self.id
    }
    fn subscribe(&self, expires: u32) {
        self.subscribes.lock().unwrap().push(expires);
    }
    fn unsubscribe(&self) {
        self.unsubscribed.store(true, Ordering::SeqCst);
    }
    fn stop_refreshing(&self) {
        self.refresh_stopped.store(true, Ordering::SeqCst);
    }
    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockSip {
    next_id: AtomicU64,
    ops: Mutex<Vec<Arc<MockOp>>>,
}

impl MockSip {
    fn ops(&self) -> Vec<Arc<MockOp>> {
        self.ops.lock().unwrap().clone()
    }
}

impl SipLayer for MockSip {
    fn create_subscribe_op(
        &self,
        target_uri: &str,
        resource_list: Option<Bytes>,
    ) -> Arc<dyn SubscribeOp> {
        let op = Arc::new(MockOp {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            target: target_uri.to_string(),
            body: resource_list,
            subscribes: Mutex::new(Vec::new()),
            unsubscribed: AtomicBool::new(false),
            refresh_stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });
        self.ops.lock().unwrap().push(op.clone());
        op
    }
}

struct MockAccount {
    state: Mutex<RegistrationState>,
}

impl MockAccount {
    fn set_state(&self, state: RegistrationState) {
        *self.state.lock().unwrap() = state;
    }
}

impl Account for MockAccount {
    fn registration_state(&self) -> RegistrationState {
        *self.state.lock().unwrap()
    }
}

struct MockAccounts {
    account: Arc<MockAccount>,
}

impl AccountResolver for MockAccounts {
    fn lookup_known_account(&self, _uri: &str) -> Option<Arc<dyn Account>> {
        Some(self.account.clone())
    }
    fn default_account(&self) -> Option<Arc<dyn Account>> {
        Some(self.account.clone())
    }
}

/// Maps `+NNN` to `sip:NNN@sip.example.org;user=phone`
struct MockPhones;

impl PhoneNumberNormalizer for MockPhones {
    fn normalize(&self, _account: Option<&dyn Account>, raw_number: &str) -> Option<String> {
        let digits = raw_number.strip_prefix('+')?;
        Some(format!("sip:{}@sip.example.org;user=phone", digits))
    }
}

#[derive(Default)]
struct RecordingCodec {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingCodec {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResourceListCodec for RecordingCodec {
    fn build_resource_list(&self, uris: &[String]) -> Bytes {
        self.calls.lock().unwrap().push(uris.to_vec());
        Bytes::from(uris.join("\n"))
    }
}

struct MockNotify {
    notified: Mutex<Vec<PresenceModel>>,
    closed: AtomicBool,
    released: AtomicBool,
}

impl MockNotify {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            notified: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }
}

impl NotifyOp for MockNotify {
    fn notify_presence(&self, model: &PresenceModel) {
        self.notified.lock().unwrap().push(model.clone());
    }
    fn notify_presence_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct Fixture {
    ctx: Arc<RosterContext>,
    sip: Arc<MockSip>,
    account: Arc<MockAccount>,
    codec: Arc<RecordingCodec>,
}

fn fixture() -> Fixture {
    let sip = Arc::new(MockSip::default());
    let account = Arc::new(MockAccount {
        state: Mutex::new(RegistrationState::Ok),
    });
    let codec = Arc::new(RecordingCodec::default());
    let ctx = Arc::new(RosterContext {
        sip: sip.clone(),
        accounts: Arc::new(MockAccounts {
            account: account.clone(),
        }),
        phones: Arc::new(MockPhones),
        codec: codec.clone(),
        store: None,
    });
    Fixture {
        ctx,
        sip,
        account,
        codec,
    }
}

// ============ Notification body helpers ============

const BOUNDARY: &str = "rlmi-boundary";

fn content_type() -> String {
    format!(
        "multipart/related;type=\"application/rlmi+xml\";boundary={}",
        BOUNDARY
    )
}

fn pidf(entity: &str, basic: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<presence xmlns=\"urn:ietf:params:xml:ns:pidf\" entity=\"{}\">\n<tuple id=\"t1\"><status><basic>{}</basic></status></tuple>\n</presence>",
        entity, basic
    )
}

/// Build a multipart/related notification: one RLMI part plus PIDF parts
fn notification(
    version: u32,
    full_state: bool,
    resources: &[(&str, Option<&str>, Option<&str>)],
    pidfs: &[(&str, &str)],
) -> Bytes {
    let mut rlmi = String::new();
    rlmi.push_str("<?xml version=\"1.0\"?>\n");
    rlmi.push_str(&format!(
        "<list xmlns=\"urn:ietf:params:xml:ns:rlmi\" uri=\"sip:list@example.org\" version=\"{}\" fullState=\"{}\">\n",
        version, full_state
    ));
    for (uri, name, cid) in resources {
        rlmi.push_str(&format!("  <resource uri=\"{}\">\n", uri));
        if let Some(name) = name {
            rlmi.push_str(&format!("    <name>{}</name>\n", name));
        }
        if let Some(cid) = cid {
            rlmi.push_str(&format!(
                "    <instance id=\"1\" state=\"active\" cid=\"{}\"/>\n",
                cid
            ));
        }
        rlmi.push_str("  </resource>\n");
    }
    rlmi.push_str("</list>");

    let mut body = String::new();
    body.push_str(&format!("--{}\r\n", BOUNDARY));
    body.push_str("Content-Type: application/rlmi+xml; charset=\"UTF-8\"\r\n\r\n");
    body.push_str(&rlmi);
    for (cid, content) in pidfs {
        body.push_str(&format!("\r\n--{}\r\n", BOUNDARY));
        body.push_str("Content-Type: application/pidf+xml; charset=\"UTF-8\"\r\n");
        body.push_str(&format!("Content-Id: <{}>\r\n\r\n", cid));
        body.push_str(content);
    }
    body.push_str(&format!("\r\n--{}--\r\n", BOUNDARY));
    Bytes::from(body)
}

// ============ P1: index consistency ============

#[test]
fn index_tracks_address_and_phone_mutations() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();
    assert_eq!(list.find_contacts_by_uri("sip:alice@example.org").len(), 1);

    contact.add_address("sip:alice@work.example.org").unwrap();
    assert_eq!(list.find_contacts_by_uri("sip:alice@work.example.org").len(), 1);

    contact.add_phone_number("+1555").unwrap();
    assert_eq!(
        list.find_contacts_by_uri("sip:1555@sip.example.org;user=phone").len(),
        1
    );

    contact.remove_address("sip:alice@work.example.org").unwrap();
    assert!(list.find_contacts_by_uri("sip:alice@work.example.org").is_empty());

    contact.remove_phone_number("+1555").unwrap();
    assert!(
        list.find_contacts_by_uri("sip:1555@sip.example.org;user=phone")
            .is_empty()
    );

    // Replacing the primary address swaps the index key
    contact.set_primary_address("sip:alicia@example.org").unwrap();
    assert!(list.find_contacts_by_uri("sip:alice@example.org").is_empty());
    assert_eq!(list.find_contacts_by_uri("sip:alicia@example.org").len(), 1);
}

#[test]
fn key_shared_by_primary_and_additional_address_survives_removal() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();

    // The same URI as an additional address dedupes to one index entry
    contact.add_address("sip:alice@example.org").unwrap();
    contact.remove_address("sip:alice@example.org").unwrap();

    // The primary address still resolves the key
    assert_eq!(list.find_contacts_by_uri("sip:alice@example.org").len(), 1);

    // Once no identity resolves it, the entry goes
    contact.set_primary_address("sip:alicia@example.org").unwrap();
    assert!(list.find_contacts_by_uri("sip:alice@example.org").is_empty());
}

#[test]
fn key_shared_by_phone_and_address_survives_phone_removal() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:carol@example.org").unwrap();
    list.add_contact(&contact).unwrap();

    // An explicit address equal to what the dial plan resolves +1555 to
    contact
        .add_address("sip:1555@sip.example.org;user=phone")
        .unwrap();
    contact.add_phone_number("+1555").unwrap();

    contact.remove_phone_number("+1555").unwrap();
    assert_eq!(
        list.find_contacts_by_uri("sip:1555@sip.example.org;user=phone").len(),
        1
    );

    contact
        .remove_address("sip:1555@sip.example.org;user=phone")
        .unwrap();
    assert!(
        list.find_contacts_by_uri("sip:1555@sip.example.org;user=phone")
            .is_empty()
    );
}

// ============ P2: duplicate insert ============

#[test]
fn adding_same_contact_twice_is_rejected() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:bob@example.org").unwrap();

    assert!(list.add_contact(&contact).is_ok());
    assert!(list.add_contact(&contact).is_err());
    assert_eq!(list.find_contacts_by_uri("sip:bob@example.org").len(), 1);
    assert_eq!(list.contacts().len(), 1);
}

#[test]
fn contact_cannot_belong_to_two_lists() {
    let f = fixture();
    let first = ContactList::new(f.ctx.clone(), RosterConfig::default());
    let second = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:carol@example.org").unwrap();

    first.add_contact(&contact).unwrap();
    assert!(second.add_contact(&contact).is_err());

    // Removal makes it importable again
    first.remove_contact(&contact).unwrap();
    assert!(second.add_contact(&contact).is_ok());
}

#[test]
fn shared_ref_key_is_rejected() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let a = Contact::new(f.ctx.clone());
    a.set_primary_address("sip:a@example.org").unwrap();
    a.set_ref_key(Some("card-1".to_string()));
    list.add_contact(&a).unwrap();

    let b = Contact::new(f.ctx.clone());
    b.set_primary_address("sip:b@example.org").unwrap();
    b.set_ref_key(Some("card-1".to_string()));
    assert!(list.add_contact(&b).is_err());

    assert!(Arc::ptr_eq(
        &list.find_contact_by_ref_key("card-1").unwrap(),
        &a
    ));
}

// ============ P3: full-state reset ============

#[test]
fn full_state_notification_clears_stale_cache() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();
    contact.set_presence_model_for("sip:alice@example.org", Some(PresenceModel::open()));
    assert!(contact.presence_model().is_some());

    // Full state naming only bob: alice's stale entry must not survive
    let body = notification(
        1,
        true,
        &[("sip:bob@example.org", None, Some("cid-b"))],
        &[("cid-b", &pidf("pres:bob@example.org", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();

    assert!(contact.presence_model().is_none());
    assert_eq!(contact.consolidated_status(), ConsolidatedStatus::Offline);
}

// ============ P4: version monotonicity is advisory ============

#[test]
fn stale_version_is_applied_and_moves_expectation_backward() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();

    let first = notification(
        5,
        true,
        &[("sip:alice@example.org", None, Some("cid-1"))],
        &[("cid-1", &pidf("pres:alice@example.org", "open"))],
    );
    list.on_notification_received(&content_type(), &first).unwrap();
    assert_eq!(list.expected_notification_version(), 6);

    let second = notification(
        3,
        false,
        &[("sip:alice@example.org", None, Some("cid-2"))],
        &[("cid-2", &pidf("pres:alice@example.org", "closed"))],
    );
    list.on_notification_received(&content_type(), &second).unwrap();

    // The stale notification is applied, and the expectation tracks the
    // last applied version, not the maximum seen.
    assert_eq!(list.expected_notification_version(), 4);
    assert_eq!(
        contact
            .presence_model_for("sip:alice@example.org")
            .unwrap()
            .basic_status,
        BasicStatus::Closed
    );
}

#[test]
fn version_at_u32_max_saturates_the_expectation() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();

    let body = notification(
        u32::MAX,
        true,
        &[("sip:alice@example.org", None, Some("cid-1"))],
        &[("cid-1", &pidf("pres:alice@example.org", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();

    assert_eq!(list.expected_notification_version(), u32::MAX);
    assert_eq!(
        contact
            .presence_model_for("sip:alice@example.org")
            .unwrap()
            .basic_status,
        BasicStatus::Open
    );
}

// ============ P5: instance parameter stripping ============

#[test]
fn gr_parameter_resolves_to_same_contact() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();

    assert!(Arc::ptr_eq(
        &list
            .find_contact_by_uri("sip:alice@example.org;gr=urn:uuid:1234")
            .unwrap(),
        &contact
    ));

    let body = notification(
        1,
        true,
        &[("sip:alice@example.org;gr=urn:uuid:1234", None, Some("cid-1"))],
        &[("cid-1", &pidf("pres:alice@example.org", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();

    assert_eq!(
        contact
            .presence_model_for("sip:alice@example.org")
            .unwrap()
            .basic_status,
        BasicStatus::Open
    );
}

// ============ P6: subscription suspension ============

#[test]
fn registration_gating_suspends_and_resumes_per_contact_subscriptions() {
    let f = fixture();
    let config = RosterConfig {
        only_when_registered: true,
        ..Default::default()
    };
    let list = ContactList::new(f.ctx.clone(), config);

    f.account.set_state(RegistrationState::Cleared);

    let alice = Contact::new(f.ctx.clone());
    alice.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&alice).unwrap();
    let bob = Contact::new(f.ctx.clone());
    bob.set_primary_address("sip:bob@example.org").unwrap();
    list.add_contact(&bob).unwrap();

    list.update_subscriptions();
    assert!(!alice.outbound_subscription_active());
    assert!(!bob.outbound_subscription_active());
    assert!(f.sip.ops().is_empty());

    f.account.set_state(RegistrationState::Ok);
    list.update_subscriptions();

    assert!(alice.outbound_subscription_active());
    assert!(bob.outbound_subscription_active());
    let ops = f.sip.ops();
    assert_eq!(ops.len(), 2);
    for op in &ops {
        assert_eq!(*op.subscribes.lock().unwrap(), vec![600]);
        assert!(op.body.is_none());
    }

    // A contact opting out of subscriptions un-subscribes on next update
    bob.set_send_subscribe(false);
    list.update_subscriptions();
    assert!(!bob.outbound_subscription_active());
    assert!(alice.outbound_subscription_active());
}

// ============ Scenario A: duplicate URIs collapse in the resource list ====

#[test]
fn resource_list_input_collapses_duplicate_uris() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    for uri in ["sip:a@d", "sip:b@d", "sip:a@d"] {
        let contact = Contact::new(f.ctx.clone());
        contact.set_primary_address(uri).unwrap();
        list.add_contact(&contact).unwrap();
    }

    list.update_subscriptions();

    let calls = f.codec.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec!["sip:a@d".to_string(), "sip:b@d".to_string()]);

    let ops = f.sip.ops();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].target, "sip:rls@example.org");
    assert!(ops[0].body.is_some());
    for contact in list.contacts() {
        assert!(contact.outbound_subscription_active());
    }
}

#[test]
fn unchanged_resource_list_refreshes_without_new_dialog() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:a@d").unwrap();
    list.add_contact(&contact).unwrap();

    list.update_subscriptions();
    list.update_subscriptions();

    // Same logical body: the dialog is refreshed, not replaced
    let ops = f.sip.ops();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].subscribes.lock().unwrap().len(), 2);

    // Membership change replaces the dialog and resets version tracking
    let other = Contact::new(f.ctx.clone());
    other.set_primary_address("sip:b@d").unwrap();
    list.add_contact(&other).unwrap();
    list.update_subscriptions();

    let ops = f.sip.ops();
    assert_eq!(ops.len(), 2);
    assert!(ops[0].released.load(Ordering::SeqCst));
    assert_eq!(list.expected_notification_version(), 0);
}

// ============ Scenario B: bodyless auto-creation ============

#[test]
fn bodyless_list_auto_creates_unknown_contact() {
    let f = fixture();
    let config = RosterConfig {
        bodyless_subscription: true,
        ..Default::default()
    };
    let list = ContactList::new(f.ctx.clone(), config);
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let created: Arc<Mutex<Vec<Arc<Contact>>>> = Arc::new(Mutex::new(Vec::new()));
    let created2 = created.clone();
    list.add_observer(move |event| {
        if let ListEvent::ContactCreated { contact } = event {
            created2.lock().unwrap().push(contact.clone());
        }
    });

    let body = notification(
        1,
        true,
        &[("sip:unknown@d", Some("Newcomer"), Some("cid-u"))],
        &[("cid-u", &pidf("pres:unknown@d", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();

    let contact = list.find_contact_by_uri("sip:unknown@d").expect("auto-created");
    assert_eq!(contact.display_name().as_deref(), Some("Newcomer"));
    assert_eq!(
        contact.presence_model_for("sip:unknown@d").unwrap().basic_status,
        BasicStatus::Open
    );
    // Server-sourced contacts are not queued for upstream sync
    assert_eq!(list.dirty_count(), 0);
    assert_eq!(created.lock().unwrap().len(), 1);
}

#[test]
fn non_bodyless_list_ignores_unknown_uri() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let body = notification(
        1,
        true,
        &[("sip:unknown@d", None, Some("cid-u"))],
        &[("cid-u", &pidf("pres:unknown@d", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();

    assert!(list.find_contact_by_uri("sip:unknown@d").is_none());
    assert!(list.contacts().is_empty());
}

// ============ Scenario C: phone-keyed presence ============

#[test]
fn presence_for_phone_derived_uri_is_keyed_by_phone_number() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:carol@example.org").unwrap();
    contact.add_phone_number("+1555").unwrap();
    list.add_contact(&contact).unwrap();

    let body = notification(
        1,
        true,
        &[("sip:1555@sip.example.org;user=phone", None, Some("cid-p"))],
        &[("cid-p", &pidf("pres:1555@sip.example.org", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();

    assert_eq!(
        contact.presence_model_for("+1555").unwrap().basic_status,
        BasicStatus::Open
    );
    assert!(
        contact
            .presence_model_for("sip:1555@sip.example.org;user=phone")
            .is_none()
    );
    assert!(contact.presence_received());
}

// ============ Dispatch side effects ============

#[test]
fn list_observers_get_the_affected_batch() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let alice = Contact::new(f.ctx.clone());
    alice.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&alice).unwrap();

    let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let batches2 = batches.clone();
    list.add_observer(move |event| {
        if let ListEvent::PresenceReceived { contacts } = event {
            batches2.lock().unwrap().push(contacts.len());
        }
    });

    let body = notification(
        1,
        true,
        &[("sip:alice@example.org", None, Some("cid-1"))],
        &[("cid-1", &pidf("pres:alice@example.org", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();

    assert_eq!(*batches.lock().unwrap(), vec![1]);
}

#[test]
fn malformed_body_mutates_nothing() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();
    contact.set_presence_model_for("sip:alice@example.org", Some(PresenceModel::open()));

    let err = list.on_notification_received("text/plain", &Bytes::from_static(b"hello"));
    assert!(err.is_err());
    assert!(contact.presence_model().is_some());
    assert_eq!(list.expected_notification_version(), 0);
}

// ============ Invalidation and teardown ============

#[test]
fn invalidate_resets_presence_to_closed_and_version_to_zero() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());
    list.set_rls_address(Some("sip:rls@example.org")).unwrap();

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();
    list.update_subscriptions();

    let body = notification(
        7,
        true,
        &[("sip:alice@example.org", None, Some("cid-1"))],
        &[("cid-1", &pidf("pres:alice@example.org", "open"))],
    );
    list.on_notification_received(&content_type(), &body).unwrap();
    assert_eq!(list.expected_notification_version(), 8);

    list.invalidate_subscriptions();

    assert_eq!(list.expected_notification_version(), 0);
    assert!(!contact.outbound_subscription_active());
    assert_eq!(
        contact
            .presence_model_for("sip:alice@example.org")
            .unwrap()
            .basic_status,
        BasicStatus::Closed
    );
    assert!(f.sip.ops()[0].released.load(Ordering::SeqCst));
}

#[test]
fn disabling_subscriptions_closes_everything_and_reenabling_resubscribes() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:alice@example.org").unwrap();
    list.add_contact(&contact).unwrap();
    assert!(contact.outbound_subscription_active());

    list.enable_subscriptions(false);
    assert!(!contact.outbound_subscription_active());
    assert!(f.sip.ops()[0].released.load(Ordering::SeqCst));

    // Disabled lists skip subscription updates entirely
    list.update_subscriptions();
    assert_eq!(f.sip.ops().len(), 1);

    list.enable_subscriptions(true);
    assert_eq!(f.sip.ops().len(), 2);
    assert!(contact.outbound_subscription_active());
}

// ============ Incoming subscriptions ============

#[test]
fn incoming_subscription_follows_contact_policy() {
    let f = fixture();
    let list = ContactList::new(f.ctx.clone(), RosterConfig::default());

    let contact = Contact::new(f.ctx.clone());
    contact.set_primary_address("sip:watcher@example.org").unwrap();
    list.add_contact(&contact).unwrap();

    let accepted = MockNotify::new();
    contact.set_subscribe_policy(SubscribePolicy::Accept);
    assert_eq!(
        list.handle_incoming_subscription("sip:watcher@example.org", accepted.clone()),
        IncomingSubscriptionDecision::Accepted
    );
    assert_eq!(contact.incoming_subscription_count(), 1);

    contact.notify_incoming(&PresenceModel::open());
    assert_eq!(accepted.notified.lock().unwrap().len(), 1);

    let denied = MockNotify::new();
    contact.set_subscribe_policy(SubscribePolicy::Deny);
    assert_eq!(
        list.handle_incoming_subscription("sip:watcher@example.org", denied.clone()),
        IncomingSubscriptionDecision::Denied
    );
    assert!(denied.closed.load(Ordering::SeqCst));
    assert!(denied.released.load(Ordering::SeqCst));

    let unknown = MockNotify::new();
    assert_eq!(
        list.handle_incoming_subscription("sip:stranger@example.org", unknown),
        IncomingSubscriptionDecision::Unknown
    );

    // Removal closes the retained inbound handle with a final notify
    list.remove_contact(&contact).unwrap();
    assert!(accepted.closed.load(Ordering::SeqCst));
    assert!(accepted.released.load(Ordering::SeqCst));
    assert_eq!(contact.incoming_subscription_count(), 0);
}
