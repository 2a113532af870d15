//! # Roster Core
//!
//! A contact roster and presence subscription engine for SIP SIMPLE.
//!
//! This crate provides:
//! - Contact records with addresses, phone numbers and a presence cache
//! - A sorted address index mapping canonical URIs to contacts
//! - Per-contact outbound SUBSCRIBE state machines (RFC 3856)
//! - Aggregated resource-list subscriptions against an RLS (RFC 4662)
//! - RLMI multipart notification decoding with PIDF presence parsing
//!
//! The engine is single-threaded and event-driven: all mutation happens on
//! the SIP event-processing thread, operations are synchronous, and the
//! surrounding stack is reached only through the collaborator traits in
//! [`sip`]. No error raised here ever aborts the host process; protocol
//! anomalies degrade to logged warnings with best-effort processing.

pub mod contact;
pub mod error;
pub mod events;
pub mod index;
pub mod list;
pub mod pidf;
pub mod rlmi;
pub mod sip;
pub mod subscription;
pub mod types;
pub mod uri;

// Re-exports for convenience
pub use contact::Contact;
pub use error::{Result, RosterError};
pub use events::{ContactEvent, ListEvent, ObserverId, ObserverList};
pub use index::AddressIndex;
pub use list::ContactList;
pub use rlmi::{DecodedNotification, XmlResourceListCodec};
pub use sip::{
    Account, AccountResolver, ContactStore, NotifyOp, PhoneNumberNormalizer, ResourceListCodec,
    RosterContext, SipLayer, SubscribeOp,
};
pub use subscription::SubscriptionController;
pub use types::{
    BasicStatus, ConsolidatedStatus, IncomingSubscriptionDecision, PresenceActivity,
    PresenceModel, RegistrationState, RosterConfig, SubscribePolicy,
};
pub use uri::SipAddress;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
