//! Core types for the contact roster and presence engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

// ============ Presence Types ============

/// Basic presence status values as defined in RFC 3863
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicStatus {
    /// The principal is available for communication
    Open,
    /// The principal is not available for communication
    Closed,
}

impl fmt::Display for BasicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasicStatus::Open => write!(f, "open"),
            BasicStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Activity element from the RPID extension (RFC 4480)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceActivity {
    Appointment,
    Away,
    Breakfast,
    Busy,
    Dinner,
    DoNotDisturb,
    Holiday,
    InTransit,
    Lunch,
    Meal,
    Meeting,
    OnThePhone,
    PermanentAbsence,
    Sleeping,
    Steering,
    Travel,
    Vacation,
    Working,
    Worship,
    /// An activity token this implementation does not map
    Other(String),
}

impl PresenceActivity {
    /// Map an RPID activity token to an activity value
    pub fn from_token(token: &str) -> Self {
        match token {
            "appointment" => PresenceActivity::Appointment,
            "away" => PresenceActivity::Away,
            "breakfast" => PresenceActivity::Breakfast,
            "busy" => PresenceActivity::Busy,
            "dinner" => PresenceActivity::Dinner,
            "do-not-disturb" => PresenceActivity::DoNotDisturb,
            "holiday" => PresenceActivity::Holiday,
            "in-transit" => PresenceActivity::InTransit,
            "lunch" => PresenceActivity::Lunch,
            "meal" => PresenceActivity::Meal,
            "meeting" => PresenceActivity::Meeting,
            "on-the-phone" => PresenceActivity::OnThePhone,
            "permanent-absence" => PresenceActivity::PermanentAbsence,
            "sleep" => PresenceActivity::Sleeping,
            "steering" => PresenceActivity::Steering,
            "travel" => PresenceActivity::Travel,
            "vacation" => PresenceActivity::Vacation,
            "working" => PresenceActivity::Working,
            "worship" => PresenceActivity::Worship,
            other => PresenceActivity::Other(other.to_string()),
        }
    }
}

/// A decoded presence document for one resource
///
/// This is the per-URI payload cached by contacts and delivered to
/// observers. It carries the subset of PIDF/RPID this engine acts on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceModel {
    /// Basic presence (RFC 3863)
    pub basic_status: BasicStatus,

    /// Current activities, in document order
    pub activities: Vec<PresenceActivity>,

    /// Human-readable note
    pub note: Option<String>,

    /// When this presence was produced
    pub timestamp: DateTime<Utc>,
}

impl PresenceModel {
    /// Create a model with the given basic status and no activities
    pub fn basic(status: BasicStatus) -> Self {
        Self {
            basic_status: status,
            activities: Vec::new(),
            note: None,
            timestamp: Utc::now(),
        }
    }

    /// An "open" model
    pub fn open() -> Self {
        Self::basic(BasicStatus::Open)
    }

    /// The synthetic "closed" model used when a subscription is invalidated
    pub fn closed() -> Self {
        Self::basic(BasicStatus::Closed)
    }

    /// Collapse this model to a consolidated status
    ///
    /// Only the first activity is considered; more than one activity is a
    /// tolerated anomaly and logged. An unmapped activity falls back to the
    /// basic-status-derived value.
    pub fn consolidated_status(&self) -> ConsolidatedStatus {
        let from_basic = match self.basic_status {
            BasicStatus::Open => ConsolidatedStatus::Online,
            BasicStatus::Closed => ConsolidatedStatus::Offline,
        };
        if self.activities.len() > 1 {
            warn!(
                "presence model carries {} activities, only the first is used",
                self.activities.len()
            );
        }
        match self.activities.first() {
            None => from_basic,
            Some(activity) => match activity {
                PresenceActivity::Appointment
                | PresenceActivity::Busy
                | PresenceActivity::Meeting
                | PresenceActivity::Working
                | PresenceActivity::Worship => ConsolidatedStatus::Busy,
                PresenceActivity::Breakfast
                | PresenceActivity::Dinner
                | PresenceActivity::Lunch
                | PresenceActivity::Meal => ConsolidatedStatus::OutToLunch,
                PresenceActivity::Holiday
                | PresenceActivity::Travel
                | PresenceActivity::Vacation => ConsolidatedStatus::Vacation,
                PresenceActivity::Away | PresenceActivity::Sleeping => ConsolidatedStatus::Away,
                PresenceActivity::DoNotDisturb => ConsolidatedStatus::DoNotDisturb,
                PresenceActivity::OnThePhone | PresenceActivity::Steering => {
                    ConsolidatedStatus::OnThePhone
                }
                PresenceActivity::InTransit => ConsolidatedStatus::BeRightBack,
                PresenceActivity::PermanentAbsence => ConsolidatedStatus::Moved,
                PresenceActivity::Other(_) => from_basic,
            },
        }
    }
}

/// Consolidated status derived from a contact's winning presence model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsolidatedStatus {
    Online,
    Busy,
    Away,
    DoNotDisturb,
    OnThePhone,
    BeRightBack,
    Vacation,
    OutToLunch,
    Moved,
    Offline,
    /// Presence has been requested but no document received yet
    Pending,
}

// ============ Subscription Types ============

/// Policy governing the automatic response to an incoming subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscribePolicy {
    /// Automatically accept the watcher
    Accept,
    /// Automatically reject the watcher with a final "closed" notify
    Deny,
    /// Keep the watcher pending until the application decides
    Wait,
}

/// Registration state of an account, as seen by subscription gating
///
/// Only `Ok` counts as registered; every other state suspends outbound
/// subscriptions when registration gating is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No registration has been attempted
    None,
    /// A REGISTER is in flight
    InProgress,
    /// The account is registered
    Ok,
    /// The registration was cleared (unregistered)
    Cleared,
    /// The last registration attempt failed
    Failed,
}

/// Outcome of handling an incoming subscription request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingSubscriptionDecision {
    /// The watcher matched a contact with an `Accept` policy; the handle is
    /// retained and may be notified
    Accepted,
    /// The watcher matched a contact with a `Deny` policy; the handle has
    /// been closed and released
    Denied,
    /// The watcher matched a contact with a `Wait` policy; the handle is
    /// retained, awaiting an application decision
    Pending,
    /// No contact matched the watcher's address; the handle is untouched
    Unknown,
}

// ============ Configuration Types ============

/// Configuration for a contact list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Expiry requested on outbound SUBSCRIBE dialogs, in seconds
    pub subscribe_expires: u32,

    /// Gate outbound subscriptions on the owning account being registered
    pub only_when_registered: bool,

    /// The aggregated subscription carries no resource-list body (the list
    /// membership is defined server-side) and unknown notified URIs
    /// auto-create contacts
    pub bodyless_subscription: bool,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            subscribe_expires: 600,
            only_when_registered: false,
            bodyless_subscription: false,
        }
    }
}
