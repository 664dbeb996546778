//! # Message bus events
//!
//! A [`MessageBusEvent`] is the unit of in-process communication between the mower services. The
//! topic naming contract is enforced when an event is constructed:
//!
//! - topics match `^[a-z]+(\.[a-z_]+)+$`, i.e. `category.subcategory[.subcategory...]`,
//! - topics starting with `safety.`, `nav.geofence_violation` or `cmd.` are reserved for
//!   [`PersistenceTier::Critical`] traffic.
//!
//! An event that breaks either rule cannot be built, so a safety message can never be silently
//! delivered as best effort.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use conquer_once::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Regex every topic must match.
pub const TOPIC_PATTERN: &str = r"^[a-z]+(\.[a-z_]+)+$";

/// Topic prefixes which may only carry critical tier events.
pub const CRITICAL_PREFIXES: [&str; 3] = ["safety.", "nav.geofence_violation", "cmd."];

static TOPIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(TOPIC_PATTERN).expect("TOPIC_PATTERN is a valid regex"));

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Opaque key to value payload carried by an event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An event published on the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBusEvent {
    topic: String,

    /// Publication time in microseconds since the Unix epoch
    pub timestamp_us: i64,

    /// Event contents
    pub payload: Payload,

    /// Name of the service which published the event
    pub source_service: String,

    /// Optional identifier used to correlate events
    pub message_id: Option<String>,

    tier: PersistenceTier,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Durability class of an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceTier {
    /// Event must survive a process restart through durable replay
    Critical,

    /// In-process delivery only
    BestEffort,
}

/// Errors raised while building an event.
#[derive(Debug, Error, PartialEq)]
pub enum BusEventError {
    #[error("Topic \"{0}\" does not match the pattern category.subcategory[.subcategory...]")]
    InvalidTopic(String),

    #[error("Topic \"{0}\" is reserved for critical tier events but {1:?} was requested")]
    TierMismatch(String, PersistenceTier),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MessageBusEvent {
    /// Build a new event, validating the topic against the naming contract.
    pub fn new(
        topic: &str,
        timestamp_us: i64,
        payload: Payload,
        source_service: &str,
        tier: PersistenceTier,
    ) -> Result<Self, BusEventError> {
        validate_topic(topic, tier)?;

        Ok(Self {
            topic: topic.to_string(),
            timestamp_us,
            payload,
            source_service: source_service.to_string(),
            message_id: None,
            tier,
        })
    }

    /// Attach a message ID to the event.
    pub fn with_message_id(mut self, message_id: String) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// The topic the event is published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn persistence_tier(&self) -> PersistenceTier {
        self.tier
    }

    /// Re-check the naming contract, used on events which have been deserialised.
    pub fn validate(&self) -> Result<(), BusEventError> {
        validate_topic(&self.topic, self.tier)
    }
}

impl PersistenceTier {
    /// Get the tier matching the `persistent` flag given to a publish call.
    pub fn from_persistent(persistent: bool) -> Self {
        if persistent {
            PersistenceTier::Critical
        } else {
            PersistenceTier::BestEffort
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Returns true if the topic is reserved for critical tier traffic.
pub fn is_critical_topic(topic: &str) -> bool {
    CRITICAL_PREFIXES.iter().any(|p| topic.starts_with(p))
}

/// Check that the topic is well formed and that its tier respects the reserved prefixes.
pub fn validate_topic(topic: &str, tier: PersistenceTier) -> Result<(), BusEventError> {
    if !TOPIC_REGEX.is_match(topic) {
        return Err(BusEventError::InvalidTopic(topic.to_string()));
    }

    if is_critical_topic(topic) && tier != PersistenceTier::Critical {
        return Err(BusEventError::TierMismatch(topic.to_string(), tier));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_topic_regex_compiles() {
        assert!(Regex::new(TOPIC_PATTERN).is_ok());
        assert_eq!(TOPIC_REGEX.as_str(), TOPIC_PATTERN);
    }

    #[test]
    fn test_topic_pattern() {
        assert!(validate_topic("contract.test", PersistenceTier::BestEffort).is_ok());
        assert!(validate_topic("nav.gps_degraded", PersistenceTier::BestEffort).is_ok());
        assert!(validate_topic("mission.status.detail", PersistenceTier::BestEffort).is_ok());

        for bad in ["contract", "Contract.test", "contract.", ".test", "a.b-c", "a1.b"] {
            assert_eq!(
                validate_topic(bad, PersistenceTier::Critical),
                Err(BusEventError::InvalidTopic(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_critical_prefixes() {
        for topic in ["safety.estop", "safety.interlock", "cmd.drive", "nav.geofence_violation"] {
            assert!(validate_topic(topic, PersistenceTier::Critical).is_ok());
            assert!(matches!(
                MessageBusEvent::new(topic, 0, Payload::new(), "test", PersistenceTier::BestEffort),
                Err(BusEventError::TierMismatch(_, PersistenceTier::BestEffort))
            ));
        }

        // Only the exact reserved names are protected
        assert!(!is_critical_topic("nav.gps_degraded"));
        assert!(!is_critical_topic("safetyish.topic"));
    }

    #[test]
    fn test_event_json() -> Result<(), serde_json::Error> {
        let mut payload = Payload::new();
        payload.insert("hello".into(), "world".into());

        let event = MessageBusEvent::new(
            "safety.estop",
            42,
            payload,
            "estop_handler",
            PersistenceTier::from_persistent(true),
        )
        .unwrap()
        .with_message_id("m-1".into());

        let json = serde_json::to_string(&event)?;
        assert!(json.contains("\"tier\":\"critical\""));

        let back: MessageBusEvent = serde_json::from_str(&json)?;
        assert_eq!(back, event);
        assert!(back.validate().is_ok());

        Ok(())
    }
}
