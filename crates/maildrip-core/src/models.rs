//! Domain models and strongly-typed identifiers.
//!
//! Defines the per-recipient `Message` entity, its lifecycle state machine,
//! the inbound batch request shape with validation, and newtype ID wrappers
//! for compile-time type safety.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type Pg = sqlx::Postgres;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed message identifier.
///
/// Wraps a UUID so a message id can never be confused with any other id in
/// the system. Assigned once at creation and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<Pg> for MessageId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<Pg>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Pg> for MessageId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<Pg>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, Pg> for MessageId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<Pg>>::encode_by_ref(&self.0, buf)
    }
}

/// Identity of the requester that owns a batch and its messages.
///
/// Opaque to the core: upstream authentication decides what goes in here.
/// Every read and mutation of a message is scoped to its owner.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Wraps an owner identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Message lifecycle status.
///
/// Transitions are strictly forward:
///
/// ```text
/// Scheduled -> Processing -> Sent
///          |              -> Failed -> Processing (queue-driven retry)
///          `-> Cancelled
/// ```
///
/// `Sent` and `Cancelled` are terminal. Nothing ever returns to `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for its dispatch time; the only state cancellation can reach.
    Scheduled,

    /// A worker holds the task and is attempting the send.
    Processing,

    /// Delivered to the transport. Terminal.
    Sent,

    /// The send attempt failed; the queue's retry policy may redeliver.
    Failed,

    /// Cancelled by the owner before any worker picked it up. Terminal.
    Cancelled,
}

impl MessageStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MessageStatus::{Cancelled, Failed, Processing, Scheduled, Sent};
        matches!(
            (self, next),
            (Scheduled, Processing)
                | (Scheduled, Cancelled)
                | (Processing, Sent)
                | (Processing, Failed)
                // at-least-once delivery: a redelivered task may find the
                // message still marked Processing from a crashed worker
                | (Processing, Processing)
                | (Failed, Processing)
        )
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }

    /// Parses the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "processing" => Some(Self::Processing),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Processing => write!(f, "processing"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl sqlx::Type<Pg> for MessageStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<Pg>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Pg> for MessageStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<Pg>>::decode(value)?;
        Self::parse(s).ok_or_else(|| format!("invalid message status: {s}").into())
    }
}

/// One recipient's trackable unit of scheduled delivery.
///
/// Created during batch submission, mutated only by the worker pool
/// (status, `sent_time`, `error`) or by an explicit owner cancellation.
/// The batch-level parameters that produced `scheduled_time` are retained
/// verbatim for audit and display; nothing re-derives scheduling from them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    /// Unique identifier, assigned at creation.
    pub id: MessageId,

    /// Requester that owns this message.
    pub owner: OwnerId,

    /// Destination email address.
    pub recipient: String,

    /// Subject line shared by the whole batch.
    pub subject: String,

    /// HTML body shared by the whole batch.
    pub body: String,

    /// Current lifecycle status.
    pub status: MessageStatus,

    /// Dispatch instant computed by the allocator. Immutable.
    pub scheduled_time: DateTime<Utc>,

    /// Set exactly once, on the transition to `Sent`.
    pub sent_time: Option<DateTime<Utc>>,

    /// Set exactly once, on the transition to `Failed`.
    pub error: Option<String>,

    /// Batch start instant that fed the allocator (audit only).
    pub batch_start: DateTime<Utc>,

    /// Per-message pacing delay in seconds that fed the allocator (audit only).
    pub batch_delay_seconds: i32,

    /// Hourly cap that fed the allocator (audit only).
    pub batch_hourly_limit: i32,

    /// When the message row was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Deduplication key for the delay queue.
    ///
    /// Derived from the id, so at most one pending queue task can exist per
    /// message regardless of how many times submission is retried.
    pub fn dedupe_key(&self) -> String {
        dedupe_key_for(self.id)
    }
}

/// Builds the queue deduplication key for a message id.
pub fn dedupe_key_for(id: MessageId) -> String {
    format!("msg-{id}")
}

/// Insert shape for a message; the store assigns id, status, and timestamps.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Requester that owns the message.
    pub owner: OwnerId,
    /// Destination email address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub body: String,
    /// Allocator-assigned dispatch instant.
    pub scheduled_time: DateTime<Utc>,
    /// Batch start parameter, kept for audit.
    pub batch_start: DateTime<Utc>,
    /// Batch pacing delay parameter, kept for audit.
    pub batch_delay_seconds: i32,
    /// Batch hourly cap parameter, kept for audit.
    pub batch_hourly_limit: i32,
}

/// Per-owner message counts surfaced on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerStats {
    /// Messages still waiting for dispatch.
    pub scheduled: i64,
    /// Messages delivered to the transport.
    pub sent: i64,
    /// Messages that exhausted delivery attempts.
    pub failed: i64,
}

fn default_delay_seconds() -> u32 {
    2
}

fn default_hourly_limit() -> u32 {
    100
}

/// Inbound bulk scheduling request.
///
/// One subject/body template fanned out to every recipient, with a start
/// instant, a per-message pacing delay, and an hourly volume cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Subject line; must be non-empty.
    pub subject: String,
    /// HTML body; must be non-empty.
    pub body: String,
    /// Destination addresses; must be non-empty and individually valid.
    pub recipients: Vec<String>,
    /// Instant the first message becomes eligible for dispatch.
    pub start_time: DateTime<Utc>,
    /// Seconds between consecutive messages. Defaults to 2.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u32,
    /// Maximum messages per hour-aligned window. Defaults to 100.
    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: u32,
}

impl BatchRequest {
    /// Validates the request, naming the first offending field.
    ///
    /// Rejection happens before anything is allocated, persisted, or
    /// enqueued.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subject.trim().is_empty() {
            return Err(ValidationError::new("subject", "subject is required"));
        }
        if self.body.trim().is_empty() {
            return Err(ValidationError::new("body", "body is required"));
        }
        if self.recipients.is_empty() {
            return Err(ValidationError::new("recipients", "at least one recipient is required"));
        }
        for recipient in &self.recipients {
            if !is_valid_email(recipient) {
                return Err(ValidationError::new(
                    "recipients",
                    format!("invalid email address: {recipient}"),
                ));
            }
        }
        if self.hourly_limit < 1 {
            return Err(ValidationError::new("hourly_limit", "hourly limit must be at least 1"));
        }
        Ok(())
    }
}

/// Malformed batch input, rejected synchronously with the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// The request field that failed validation.
    pub field: &'static str,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

/// Minimal structural email check: one `@`, non-empty local part, and a
/// domain containing a dot. Deliverability is the transport's problem.
fn is_valid_email(addr: &str) -> bool {
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if addr.contains(char::is_whitespace) {
        return false;
    }
    domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(recipients: Vec<&str>) -> BatchRequest {
        BatchRequest {
            subject: "Hello".to_string(),
            body: "<p>Hi</p>".to_string(),
            recipients: recipients.into_iter().map(String::from).collect(),
            start_time: Utc::now(),
            delay_seconds: 2,
            hourly_limit: 100,
        }
    }

    #[test]
    fn status_transitions_follow_state_machine() {
        use MessageStatus::*;

        assert!(Scheduled.can_transition_to(Processing));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Sent));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        // nothing reverts to scheduled
        for status in [Processing, Sent, Failed, Cancelled] {
            assert!(!status.can_transition_to(Scheduled));
        }
        // terminal states admit nothing
        for next in [Scheduled, Processing, Sent, Failed, Cancelled] {
            assert!(!Sent.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            MessageStatus::Scheduled,
            MessageStatus::Processing,
            MessageStatus::Sent,
            MessageStatus::Failed,
            MessageStatus::Cancelled,
        ] {
            assert_eq!(MessageStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(MessageStatus::parse("delivered"), None);
    }

    #[test]
    fn validation_accepts_well_formed_request() {
        assert!(request(vec!["a@example.com", "b@example.org"]).validate().is_ok());
    }

    #[test]
    fn validation_names_offending_field() {
        let mut req = request(vec!["a@example.com"]);
        req.subject = "   ".to_string();
        assert_eq!(req.validate().unwrap_err().field, "subject");

        let mut req = request(vec!["a@example.com"]);
        req.body = String::new();
        assert_eq!(req.validate().unwrap_err().field, "body");

        let req = request(vec![]);
        assert_eq!(req.validate().unwrap_err().field, "recipients");

        let req = request(vec!["not-an-address"]);
        assert_eq!(req.validate().unwrap_err().field, "recipients");

        let mut req = request(vec!["a@example.com"]);
        req.hourly_limit = 0;
        assert_eq!(req.validate().unwrap_err().field, "hourly_limit");
    }

    #[test]
    fn email_structural_check() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("user.name+tag@sub.example.co"));
        assert!(!is_valid_email("user"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@localhost"));
        assert!(!is_valid_email("user@.example.com"));
        assert!(!is_valid_email("us er@example.com"));
    }

    #[test]
    fn request_defaults_apply_on_deserialize() {
        let req: BatchRequest = serde_json::from_value(serde_json::json!({
            "subject": "s",
            "body": "b",
            "recipients": ["a@example.com"],
            "start_time": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(req.delay_seconds, 2);
        assert_eq!(req.hourly_limit, 100);
    }

    #[test]
    fn dedupe_key_is_derived_from_id() {
        let id = MessageId::new();
        assert_eq!(dedupe_key_for(id), format!("msg-{id}"));
    }
}
