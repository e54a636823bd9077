//! Builders for test data.

use chrono::{DateTime, TimeZone, Utc};
use maildrip_core::BatchRequest;

/// Fluent builder for [`BatchRequest`] fixtures.
///
/// Defaults: one recipient, 2s delay, hourly limit 100, start at the Unix
/// epoch hour passed to [`starting_at`](BatchBuilder::starting_at) or
/// 2026-01-01T00:00:00Z.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    subject: String,
    body: String,
    recipients: Vec<String>,
    start_time: DateTime<Utc>,
    delay_seconds: u32,
    hourly_limit: u32,
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self {
            subject: "Test subject".to_string(),
            body: "<p>Test body</p>".to_string(),
            recipients: vec!["recipient@example.com".to_string()],
            start_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            delay_seconds: 2,
            hourly_limit: 100,
        }
    }
}

impl BatchBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces the recipient list.
    #[must_use]
    pub fn recipients(mut self, recipients: &[&str]) -> Self {
        self.recipients = recipients.iter().map(|r| (*r).to_string()).collect();
        self
    }

    /// Generates `n` sequential recipients (`r0@example.com`, ...).
    #[must_use]
    pub fn generated_recipients(mut self, n: usize) -> Self {
        self.recipients = (0..n).map(|i| format!("r{i}@example.com")).collect();
        self
    }

    /// Sets the batch start instant.
    #[must_use]
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = start;
        self
    }

    /// Sets the per-message pacing delay in seconds.
    #[must_use]
    pub fn delay_seconds(mut self, delay: u32) -> Self {
        self.delay_seconds = delay;
        self
    }

    /// Sets the per-batch hourly cap.
    #[must_use]
    pub fn hourly_limit(mut self, limit: u32) -> Self {
        self.hourly_limit = limit;
        self
    }

    /// Builds the request.
    pub fn build(self) -> BatchRequest {
        BatchRequest {
            subject: self.subject,
            body: self.body,
            recipients: self.recipients,
            start_time: self.start_time,
            delay_seconds: self.delay_seconds,
            hourly_limit: self.hourly_limit,
        }
    }
}
