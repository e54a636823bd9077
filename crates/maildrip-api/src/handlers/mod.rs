//! HTTP request handlers.

mod emails;
mod health;

pub use emails::{
    cancel_email, delete_email, get_email, list_emails, owner_stats, schedule_batch,
};
pub use health::{liveness_check, readiness_check};
