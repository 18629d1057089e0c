//! Rate-limited security alerts.

use std::fmt;

use crate::frame::Frame;

pub mod cooldown;
pub mod email;

pub use cooldown::Cooldown;
pub use email::{AlertTransport, EmailAlertSink, EmailSettings, SmtpAlertTransport};

/// Why an alert was not dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertDeclined {
    NotConfigured,
    CooldownActive,
    DeliveryFailed(String),
}

impl fmt::Display for AlertDeclined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertDeclined::NotConfigured => write!(f, "not configured"),
            AlertDeclined::CooldownActive => write!(f, "cooldown active"),
            AlertDeclined::DeliveryFailed(reason) => write!(f, "delivery failed: {}", reason),
        }
    }
}

impl std::error::Error for AlertDeclined {}

pub type AlertOutcome = Result<(), AlertDeclined>;

/// Destination for person-detected alerts.
///
/// `send` returns once the alert is dispatched or declined and never waits on
/// delivery. Implementations apply their own rate limit and never retry.
pub trait AlertSink: Send + Sync {
    fn send(&self, frame: &Frame, detail: &str) -> AlertOutcome;
}
