use anyhow::{anyhow, Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::{AlertDeclined, AlertOutcome, AlertSink, Cooldown};
use crate::config::AlertSettings;
use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};

const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Sender account, app password and destination of alert emails.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct EmailSettings {
    pub sender: String,
    pub password: String,
    pub receiver: String,
}

impl EmailSettings {
    pub fn validate(&self) -> Result<()> {
        self.sender
            .parse::<Mailbox>()
            .with_context(|| format!("invalid sender address '{}'", self.sender))?;
        self.receiver
            .parse::<Mailbox>()
            .with_context(|| format!("invalid receiver address '{}'", self.receiver))?;
        if self.password.is_empty() {
            return Err(anyhow!("sender password must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("sender", &self.sender)
            .field("password", &"<redacted>")
            .field("receiver", &self.receiver)
            .finish()
    }
}

/// Delivers one composed alert.
pub trait AlertTransport: Send + Sync {
    fn deliver(&self, settings: &EmailSettings, subject: &str, body: &str, jpeg: &[u8]) -> Result<()>;
}

/// SMTP relay over implicit TLS.
pub struct SmtpAlertTransport {
    host: String,
    port: u16,
}

impl SmtpAlertTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl AlertTransport for SmtpAlertTransport {
    fn deliver(&self, settings: &EmailSettings, subject: &str, body: &str, jpeg: &[u8]) -> Result<()> {
        let from: Mailbox = settings.sender.parse().context("invalid sender address")?;
        let to: Mailbox = settings.receiver.parse().context("invalid receiver address")?;
        let image_type =
            ContentType::parse("image/jpeg").map_err(|e| anyhow!("content type: {}", e))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body.to_string()))
                    .singlepart(Attachment::new("alert.jpg".to_string()).body(jpeg.to_vec(), image_type)),
            )
            .context("compose alert email")?;

        let mailer = SmtpTransport::relay(&self.host)
            .with_context(|| format!("connect to SMTP relay {}", self.host))?
            .port(self.port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        mailer.send(&message).context("send alert email")?;
        Ok(())
    }
}

struct SinkState {
    settings: Option<EmailSettings>,
    cooldown: Cooldown,
}

/// Email alert sink with a single global cooldown.
///
/// `send` checks configuration and the cooldown and reserves the cooldown
/// window under one lock, so at most one caller passes a given window. The
/// email itself goes out on a background thread; the caller never waits on
/// SMTP. A failed delivery releases the reservation.
pub struct EmailAlertSink {
    state: Arc<Mutex<SinkState>>,
    transport: Arc<dyn AlertTransport>,
    subject: String,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl EmailAlertSink {
    pub fn new(
        settings: Option<EmailSettings>,
        cooldown: Duration,
        subject: impl Into<String>,
        transport: Box<dyn AlertTransport>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                settings,
                cooldown: Cooldown::new(cooldown),
            })),
            transport: Arc::from(transport),
            subject: subject.into(),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// SMTP sink built from configuration.
    pub fn from_settings(settings: &AlertSettings) -> Self {
        Self::new(
            settings.email.clone(),
            settings.cooldown,
            settings.subject.clone(),
            Box::new(SmtpAlertTransport::new(
                settings.smtp_host.clone(),
                settings.smtp_port,
            )),
        )
    }

    /// Replace the destination. Takes effect for the next alert.
    pub fn configure(&self, settings: EmailSettings) -> Result<()> {
        settings.validate()?;
        log::info!("alert email configured (receiver={})", settings.receiver);
        lock(&self.state).settings = Some(settings);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        lock(&self.state).settings.is_some()
    }

    pub fn cooldown_remaining(&self) -> Duration {
        lock(&self.state).cooldown.remaining(Instant::now())
    }

    /// `send` with an explicit clock.
    pub fn send_at(&self, frame: &Frame, detail: &str, now: Instant) -> AlertOutcome {
        let (settings, previous) = {
            let mut state = lock(&self.state);
            let Some(settings) = state.settings.clone() else {
                return Err(AlertDeclined::NotConfigured);
            };
            if !state.cooldown.is_ready(now) {
                return Err(AlertDeclined::CooldownActive);
            }
            (settings, state.cooldown.mark(now))
        };

        let frame = frame.clone();
        let body = format!("Alert! {}\nTime: {}", detail, unix_seconds());
        let subject = self.subject.clone();
        let transport = self.transport.clone();
        let state = self.state.clone();
        let spawned = std::thread::Builder::new()
            .name("alert-delivery".to_string())
            .spawn(move || {
                let delivered = frame
                    .encode_jpeg(DEFAULT_JPEG_QUALITY)
                    .and_then(|jpeg| transport.deliver(&settings, &subject, &body, &jpeg));
                match delivered {
                    Ok(()) => log::info!("alert email delivered to {}", settings.receiver),
                    Err(err) => {
                        log::error!("alert email delivery failed: {:#}", err);
                        lock(&state).cooldown.revert(now, previous);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                let mut deliveries = lock(&self.deliveries);
                deliveries.retain(|handle| !handle.is_finished());
                deliveries.push(handle);
                Ok(())
            }
            Err(err) => {
                lock(&self.state).cooldown.revert(now, previous);
                Err(AlertDeclined::DeliveryFailed(format!("spawn delivery thread: {}", err)))
            }
        }
    }

    /// Wait for every delivery still in flight.
    pub fn flush(&self) {
        let pending = std::mem::take(&mut *lock(&self.deliveries));
        for handle in pending {
            if handle.join().is_err() {
                log::error!("alert delivery thread panicked");
            }
        }
    }
}

impl AlertSink for EmailAlertSink {
    fn send(&self, frame: &Frame, detail: &str) -> AlertOutcome {
        self.send_at(frame, detail, Instant::now())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
