//! Process-wide application state.
//!
//! `AppContext` is built once at start-up and shared (`Arc`) with the capture
//! thread and every HTTP handler. It owns the caption worker, the detection
//! stage, the alert sink and the frame hub. The live frame source belongs to
//! the capture thread; handlers ask for a different one through
//! `request_source`.

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::alert::EmailAlertSink;
use crate::caption::{backends as caption_backends, CaptionSnapshot, CaptionWorker, Offer};
use crate::config::LivecapConfig;
use crate::detect::{DetectionOutcome, DetectionStage};
use crate::frame::Frame;
use crate::ingest::{CameraConfig, CameraSource, FileSource, FrameSource};
use crate::stream::FrameHub;

/// Caption shown when no caption model could be loaded.
pub const UNAVAILABLE_CAPTION: &str = "Initializing...";

/// Which frame source the capture thread should use.
#[derive(Clone, Debug)]
pub enum SourceSpec {
    Camera(CameraConfig),
    File(PathBuf),
}

impl SourceSpec {
    pub fn build(&self) -> Result<Box<dyn FrameSource>> {
        Ok(match self {
            SourceSpec::Camera(config) => Box::new(CameraSource::new(config.clone())?),
            SourceSpec::File(path) => Box::new(FileSource::new(path)?),
        })
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Camera(config) => write!(f, "camera [{}]", config.devices.join(", ")),
            SourceSpec::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// A pending source switch and where to report its result.
pub struct SourceRequest {
    pub spec: SourceSpec,
    reply: mpsc::Sender<Result<String>>,
}

impl SourceRequest {
    pub fn respond(self, result: Result<String>) {
        // The requester may have timed out and gone away.
        let _ = self.reply.send(result);
    }
}

/// Security section of `/stats`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityReport {
    pub enabled: bool,
    pub detected: bool,
    pub detail: String,
}

pub struct AppContext {
    config: LivecapConfig,
    captions: Option<CaptionWorker>,
    detection: Option<DetectionStage>,
    alerts: Arc<EmailAlertSink>,
    hub: Arc<FrameHub>,
    source_request: Mutex<Option<SourceRequest>>,
    active_source: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl AppContext {
    /// Load models and build every component. Model load failures degrade the
    /// affected feature instead of failing start-up.
    pub fn open(config: LivecapConfig) -> Result<Arc<Self>> {
        let captions = match caption_backends::build(&config.caption) {
            Ok(model) => Some(CaptionWorker::spawn_with_interval(
                model,
                config.caption.poll_interval,
            )?),
            Err(err) => {
                log::error!("caption model failed to load, captions disabled: {:#}", err);
                None
            }
        };
        let alerts = Arc::new(EmailAlertSink::from_settings(&config.alert));
        let detection = config
            .security
            .enabled
            .then(|| DetectionStage::from_settings(&config.security, alerts.clone()));

        Ok(Arc::new(Self::from_parts(config, captions, detection, alerts)))
    }

    /// Assemble from prebuilt components.
    pub fn from_parts(
        config: LivecapConfig,
        captions: Option<CaptionWorker>,
        detection: Option<DetectionStage>,
        alerts: Arc<EmailAlertSink>,
    ) -> Self {
        Self {
            config,
            captions,
            detection,
            alerts,
            hub: Arc::new(FrameHub::new()),
            source_request: Mutex::new(None),
            active_source: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LivecapConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<FrameHub> {
        &self.hub
    }

    pub fn alerts(&self) -> &Arc<EmailAlertSink> {
        &self.alerts
    }

    pub fn detection(&self) -> Option<&DetectionStage> {
        self.detection.as_ref()
    }

    /// Forward a frame to the caption worker without waiting.
    pub fn submit_caption(&self, frame: &Frame) -> Offer {
        match &self.captions {
            Some(worker) => worker.submit(frame),
            None => Offer::Closed,
        }
    }

    pub fn latest_caption(&self) -> String {
        self.caption_snapshot().text
    }

    pub fn caption_snapshot(&self) -> CaptionSnapshot {
        match &self.captions {
            Some(worker) => worker.snapshot(),
            None => CaptionSnapshot {
                text: UNAVAILABLE_CAPTION.to_string(),
                generation: 0,
            },
        }
    }

    /// Run the detection stage, if security mode is on.
    pub fn detect(&self, frame: &Frame) -> Option<DetectionOutcome> {
        self.detection.as_ref().map(|stage| stage.process(frame))
    }

    pub fn security_report(&self) -> SecurityReport {
        match &self.detection {
            Some(stage) => {
                let status = stage.status();
                SecurityReport {
                    enabled: true,
                    detected: status.detected,
                    detail: status.detail,
                }
            }
            None => SecurityReport::default(),
        }
    }

    /// The configured camera list.
    pub fn default_source(&self) -> SourceSpec {
        SourceSpec::Camera(CameraConfig::from(&self.config.camera))
    }

    /// Ask the capture thread to switch sources and wait for the outcome.
    ///
    /// A newer request replaces one the capture thread has not picked up yet;
    /// the replaced requester gets an error.
    pub fn request_source(&self, spec: SourceSpec, timeout: Duration) -> Result<String> {
        if self.is_closed() {
            return Err(anyhow!("application is shutting down"));
        }
        let (reply, outcome) = mpsc::channel();
        let previous = lock(&self.source_request).replace(SourceRequest { spec, reply });
        if let Some(previous) = previous {
            previous.respond(Err(anyhow!("superseded by a newer source request")));
        }
        match outcome.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(anyhow!("capture loop did not answer the source switch in time")),
        }
    }

    pub fn has_source_request(&self) -> bool {
        lock(&self.source_request).is_some()
    }

    pub fn take_source_request(&self) -> Option<SourceRequest> {
        lock(&self.source_request).take()
    }

    pub fn set_active_source(&self, description: Option<String>) {
        *lock(&self.active_source) = description;
    }

    /// Description of the source currently producing frames.
    pub fn active_source(&self) -> Option<String> {
        lock(&self.active_source).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the caption worker, release stream readers and wait for alert
    /// emails in flight. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(request) = self.take_source_request() {
            request.respond(Err(anyhow!("application is shutting down")));
        }
        if let Some(worker) = &self.captions {
            worker.shutdown();
        }
        self.hub.close();
        self.alerts.flush();
        log::info!("application context closed");
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
