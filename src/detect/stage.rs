use std::sync::{Arc, Mutex, MutexGuard};

use crate::alert::AlertSink;
use crate::config::SecuritySettings;
use crate::detect::annotate::draw_detections;
use crate::detect::backend::DetectorBackend;
use crate::detect::backends;
use crate::detect::result::DetectionOutcome;
use crate::frame::Frame;
use crate::unwind::catch_panic;

/// Last result of the stage, as reported by `/stats`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityStatus {
    pub detected: bool,
    pub detail: String,
}

/// Synchronous object detection with alerting on a subject class.
///
/// Runs on the caller's thread. Without a backend (load failure) every call
/// is a pass-through.
pub struct DetectionStage {
    backend: Option<Mutex<Box<dyn DetectorBackend>>>,
    alerts: Arc<dyn AlertSink>,
    subject_class: String,
    subject_threshold: f32,
    status: Mutex<SecurityStatus>,
}

impl DetectionStage {
    pub fn new(backend: Box<dyn DetectorBackend>, alerts: Arc<dyn AlertSink>) -> Self {
        Self::with_backend(Some(backend), alerts)
    }

    /// Stage that never detects anything.
    pub fn pass_through(alerts: Arc<dyn AlertSink>) -> Self {
        Self::with_backend(None, alerts)
    }

    /// Build the configured backend; a load failure leaves the stage in
    /// pass-through mode.
    pub fn from_settings(settings: &SecuritySettings, alerts: Arc<dyn AlertSink>) -> Self {
        let backend = match backends::build(settings) {
            Ok(mut backend) => {
                if let Err(err) = backend.warm_up() {
                    log::warn!("detector '{}' warm-up failed: {:#}", backend.name(), err);
                }
                log::info!("detector backend '{}' ready", backend.name());
                Some(backend)
            }
            Err(err) => {
                log::error!("detector failed to load, security runs as pass-through: {:#}", err);
                None
            }
        };
        Self::with_backend(backend, alerts)
            .with_subject(settings.subject_class.clone(), settings.subject_threshold)
    }

    fn with_backend(backend: Option<Box<dyn DetectorBackend>>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            backend: backend.map(Mutex::new),
            alerts,
            subject_class: "person".to_string(),
            subject_threshold: 0.5,
            status: Mutex::new(SecurityStatus::default()),
        }
    }

    /// Class and strict lower confidence bound that trigger an alert.
    pub fn with_subject(mut self, class: impl Into<String>, threshold: f32) -> Self {
        self.subject_class = class.into();
        self.subject_threshold = threshold;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    pub fn status(&self) -> SecurityStatus {
        lock(&self.status).clone()
    }

    /// Detect, annotate, and alert on the first qualifying subject.
    pub fn process(&self, frame: &Frame) -> DetectionOutcome {
        let outcome = self.run(frame);
        *lock(&self.status) = SecurityStatus {
            detected: outcome.detected,
            detail: outcome.detail.clone(),
        };
        outcome
    }

    fn run(&self, frame: &Frame) -> DetectionOutcome {
        let Some(backend) = &self.backend else {
            return DetectionOutcome::pass_through(frame.clone());
        };
        let detections = match catch_panic("detector", || lock(backend).detect(frame)) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("detection failed for frame: {:#}", err);
                return DetectionOutcome::pass_through(frame.clone());
            }
        };

        let mut annotated = frame.clone();
        draw_detections(annotated.image_mut(), &detections);

        let mut detected = false;
        let mut detail = String::new();
        if let Some(hit) = detections
            .iter()
            .find(|d| d.label == self.subject_class && d.confidence > self.subject_threshold)
        {
            detected = true;
            detail = format!(
                "{} detected (confidence: {:.2})",
                capitalize(&self.subject_class),
                hit.confidence
            );
            match self.alerts.send(frame, &detail) {
                Ok(()) => log::info!("security alert dispatched: {}", detail),
                Err(reason) => log::info!("security alert not dispatched ({}): {}", reason, detail),
            }
        }

        DetectionOutcome {
            frame: annotated,
            detected,
            detail,
            detections,
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertDeclined, AlertOutcome, AlertTransport, EmailAlertSink, EmailSettings};
    use crate::detect::result::Detection;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct FixedBackend {
        detections: Vec<Detection>,
        fail: bool,
    }

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            if self.fail {
                return Err(anyhow!("inference exploded"));
            }
            Ok(self.detections.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, [u8; 3])>>,
    }

    impl AlertSink for RecordingSink {
        fn send(&self, frame: &Frame, detail: &str) -> AlertOutcome {
            let pixel = frame.image().get_pixel(0, 0).0;
            self.calls.lock().unwrap().push((detail.to_string(), pixel));
            Err(AlertDeclined::CooldownActive)
        }
    }

    fn stage(detections: Vec<Detection>, fail: bool) -> (DetectionStage, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let stage = DetectionStage::new(Box::new(FixedBackend { detections, fail }), sink.clone());
        (stage, sink)
    }

    #[test]
    fn empty_scene_is_not_detected() {
        let (stage, sink) = stage(Vec::new(), false);
        let outcome = stage.process(&Frame::filled(16, 16, [5, 5, 5]));

        assert!(!outcome.detected);
        assert_eq!(outcome.detail, "");
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn first_qualifying_person_triggers_one_alert_with_clean_frame() {
        let dets = vec![
            Detection::new("dog", 0.99, [0.0, 0.0, 15.0, 15.0]),
            Detection::new("person", 0.5, [1.0, 1.0, 4.0, 4.0]),
            Detection::new("person", 0.87, [0.0, 0.0, 8.0, 8.0]),
            Detection::new("person", 0.95, [2.0, 2.0, 9.0, 9.0]),
        ];
        let (stage, sink) = stage(dets, false);
        let outcome = stage.process(&Frame::filled(16, 16, [5, 5, 5]));

        assert!(outcome.detected);
        assert_eq!(outcome.detail, "Person detected (confidence: 0.87)");
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, [5, 5, 5]);
        // Every class gets a box, including the dog.
        assert_ne!(outcome.frame.image().get_pixel(0, 0).0, [5, 5, 5]);
        assert_eq!(stage.status().detail, "Person detected (confidence: 0.87)");
    }

    #[test]
    fn detector_error_is_a_pass_through_for_that_frame() {
        let (stage, sink) = stage(vec![Detection::new("person", 0.9, [0.0, 0.0, 4.0, 4.0])], true);
        let frame = Frame::filled(8, 8, [1, 2, 3]);
        let outcome = stage.process(&frame);

        assert!(!outcome.detected);
        assert_eq!(outcome.frame.pixels(), frame.pixels());
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unloaded_stage_passes_frames_through() {
        let sink = Arc::new(RecordingSink::default());
        let stage = DetectionStage::pass_through(sink);
        let frame = Frame::filled(8, 8, [9, 9, 9]);
        let outcome = stage.process(&frame);

        assert!(!stage.is_loaded());
        assert!(!outcome.detected);
        assert_eq!(outcome.frame.pixels(), frame.pixels());
    }

    /// Panics on the first frame, then reports a person.
    struct FlakyBackend {
        calls: usize,
    }

    impl DetectorBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("output tensor index out of range");
            }
            Ok(vec![Detection::new("person", 0.9, [0.0, 0.0, 4.0, 4.0])])
        }
    }

    #[test]
    fn detector_panic_is_a_pass_through_and_the_stage_recovers() {
        let sink = Arc::new(RecordingSink::default());
        let stage = DetectionStage::new(Box::new(FlakyBackend { calls: 0 }), sink.clone());
        let frame = Frame::filled(8, 8, [1, 2, 3]);

        let first = stage.process(&frame);
        assert!(!first.detected);
        assert_eq!(first.frame.pixels(), frame.pixels());

        let second = stage.process(&frame);
        assert!(second.detected);
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
    }

    struct SlowTransport {
        sent: AtomicUsize,
    }

    impl AlertTransport for Arc<SlowTransport> {
        fn deliver(&self, _settings: &EmailSettings, _subject: &str, _body: &str, _jpeg: &[u8]) -> Result<()> {
            std::thread::sleep(Duration::from_secs(2));
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn slow_email_delivery_does_not_hold_up_processing() {
        let transport = Arc::new(SlowTransport {
            sent: AtomicUsize::new(0),
        });
        let sink = Arc::new(EmailAlertSink::new(
            Some(EmailSettings {
                sender: "cam@example.com".into(),
                password: "app-password".into(),
                receiver: "owner@example.com".into(),
            }),
            Duration::from_secs(30),
            "alert",
            Box::new(transport.clone()),
        ));
        let dets = vec![Detection::new("person", 0.9, [0.0, 0.0, 8.0, 8.0])];
        let stage = DetectionStage::new(
            Box::new(FixedBackend {
                detections: dets,
                fail: false,
            }),
            sink.clone(),
        );

        let started = Instant::now();
        let outcome = stage.process(&Frame::filled(16, 16, [5, 5, 5]));
        assert!(outcome.detected);
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "process took {:?}",
            started.elapsed()
        );
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);

        sink.flush();
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    }
}
