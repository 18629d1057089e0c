//! Capture loop and latest-frame broadcast.
//!
//! The `StreamAssembler` thread owns the live frame source. Each cycle it
//! reads a frame, hands it to the caption worker (never waiting), runs the
//! detection stage when security is on, encodes the displayed frame as JPEG
//! and publishes it on the `FrameHub`, which any number of `/video_feed`
//! clients wait on.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::context::{AppContext, SourceSpec};
use crate::ingest::FrameSource;

// ----------------------------------------------------------------------------
// FrameHub
// ----------------------------------------------------------------------------

/// Result of waiting on the hub.
#[derive(Debug)]
pub enum HubWait {
    Frame { seq: u64, jpeg: Arc<Vec<u8>> },
    Timeout,
    Closed,
}

struct HubState {
    jpeg: Option<Arc<Vec<u8>>>,
    seq: u64,
    closed: bool,
}

/// Latest encoded frame, with a sequence number readers wait past.
pub struct FrameHub {
    state: Mutex<HubState>,
    changed: Condvar,
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState {
                jpeg: None,
                seq: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Replace the current frame and wake every waiting reader.
    pub fn publish(&self, jpeg: Vec<u8>) -> u64 {
        let mut state = self.lock();
        if state.closed {
            return state.seq;
        }
        state.seq += 1;
        state.jpeg = Some(Arc::new(jpeg));
        let seq = state.seq;
        drop(state);
        self.changed.notify_all();
        seq
    }

    pub fn latest(&self) -> Option<(u64, Arc<Vec<u8>>)> {
        let state = self.lock();
        state.jpeg.as_ref().map(|jpeg| (state.seq, jpeg.clone()))
    }

    /// Wait for a frame newer than `after`.
    pub fn wait_next(&self, after: u64, timeout: Duration) -> HubWait {
        let guard = self.lock();
        let (state, _) = match self.changed.wait_timeout_while(guard, timeout, |state| {
            !state.closed && (state.seq <= after || state.jpeg.is_none())
        }) {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return HubWait::Closed;
        }
        match &state.jpeg {
            Some(jpeg) if state.seq > after => HubWait::Frame {
                seq: state.seq,
                jpeg: jpeg.clone(),
            },
            _ => HubWait::Timeout,
        }
    }

    /// Wake all readers for good.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ----------------------------------------------------------------------------
// StreamAssembler
// ----------------------------------------------------------------------------

/// Handle to the capture thread.
pub struct StreamAssembler {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl StreamAssembler {
    /// Open the configured camera and start capturing.
    pub fn spawn(context: Arc<AppContext>) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("stream-assembler".to_string())
            .spawn(move || {
                let mut capture = CaptureLoop::new(context);
                capture.run(&thread_shutdown);
                log::debug!("stream assembler stopped");
            })
            .context("spawn stream assembler thread")?;
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stop after the current cycle and wait for the thread.
    pub fn stop(mut self) -> Result<()> {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow::anyhow!("stream assembler thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for StreamAssembler {
    fn drop(&mut self) {
        if let Err(err) = self.stop_inner() {
            log::error!("{}", err);
        }
    }
}

struct CaptureLoop {
    context: Arc<AppContext>,
    spec: SourceSpec,
    source: Option<Box<dyn FrameSource>>,
    frame_index: u64,
    /// Suppresses repeated "unavailable" logs until a frame arrives.
    reported_unavailable: bool,
}

impl CaptureLoop {
    fn new(context: Arc<AppContext>) -> Self {
        let spec = context.default_source();
        Self {
            context,
            spec,
            source: None,
            frame_index: 0,
            reported_unavailable: false,
        }
    }

    fn run(&mut self, shutdown: &AtomicBool) {
        let settings = self.context.config().stream.clone();
        let frame_interval =
            Duration::from_secs_f64(1.0 / self.context.config().camera.target_fps.max(1) as f64);

        self.reopen();
        while !shutdown.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();
            self.serve_source_request();

            let Some(source) = self.source.as_mut() else {
                self.idle(shutdown, settings.idle_retry);
                self.reopen();
                continue;
            };

            match source.read() {
                Ok(Some(frame)) => {
                    self.reported_unavailable = false;
                    self.context.submit_caption(&frame);

                    let run_detection = self.frame_index % settings.detect_every as u64 == 0;
                    self.frame_index += 1;
                    let display = match self.context.detection() {
                        Some(stage) if run_detection => stage.process(&frame).frame,
                        _ => frame,
                    };

                    match display.encode_jpeg(settings.jpeg_quality) {
                        Ok(jpeg) => {
                            self.context.hub().publish(jpeg);
                        }
                        Err(err) => log::warn!("failed to encode stream frame: {:#}", err),
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    log::debug!("frame source {} failed: {:#}", source.describe(), err);
                    source.close();
                    self.source = None;
                    self.context.set_active_source(None);
                    continue;
                }
            }

            if let Some(rest) = frame_interval.checked_sub(cycle_start.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.context.set_active_source(None);
    }

    /// Try to (re)open the current source selection.
    fn reopen(&mut self) {
        match open_source(&self.spec) {
            Ok(source) => {
                self.context.set_active_source(Some(source.describe()));
                self.source = Some(source);
            }
            Err(err) => {
                if !self.reported_unavailable {
                    log::debug!("frame source {} unavailable: {:#}", self.spec, err);
                    self.reported_unavailable = true;
                }
            }
        }
    }

    fn serve_source_request(&mut self) {
        let Some(request) = self.context.take_source_request() else {
            return;
        };
        let result = open_source(&request.spec).map(|source| {
            let description = source.describe();
            if let Some(mut old) = self.source.replace(source) {
                old.close();
            }
            self.spec = request.spec.clone();
            self.context.set_active_source(Some(description.clone()));
            log::info!("switched frame source to {}", description);
            description
        });
        if let Err(err) = &result {
            log::warn!("source switch to {} failed: {:#}", request.spec, err);
        }
        request.respond(result);
    }

    fn idle(&self, shutdown: &AtomicBool, retry: Duration) {
        // Sliced so shutdown and source requests are noticed promptly.
        let deadline = Instant::now() + retry;
        while Instant::now() < deadline && !shutdown.load(Ordering::SeqCst) {
            if self.context.has_source_request() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20).min(retry));
        }
    }
}

fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>> {
    let mut source = spec.build()?;
    source.open()?;
    Ok(source)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
