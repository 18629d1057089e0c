use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::board::{CaptionBoard, CaptionSnapshot};
use super::model::CaptionModel;
use super::slot::{HandoffSlot, Offer};
use crate::frame::Frame;
use crate::unwind::catch_panic;

/// Default bound on how long the idle worker waits before re-checking for
/// shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Background caption pipeline.
///
/// One thread turns "most recent frame of interest" into "most recent
/// caption". Producers call `submit`, which never blocks: the frame is copied
/// into a capacity-1 slot, or dropped when the worker already has one
/// pending. Readers call `latest_caption`, which only takes the result lock.
pub struct CaptionWorker {
    slot: Arc<HandoffSlot<Frame>>,
    board: Arc<CaptionBoard>,
    shutdown: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
    model_name: &'static str,
}

impl CaptionWorker {
    /// Start the worker thread with the default poll interval.
    pub fn spawn<M: CaptionModel + 'static>(model: M) -> Result<Self> {
        Self::spawn_with_interval(model, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_interval<M: CaptionModel + 'static>(
        mut model: M,
        poll_interval: Duration,
    ) -> Result<Self> {
        let model_name = model.name();
        let placeholder = format!(
            "Initializing caption... ({})",
            model.device().to_uppercase()
        );
        let slot = Arc::new(HandoffSlot::new());
        let board = Arc::new(CaptionBoard::new(placeholder));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_slot = slot.clone();
        let thread_board = board.clone();
        let thread_shutdown = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("caption-worker".to_string())
            .spawn(move || {
                if let Err(err) = catch_panic("caption model warm-up", || model.warm_up()) {
                    log::warn!("caption model '{}' warm-up failed: {}", model.name(), err);
                }
                run_worker(
                    &mut model,
                    &thread_slot,
                    &thread_board,
                    &thread_shutdown,
                    poll_interval,
                );
                log::debug!("caption worker stopped");
            })
            .context("spawn caption worker thread")?;

        log::info!("caption worker started (model={})", model_name);
        Ok(Self {
            slot,
            board,
            shutdown,
            join: Mutex::new(Some(join)),
            model_name,
        })
    }

    /// Hand a frame to the worker. Never blocks.
    ///
    /// The frame is copied only when the slot accepts it. After `shutdown`
    /// every submission returns `Offer::Closed`.
    pub fn submit(&self, frame: &Frame) -> Offer {
        self.slot.offer_with(|| frame.clone())
    }

    /// Most recent caption, or the start-up placeholder.
    pub fn latest_caption(&self) -> String {
        self.board.latest()
    }

    pub fn snapshot(&self) -> CaptionSnapshot {
        self.board.snapshot()
    }

    pub fn model_name(&self) -> &'static str {
        self.model_name
    }

    /// True while a submitted frame is waiting for pickup.
    pub fn has_pending(&self) -> bool {
        self.slot.is_occupied()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop after the current inference (if any) and wait for the thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.slot.close();
        let join = match self.join.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(join) = join {
            if let Err(err) = join
                .join()
                .map_err(|_| anyhow!("caption worker thread panicked"))
            {
                log::error!("{}", err);
            }
        }
    }
}

impl Drop for CaptionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<M: CaptionModel>(
    model: &mut M,
    slot: &HandoffSlot<Frame>,
    board: &CaptionBoard,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let Some(frame) = slot.take(poll_interval) else {
            continue;
        };

        match catch_panic("caption model", || model.caption(&frame)) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    log::error!("caption model '{}' returned an empty caption", model.name());
                    continue;
                }
                log::debug!("caption generated: {}", text);
                board.publish(text.to_string());
            }
            Err(err) => {
                log::error!("caption generation failed: {:#}", err);
            }
        }
    }
}
