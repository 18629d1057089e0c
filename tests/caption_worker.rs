use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use livecap::caption::{CaptionModel, CaptionWorker, Offer};
use livecap::Frame;

#[derive(Default)]
struct Counters {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Describes the top-left pixel, slowly.
struct SlowColorModel {
    delay: Duration,
    counters: Arc<Counters>,
}

impl CaptionModel for SlowColorModel {
    fn name(&self) -> &'static str {
        "slow-color"
    }

    fn caption(&mut self, frame: &Frame) -> Result<String> {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.calls.fetch_add(1, Ordering::SeqCst);

        match &frame.pixels()[..3] {
            [0, 0, 0] => Err(anyhow!("frame too dark")),
            [255, 0, 0] => Ok("a red frame".to_string()),
            [255, 255, 255] => Ok("a white frame".to_string()),
            [0, 0, 255] => panic!("decoder output index out of range"),
            _ => Ok("something".to_string()),
        }
    }
}

fn slow_worker(delay: Duration) -> (CaptionWorker, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let model = SlowColorModel {
        delay,
        counters: counters.clone(),
    };
    let worker = CaptionWorker::spawn_with_interval(model, Duration::from_millis(10))
        .expect("spawn worker");
    (worker, counters)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn burst_while_busy_is_dropped_and_never_overlaps() {
    let (worker, counters) = slow_worker(Duration::from_millis(500));
    let frame = Frame::filled(8, 8, [255, 0, 0]);

    let offers: Vec<Offer> = (0..3).map(|_| worker.submit(&frame)).collect();
    assert_eq!(offers[0], Offer::Accepted);
    assert!(
        offers.iter().any(|o| *o == Offer::Occupied),
        "expected at least one dropped frame, got {:?}",
        offers
    );

    // The first inference is still running.
    assert_eq!(worker.latest_caption(), "Initializing caption... (CPU)");
    assert_eq!(worker.snapshot().generation, 0);

    assert!(wait_until(Duration::from_secs(5), || worker.snapshot().generation >= 1));
    assert_eq!(worker.latest_caption(), "a red frame");
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_inference_keeps_previous_caption() {
    let (worker, counters) = slow_worker(Duration::from_millis(5));

    assert_eq!(worker.submit(&Frame::filled(4, 4, [255, 255, 255])), Offer::Accepted);
    assert!(wait_until(Duration::from_secs(5), || worker.snapshot().generation == 1));
    assert_eq!(worker.latest_caption(), "a white frame");

    assert!(wait_until(Duration::from_secs(5), || {
        worker.submit(&Frame::filled(4, 4, [0, 0, 0])).is_accepted()
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        counters.calls.load(Ordering::SeqCst) >= 2
    }));
    std::thread::sleep(Duration::from_millis(50));

    let snapshot = worker.snapshot();
    assert_eq!(snapshot.text, "a white frame");
    assert_eq!(snapshot.generation, 1);
    assert!(worker.is_running());
}

#[test]
fn shutdown_closes_submissions() {
    let (worker, _) = slow_worker(Duration::from_millis(5));
    worker.shutdown();
    worker.shutdown();

    assert!(!worker.is_running());
    assert_eq!(worker.submit(&Frame::filled(4, 4, [255, 0, 0])), Offer::Closed);
    assert!(!worker.has_pending());
}

#[test]
fn later_frames_are_captioned_after_the_worker_frees_up() {
    let (worker, _) = slow_worker(Duration::from_millis(20));

    assert!(worker.submit(&Frame::filled(4, 4, [255, 0, 0])).is_accepted());
    assert!(wait_until(Duration::from_secs(5), || worker.latest_caption() == "a red frame"));

    assert!(wait_until(Duration::from_secs(5), || {
        worker.submit(&Frame::filled(4, 4, [255, 255, 255])).is_accepted()
    }));
    assert!(wait_until(Duration::from_secs(5), || worker.latest_caption() == "a white frame"));
    assert_eq!(worker.model_name(), "slow-color");
}

#[test]
fn panicking_model_keeps_the_worker_alive() {
    let (worker, counters) = slow_worker(Duration::from_millis(5));

    assert!(worker.submit(&Frame::filled(4, 4, [255, 255, 255])).is_accepted());
    assert!(wait_until(Duration::from_secs(5), || worker.latest_caption() == "a white frame"));

    assert!(wait_until(Duration::from_secs(5), || {
        worker.submit(&Frame::filled(4, 4, [0, 0, 255])).is_accepted()
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        counters.calls.load(Ordering::SeqCst) >= 2
    }));
    assert_eq!(worker.latest_caption(), "a white frame");

    // The slot drains again and later frames are still captioned.
    assert!(wait_until(Duration::from_secs(5), || {
        worker.submit(&Frame::filled(4, 4, [255, 0, 0])).is_accepted()
    }));
    assert!(wait_until(Duration::from_secs(5), || worker.latest_caption() == "a red frame"));
    assert!(worker.is_running());
    assert_eq!(worker.snapshot().generation, 2);
}
