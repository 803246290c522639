use super::*;
use crate::camera::{CameraId, CameraIdentity};
use crate::config::StreamConfig;
use crate::error::TransportError;
use crate::events::{CameraEvent, EventBus};
use crate::frame::{FrameFormat, FrameGeometry};
use crate::transport::{DecodedFrame, TransportFactory, TransportSession, TransportState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// What one `open` call does
#[derive(Debug, Clone, Copy)]
enum Step {
    FailOpen,
    /// Open, deliver this many frames, then end the stream
    Frames(usize),
    /// Open and deliver frames forever
    Endless,
}

#[derive(Default)]
struct SessionCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_now: AtomicBool,
}

struct ScriptedSession {
    steps: Arc<Mutex<VecDeque<Step>>>,
    counters: Arc<SessionCounters>,
    remaining: Option<usize>,
}

#[async_trait]
impl TransportSession for ScriptedSession {
    async fn open(&mut self, _timeout: Duration) -> Result<FrameGeometry, TransportError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        // Exhausted scripts behave like an unreachable host
        let step = self.steps.lock().pop_front().unwrap_or(Step::FailOpen);
        match step {
            Step::FailOpen => Err(TransportError::OpenFailed {
                url: "rtsp://unreachable/stream".to_string(),
                details: "Connection refused".to_string(),
            }),
            Step::Frames(count) => {
                self.remaining = Some(count);
                self.counters.open_now.store(true, Ordering::SeqCst);
                Ok(FrameGeometry::new(2, 2, 25))
            }
            Step::Endless => {
                self.remaining = None;
                self.counters.open_now.store(true, Ordering::SeqCst);
                Ok(FrameGeometry::new(2, 2, 25))
            }
        }
    }

    async fn read_frame(&mut self, _timeout: Duration) -> Result<DecodedFrame, TransportError> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::EndOfStream);
            }
            *remaining -= 1;
        }
        Ok(DecodedFrame {
            data: vec![0u8; 12],
            width: 2,
            height: 2,
            format: FrameFormat::Rgb24,
        })
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.counters.open_now.store(false, Ordering::SeqCst);
    }
}

struct ScriptedFactory {
    steps: Arc<Mutex<VecDeque<Step>>>,
    counters: Arc<SessionCounters>,
}

impl ScriptedFactory {
    fn new(steps: &[Step]) -> (Arc<Self>, Arc<SessionCounters>) {
        let counters = Arc::new(SessionCounters::default());
        let factory = Arc::new(Self {
            steps: Arc::new(Mutex::new(steps.iter().copied().collect())),
            counters: Arc::clone(&counters),
        });
        (factory, counters)
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, _camera: &CameraIdentity) -> Box<dyn TransportSession> {
        Box::new(ScriptedSession {
            steps: Arc::clone(&self.steps),
            counters: Arc::clone(&self.counters),
            remaining: None,
        })
    }
}

fn camera() -> CameraIdentity {
    CameraIdentity::new(CameraId::new(1), "Gate", "rtsp://admin:pw@unreachable/stream")
}

fn stream_config() -> StreamConfig {
    StreamConfig {
        max_reconnect_attempts: 3,
        retry_delay_ms: 3_000,
        ..StreamConfig::default()
    }
}

/// Connection status flags received so far, in order
fn drain_status(rx: &mut broadcast::Receiver<CameraEvent>) -> Vec<bool> {
    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CameraEvent::ConnectionStatus { connected, .. } = event {
            statuses.push(connected);
        }
    }
    statuses
}

async fn wait_for_state(worker: &StreamWorker, wanted: TransportState) {
    let mut rx = worker.subscribe_state();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_source_gives_up_after_max_attempts() {
    let (factory, counters) = ScriptedFactory::new(&[]);
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();

    let mut worker = StreamWorker::new(camera(), factory, bus.clone(), &stream_config());
    worker.start();

    wait_for_state(&worker, TransportState::Failed).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!worker.is_running());

    assert_eq!(drain_status(&mut rx), vec![false, false, false]);
    assert_eq!(counters.opens.load(Ordering::SeqCst), 3);

    // Nothing further once failed
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(drain_status(&mut rx).is_empty());
    assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
    assert_eq!(worker.state(), TransportState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_join_keeps_failed_state() {
    let (factory, _counters) = ScriptedFactory::new(&[]);
    let mut worker = StreamWorker::new(camera(), factory, EventBus::new(64), &stream_config());
    worker.start();

    wait_for_state(&worker, TransportState::Failed).await;
    assert!(worker.join(Instant::now() + Duration::from_secs(5)).await);
    assert_eq!(worker.state(), TransportState::Failed);

    // Stopping a failed worker reports it as failed too
    worker.stop().await;
    assert_eq!(worker.state(), TransportState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_join_marks_a_live_worker_stopped() {
    let (factory, _counters) = ScriptedFactory::new(&[Step::Endless]);
    let mut worker = StreamWorker::new(camera(), factory, EventBus::new(64), &stream_config());
    worker.start();

    wait_for_state(&worker, TransportState::Streaming).await;
    worker.request_stop();
    assert!(worker.join(Instant::now() + Duration::from_secs(5)).await);
    assert_eq!(worker.state(), TransportState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_spaced_by_delay() {
    let (factory, counters) = ScriptedFactory::new(&[]);
    let mut worker = StreamWorker::new(camera(), factory, EventBus::new(8), &stream_config());

    let started = tokio::time::Instant::now();
    worker.start();
    wait_for_state(&worker, TransportState::Failed).await;

    // Two sleeps between three attempts
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_failure_count() {
    let (factory, counters) = ScriptedFactory::new(&[
        Step::Frames(2),
        Step::FailOpen,
        Step::Frames(2),
    ]);
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();

    let mut worker = StreamWorker::new(camera(), factory, bus.clone(), &stream_config());
    worker.start();
    wait_for_state(&worker, TransportState::Failed).await;

    // Two failures, reconnect, then three more before giving up
    assert_eq!(
        drain_status(&mut rx),
        vec![true, false, false, true, false, false, false]
    );
    assert_eq!(counters.opens.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_frames_reach_bus_and_latest_slot() {
    let (factory, _counters) = ScriptedFactory::new(&[Step::Endless]);
    let bus = EventBus::new(256);
    let mut rx = bus.subscribe();

    let mut worker = StreamWorker::new(camera(), factory, bus.clone(), &stream_config());
    worker.start();
    wait_for_state(&worker, TransportState::Streaming).await;

    tokio::time::sleep(Duration::from_millis(500)).await;

    let latest = worker.latest_frame().expect("a frame should be available");
    assert_eq!(latest.camera_id, CameraId::new(1));
    assert!(latest.validate_size());

    let mut frame_ids = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CameraEvent::FrameReady { frame, .. } = event {
            frame_ids.push(frame.id);
        }
    }
    assert!(frame_ids.len() >= 5);
    assert!(frame_ids.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(frame_ids.last().copied(), Some(latest.id));

    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_transport_from_the_loop() {
    let (factory, counters) = ScriptedFactory::new(&[Step::Endless]);
    let mut worker = StreamWorker::new(camera(), factory, EventBus::new(256), &stream_config());

    worker.start();
    // A second start while running must not spawn another loop
    worker.start();
    wait_for_state(&worker, TransportState::Streaming).await;
    assert!(counters.open_now.load(Ordering::SeqCst));

    worker.stop().await;

    assert!(!worker.is_running());
    assert_eq!(worker.state(), TransportState::Stopped);
    assert!(!counters.open_now.load(Ordering::SeqCst));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_is_prompt() {
    let (factory, _counters) = ScriptedFactory::new(&[]);
    let config = StreamConfig {
        max_reconnect_attempts: 100,
        retry_delay_ms: 60_000,
        max_retry_delay_ms: 60_000,
        ..StreamConfig::default()
    };
    let mut worker = StreamWorker::new(camera(), factory, EventBus::new(8), &config);

    worker.start();
    wait_for_state(&worker, TransportState::Reconnecting).await;

    let started = tokio::time::Instant::now();
    worker.stop().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(worker.state(), TransportState::Stopped);
}
