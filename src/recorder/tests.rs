use super::*;
use crate::camera::{CameraConfigStore, CameraId, CameraIdentity, MemoryCameraStore};
use crate::clock::TokioClock;
use crate::encoder::{EncoderLauncher, EncoderProcess, EncoderRequest, StopOutcome};
use crate::error::EncoderError;
use crate::events::{CameraEvent, EventBus};
use crate::frame::FrameGeometry;
use crate::metadata::{MetadataStore, RecordingLayout, SegmentState};
use crate::probe::SourceProbe;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
}

#[derive(Default)]
struct LaunchLog {
    requests: Mutex<Vec<EncoderRequest>>,
    finishes: AtomicUsize,
}

impl LaunchLog {
    fn outputs(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.output.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }
}

/// Launches encoders that write a few bytes and then run until told to
/// finish, or exit by themselves after `exit_after`
struct FakeLauncher {
    log: Arc<LaunchLog>,
    exit_after: Option<Duration>,
    write_output: bool,
}

impl FakeLauncher {
    fn new(log: Arc<LaunchLog>) -> Self {
        Self {
            log,
            exit_after: None,
            write_output: true,
        }
    }
}

#[async_trait]
impl EncoderLauncher for FakeLauncher {
    async fn launch(
        &self,
        request: &EncoderRequest,
    ) -> Result<Box<dyn EncoderProcess>, EncoderError> {
        if self.write_output {
            std::fs::write(&request.output, b"ftypisom").map_err(|e| EncoderError::Spawn {
                details: e.to_string(),
            })?;
        }
        self.log.requests.lock().push(request.clone());
        Ok(Box::new(FakeEncoder {
            exit_at: self.exit_after.map(|d| Instant::now() + d),
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeEncoder {
    exit_at: Option<Instant>,
    log: Arc<LaunchLog>,
}

#[async_trait]
impl EncoderProcess for FakeEncoder {
    async fn wait_exit(&mut self) -> Result<Option<i32>, EncoderError> {
        match self.exit_at {
            Some(at) => {
                tokio::time::sleep_until(at).await;
                Ok(Some(1))
            }
            None => std::future::pending().await,
        }
    }

    async fn finish(&mut self, _timeout: Duration) -> Result<StopOutcome, EncoderError> {
        self.log.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(StopOutcome::Graceful)
    }
}

/// Unreachable for the first `failures` calls
#[derive(Default)]
struct FakeProbe {
    failures: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl SourceProbe for FakeProbe {
    async fn probe_source(
        &self,
        _url: &str,
        _timeout: Duration,
    ) -> Result<Option<FrameGeometry>, EncoderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EncoderError::Probe {
                details: "connection refused".to_string(),
            });
        }
        Ok(Some(FrameGeometry::new(1280, 720, 25)))
    }
}

struct Harness {
    _dir: TempDir,
    layout: RecordingLayout,
    store: Arc<MemoryCameraStore>,
    log: Arc<LaunchLog>,
    probe: Arc<FakeProbe>,
    events: EventBus,
    exits_rx: mpsc::UnboundedReceiver<CameraId>,
    worker: RecorderWorker,
}

fn camera() -> CameraIdentity {
    CameraIdentity::new(CameraId::new(1), "Front Door", "rtsp://10.0.0.5/stream").with_record(true)
}

fn harness(start: NaiveDateTime, launcher: impl FnOnce(Arc<LaunchLog>) -> FakeLauncher) -> Harness {
    harness_with(start, launcher, |_| {})
}

fn harness_with(
    start: NaiveDateTime,
    launcher: impl FnOnce(Arc<LaunchLog>) -> FakeLauncher,
    tweak: impl FnOnce(&mut RecorderSettings),
) -> Harness {
    let dir = TempDir::new().unwrap();
    let layout = RecordingLayout::new(dir.path(), "mp4");
    let store = Arc::new(MemoryCameraStore::new(1));
    store.insert(camera());

    let log = Arc::new(LaunchLog::default());
    let probe = Arc::new(FakeProbe::default());
    let events = EventBus::new(16);
    let services = RecorderServices {
        launcher: Arc::new(launcher(Arc::clone(&log))),
        probe: probe.clone(),
        clock: Arc::new(TokioClock::starting_at(start)),
        store: store.clone() as Arc<dyn CameraConfigStore>,
        events: events.clone(),
    };

    let mut settings = RecorderSettings {
        layout: layout.clone(),
        max_segment_hours: 24,
        retry_delay: Duration::from_secs(5),
        encoder_stop_timeout: Duration::from_secs(10),
        probe_timeout: Duration::from_secs(10),
        stall_timeout: None,
        fallback_geometry: FrameGeometry::new(640, 360, 15),
        write_logs: false,
    };
    tweak(&mut settings);

    let (exits_tx, exits_rx) = mpsc::unbounded_channel();
    let worker = RecorderWorker::new(camera(), services, settings).with_exit_notifier(exits_tx);

    Harness {
        _dir: dir,
        layout,
        store,
        log,
        probe,
        events,
        exits_rx,
        worker,
    }
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_rollover_deadline_is_midnight_or_max_duration() {
    let start = dt(2024, 1, 1, 10, 0, 0);
    assert_eq!(rollover_deadline(start, 24), dt(2024, 1, 2, 0, 0, 0));
    assert_eq!(rollover_deadline(start, 2), dt(2024, 1, 1, 12, 0, 0));
    assert_eq!(rollover_deadline(dt(2024, 1, 1, 23, 0, 0), 2), dt(2024, 1, 2, 0, 0, 0));
    // A segment starting on the boundary runs the whole next day
    assert_eq!(
        rollover_deadline(dt(2024, 1, 2, 0, 0, 0), 24),
        dt(2024, 1, 3, 0, 0, 0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_segment_rolls_over_at_midnight() {
    let mut h = harness(dt(2024, 1, 1, 23, 59, 0), FakeLauncher::new);
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(90)).await;
    h.worker.stop().await;

    assert_eq!(
        h.log.outputs(),
        vec![
            "Front_Door_2024_01_01_23_59_00.mp4".to_string(),
            "Front_Door_2024_01_02_00_00_00.mp4".to_string(),
        ]
    );

    let before = h.layout.segment_paths("Front_Door", dt(2024, 1, 1, 23, 59, 0));
    assert_eq!(
        read_json(&before.sidecar),
        serde_json::json!({
            "start_time": "2024-01-01T23:59:00",
            "end_time": "2024-01-02T00:00:00",
            "duration_seconds": 60.0
        })
    );

    let after = h.layout.segment_paths("Front_Door", dt(2024, 1, 2, 0, 0, 0));
    assert!(after.dir.ends_with("2024_01_02/Front_Door"));
    let record = MetadataStore::new().read(&after.sidecar).unwrap();
    assert_eq!(record.duration_seconds, Some(30.0));

    assert_eq!(h.log.finishes.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_closes_open_sidecar() {
    let mut h = harness(dt(2024, 1, 1, 10, 0, 0), FakeLauncher::new);
    let mut events = h.events.subscribe();
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let paths = h.layout.segment_paths("Front_Door", dt(2024, 1, 1, 10, 0, 0));
    assert_eq!(
        read_json(&paths.sidecar),
        serde_json::json!({"start_time": "2024-01-01T10:00:00"})
    );
    assert_eq!(h.worker.last_segment().unwrap().state, SegmentState::Open);

    h.worker.stop().await;
    assert!(!h.worker.is_running());

    let record = MetadataStore::new().read(&paths.sidecar).unwrap();
    assert_eq!(record.end_time, Some(dt(2024, 1, 1, 10, 0, 5)));
    assert_eq!(record.duration_seconds, Some(5.0));

    let segment = h.worker.last_segment().unwrap();
    assert_eq!(segment.state, SegmentState::Closed);
    assert_eq!(segment.duration_seconds, Some(5.0));

    // An explicit stop is not an unexpected exit
    assert!(events.try_recv().is_err());
    assert!(h.exits_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_encoder_exit_closes_segment_and_restarts() {
    let mut h = harness(dt(2024, 1, 1, 10, 0, 0), |log| FakeLauncher {
        exit_after: Some(Duration::from_secs(20)),
        ..FakeLauncher::new(log)
    });
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(30)).await;
    h.worker.stop().await;

    // Closed at the exit, reopened after the retry delay
    assert_eq!(
        h.log.outputs(),
        vec![
            "Front_Door_2024_01_01_10_00_00.mp4".to_string(),
            "Front_Door_2024_01_01_10_00_25.mp4".to_string(),
        ]
    );
    let first = h.layout.segment_paths("Front_Door", dt(2024, 1, 1, 10, 0, 0));
    let record = MetadataStore::new().read(&first.sidecar).unwrap();
    assert_eq!(record.duration_seconds, Some(20.0));
    assert!(h.exits_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_source_is_retried() {
    let mut h = harness(dt(2024, 1, 1, 10, 0, 0), FakeLauncher::new);
    h.probe.failures.store(3, Ordering::SeqCst);
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(h.worker.is_running());
    assert_eq!(h.probe.calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        h.log.outputs(),
        vec!["Front_Door_2024_01_01_10_00_15.mp4".to_string()]
    );

    let request = h.log.requests.lock()[0].clone();
    assert_eq!(request.geometry, FrameGeometry::new(1280, 720, 25));
    assert_eq!(request.log_path, None);

    h.worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_settings_change_ends_recorder_at_segment_boundary() {
    let mut h = harness(dt(2024, 1, 1, 10, 0, 0), |log| FakeLauncher {
        exit_after: Some(Duration::from_secs(10)),
        ..FakeLauncher::new(log)
    });
    let mut events = h.events.subscribe();
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.store.insert(camera().with_record(false));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!h.worker.is_running());
    assert_eq!(h.log.outputs().len(), 1);
    assert_eq!(h.exits_rx.try_recv().unwrap(), CameraId::new(1));
    assert!(matches!(
        events.recv().await.unwrap(),
        CameraEvent::RecordingFinished { camera_id } if camera_id == CameraId::new(1)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_segment_is_closed() {
    let mut h = harness_with(dt(2024, 1, 1, 10, 0, 0), FakeLauncher::new, |settings| {
        settings.stall_timeout = Some(Duration::from_secs(10));
    });
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(12)).await;
    let first = h.layout.segment_paths("Front_Door", dt(2024, 1, 1, 10, 0, 0));
    let record = MetadataStore::new().read(&first.sidecar).unwrap();
    assert_eq!(record.duration_seconds, Some(10.0));

    h.worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_segment_is_discarded() {
    let mut h = harness(dt(2024, 1, 1, 10, 0, 0), |log| FakeLauncher {
        exit_after: Some(Duration::from_secs(1)),
        write_output: false,
        ..FakeLauncher::new(log)
    });
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(3)).await;
    h.worker.stop().await;

    let paths = h.layout.segment_paths("Front_Door", dt(2024, 1, 1, 10, 0, 0));
    assert!(!paths.sidecar.exists());
    assert!(!paths.media.exists());
}

#[tokio::test(start_paused = true)]
async fn test_start_is_noop_while_running() {
    let mut h = harness(dt(2024, 1, 1, 10, 0, 0), FakeLauncher::new);
    h.worker.start();
    h.worker.start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.log.outputs().len(), 1);
    h.worker.stop().await;
}
