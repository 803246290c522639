use super::schedule::rollover_deadline;
use crate::camera::{CameraConfigStore, CameraId, CameraIdentity};
use crate::clock::Clock;
use crate::config::CamwallConfig;
use crate::encoder::{EncoderLauncher, EncoderRequest, QuitSignal, StopOutcome};
use crate::error::EncoderError;
use crate::events::{CameraEvent, EventBus};
use crate::frame::FrameGeometry;
use crate::metadata::{MetadataStore, RecordingLayout, RecordingSegment, SegmentPaths};
use crate::probe::SourceProbe;
use crate::recovery::{Backoff, RecoveryAction, RetryPolicy};
use crate::worker::WorkerTask;
use chrono::NaiveDateTime;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every recorder
#[derive(Clone)]
pub struct RecorderServices {
    pub launcher: Arc<dyn EncoderLauncher>,
    pub probe: Arc<dyn SourceProbe>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn CameraConfigStore>,
    pub events: EventBus,
}

/// Recording knobs, resolved from configuration once per registry
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub layout: RecordingLayout,
    pub max_segment_hours: u32,
    pub retry_delay: Duration,
    pub encoder_stop_timeout: Duration,
    pub probe_timeout: Duration,
    pub stall_timeout: Option<Duration>,
    /// Geometry used when the probe cannot tell
    pub fallback_geometry: FrameGeometry,
    pub write_logs: bool,
}

impl RecorderSettings {
    pub fn from_config(config: &CamwallConfig) -> Self {
        Self {
            layout: RecordingLayout::new(&config.recording.root, &config.recording.extension),
            max_segment_hours: config.recording.max_segment_hours,
            retry_delay: config.recording.retry_delay(),
            encoder_stop_timeout: config.recording.encoder_stop_timeout(),
            probe_timeout: config.recording.probe_timeout(),
            stall_timeout: config.recording.stall_timeout(),
            fallback_geometry: FrameGeometry::new(
                config.stream.default_width,
                config.stream.default_height,
                config.stream.default_fps,
            ),
            write_logs: config.encoder.write_logs,
        }
    }
}

/// Records one camera into rotating segments until stopped.
///
/// The encoder reads the RTSP source itself. Each segment gets a sidecar
/// holding only its start time until the segment is closed, at rollover,
/// on encoder failure or on stop. Source and encoder failures are retried
/// without limit after `retry_delay`.
///
/// The camera's settings are re-read between segments. If they no longer
/// match this worker's snapshot the loop ends and the exit is reported as
/// `RecordingFinished`, as is any other exit not caused by a stop request.
pub struct RecorderWorker {
    camera: CameraIdentity,
    services: RecorderServices,
    settings: RecorderSettings,
    exits: Option<mpsc::UnboundedSender<CameraId>>,
    segment: Arc<watch::Sender<Option<RecordingSegment>>>,
    encoder_quit: Arc<Mutex<Option<QuitSignal>>>,
    exited: Arc<AtomicBool>,
    task: WorkerTask,
}

impl RecorderWorker {
    pub fn new(
        camera: CameraIdentity,
        services: RecorderServices,
        settings: RecorderSettings,
    ) -> Self {
        let (segment, _) = watch::channel(None);
        Self {
            camera,
            services,
            settings,
            exits: None,
            segment: Arc::new(segment),
            encoder_quit: Arc::new(Mutex::new(None)),
            exited: Arc::new(AtomicBool::new(false)),
            task: WorkerTask::default(),
        }
    }

    /// Report unexpected loop exits on `exits`
    pub fn with_exit_notifier(mut self, exits: mpsc::UnboundedSender<CameraId>) -> Self {
        self.exits = Some(exits);
        self
    }

    /// Begin recording; a no-op while the loop is running
    pub fn start(&mut self) {
        if self.task.is_running() {
            debug!("Recorder for camera {} already running", self.camera.id);
            return;
        }

        let context = RecorderContext {
            camera: self.camera.clone(),
            services: self.services.clone(),
            settings: self.settings.clone(),
            metadata: MetadataStore::new(),
            exits: self.exits.clone(),
            segment: Arc::clone(&self.segment),
            encoder_quit: Arc::clone(&self.encoder_quit),
            exited: Arc::clone(&self.exited),
        };

        self.exited.store(false, Ordering::SeqCst);
        self.task.spawn(|cancel| run_recorder_loop(context, cancel));
        info!(
            "Started recorder for camera {} ({})",
            self.camera.id,
            self.camera.redacted_url()
        );
    }

    /// Ask the loop to close its segment and exit, without waiting
    pub fn request_stop(&self) {
        self.task.request_stop();
    }

    /// Wait for the loop to close its segment, aborting at `deadline`.
    /// An aborted loop kills its encoder and leaves the sidecar for repair.
    pub async fn join(&mut self, deadline: Instant) -> bool {
        let name = format!("Recorder for camera {}", self.camera.id);
        self.task.join_until(deadline, &name).await
    }

    /// Stop and wait for the current segment to be closed
    pub async fn stop(&mut self) {
        info!("Stop requested for recorder of camera {}", self.camera.id);
        self.request_stop();
        let deadline = Instant::now() + self.stop_timeout();
        self.join(deadline).await;
    }

    /// False as soon as the loop has decided to exit, before its exit is
    /// reported
    pub fn is_running(&self) -> bool {
        self.task.is_running() && !self.exited.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.task.stop_requested()
    }

    /// The segment being written, or the last one closed
    pub fn last_segment(&self) -> Option<RecordingSegment> {
        self.segment.borrow().clone()
    }

    /// Quit handle of the encoder currently writing a segment, if any.
    /// Sending it lets the encoder finalize its file even if this loop is
    /// never polled again.
    pub fn encoder_quit(&self) -> Option<QuitSignal> {
        self.encoder_quit.lock().clone()
    }

    pub fn camera(&self) -> &CameraIdentity {
        &self.camera
    }

    /// Upper bound on how long closing the current segment takes
    pub fn stop_timeout(&self) -> Duration {
        self.settings.encoder_stop_timeout + Duration::from_secs(2)
    }
}

struct RecorderContext {
    camera: CameraIdentity,
    services: RecorderServices,
    settings: RecorderSettings,
    metadata: MetadataStore,
    exits: Option<mpsc::UnboundedSender<CameraId>>,
    segment: Arc<watch::Sender<Option<RecordingSegment>>>,
    encoder_quit: Arc<Mutex<Option<QuitSignal>>>,
    exited: Arc<AtomicBool>,
}

impl RecorderContext {
    fn report_finished(&self) {
        self.services.events.publish(CameraEvent::RecordingFinished {
            camera_id: self.camera.id,
        });
        if let Some(exits) = &self.exits {
            // The supervisor may already be gone during shutdown
            let _ = exits.send(self.camera.id);
        }
    }
}

enum LoopExit {
    Stopped,
    Reconfigured,
    GaveUp,
}

enum SegmentEnd {
    Rollover,
    Stopped,
    Failed(String),
}

async fn run_recorder_loop(ctx: RecorderContext, cancel: CancellationToken) {
    let outcome = AssertUnwindSafe(record_until_stopped(&ctx, &cancel))
        .catch_unwind()
        .await;

    let unexpected = match outcome {
        Ok(LoopExit::Stopped) => {
            info!("Recorder for camera {} stopped", ctx.camera.id);
            false
        }
        Ok(LoopExit::Reconfigured) => {
            info!(
                "Recorder for camera {} exiting: camera settings changed",
                ctx.camera.id
            );
            true
        }
        Ok(LoopExit::GaveUp) => {
            warn!("Recorder for camera {} gave up", ctx.camera.id);
            true
        }
        Err(_) => {
            error!("Recorder for camera {} panicked", ctx.camera.id);
            true
        }
    };

    ctx.exited.store(true, Ordering::SeqCst);
    if unexpected {
        ctx.report_finished();
    }
}

async fn record_until_stopped(ctx: &RecorderContext, cancel: &CancellationToken) -> LoopExit {
    let label = format!("recorder for camera {}", ctx.camera.id);
    let mut backoff = Backoff::new(RetryPolicy::unbounded(ctx.settings.retry_delay));

    loop {
        if cancel.is_cancelled() {
            return LoopExit::Stopped;
        }

        let current = ctx.services.store.get_camera_config(ctx.camera.id);
        if current != ctx.camera {
            if !current.should_record() {
                info!("Recording no longer requested for camera {}", ctx.camera.id);
            }
            return LoopExit::Reconfigured;
        }

        match record_segment(ctx, cancel).await {
            SegmentEnd::Rollover => backoff.reset(),
            SegmentEnd::Stopped => return LoopExit::Stopped,
            SegmentEnd::Failed(reason) => {
                warn!("Camera {} recording interrupted: {}", ctx.camera.id, reason);
                match backoff.on_failure(&label) {
                    RecoveryAction::GiveUp => return LoopExit::GaveUp,
                    RecoveryAction::RetryAfterDelay(delay) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return LoopExit::Stopped,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Probe, open, run and close one segment
async fn record_segment(ctx: &RecorderContext, cancel: &CancellationToken) -> SegmentEnd {
    let geometry = match probe_source(ctx, cancel).await {
        Ok(geometry) => geometry,
        Err(end) => return end,
    };

    let start = ctx.services.clock.now();
    let rollover_at = rollover_deadline(start, ctx.settings.max_segment_hours);
    let paths = ctx
        .settings
        .layout
        .segment_paths(&ctx.camera.folder_name(), start);

    if let Err(e) = std::fs::create_dir_all(&paths.dir) {
        return SegmentEnd::Failed(format!("cannot create {}: {}", paths.dir.display(), e));
    }

    let request = EncoderRequest {
        source_url: ctx.camera.rtsp_url.clone(),
        output: paths.media.clone(),
        log_path: ctx.settings.write_logs.then(|| paths.log.clone()),
        geometry,
    };
    let mut encoder = match ctx.services.launcher.launch(&request).await {
        Ok(encoder) => encoder,
        Err(e) => return SegmentEnd::Failed(e.to_string()),
    };
    *ctx.encoder_quit.lock() = Some(encoder.quit_signal());

    if let Err(e) = ctx.metadata.write_start(&paths.sidecar, start) {
        warn!(
            "Camera {}: {}; the segment will need repair",
            ctx.camera.id, e
        );
    }

    let mut segment = RecordingSegment::open(ctx.camera.id, &paths, start);
    ctx.segment.send_replace(Some(segment.clone()));
    info!(
        "Camera {} recording {} (rollover at {})",
        ctx.camera.id,
        paths.media.display(),
        rollover_at
    );

    let deadline = ctx.services.clock.instant_at(rollover_at);
    let end = tokio::select! {
        _ = cancel.cancelled() => SegmentEnd::Stopped,
        _ = tokio::time::sleep_until(deadline) => SegmentEnd::Rollover,
        exit = encoder.wait_exit() => SegmentEnd::Failed(describe_exit(exit)),
        stalled = watch_for_stall(&paths.media, ctx.settings.stall_timeout) => {
            SegmentEnd::Failed(format!("no data written for {:?}", stalled))
        }
    };

    match encoder.finish(ctx.settings.encoder_stop_timeout).await {
        Ok(StopOutcome::Killed) => warn!(
            "Camera {}: encoder ignored quit within {:?} and was killed",
            ctx.camera.id, ctx.settings.encoder_stop_timeout
        ),
        Ok(outcome) => debug!("Camera {} encoder finished: {:?}", ctx.camera.id, outcome),
        Err(e) => warn!("Camera {}: failed to stop encoder: {}", ctx.camera.id, e),
    }
    ctx.encoder_quit.lock().take();
    drop(encoder);

    close_segment(ctx, &paths, &mut segment, start);
    ctx.segment.send_replace(Some(segment));
    end
}

/// Confirm the source answers before an encoder is spent on it
async fn probe_source(
    ctx: &RecorderContext,
    cancel: &CancellationToken,
) -> Result<FrameGeometry, SegmentEnd> {
    let timeout = ctx.settings.probe_timeout;
    let probed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SegmentEnd::Stopped),
        result = tokio::time::timeout(
            timeout,
            ctx.services.probe.probe_source(&ctx.camera.rtsp_url, timeout),
        ) => result,
    };

    match probed {
        Ok(Ok(Some(geometry))) => {
            debug!(
                "Camera {} source is {}x{} @ {}fps",
                ctx.camera.id, geometry.width, geometry.height, geometry.fps
            );
            Ok(geometry)
        }
        Ok(Ok(None)) => {
            debug!(
                "Camera {} geometry unknown; using defaults",
                ctx.camera.id
            );
            Ok(ctx.settings.fallback_geometry)
        }
        Ok(Err(e)) => Err(SegmentEnd::Failed(format!("source unavailable: {}", e))),
        Err(_) => Err(SegmentEnd::Failed(format!(
            "source probe timed out after {:?}",
            timeout
        ))),
    }
}

/// Write the end of the segment into its sidecar. A segment whose encoder
/// never wrote anything is removed instead.
fn close_segment(
    ctx: &RecorderContext,
    paths: &SegmentPaths,
    segment: &mut RecordingSegment,
    start: NaiveDateTime,
) {
    let end = ctx.services.clock.now();
    let duration = (end - start)
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or(0.0)
        .max(0.0);

    if media_is_empty(&paths.media) {
        warn!(
            "Camera {}: no data written to {}; discarding segment",
            ctx.camera.id,
            paths.media.display()
        );
        let _ = std::fs::remove_file(&paths.media);
        let _ = std::fs::remove_file(&paths.sidecar);
        segment.close(end, 0.0);
        return;
    }

    match ctx.metadata.finalize(&paths.sidecar, start, end, duration) {
        Ok(record) => {
            segment.close(end, record.duration_seconds.unwrap_or(duration));
            info!(
                "Camera {} segment closed: {} ({:.2}s)",
                ctx.camera.id,
                paths.media.display(),
                duration
            );
        }
        Err(e) => {
            // Left open on disk; the next repair pass backfills it
            segment.close(end, duration);
            warn!("Camera {}: {}", ctx.camera.id, e);
        }
    }
}

fn media_is_empty(media: &Path) -> bool {
    std::fs::metadata(media)
        .map(|m| m.len() == 0)
        .unwrap_or(true)
}

fn describe_exit(exit: Result<Option<i32>, EncoderError>) -> String {
    match exit {
        Ok(Some(code)) => format!("encoder exited with code {}", code),
        Ok(None) => "encoder terminated by signal".to_string(),
        Err(e) => e.to_string(),
    }
}

/// Resolve once `media` has not grown for `limit`; never resolves when
/// the watchdog is disabled. Returns the limit.
async fn watch_for_stall(media: &Path, limit: Option<Duration>) -> Duration {
    let Some(limit) = limit else {
        return std::future::pending().await;
    };

    let mut ticker = tokio::time::interval(limit.min(Duration::from_secs(5)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_size = None;
    let mut last_growth = Instant::now();

    loop {
        ticker.tick().await;
        let size = std::fs::metadata(media).map(|m| m.len()).ok();
        if size > last_size {
            last_size = size;
            last_growth = Instant::now();
        } else if last_growth.elapsed() >= limit {
            return limit;
        }
    }
}
