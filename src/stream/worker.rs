use crate::camera::CameraIdentity;
use crate::config::StreamConfig;
use crate::events::{CameraEvent, EventBus};
use crate::frame::FrameData;
use crate::recovery::{Backoff, RecoveryAction, RetryPolicy};
use crate::transport::{TransportFactory, TransportSession, TransportState};
use crate::worker::WorkerTask;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Keeps a live decoded-frame feed for one camera.
///
/// Frames go to a single-slot "latest frame" watch and to the event bus as
/// `FrameReady`. Connection changes are published as `ConnectionStatus`.
/// After `max_reconnect_attempts` consecutive failures the worker enters
/// [`TransportState::Failed`] and exits for good.
pub struct StreamWorker {
    camera: CameraIdentity,
    factory: Arc<dyn TransportFactory>,
    events: EventBus,
    policy: RetryPolicy,
    open_timeout: Duration,
    read_timeout: Duration,
    state: Arc<watch::Sender<TransportState>>,
    latest: Arc<watch::Sender<Option<FrameData>>>,
    task: WorkerTask,
}

impl StreamWorker {
    pub fn new(
        camera: CameraIdentity,
        factory: Arc<dyn TransportFactory>,
        events: EventBus,
        config: &StreamConfig,
    ) -> Self {
        let (state, _) = watch::channel(TransportState::Idle);
        let (latest, _) = watch::channel(None);
        Self {
            camera,
            factory,
            events,
            policy: RetryPolicy::from_stream_config(config),
            open_timeout: config.open_timeout(),
            read_timeout: config.read_timeout(),
            state: Arc::new(state),
            latest: Arc::new(latest),
            task: WorkerTask::default(),
        }
    }

    /// Begin streaming; a no-op while the loop is running
    pub fn start(&mut self) {
        if self.task.is_running() {
            debug!("Stream worker for camera {} already running", self.camera.id);
            return;
        }

        let context = StreamContext {
            camera: self.camera.clone(),
            session: self.factory.create(&self.camera),
            events: self.events.clone(),
            policy: self.policy.clone(),
            open_timeout: self.open_timeout,
            read_timeout: self.read_timeout,
            state: Arc::clone(&self.state),
            latest: Arc::clone(&self.latest),
        };

        self.state.send_replace(TransportState::Idle);
        self.task.spawn(|cancel| run_stream_loop(context, cancel));
        info!(
            "Started stream worker for camera {} ({})",
            self.camera.id,
            self.camera.redacted_url()
        );
    }

    /// Ask the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.task.request_stop();
    }

    /// Wait for the loop to release its transport, aborting at `deadline`.
    /// A worker that gave up stays `Failed`.
    pub async fn join(&mut self, deadline: Instant) -> bool {
        let name = format!("Stream worker for camera {}", self.camera.id);
        let clean = self.task.join_until(deadline, &name).await;
        self.state.send_if_modified(|state| {
            if *state == TransportState::Failed || *state == TransportState::Stopped {
                return false;
            }
            *state = TransportState::Stopped;
            true
        });
        clean
    }

    /// Stop and wait for the loop to exit
    pub async fn stop(&mut self) {
        info!("Stop requested for stream worker of camera {}", self.camera.id);
        self.request_stop();
        let deadline = Instant::now() + self.stop_timeout();
        self.join(deadline).await;
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// Most recent frame; older frames are never queued
    pub fn latest_frame(&self) -> Option<FrameData> {
        self.latest.borrow().clone()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<Option<FrameData>> {
        self.latest.subscribe()
    }

    pub fn camera(&self) -> &CameraIdentity {
        &self.camera
    }

    /// Upper bound on how long the loop needs to observe a stop and close
    pub fn stop_timeout(&self) -> Duration {
        self.read_timeout + Duration::from_secs(3)
    }
}

struct StreamContext {
    camera: CameraIdentity,
    session: Box<dyn TransportSession>,
    events: EventBus,
    policy: RetryPolicy,
    open_timeout: Duration,
    read_timeout: Duration,
    state: Arc<watch::Sender<TransportState>>,
    latest: Arc<watch::Sender<Option<FrameData>>>,
}

impl StreamContext {
    fn set_state(&self, state: TransportState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Camera {} stream {} -> {}", self.camera.id, previous, state);
        }
    }

    fn publish_status(&self, connected: bool) {
        self.events.publish(CameraEvent::ConnectionStatus {
            camera_id: self.camera.id,
            connected,
            timestamp: SystemTime::now(),
        });
    }
}

enum SessionEnd {
    Stopped,
    Failed(String),
}

async fn run_stream_loop(mut ctx: StreamContext, cancel: CancellationToken) {
    let label = format!("camera {}", ctx.camera.id);
    let mut backoff = Backoff::new(ctx.policy.clone());
    let mut next_frame_id: u64 = 0;

    let final_state = loop {
        if cancel.is_cancelled() {
            break TransportState::Stopped;
        }

        ctx.set_state(TransportState::Connecting);
        match stream_once(&mut ctx, &cancel, &mut backoff, &mut next_frame_id).await {
            SessionEnd::Stopped => break TransportState::Stopped,
            SessionEnd::Failed(reason) => {
                warn!("Camera {} stream error: {}", ctx.camera.id, reason);
                ctx.publish_status(false);
            }
        }
        ctx.session.close().await;

        match backoff.on_failure(&label) {
            RecoveryAction::GiveUp => {
                warn!(
                    "Camera {}: giving up after {} consecutive failures",
                    ctx.camera.id,
                    backoff.failures()
                );
                break TransportState::Failed;
            }
            RecoveryAction::RetryAfterDelay(delay) => {
                ctx.set_state(TransportState::Reconnecting);
                tokio::select! {
                    _ = cancel.cancelled() => break TransportState::Stopped,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    ctx.session.close().await;
    ctx.set_state(final_state);
    info!("Stream worker for camera {} exited ({})", ctx.camera.id, final_state);
}

/// One connect-and-read cycle; returns when the session fails or a stop
/// is requested
async fn stream_once(
    ctx: &mut StreamContext,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
    next_frame_id: &mut u64,
) -> SessionEnd {
    let open_timeout = ctx.open_timeout;
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return SessionEnd::Stopped,
        result = ctx.session.open(open_timeout) => result,
    };

    if let Err(e) = opened {
        return SessionEnd::Failed(e.to_string());
    }

    backoff.reset();
    ctx.publish_status(true);
    ctx.set_state(TransportState::Streaming);

    loop {
        let read_timeout = ctx.read_timeout;
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Stopped,
            result = ctx.session.read_frame(read_timeout) => result,
        };

        match frame {
            Ok(decoded) => {
                let frame = FrameData::new(
                    *next_frame_id,
                    ctx.camera.id,
                    SystemTime::now(),
                    decoded.data,
                    decoded.width,
                    decoded.height,
                    decoded.format,
                );
                *next_frame_id += 1;

                trace!(
                    "Camera {} frame {} ({}x{})",
                    ctx.camera.id,
                    frame.id,
                    frame.width,
                    frame.height
                );
                ctx.latest.send_replace(Some(frame.clone()));
                ctx.events.publish(CameraEvent::FrameReady {
                    camera_id: ctx.camera.id,
                    frame,
                });
            }
            Err(e) => return SessionEnd::Failed(e.to_string()),
        }
    }
}
