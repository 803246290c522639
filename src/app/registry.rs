use super::types::{WorkerKind, WorkerStatus};
use crate::camera::{CameraConfigStore, CameraId, CameraIdentity};
use crate::config::StreamConfig;
use crate::recorder::{RecorderServices, RecorderSettings, RecorderWorker};
use crate::stream::StreamWorker;
use crate::transport::TransportFactory;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct CameraWorkers {
    stream: Option<StreamWorker>,
    recorder: Option<RecorderWorker>,
}

impl CameraWorkers {
    fn is_empty(&self) -> bool {
        self.stream.is_none() && self.recorder.is_none()
    }

    fn request_stop(&self) {
        if let Some(stream) = &self.stream {
            stream.request_stop();
        }
        if let Some(recorder) = &self.recorder {
            recorder.request_stop();
        }
    }

    /// Upper bound on how long both workers need to stop
    fn stop_timeout(&self) -> Duration {
        self.stream
            .as_ref()
            .map(StreamWorker::stop_timeout)
            .into_iter()
            .chain(self.recorder.as_ref().map(RecorderWorker::stop_timeout))
            .max()
            .unwrap_or_default()
    }

    async fn join(&mut self, deadline: Instant) -> bool {
        let mut clean = true;
        if let Some(stream) = self.stream.as_mut() {
            clean &= stream.join(deadline).await;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            clean &= recorder.join(deadline).await;
        }
        clean
    }
}

/// Time allowed for writing the quit token to one encoder
const QUIT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Owns every stream and recorder worker, keyed by camera id.
///
/// All access goes through one lock, so there is at most one stream worker
/// and one recorder per camera at any time. Bulk stops hold the lock until
/// every worker has exited or been aborted.
pub struct WorkerRegistry {
    services: RecorderServices,
    settings: RecorderSettings,
    transports: Arc<dyn TransportFactory>,
    stream_config: StreamConfig,
    exits: mpsc::UnboundedSender<CameraId>,
    workers: Mutex<HashMap<CameraId, CameraWorkers>>,
    /// Camera settings the current worker set was built from
    applied: parking_lot::Mutex<Vec<CameraIdentity>>,
}

impl WorkerRegistry {
    /// Returns the registry and the receiver on which recorders report
    /// unexpected exits; feed those to [`handle_recording_finished`].
    ///
    /// [`handle_recording_finished`]: WorkerRegistry::handle_recording_finished
    pub fn new(
        services: RecorderServices,
        settings: RecorderSettings,
        transports: Arc<dyn TransportFactory>,
        stream_config: StreamConfig,
    ) -> (Self, mpsc::UnboundedReceiver<CameraId>) {
        let (exits, exits_rx) = mpsc::unbounded_channel();
        let applied = configured_cameras(services.store.as_ref());
        let registry = Self {
            services,
            settings,
            transports,
            stream_config,
            exits,
            workers: Mutex::new(HashMap::new()),
            applied: parking_lot::Mutex::new(applied),
        };
        (registry, exits_rx)
    }

    /// Make sure every camera that should record has a running recorder.
    /// Idempotent; returns how many recorders were started.
    pub async fn start_recording_for_configured_cameras(&self) -> usize {
        let mut workers = self.workers.lock().await;
        let mut started = 0;

        let ids = self.services.store.camera_ids();
        retire_unconfigured(&mut workers, &ids).await;

        for id in ids {
            let entry = workers.entry(id).or_default();

            if let Some(recorder) = &entry.recorder {
                if recorder.is_running() {
                    continue;
                }
                debug!("Removing finished recorder for camera {}", id);
                entry.recorder = None;
            }

            let camera = self.services.store.get_camera_config(id);
            if !camera.should_record() {
                debug!(
                    "Not recording camera {} (enabled: {}, record: {}, url set: {})",
                    id,
                    camera.enabled,
                    camera.record,
                    camera.has_url()
                );
                continue;
            }

            let mut recorder =
                RecorderWorker::new(camera, self.services.clone(), self.settings.clone())
                    .with_exit_notifier(self.exits.clone());
            recorder.start();
            entry.recorder = Some(recorder);
            started += 1;
        }

        workers.retain(|_, entry| !entry.is_empty());
        if started > 0 {
            info!("Started {} recorder(s)", started);
        }
        started
    }

    /// Make sure every enabled camera with a URL has a stream worker.
    ///
    /// A stream worker that gave up stays registered (and failed) until
    /// its camera is stopped or the registry is rebuilt.
    pub async fn start_streams_for_configured_cameras(&self) -> usize {
        let mut workers = self.workers.lock().await;
        let mut started = 0;

        for id in self.services.store.camera_ids() {
            let camera = self.services.store.get_camera_config(id);
            let entry = workers.entry(id).or_default();
            if entry.stream.is_some() || !camera.should_stream() {
                continue;
            }

            let mut stream = StreamWorker::new(
                camera,
                Arc::clone(&self.transports),
                self.services.events.clone(),
                &self.stream_config,
            );
            stream.start();
            entry.stream = Some(stream);
            started += 1;
        }

        workers.retain(|_, entry| !entry.is_empty());
        started
    }

    /// A recorder loop exited without a stop request: drop its handle and
    /// start whatever the current settings call for
    pub async fn handle_recording_finished(&self, camera_id: CameraId) -> usize {
        info!("Recorder for camera {} finished", camera_id);
        {
            let mut workers = self.workers.lock().await;
            if let Some(entry) = workers.get_mut(&camera_id) {
                let finished = entry
                    .recorder
                    .as_ref()
                    .map(|recorder| !recorder.is_running())
                    .unwrap_or(false);
                if finished {
                    entry.recorder = None;
                }
                if entry.is_empty() {
                    workers.remove(&camera_id);
                }
            }
        }
        self.start_recording_for_configured_cameras().await
    }

    /// Signal every worker, then wait for all of them against the one
    /// `deadline`. Workers still running at the deadline are aborted.
    /// Returns whether every worker exited in time.
    pub async fn stop_all(&self, deadline: Instant) -> bool {
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return true;
        }

        info!("Stopping workers for {} camera(s)", workers.len());
        for entry in workers.values() {
            entry.request_stop();
        }

        // Every worker is already stopping, so joining in turn against the
        // shared deadline costs the slowest stop, not the sum. Entries stay
        // registered until joined so a fast shutdown can still reach them.
        let mut clean = true;
        for (id, entry) in workers.iter_mut() {
            if !entry.join(deadline).await {
                warn!("Workers for camera {} were aborted", id);
                clean = false;
            }
        }
        workers.clear();

        if clean {
            info!("All workers stopped");
        } else {
            error!("Some workers missed the shutdown deadline");
        }
        clean
    }

    /// Signal every worker to stop and send each running encoder its quit
    /// token, without waiting for any loop. Encoders finalize their files
    /// even if the process exits right after. Returns how many encoders
    /// were sent the token by this call.
    pub async fn fast_shutdown(&self) -> usize {
        let workers = self.workers.lock().await;
        info!("Fast shutdown of {} camera(s)", workers.len());

        let mut quits = Vec::new();
        for entry in workers.values() {
            entry.request_stop();
            if let Some(quit) = entry.recorder.as_ref().and_then(RecorderWorker::encoder_quit) {
                quits.push(quit);
            }
        }
        drop(workers);

        let sent = join_all(quits.iter().map(|quit| quit.send(QUIT_SEND_TIMEOUT)))
            .await
            .into_iter()
            .filter(|sent| *sent)
            .count();
        info!("Sent quit to {} encoder(s)", sent);
        sent
    }

    /// Stop and remove both workers of one camera
    pub async fn stop_camera(&self, camera_id: CameraId) -> bool {
        let mut workers = self.workers.lock().await;
        let Some(mut entry) = workers.remove(&camera_id) else {
            return false;
        };

        entry.request_stop();
        let timeout = entry.stop_timeout();
        entry.join(Instant::now() + timeout).await;
        info!("Camera {} stopped", camera_id);
        true
    }

    /// Reload camera settings, stop every worker, then start afresh.
    /// Old and new workers never overlap.
    pub async fn rebuild(&self, deadline: Instant, with_streams: bool) -> bool {
        if let Err(e) = self.services.store.reload() {
            error!("Failed to reload camera settings: {}", e);
        }
        *self.applied.lock() = configured_cameras(self.services.store.as_ref());

        let clean = self.stop_all(deadline).await;
        if with_streams {
            self.start_streams_for_configured_cameras().await;
        }
        self.start_recording_for_configured_cameras().await;
        clean
    }

    /// Reload camera settings and rebuild every worker if they differ from
    /// the ones the running set was built from. Settings that fail to load
    /// leave the workers alone. Returns whether a rebuild happened.
    pub async fn apply_configuration_changes(
        &self,
        stop_timeout: Duration,
        with_streams: bool,
    ) -> bool {
        if let Err(e) = self.services.store.reload() {
            warn!("Keeping current camera settings: {}", e);
            return false;
        }

        let current = configured_cameras(self.services.store.as_ref());
        if *self.applied.lock() == current {
            return false;
        }

        info!(
            "Camera settings changed ({} camera slot(s)); rebuilding workers",
            current.len()
        );
        self.rebuild(Instant::now() + stop_timeout, with_streams).await;
        true
    }

    pub async fn worker_states(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.lock().await;
        let mut states = Vec::new();

        for (id, entry) in workers.iter() {
            if let Some(stream) = &entry.stream {
                states.push(WorkerStatus {
                    camera_id: *id,
                    kind: WorkerKind::Stream,
                    running: stream.is_running(),
                    detail: stream.state().to_string(),
                });
            }
            if let Some(recorder) = &entry.recorder {
                states.push(WorkerStatus {
                    camera_id: *id,
                    kind: WorkerKind::Recorder,
                    running: recorder.is_running(),
                    detail: recorder
                        .last_segment()
                        .map(|segment| segment.file_path.display().to_string())
                        .unwrap_or_default(),
                });
            }
        }

        states.sort_by_key(|status| (status.camera_id, status.kind == WorkerKind::Recorder));
        states
    }

    /// Cameras with a running recorder, in id order
    pub async fn recording_cameras(&self) -> Vec<CameraId> {
        let workers = self.workers.lock().await;
        let mut ids: Vec<CameraId> = workers
            .iter()
            .filter(|(_, entry)| {
                entry
                    .recorder
                    .as_ref()
                    .map(RecorderWorker::is_running)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

fn configured_cameras(store: &dyn CameraConfigStore) -> Vec<CameraIdentity> {
    store
        .camera_ids()
        .into_iter()
        .map(|id| store.get_camera_config(id))
        .collect()
}

/// Stop and drop the workers of cameras no longer in `ids`
async fn retire_unconfigured(workers: &mut HashMap<CameraId, CameraWorkers>, ids: &[CameraId]) {
    let configured: HashSet<CameraId> = ids.iter().copied().collect();
    let retired: Vec<CameraId> = workers
        .keys()
        .filter(|id| !configured.contains(id))
        .copied()
        .collect();

    for id in retired {
        let Some(mut entry) = workers.remove(&id) else {
            continue;
        };
        info!("Camera {} is no longer configured; stopping its workers", id);
        entry.request_stop();
        let timeout = entry.stop_timeout();
        entry.join(Instant::now() + timeout).await;
    }
}
