use super::registry::WorkerRegistry;
use super::{CamwallOrchestrator, ComponentState};
use crate::camera::CameraId;
use crate::error::{CamwallError, Result};
use crate::metadata::{repair_orphans, RecordingLayout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(super) const REPAIR: &str = "repair";
pub(super) const RECORDERS: &str = "recorders";
pub(super) const STREAMS: &str = "streams";
pub(super) const SUPERVISOR: &str = "supervisor";

impl CamwallOrchestrator {
    /// Register components in their initial state
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing camwall components");

        let mut states = self.component_states.lock().await;
        if self.config.system.repair_on_startup {
            states.insert(REPAIR.to_string(), ComponentState::Stopped);
        }
        states.insert(RECORDERS.to_string(), ComponentState::Stopped);
        if self.config.system.live_streams {
            states.insert(STREAMS.to_string(), ComponentState::Stopped);
        }
        states.insert(SUPERVISOR.to_string(), ComponentState::Stopped);
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Repair orphaned sidecars, start workers and the supervision loop
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting camwall");

        if self.config.system.repair_on_startup {
            self.run_repair().await;
        }

        if self.config.system.live_streams {
            self.set_component_state(STREAMS, ComponentState::Starting)
                .await;
            let started = self.registry.start_streams_for_configured_cameras().await;
            self.set_component_state(STREAMS, ComponentState::Running)
                .await;
            info!("Started {} stream worker(s)", started);
        }

        self.set_component_state(RECORDERS, ComponentState::Starting)
            .await;
        self.registry.start_recording_for_configured_cameras().await;
        self.set_component_state(RECORDERS, ComponentState::Running)
            .await;

        let exits = self.exits.take().ok_or_else(|| CamwallError::System {
            message: "Supervisor already started".to_string(),
        })?;
        self.set_component_state(SUPERVISOR, ComponentState::Starting)
            .await;
        self.supervisor = Some(tokio::spawn(supervise(
            Arc::clone(&self.registry),
            exits,
            SupervisorSettings {
                interval: self.config.system.supervise_interval(),
                stop_timeout: self.config.system.shutdown_timeout(),
                with_streams: self.config.system.live_streams,
            },
            self.cancellation_token.clone(),
        )));
        self.set_component_state(SUPERVISOR, ComponentState::Running)
            .await;

        info!("Camwall started successfully");
        Ok(())
    }

    /// Backfill sidecars left open by an earlier crash. Failures are logged;
    /// recording starts regardless.
    async fn run_repair(&self) {
        self.set_component_state(REPAIR, ComponentState::Running)
            .await;
        let layout = RecordingLayout::new(
            &self.config.recording.root,
            &self.config.recording.extension,
        );

        match repair_orphans(&layout, self.duration_probe.as_ref(), false).await {
            Ok(report) => {
                info!("Orphan repair: {}", report.summary());
                for (path, reason) in &report.unrepairable {
                    warn!("Could not repair {}: {}", path.display(), reason);
                }
                self.set_component_state(REPAIR, ComponentState::Stopped)
                    .await;
            }
            Err(e) => {
                error!("Orphan repair failed: {}", e);
                self.set_component_state(REPAIR, ComponentState::Failed)
                    .await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SupervisorSettings {
    pub interval: Duration,
    /// Grace for workers stopped by a settings change
    pub stop_timeout: Duration,
    pub with_streams: bool,
}

/// Restart recorders that exited on their own, pick up camera settings
/// changed on disk, and periodically make sure every camera that should
/// record is recording
pub(super) async fn supervise(
    registry: Arc<WorkerRegistry>,
    mut exits: mpsc::UnboundedReceiver<CameraId>,
    settings: SupervisorSettings,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately and recorders were just started
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(camera_id) = exits.recv() => {
                registry.handle_recording_finished(camera_id).await;
            }
            _ = ticker.tick() => {
                if registry
                    .apply_configuration_changes(settings.stop_timeout, settings.with_streams)
                    .await
                {
                    continue;
                }
                if settings.with_streams {
                    registry.start_streams_for_configured_cameras().await;
                }
                let started = registry.start_recording_for_configured_cameras().await;
                if started > 0 {
                    debug!("Supervisor restarted {} recorder(s)", started);
                }
            }
        }
    }

    info!("Supervisor stopped");
}
