use super::startup::{RECORDERS, STREAMS, SUPERVISOR};
use super::{CamwallOrchestrator, ComponentState};
use crate::error::Result;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

impl CamwallOrchestrator {
    /// Stop the supervisor, then every worker against one shared deadline.
    /// Returns the process exit code.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Stops the supervisor so nothing is restarted behind our back
        self.cancellation_token.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            self.set_component_state(SUPERVISOR, ComponentState::Stopping)
                .await;
            match timeout(Duration::from_secs(5), supervisor).await {
                Ok(_) => {
                    self.set_component_state(SUPERVISOR, ComponentState::Stopped)
                        .await
                }
                Err(_) => {
                    warn!("Supervisor did not stop in time");
                    self.set_component_state(SUPERVISOR, ComponentState::Failed)
                        .await;
                }
            }
        }

        let live_streams = self.config.system.live_streams;
        self.set_component_state(RECORDERS, ComponentState::Stopping)
            .await;
        if live_streams {
            self.set_component_state(STREAMS, ComponentState::Stopping)
                .await;
        }

        let deadline = Instant::now() + self.config.system.shutdown_timeout();
        let clean = self.registry.stop_all(deadline).await;

        let final_state = if clean {
            ComponentState::Stopped
        } else {
            ComponentState::Failed
        };
        self.set_component_state(RECORDERS, final_state.clone())
            .await;
        if live_streams {
            self.set_component_state(STREAMS, final_state).await;
        }

        let exit_code = if clean {
            0
        } else {
            error!(
                "Workers did not stop within {:?}; open segments are left for repair",
                self.config.system.shutdown_timeout()
            );
            1
        };

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Signal every worker and return without waiting
    pub async fn fast_shutdown(&self) {
        warn!("Fast shutdown: not waiting for workers");
        self.cancellation_token.cancel();
        self.registry.fast_shutdown().await;
    }
}
