use super::orchestrator::ShutdownTrigger;
use super::{CamwallOrchestrator, ShutdownReason};
use crate::error::{CamwallError, Result};
use tokio::signal;
use tracing::{error, info, warn};

/// Exit code when a second interrupt skips the graceful stop
const INTERRUPTED_EXIT_CODE: i32 = 130;

impl CamwallOrchestrator {
    /// Run until a shutdown signal or trigger, then stop gracefully.
    /// A second Ctrl+C during the graceful stop falls back to a fast shutdown.
    pub async fn run(&mut self) -> Result<i32> {
        info!("Camwall is running");

        let shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| CamwallError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver.await.map_err(|_| CamwallError::System {
            message: "Shutdown channel closed unexpectedly".to_string(),
        })?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = tokio::select! {
            result = self.shutdown() => result?,
            _ = signal::ctrl_c() => {
                warn!("Second interrupt received");
                INTERRUPTED_EXIT_CODE
            }
        };

        if exit_code == INTERRUPTED_EXIT_CODE {
            self.fast_shutdown().await;
        }

        info!("Camwall shutdown complete");
        Ok(exit_code)
    }

    /// Forward SIGTERM and Ctrl+C to the shutdown trigger
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let trigger = self.shutdown_trigger();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            forward(&trigger, "SIGTERM").await;
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let trigger = self.shutdown_trigger();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                forward(&trigger, "SIGINT").await;
            }
        });
    }
}

async fn forward(trigger: &ShutdownTrigger, name: &str) {
    trigger
        .trigger(ShutdownReason::Signal(name.to_string()))
        .await;
}
