use super::types::WorkerStatus;
use super::{CamwallOrchestrator, ComponentState};
use std::collections::HashMap;
use tracing::{debug, info};

/// Point-in-time view of the daemon
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub components: HashMap<String, ComponentState>,
    pub workers: Vec<WorkerStatus>,
}

impl SystemStatus {
    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.running).count()
    }
}

impl CamwallOrchestrator {
    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        let previous = self
            .component_states
            .lock()
            .await
            .insert(component.to_string(), state.clone());
        if previous.as_ref() != Some(&state) {
            debug!("Component '{}' state changed to: {:?}", component, state);
        }
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().await.clone()
    }

    /// Component states together with every registered worker
    pub async fn status(&self) -> SystemStatus {
        SystemStatus {
            components: self.get_all_component_states().await,
            workers: self.registry.worker_states().await,
        }
    }

    /// Log one line per worker
    pub async fn log_status(&self) {
        let status = self.status().await;
        info!(
            "{} of {} worker(s) running",
            status.running_workers(),
            status.workers.len()
        );
        for worker in &status.workers {
            info!(
                "  camera {} {}: {} {}",
                worker.camera_id,
                worker.kind,
                if worker.running { "running" } else { "stopped" },
                worker.detail
            );
        }
    }
}
