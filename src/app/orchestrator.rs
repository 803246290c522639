use super::registry::WorkerRegistry;
use super::types::{ComponentState, ShutdownReason};
use crate::camera::{CameraConfigStore, CameraId, JsonCameraStore};
use crate::clock::SystemClock;
use crate::config::CamwallConfig;
use crate::encoder::FfmpegLauncher;
use crate::error::Result;
use crate::events::EventBus;
use crate::probe::{DurationProbe, Ffprobe};
use crate::recorder::{RecorderServices, RecorderSettings};
use crate::transport::{DefaultTransportFactory, TransportFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Main application coordinator: repair, recorders, optional live streams
/// and the supervision loop
pub struct CamwallOrchestrator {
    pub(super) config: CamwallConfig,
    pub(super) event_bus: EventBus,
    pub(super) registry: Arc<WorkerRegistry>,
    pub(super) duration_probe: Arc<dyn DurationProbe>,

    // Lifecycle management
    pub(super) exits: Option<mpsc::UnboundedReceiver<CameraId>>,
    pub(super) supervisor: Option<JoinHandle<()>>,
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

/// Requests a graceful shutdown of a running orchestrator
#[derive(Clone)]
pub struct ShutdownTrigger {
    sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
}

impl ShutdownTrigger {
    /// Returns false when shutdown was already requested
    pub async fn trigger(&self, reason: ShutdownReason) -> bool {
        match self.sender.lock().await.take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => false,
        }
    }
}

impl CamwallOrchestrator {
    /// Create an orchestrator backed by the JSON camera store, ffmpeg and
    /// ffprobe
    pub fn new(config: CamwallConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn CameraConfigStore> = Arc::new(JsonCameraStore::open(
            &config.cameras.streams_path,
            &config.cameras.settings_path,
            config.cameras.default_count,
        ));
        let ffprobe = Arc::new(Ffprobe::new(&config.encoder));
        let event_bus = EventBus::new(config.system.event_bus_capacity);

        let services = RecorderServices {
            launcher: Arc::new(FfmpegLauncher::new(config.encoder.clone())),
            probe: ffprobe.clone(),
            clock: Arc::new(SystemClock),
            store,
            events: event_bus.clone(),
        };
        let transports =
            DefaultTransportFactory::shared(config.stream.clone(), config.encoder.clone());

        Ok(Self::with_services(config, services, transports, ffprobe))
    }

    /// Create an orchestrator over caller-provided collaborators
    pub fn with_services(
        config: CamwallConfig,
        services: RecorderServices,
        transports: Arc<dyn TransportFactory>,
        duration_probe: Arc<dyn DurationProbe>,
    ) -> Self {
        let event_bus = services.events.clone();
        let settings = RecorderSettings::from_config(&config);
        let (registry, exits) =
            WorkerRegistry::new(services, settings, transports, config.stream.clone());
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            event_bus,
            registry: Arc::new(registry),
            duration_probe,
            exits: Some(exits),
            supervisor: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> Arc<WorkerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &CamwallConfig {
        &self.config
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            sender: Arc::clone(&self.shutdown_sender),
        }
    }
}
