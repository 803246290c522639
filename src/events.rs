use crate::camera::CameraId;
use crate::frame::FrameData;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events surfaced to consumers of the camera engine
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// A stream worker connected to or lost its source
    ConnectionStatus {
        camera_id: CameraId,
        connected: bool,
        timestamp: SystemTime,
    },
    /// A decoded frame is available
    FrameReady {
        camera_id: CameraId,
        frame: FrameData,
    },
    /// A recorder loop exited without being asked to stop
    RecordingFinished { camera_id: CameraId },
}

impl CameraEvent {
    pub fn camera_id(&self) -> CameraId {
        match self {
            CameraEvent::ConnectionStatus { camera_id, .. } => *camera_id,
            CameraEvent::FrameReady { camera_id, .. } => *camera_id,
            CameraEvent::RecordingFinished { camera_id } => *camera_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            CameraEvent::ConnectionStatus { .. } => "connection_status",
            CameraEvent::FrameReady { .. } => "frame_ready",
            CameraEvent::RecordingFinished { .. } => "recording_finished",
        }
    }

    pub fn description(&self) -> String {
        match self {
            CameraEvent::ConnectionStatus {
                camera_id,
                connected,
                ..
            } => format!(
                "Camera {} {}",
                camera_id,
                if *connected {
                    "connected"
                } else {
                    "disconnected"
                }
            ),
            CameraEvent::FrameReady { camera_id, frame } => {
                format!("Camera {} frame {} ready", camera_id, frame.id)
            }
            CameraEvent::RecordingFinished { camera_id } => {
                format!("Camera {} recording finished", camera_id)
            }
        }
    }
}

/// Fan-out of camera events over a bounded broadcast channel.
///
/// Publishing never blocks: a subscriber that falls behind loses the oldest
/// events (it observes `RecvError::Lagged`), so a slow consumer can only hurt
/// itself.
pub struct EventBus {
    sender: broadcast::Sender<CameraEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns the number of subscribers that received it
    pub fn publish(&self, event: CameraEvent) -> usize {
        match &event {
            CameraEvent::ConnectionStatus {
                camera_id,
                connected,
                ..
            } => {
                if *connected {
                    info!("Camera {} connected", camera_id);
                } else {
                    warn!("Camera {} disconnected", camera_id);
                }
            }
            CameraEvent::RecordingFinished { camera_id } => {
                warn!("Recording finished unexpectedly for camera {}", camera_id);
            }
            CameraEvent::FrameReady { .. } => {}
        }

        // No subscribers is not an error for fire-and-forget emission
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!("Event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use tokio::sync::broadcast::error::RecvError;

    fn status(id: u32, connected: bool) -> CameraEvent {
        CameraEvent::ConnectionStatus {
            camera_id: CameraId::new(id),
            connected,
            timestamp: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(status(1, true)), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(status(3, false)), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.camera_id(), CameraId::new(3));
        assert_eq!(event.event_type(), "connection_status");
        assert_eq!(event.description(), "Camera 3 disconnected");
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for id in 0..5 {
            let frame = FrameData::new(
                id,
                CameraId::new(1),
                SystemTime::now(),
                vec![0u8; 3],
                1,
                1,
                FrameFormat::Rgb24,
            );
            bus.publish(CameraEvent::FrameReady {
                camera_id: CameraId::new(1),
                frame,
            });
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        match rx.recv().await.unwrap() {
            CameraEvent::FrameReady { frame, .. } => assert_eq!(frame.id, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
