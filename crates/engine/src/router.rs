//! Message Router
//!
//! Classifies each inbound frame and publishes a typed event onto the bus.
//! Text frames are passed through raw (downstream parses the JSON); binary
//! frames from MQTT-gateway sessions are stripped of their 16-byte header
//! first.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use voxline_core::{AudioDataReceived, SessionContext, TextMessageReceived};

use crate::bus::EventBus;
use crate::container::DIContainer;
use crate::services;
use crate::EngineError;

/// Gateway audio header length.
const MQTT_HEADER_LEN: usize = 16;

/// Routes raw transport frames to the event bus.
pub struct MessageRouter {
    container: Arc<DIContainer>,
    bus: Arc<EventBus>,
}

impl MessageRouter {
    pub fn new(container: Arc<DIContainer>, bus: Arc<EventBus>) -> Self {
        Self { container, bus }
    }

    /// Route a text frame.
    pub async fn route_text(&self, session_id: &str, content: String) -> Result<(), EngineError> {
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;
        context.touch_activity();

        tracing::trace!(session_id = %session_id, len = content.len(), "text frame");
        self.bus
            .publish(TextMessageReceived {
                session_id: session_id.to_string(),
                content,
            })
            .await;
        Ok(())
    }

    /// Route a binary audio frame.
    ///
    /// Activity time is deliberately not touched here; only voiced audio
    /// counts as activity, and the VAD owns that call.
    pub async fn route_binary(&self, session_id: &str, data: Vec<u8>) -> Result<(), EngineError> {
        let context = self
            .container
            .resolve::<SessionContext>(services::SESSION_CONTEXT, Some(session_id))?;

        let (payload, timestamp_ms) = if context.from_mqtt_gateway && data.len() >= MQTT_HEADER_LEN
        {
            Self::parse_gateway_frame(&data)
        } else {
            (data, now_ms())
        };

        self.bus
            .publish(AudioDataReceived {
                session_id: session_id.to_string(),
                data: payload,
                timestamp_ms,
            })
            .await;
        Ok(())
    }

    /// Split a gateway frame into payload and timestamp.
    ///
    /// Layout: [0..8) reserved, [8..12) big-endian timestamp (ms),
    /// [12..16) big-endian audio length, audio follows.
    fn parse_gateway_frame(data: &[u8]) -> (Vec<u8>, u64) {
        let timestamp = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as u64;
        let audio_len = u32::from_be_bytes([data[12], data[13], data[14], data[15]]) as usize;

        let payload = if audio_len > 0 && data.len() >= MQTT_HEADER_LEN + audio_len {
            data[MQTT_HEADER_LEN..MQTT_HEADER_LEN + audio_len].to_vec()
        } else {
            data[MQTT_HEADER_LEN..].to_vec()
        };

        (payload, timestamp)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use voxline_core::AgentConfig;

    fn setup(from_gateway: bool) -> (MessageRouter, Arc<EventBus>) {
        let container = Arc::new(DIContainer::new());
        let bus = Arc::new(EventBus::new());
        let context = Arc::new(SessionContext::new(
            "s1",
            None,
            None,
            "127.0.0.1",
            from_gateway,
            AgentConfig::default(),
        ));
        container.register_session_instance("s1", services::SESSION_CONTEXT, context);
        (MessageRouter::new(container, bus.clone()), bus)
    }

    fn gateway_frame(timestamp: u32, audio: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 16];
        frame[8..12].copy_from_slice(&timestamp.to_be_bytes());
        frame[12..16].copy_from_slice(&(audio.len() as u32).to_be_bytes());
        frame.extend_from_slice(audio);
        frame
    }

    #[tokio::test]
    async fn gateway_header_is_stripped() {
        let (router, bus) = setup(true);
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        bus.subscribe::<AudioDataReceived, _>(move |event| {
            received_clone.lock().push((event.data.clone(), event.timestamp_ms));
        });

        router
            .route_binary("s1", gateway_frame(12345, &[9, 9, 9]))
            .await
            .unwrap();

        let events = received.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, vec![9, 9, 9]);
        assert_eq!(events[0].1, 12345);
    }

    #[tokio::test]
    async fn short_gateway_frame_passes_whole() {
        let (router, bus) = setup(true);
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        bus.subscribe::<AudioDataReceived, _>(move |event| {
            received_clone.lock().push(event.data.clone());
        });

        // Shorter than the header: treated as plain audio.
        router.route_binary("s1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(received.lock()[0], vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn direct_sessions_skip_header_parse() {
        let (router, bus) = setup(false);
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        bus.subscribe::<AudioDataReceived, _>(move |event| {
            received_clone.lock().push(event.data.clone());
        });

        let frame: Vec<u8> = (0..32).collect();
        router.route_binary("s1", frame.clone()).await.unwrap();
        assert_eq!(received.lock()[0], frame);
    }

    #[tokio::test]
    async fn text_frames_touch_activity_and_publish() {
        let (router, bus) = setup(false);
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = received.clone();
        bus.subscribe::<TextMessageReceived, _>(move |event| {
            received_clone.lock().push(event.content.clone());
        });

        router
            .route_text("s1", r#"{"type":"listen"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(received.lock().len(), 1);
    }
}
