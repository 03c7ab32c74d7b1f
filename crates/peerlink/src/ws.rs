//! WebSocket signaling link
//!
//! Implements [`SignalingLink`] over a WebSocket relay. The relay
//! assigns the session identity with an `open` frame after the socket
//! connects, then forwards `signal` frames between named endpoints.
//! Frames are JSON; the signal payload inside is carried opaquely.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::transport::{LinkEvent, SignalingLink, TransportError};
use crate::types::SignalPayload;

/// Relay wire frames
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum RelayFrame {
    /// Identity assignment, sent by the relay once per connection
    #[serde(rename = "open")]
    Open { id: String },

    /// A signal in flight: `target_id` set on the way in, `source_id`
    /// set by the relay on the way out
    #[serde(rename = "signal")]
    Signal {
        #[serde(rename = "sourceId", skip_serializing_if = "Option::is_none", default)]
        source_id: Option<String>,
        #[serde(rename = "targetId", skip_serializing_if = "Option::is_none", default)]
        target_id: Option<String>,
        signal: SignalPayload,
    },
}

/// Signaling link over a WebSocket relay
pub struct WsSignalingLink {
    url: String,
    local_id: Arc<RwLock<Option<String>>>,
    /// Handed to the reader task on connect; the reader owns delivery
    event_tx: Mutex<Option<mpsc::Sender<LinkEvent>>>,
    event_rx: Mutex<mpsc::Receiver<LinkEvent>>,
    out_tx: Mutex<Option<mpsc::Sender<Message>>>,
    connected: AtomicBool,
    debug: bool,
}

impl WsSignalingLink {
    pub fn new(url: impl Into<String>, debug: bool) -> Self {
        let (event_tx, event_rx) = mpsc::channel(100);
        Self {
            url: url.into(),
            local_id: Arc::new(RwLock::new(None)),
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(event_rx),
            out_tx: Mutex::new(None),
            connected: AtomicBool::new(false),
            debug,
        }
    }
}

#[async_trait]
impl SignalingLink for WsSignalingLink {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(event_tx) = self.event_tx.lock().await.take() else {
            return Err(TransportError::ConnectionFailed(
                "link already consumed".to_string(),
            ));
        };

        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(100);
        *self.out_tx.lock().await = Some(out_tx);
        self.connected.store(true, Ordering::SeqCst);

        // writer: drains outgoing frames until the link is closed
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // reader: owns the only event sender, so recv() ends when the
        // socket does
        let local_id = self.local_id.clone();
        let verbose = self.debug;
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let message = match frame {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("[WsLink] receive error: {err}");
                        break;
                    }
                };
                let text = match message {
                    Message::Text(text) => text.as_str().to_owned(),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("[WsLink] dropping non-UTF-8 relay frame");
                            continue;
                        }
                    },
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Open { id }) => {
                        if verbose {
                            debug!("[WsLink] relay assigned identity {id}");
                        }
                        *local_id.write().await = Some(id.clone());
                        let _ = event_tx.send(LinkEvent::Ready { id }).await;
                    }
                    Ok(RelayFrame::Signal {
                        source_id: Some(source_id),
                        signal,
                        ..
                    }) => {
                        let _ = event_tx
                            .send(LinkEvent::Signal {
                                source_id,
                                payload: signal,
                            })
                            .await;
                    }
                    Ok(RelayFrame::Signal { source_id: None, .. }) => {
                        warn!("[WsLink] dropping inbound signal without a source");
                    }
                    Err(err) => {
                        warn!("[WsLink] unparseable relay frame: {err}");
                    }
                }
            }
        });

        Ok(())
    }

    async fn send(&self, target_id: &str, payload: SignalPayload) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let frame = RelayFrame::Signal {
            source_id: None,
            target_id: Some(target_id.to_string()),
            signal: payload,
        };
        let json =
            serde_json::to_string(&frame).map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let tx = self.out_tx.lock().await.clone();
        match tx {
            Some(tx) => tx
                .send(Message::text(json))
                .await
                .map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn recv(&self) -> Option<LinkEvent> {
        self.event_rx.lock().await.recv().await
    }

    async fn local_id(&self) -> Option<String> {
        self.local_id.read().await.clone()
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // dropping the writer closes the socket; the reader then ends
        // the event stream
        self.out_tx.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_frame_open_parse() {
        let frame: RelayFrame = serde_json::from_str(r#"{"type":"open","id":"abc"}"#).unwrap();
        assert!(matches!(frame, RelayFrame::Open { id } if id == "abc"));
    }

    #[test]
    fn test_relay_frame_signal_roundtrip() {
        let frame = RelayFrame::Signal {
            source_id: None,
            target_id: Some("b".to_string()),
            signal: SignalPayload::Answer {
                peer_id: "a".to_string(),
                target_peer_id: "b".to_string(),
                sdp: "v=0".to_string(),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"targetId\":\"b\""));
        assert!(!json.contains("sourceId"));

        let parsed: RelayFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            RelayFrame::Signal { target_id, signal, .. } => {
                assert_eq!(target_id.as_deref(), Some("b"));
                assert!(matches!(signal, SignalPayload::Answer { .. }));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
