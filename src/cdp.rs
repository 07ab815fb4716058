use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::{OrchestratorError, Result};

/// A CDP notification (`{method, params}` with no `id`), e.g.
/// `Page.frameNavigated` or `Page.frameStoppedLoading`.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// One CDP WebSocket to one browser tab, with the id-keyed callback registry
/// described in §4.2 / §9: outbound requests get monotonically increasing
/// ids, inbound `{id, result}` frames are dispatched to the matching
/// oneshot, and inbound `{method, params}` frames fan out to every
/// subscriber via a broadcast channel.
pub struct CdpClient {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: tokio::sync::mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<CdpEvent>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    writer_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| OrchestratorError::Cdp(format!("connect to {ws_url}: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, _) = broadcast::channel(256);

        let (writer_tx, mut writer_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = writer_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let read_pending = pending.clone();
        let read_events = events_tx.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.to_string(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                dispatch_frame(&text, &read_pending, &read_events).await;
            }
            // Connection dropped: fail every still-pending call rather than
            // leaving callers hanging forever.
            let mut pending = read_pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(OrchestratorError::Cdp("connection closed".into())));
            }
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: writer_tx,
            events: events_tx,
            reader_task: Mutex::new(Some(reader_task)),
            writer_task: Mutex::new(Some(writer_task)),
        })
    }

    /// Aborts the reader and writer tasks, dropping the underlying WebSocket
    /// (§4.3 Teardown "closes all tab WebSockets").
    pub async fn close(&self) {
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().await.take() {
            task.abort();
        }
    }

    /// Sends a CDP command and awaits its correlated result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::json!({ "id": id, "method": method, "params": params });
        let text = serde_json::to_string(&frame)?;
        self.writer
            .send(Message::Text(text.into()))
            .map_err(|_| OrchestratorError::Cdp("navigation send failed: socket closed".into()))?;

        rx.await
            .map_err(|_| OrchestratorError::Cdp("call dropped before response".into()))?
    }

    /// Subscribes to every future CDP notification on this connection.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }
}

async fn dispatch_frame(text: &str, pending: &PendingMap, events: &broadcast::Sender<CdpEvent>) {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "unparseable CDP frame, ignoring");
            return;
        }
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let mut pending = pending.lock().await;
        if let Some(tx) = pending.remove(&id) {
            let result = if let Some(error) = value.get("error") {
                Err(OrchestratorError::Cdp(error.to_string()))
            } else {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = tx.send(result);
        }
        return;
    }

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        debug!(method, "CDP event");
        // No receivers is routine (nothing subscribed yet); not an error.
        let _ = events.send(CdpEvent {
            method: method.to_string(),
            params,
        });
    }
}
