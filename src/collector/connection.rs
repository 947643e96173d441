//! Write half of an exchange socket.
//!
//! Only one task reads a socket, but several may write to it (the
//! scraper for initial subscriptions, the resubscription worker later).
//! [`ControlWriter`] serializes those writes behind one mutex so frames
//! never interleave, and makes closing idempotent.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Sink, SinkExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub struct ControlWriter<W> {
    sink: Mutex<W>,
    closed: AtomicBool,
}

impl<W> ControlWriter<W>
where
    W: Sink<Message, Error = WsError> + Unpin + Send,
{
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Sends one JSON control frame. The lock is held for the whole
    /// write, including the flush.
    pub async fn send_json(&self, frame: &Value) -> Result<(), WsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WsError::AlreadyClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.to_string().into())).await
    }

    /// Closes the socket. Only the first call has any effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            log::debug!("close socket: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::pin::Pin;

    use futures_util::{Sink, sink};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    pub type RecordingSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

    /// In-memory sink that forwards every written message to a channel.
    pub fn recording_sink() -> (RecordingSink, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = sink::unfold(tx, |tx, msg: Message| async move {
            let _ = tx.send(msg);
            Ok::<_, WsError>(tx)
        });
        (Box::pin(sink), rx)
    }
}
