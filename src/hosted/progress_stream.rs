use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use crate::queue::{EngineEvent, FileId};

/// Per-transfer event outlet. Once closed nothing more is forwarded.
///
/// The open flag and the send share one lock, so after `close` returns no
/// event of this transfer can reach the channel.
#[derive(Debug)]
pub struct EventGate {
    open: Mutex<bool>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl EventGate {
    pub fn new(events: mpsc::UnboundedSender<EngineEvent>) -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(true),
            events,
        })
    }

    /// Returns false if the gate is closed or the receiver is gone.
    pub fn send(&self, event: EngineEvent) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        *open && self.events.send(event).is_ok()
    }

    pub fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pin_project! {
    /// Reports `UploadProgress` for every chunk the HTTP body pulls.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        id: FileId,
        bytes_uploaded: u64,
        bytes_total: u64,
        gate: Arc<EventGate>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, id: FileId, bytes_total: u64, gate: Arc<EventGate>) -> Self {
        Self {
            inner,
            id,
            bytes_uploaded: 0,
            bytes_total,
            gate,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_uploaded += chunk.len() as u64;
                    this.gate.send(EngineEvent::UploadProgress {
                        id: *this.id,
                        bytes_uploaded: *this.bytes_uploaded,
                        bytes_total: *this.bytes_total,
                    });
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
