//! Bounded per-task event stream.
//!
//! One producer (the pipeline) and at most one subscriber per task. The
//! buffer is a bounded FIFO with a shedding policy instead of backpressure:
//! when full, the oldest droppable event (a `code_chunk`, then a
//! `test_progress`) is removed to make room; lifecycle events are never
//! dropped and may transiently grow the buffer past capacity instead. When
//! the subscriber is gone, emission silently becomes a no-op -- the pipeline
//! never blocks or fails because nobody is listening.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::protocol::AgentEvent;

pub const DEFAULT_STREAM_CAPACITY: usize = 256;

struct Inner {
    buf: VecDeque<AgentEvent>,
    capacity: usize,
    sender_closed: bool,
    receiver_gone: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    senders: AtomicUsize,
}

/// Create a stream pair with the given buffer capacity.
pub fn task_stream(capacity: usize) -> (TaskEventSender, TaskEventReceiver) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            buf: VecDeque::new(),
            capacity: capacity.max(1),
            sender_closed: false,
            receiver_gone: false,
        }),
        notify: Notify::new(),
        senders: AtomicUsize::new(1),
    });
    (
        TaskEventSender {
            shared: shared.clone(),
        },
        TaskEventReceiver { shared },
    )
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

pub struct TaskEventSender {
    shared: Arc<Shared>,
}

impl TaskEventSender {
    /// Emit an event. Never blocks and never fails; with no subscriber this
    /// is a no-op, and under backpressure droppable events are shed oldest
    /// first.
    pub fn emit(&self, event: AgentEvent) {
        let mut inner = self.shared.inner.lock().expect("event stream lock poisoned");
        if inner.receiver_gone {
            return;
        }

        if inner.buf.len() >= inner.capacity {
            let dropped = shed_one(&mut inner.buf);
            if !dropped && event.is_droppable() {
                // Nothing shed and the newcomer is itself expendable.
                return;
            }
        }

        inner.buf.push_back(event);
        drop(inner);
        self.shared.notify.notify_one();
    }

    /// Whether a subscriber is still attached.
    pub fn is_connected(&self) -> bool {
        let inner = self.shared.inner.lock().expect("event stream lock poisoned");
        !inner.receiver_gone
    }
}

impl Clone for TaskEventSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for TaskEventSender {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut inner = self.shared.inner.lock().expect("event stream lock poisoned");
            inner.sender_closed = true;
            drop(inner);
            self.shared.notify.notify_one();
        }
    }
}

/// Remove the oldest droppable event. Chunks go before progress ticks.
fn shed_one(buf: &mut VecDeque<AgentEvent>) -> bool {
    if let Some(pos) = buf
        .iter()
        .position(|e| matches!(e, AgentEvent::CodeChunk { .. }))
    {
        buf.remove(pos);
        return true;
    }
    if let Some(pos) = buf
        .iter()
        .position(|e| matches!(e, AgentEvent::TestProgress { .. }))
    {
        buf.remove(pos);
        return true;
    }
    false
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

pub struct TaskEventReceiver {
    shared: Arc<Shared>,
}

impl TaskEventReceiver {
    /// Receive the next event in emission order. Returns `None` once the
    /// producer side is finished and the buffer is drained.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        loop {
            {
                let mut inner = self.shared.inner.lock().expect("event stream lock poisoned");
                if let Some(event) = inner.buf.pop_front() {
                    return Some(event);
                }
                if inner.sender_closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking variant for drain loops in tests.
    pub fn try_recv(&mut self) -> Option<AgentEvent> {
        let mut inner = self.shared.inner.lock().expect("event stream lock poisoned");
        inner.buf.pop_front()
    }
}

impl Drop for TaskEventReceiver {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().expect("event stream lock poisoned");
        inner.receiver_gone = true;
        inner.buf.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chunk(n: usize) -> AgentEvent {
        AgentEvent::CodeChunk {
            content: format!("chunk-{n}"),
        }
    }

    #[tokio::test]
    async fn delivers_in_emission_order() {
        let (tx, mut rx) = task_stream(16);
        tx.emit(AgentEvent::Connected {
            feedback_id: "fb".into(),
            task_id: Uuid::new_v4(),
        });
        tx.emit(AgentEvent::Stage {
            stage: "analyzing".into(),
            status: "started".into(),
        });
        tx.emit(AgentEvent::Done);
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().name(), "connected");
        assert_eq!(rx.recv().await.unwrap().name(), "stage");
        assert_eq!(rx.recv().await.unwrap().name(), "done");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn overflow_sheds_oldest_chunk_first() {
        let (tx, mut rx) = task_stream(3);
        tx.emit(chunk(0));
        tx.emit(chunk(1));
        tx.emit(chunk(2));
        tx.emit(chunk(3)); // evicts chunk-0
        drop(tx);

        let mut seen = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let AgentEvent::CodeChunk { content } = ev {
                seen.push(content);
            }
        }
        assert_eq!(seen, vec!["chunk-1", "chunk-2", "chunk-3"]);
    }

    #[tokio::test]
    async fn critical_events_survive_overflow() {
        let (tx, mut rx) = task_stream(2);
        tx.emit(AgentEvent::Stage {
            stage: "testing".into(),
            status: "started".into(),
        });
        tx.emit(AgentEvent::Stage {
            stage: "testing".into(),
            status: "completed".into(),
        });
        // Buffer full of undroppable events; these still get through.
        tx.emit(AgentEvent::Complete(am_core::types::FeedbackResult {
            needs_human: false,
            message: "ok".into(),
            pr_url: None,
        }));
        tx.emit(AgentEvent::Done);
        drop(tx);

        let mut names = Vec::new();
        while let Some(ev) = rx.recv().await {
            names.push(ev.name());
        }
        assert_eq!(names, vec!["stage", "stage", "complete", "done"]);
    }

    #[tokio::test]
    async fn full_buffer_drops_incoming_chunk_when_nothing_sheddable() {
        let (tx, mut rx) = task_stream(1);
        tx.emit(AgentEvent::Done);
        tx.emit(chunk(0)); // nothing sheddable, newcomer expendable
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().name(), "done");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn emission_is_noop_after_subscriber_disconnect() {
        let (tx, rx) = task_stream(8);
        drop(rx);
        assert!(!tx.is_connected());
        // Must not panic, block, or error.
        for n in 0..100 {
            tx.emit(chunk(n));
        }
    }

    #[tokio::test]
    async fn recv_wakes_on_late_emission() {
        let (tx, mut rx) = task_stream(8);
        let handle = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.emit(AgentEvent::Done);
        let got = handle.await.unwrap();
        assert_eq!(got.unwrap().name(), "done");
    }

    #[tokio::test]
    async fn cloned_senders_share_the_stream() {
        let (tx, mut rx) = task_stream(8);
        let tx2 = tx.clone();
        tx.emit(chunk(1));
        drop(tx);
        tx2.emit(AgentEvent::Done);
        drop(tx2);

        assert_eq!(rx.recv().await.unwrap().name(), "code_chunk");
        assert_eq!(rx.recv().await.unwrap().name(), "done");
        assert!(rx.recv().await.is_none());
    }
}
