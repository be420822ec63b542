//! In-process fan-out for channels with no external transport.
//!
//! CLI and embedded Web surfaces subscribe to a session and receive every
//! outbound message published for it. Delivery is best-effort: a subscriber
//! whose queue is full misses that message, and the publisher never blocks.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {tokio::sync::mpsc, tracing::debug, uuid::Uuid};

use crate::types::OutboundMessage;

/// Bounded queue depth per subscriber.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 32;

type StreamMap = HashMap<String, mpsc::Sender<OutboundMessage>>;

#[derive(Default)]
struct HubState {
    sessions: RwLock<HashMap<String, StreamMap>>,
}

impl HubState {
    fn unsubscribe(&self, session_id: &str, stream_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(streams) = sessions.get_mut(session_id) {
            streams.remove(stream_id);
            if streams.is_empty() {
                sessions.remove(session_id);
            }
        }
    }
}

/// Publish/subscribe hub keyed by session id. Cheap to clone; all clones
/// share the same subscriber table.
#[derive(Clone, Default)]
pub struct SessionHub {
    state: Arc<HubState>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for a session.
    ///
    /// Dropping (or explicitly cancelling) the returned stream removes only
    /// this subscriber's queue; the session entry disappears once its last
    /// subscriber is gone.
    pub fn subscribe(&self, session_id: &str) -> SessionStream {
        let stream_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        let mut sessions = self.state.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(stream_id.clone(), tx);

        SessionStream {
            hub: Arc::clone(&self.state),
            session_id: session_id.to_string(),
            stream_id,
            rx,
        }
    }

    /// Deliver a message to every current subscriber of the session.
    ///
    /// Non-blocking: full queues drop the message for that subscriber only;
    /// a session with no subscribers is a silent no-op. The subscriber set
    /// is snapshotted under the read lock and delivery happens outside it,
    /// so a concurrently cancelling subscriber may or may not receive the
    /// in-flight message.
    pub fn publish(&self, session_id: &str, message: &OutboundMessage) {
        let senders: Vec<mpsc::Sender<OutboundMessage>> = {
            let sessions = self.state.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(session_id) {
                Some(streams) => streams.values().cloned().collect(),
                None => return,
            }
        };

        for sender in senders {
            if sender.try_send(message.clone()).is_err() {
                debug!(session_id, "dropping message for slow subscriber");
            }
        }
    }

    /// Number of live subscribers for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        let sessions = self.state.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map_or(0, StreamMap::len)
    }
}

/// One subscriber's receive side. Unsubscribes on drop.
pub struct SessionStream {
    hub: Arc<HubState>,
    session_id: String,
    stream_id: String,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl SessionStream {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Receive the next message; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.rx.try_recv().ok()
    }

    /// Remove this subscriber now instead of at drop.
    pub fn cancel(self) {}
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.session_id, &self.stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> OutboundMessage {
        OutboundMessage {
            to: "s1".into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let hub = SessionHub::new();
        let mut a = hub.subscribe("s1");
        let mut b = hub.subscribe("s1");

        hub.publish("s1", &msg("hello"));

        assert_eq!(a.recv().await.map(|m| m.text), Some("hello".into()));
        assert_eq!(b.recv().await.map(|m| m.text), Some("hello".into()));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub = SessionHub::new();
        hub.publish("nobody", &msg("hello"));
        assert_eq!(hub.subscriber_count("nobody"), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let hub = SessionHub::new();
        let mut stream = hub.subscribe("s1");

        for i in 0..SUBSCRIBER_QUEUE_CAPACITY + 5 {
            hub.publish("s1", &msg(&format!("m{i}")));
        }

        // Exactly the queue capacity arrives; the overflow was dropped.
        let mut received = 0;
        while stream.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn cancel_removes_only_that_subscriber() {
        let hub = SessionHub::new();
        let a = hub.subscribe("s1");
        let mut b = hub.subscribe("s1");
        assert_eq!(hub.subscriber_count("s1"), 2);

        a.cancel();
        assert_eq!(hub.subscriber_count("s1"), 1);

        hub.publish("s1", &msg("still here"));
        assert_eq!(b.recv().await.map(|m| m.text), Some("still here".into()));
    }

    #[tokio::test]
    async fn last_cancel_removes_the_session_entry() {
        let hub = SessionHub::new();
        let stream = hub.subscribe("s1");
        drop(stream);
        assert_eq!(hub.subscriber_count("s1"), 0);
        assert!(hub.state.sessions.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_stream_sees_end_of_messages() {
        let hub = SessionHub::new();
        let mut stream = hub.subscribe("s1");
        hub.publish("s1", &msg("last"));

        // Simulate the hub side going away: remove the sender.
        let stream_id = stream.stream_id().to_string();
        hub.state.unsubscribe("s1", &stream_id);

        assert_eq!(stream.recv().await.map(|m| m.text), Some("last".into()));
        assert!(stream.recv().await.is_none());
    }
}
