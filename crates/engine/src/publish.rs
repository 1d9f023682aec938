//! Pub/sub channel registry.
//!
//! Channels are created lazily on first subscribe and destroyed when the
//! last subscriber leaves. Each channel owns a bounded delivery queue
//! drained by its own task, so a slow subscriber never blocks the
//! publishing command path beyond queue back-pressure.
//!
//! Sessions store only channel *names*; the registry owns the channel state
//! and its subscriber map, which keeps the session/channel relationship
//! acyclic.

use crate::session::Session;
use bytes::Bytes;
use parking_lot::Mutex;
use resp::{encode_to_vec, RespValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

const CHANNEL_QUEUE: usize = 1024;

struct Channel {
    queue: mpsc::Sender<Bytes>,
    subscribers: Arc<Mutex<HashMap<u64, Arc<Session>>>>,
}

impl Channel {
    fn spawn() -> Channel {
        let (queue, mut rx) = mpsc::channel::<Bytes>(CHANNEL_QUEUE);
        let subscribers: Arc<Mutex<HashMap<u64, Arc<Session>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let subs = subscribers.clone();
        // drainer exits when the registry drops the last sender
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let targets: Vec<Arc<Session>> = subs.lock().values().cloned().collect();
                for session in targets {
                    session.write(frame.clone());
                }
            }
        });
        Channel { queue, subscribers }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[derive(Default)]
pub struct Publish {
    channels: Mutex<HashMap<String, Channel>>,
}

impl Publish {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe the session, creating channels as needed. Writes one
    /// `subscribe` confirmation frame per channel.
    pub fn subscribe(&self, session: &Arc<Session>, names: &[String]) {
        let mut channels = self.channels.lock();
        for name in names {
            let channel = channels.entry(name.clone()).or_insert_with(Channel::spawn);
            channel.subscribers.lock().insert(session.id(), session.clone());
            session.add_subscription(name);
            session.write(control_frame("subscribe", name, session.subscription_count() as i64));
        }
    }

    /// Unsubscribe the session; destroys channels whose subscriber count
    /// reaches zero.
    pub fn unsubscribe(&self, session: &Arc<Session>, names: &[String]) {
        let mut channels = self.channels.lock();
        for name in names {
            let Some(channel) = channels.get(name) else {
                continue;
            };
            channel.subscribers.lock().remove(&session.id());
            session.remove_subscription(name);
            session.write(control_frame(
                "unsubscribe",
                name,
                session.subscription_count() as i64,
            ));
            if channel.subscriber_count() == 0 {
                channels.remove(name);
            }
        }
    }

    /// Drop the session from every channel it subscribed to, without
    /// writing confirmation frames. Used on connection teardown.
    pub fn drop_session(&self, session: &Arc<Session>) {
        let mut channels = self.channels.lock();
        for name in session.subscriptions() {
            if let Some(channel) = channels.get(&name) {
                channel.subscribers.lock().remove(&session.id());
                if channel.subscriber_count() == 0 {
                    channels.remove(&name);
                }
            }
            session.remove_subscription(&name);
        }
    }

    /// Queue a message for delivery; returns the number of local subscribers
    /// at publish time. Blocks on a saturated channel queue.
    pub async fn publish(&self, name: &str, payload: Bytes) -> usize {
        let (queue, count) = {
            let channels = self.channels.lock();
            let Some(channel) = channels.get(name) else {
                return 0;
            };
            let count = channel.subscriber_count();
            if count == 0 {
                return 0;
            }
            (channel.queue.clone(), count)
        };
        let _ = queue.send(message_frame(name, payload)).await;
        count
    }

    /// Channels with at least one subscriber.
    pub fn active_channels(&self) -> Vec<String> {
        self.channels
            .lock()
            .iter()
            .filter(|(_, c)| c.subscriber_count() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// (channel, subscriber count) pairs; all channels when `names` is
    /// empty, otherwise the queried names (0 for unknown channels).
    pub fn subscriber_counts(&self, names: &[String]) -> Vec<(String, usize)> {
        let channels = self.channels.lock();
        if names.is_empty() {
            channels
                .iter()
                .map(|(name, c)| (name.clone(), c.subscriber_count()))
                .collect()
        } else {
            names
                .iter()
                .map(|name| {
                    let count = channels.get(name).map(|c| c.subscriber_count()).unwrap_or(0);
                    (name.clone(), count)
                })
                .collect()
        }
    }

    pub fn close(&self) {
        self.channels.lock().clear();
    }
}

/// `subscribe <channel> <count>` / `unsubscribe <channel> <count>`
fn control_frame(header: &str, name: &str, count: i64) -> Bytes {
    let frame = RespValue::Array(vec![
        RespValue::BulkString(Some(Bytes::copy_from_slice(header.as_bytes()))),
        RespValue::BulkString(Some(Bytes::copy_from_slice(name.as_bytes()))),
        RespValue::Integer(count),
    ]);
    Bytes::from(encode_to_vec(&frame))
}

/// `message <channel> <payload>`
fn message_frame(name: &str, payload: Bytes) -> Bytes {
    let frame = RespValue::Array(vec![
        RespValue::BulkString(Some(Bytes::from_static(b"message"))),
        RespValue::BulkString(Some(Bytes::copy_from_slice(name.as_bytes()))),
        RespValue::BulkString(Some(payload)),
    ]);
    Bytes::from(encode_to_vec(&frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_session() -> (Arc<Session>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(tx), rx)
    }

    #[tokio::test]
    async fn test_subscribe_publish_deliver() {
        let publish = Publish::new();
        let (session, mut rx) = socket_session();
        publish.subscribe(&session, &["news".to_string()]);
        assert_eq!(
            rx.recv().await.unwrap(),
            control_frame("subscribe", "news", 1)
        );

        let delivered = publish.publish("news", Bytes::from("hello")).await;
        assert_eq!(delivered, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            message_frame("news", Bytes::from("hello"))
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let publish = Publish::new();
        assert_eq!(publish.publish("nobody", Bytes::from("x")).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_destroys_empty_channel() {
        let publish = Publish::new();
        let (session, mut rx) = socket_session();
        publish.subscribe(&session, &["a".to_string(), "b".to_string()]);
        assert_eq!(publish.active_channels().len(), 2);
        publish.unsubscribe(&session, &["a".to_string()]);
        let _ = rx.recv().await;
        assert_eq!(publish.active_channels(), vec!["b".to_string()]);
        assert_eq!(session.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_counts() {
        let publish = Publish::new();
        let (s1, _rx1) = socket_session();
        let (s2, _rx2) = socket_session();
        publish.subscribe(&s1, &["c".to_string()]);
        publish.subscribe(&s2, &["c".to_string()]);
        let counts = publish.subscriber_counts(&["c".to_string(), "missing".to_string()]);
        assert_eq!(
            counts,
            vec![("c".to_string(), 2), ("missing".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn test_drop_session_cleans_up() {
        let publish = Publish::new();
        let (session, _rx) = socket_session();
        publish.subscribe(&session, &["x".to_string()]);
        publish.drop_session(&session);
        assert!(publish.active_channels().is_empty());
        assert_eq!(session.subscription_count(), 0);
    }
}
