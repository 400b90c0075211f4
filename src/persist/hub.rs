// In-process topic fan-out shared by the local backends.
use ahash::AHashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

pub struct Hub {
    topics: Mutex<AHashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self { topics: Mutex::new(AHashMap::new()), capacity: capacity.max(1) }
    }

    /// Returns how many subscribers received the message.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> usize {
        let topics = self.topics.lock();
        match topics.get(topic) {
            // send only fails when nobody is listening
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, topic: &str) -> BoxStream<'static, Vec<u8>> {
        let rx = {
            let mut topics = self.topics.lock();
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        let topic = topic.to_string();
        stream::unfold((rx, topic), |(mut rx, topic)| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, (rx, topic))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%topic, skipped, "subscriber lagged, dropping messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, |tx| tx.receiver_count())
    }
}
