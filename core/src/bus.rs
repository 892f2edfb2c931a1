//! Publish/subscribe topics
//!
//! A topic has exactly one writer, the [`Publisher`], and any number of
//! [`Subscriber`]s. Messages travel encoded, so every reader gets its own
//! copy. Delivery is best effort: a reader that falls behind skips to the
//! newest messages, and a reader that subscribes late misses what came
//! before. Dropping the publisher closes the topic.

use crate::error::CoreResult;
use crate::message::{Decoded, Message};
use tokio::sync::broadcast;

/// Messages buffered per topic before slow readers start lagging
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// Writing end of a topic
#[derive(Debug)]
pub struct Publisher {
    topic: String,
    tx: broadcast::Sender<String>,
}

impl Publisher {
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            tx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscribe(&self) -> Subscriber {
        Subscriber {
            topic: self.topic.clone(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a message, returning how many readers it reached.
    ///
    /// Having no readers is not an error.
    pub fn publish(&self, msg: &Message) -> CoreResult<usize> {
        let text = msg.encode()?;
        match self.tx.send(text) {
            Ok(n) => Ok(n),
            Err(_) => {
                tracing::debug!("No subscribers on '{}', dropped {} message", self.topic, msg.kind());
                Ok(0)
            }
        }
    }
}

/// Reading end of a topic
#[derive(Debug)]
pub struct Subscriber {
    topic: String,
    rx: broadcast::Receiver<String>,
}

impl Subscriber {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next decodable message.
    ///
    /// Returns `None` once the publisher is gone and the buffer is drained.
    /// Lagged readers, unrecognized kinds and undecodable payloads are
    /// logged and skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let text = match self.rx.recv().await {
                Ok(text) => text,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Subscriber on '{}' lagged, skipped {} messages", self.topic, missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            match Message::decode(&text) {
                Ok(Decoded::Message(msg)) => return Some(msg),
                Ok(Decoded::Unrecognized(kind)) => {
                    tracing::warn!("Ignoring message of unknown type '{}' on '{}'", kind, self.topic);
                }
                Err(e) => {
                    tracing::warn!("Dropping undecodable message on '{}': {}", self.topic, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AlignMessage, DataMessage};

    fn sample(n: u64) -> Message {
        Message::Data(DataMessage {
            sensor_ms: Some(n),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_fan_out_in_order() {
        let publisher = Publisher::new("telescope", 16);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();

        assert_eq!(publisher.publish(&sample(1)).unwrap(), 2);
        publisher.publish(&Message::Align(AlignMessage::default())).unwrap();

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(sample(1)));
            assert_eq!(sub.recv().await, Some(Message::Align(AlignMessage::default())));
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let publisher = Publisher::new("nobody", 4);
        assert_eq!(publisher.publish(&sample(1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_history() {
        let publisher = Publisher::new("telescope", 4);
        let mut early = publisher.subscribe();
        publisher.publish(&sample(1)).unwrap();

        let mut late = publisher.subscribe();
        publisher.publish(&sample(2)).unwrap();

        assert_eq!(early.recv().await, Some(sample(1)));
        assert_eq!(late.recv().await, Some(sample(2)));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_newest() {
        let publisher = Publisher::new("telescope", 2);
        let mut sub = publisher.subscribe();
        for n in 0..5 {
            publisher.publish(&sample(n)).unwrap();
        }

        assert_eq!(sub.recv().await, Some(sample(3)));
        assert_eq!(sub.recv().await, Some(sample(4)));
    }

    #[tokio::test]
    async fn test_closed_after_drain() {
        let publisher = Publisher::new("telescope", 4);
        let mut sub = publisher.subscribe();
        publisher.publish(&Message::stop()).unwrap();
        drop(publisher);

        assert_eq!(sub.recv().await, Some(Message::stop()));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_unknown_and_garbage_are_skipped() {
        let publisher = Publisher::new("telescope", 8);
        let mut sub = publisher.subscribe();
        publisher.tx.send(r#"{"type":"PING"}"#.to_string()).unwrap();
        publisher.tx.send("not json".to_string()).unwrap();
        publisher.publish(&sample(7)).unwrap();

        assert_eq!(sub.recv().await, Some(sample(7)));
    }
}
