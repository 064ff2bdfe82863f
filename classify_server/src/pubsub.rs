//! Named broadcast channels connecting frame producers with consumers.
//!
use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

pub type BytesSender = broadcast::Sender<Bytes>;
pub type BytesReceiver = broadcast::Receiver<Bytes>;

/// Number of messages a channel buffers before slow receivers start lagging.
const CHANNEL_CAPACITY: usize = 20;

/// Channel name carrying the annotated frames of the live loop on `name`.
pub fn classified_channel(name: &str) -> String {
    format!("classified_{name}")
}

struct Channel {
    tx: BytesSender,
    producers: usize,
}

impl Channel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, producers: 0 }
    }
}

#[derive(Default)]
pub struct NamedPubSub {
    map: Mutex<HashMap<String, Channel>>,
}

impl NamedPubSub {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_broadcast_sender(&self, name: &str) -> BytesSender {
        let mut map = self.map.lock().await;
        map.entry(name.to_owned())
            .or_insert_with(Channel::new)
            .tx
            .clone()
    }

    pub async fn get_broadcast_receiver(&self, name: &str) -> BytesReceiver {
        let mut map = self.map.lock().await;
        map.entry(name.to_owned())
            .or_insert_with(Channel::new)
            .tx
            .subscribe()
    }

    /// Sender for a producer feeding channel `name`, to be handed back with
    /// `release_producer` once the producer is gone.
    pub async fn register_producer(&self, name: &str) -> BytesSender {
        let mut map = self.map.lock().await;
        let channel = map.entry(name.to_owned()).or_insert_with(Channel::new);
        channel.producers += 1;
        channel.tx.clone()
    }

    /// Hand back the sender of a producer.
    ///
    /// When the last producer of a channel leaves, the channel is dropped from the map and its
    /// receivers see it closed, unless somebody else still holds a sender.
    pub async fn release_producer(&self, name: &str, sender: BytesSender) {
        drop(sender);
        let mut map = self.map.lock().await;
        if let Some(channel) = map.get_mut(name) {
            channel.producers = channel.producers.saturating_sub(1);
            if channel.producers == 0 {
                map.remove(name);
                log::debug!("Channel {} has no producer anymore", name);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_sender_and_receiver_share_channel() {
        let pubsub = NamedPubSub::new();
        let mut rx = pubsub.get_broadcast_receiver("front_door").await;
        let tx = pubsub.get_broadcast_sender("front_door").await;
        let other = pubsub.get_broadcast_sender("back_door").await;

        tx.send(Bytes::from_static(b"frame")).unwrap();
        assert!(other.send(Bytes::from_static(b"nobody listens")).is_err());

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[tokio::test]
    async fn test_channel_closes_when_last_producer_leaves() {
        let pubsub = NamedPubSub::new();
        let mut rx = pubsub.get_broadcast_receiver("garden").await;

        let first = pubsub.register_producer("garden").await;
        let second = pubsub.register_producer("garden").await;
        first.send(Bytes::from_static(b"one")).unwrap();

        pubsub.release_producer("garden", first).await;
        second.send(Bytes::from_static(b"two")).unwrap();
        pubsub.release_producer("garden", second).await;

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(rx.recv().await, Err(broadcast::error::RecvError::Closed));

        // A new producer opens a fresh channel under the same name
        let mut rx = pubsub.get_broadcast_receiver("garden").await;
        let third = pubsub.register_producer("garden").await;
        third.send(Bytes::from_static(b"three")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"three"));
    }

    #[test]
    fn test_classified_channel() {
        assert_eq!(classified_channel("simon"), "classified_simon");
    }
}
