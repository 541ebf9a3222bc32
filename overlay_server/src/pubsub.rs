//! Named broadcast channels connecting the data socket, the analyzer and
//! the HTTP stream endpoints.
use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

pub type ChunkSender = broadcast::Sender<Bytes>;
pub type ChunkReceiver = broadcast::Receiver<Bytes>;

/// Slow subscribers lag instead of stalling the producers.
const CHANNEL_DEPTH: usize = 16;

/// Streams are keyed by the capture client's announced name. Annotated
/// streams live under a derived key so raw and annotated subscribers do
/// not see each other's frames.
pub struct NamedPubSub {
    channels: Mutex<HashMap<String, ChunkSender>>,
}

impl NamedPubSub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub async fn sender(&self, name: &str) -> ChunkSender {
        let mut channels = self.channels.lock().await;
        channels
            .entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_DEPTH).0)
            .clone()
    }

    pub async fn receiver(&self, name: &str) -> ChunkReceiver {
        self.sender(name).await.subscribe()
    }
}

impl Default for NamedPubSub {
    fn default() -> Self {
        Self::new()
    }
}

/// Key of the annotated counterpart to a raw stream.
pub fn annotated_name(name: &str) -> String {
    format!("faces_{name}")
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn same_name_fans_out_to_all_subscribers() {
        let pubsub = NamedPubSub::new();

        let mut rx_a = pubsub.receiver("webcam0").await;
        let mut rx_b = pubsub.receiver("webcam0").await;
        let tx = pubsub.sender("webcam0").await;

        tx.send(Bytes::from_static(b"frame")).unwrap();

        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[tokio::test]
    async fn different_names_stay_separate() {
        let pubsub = NamedPubSub::new();

        let mut annotated_rx = pubsub.receiver(&annotated_name("webcam0")).await;
        let raw_tx = pubsub.sender("webcam0").await;

        // No subscriber on the raw channel yet
        assert!(raw_tx.send(Bytes::from_static(b"raw")).is_err());
        assert!(annotated_rx.try_recv().is_err());
    }
}
