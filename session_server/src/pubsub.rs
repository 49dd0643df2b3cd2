use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

pub type BytesSender = broadcast::Sender<Bytes>;
pub type BytesReceiver = broadcast::Receiver<Bytes>;

/// Capacity of every named channel. Slow listeners skip older items.
const CHANNEL_CAPACITY: usize = 20;

/// Named broadcast channels, used to fan out the predictions of one data
/// socket client to any number of HTTP listeners.
#[derive(Default)]
pub struct NamedPubSub {
    map: Mutex<HashMap<String, BytesSender>>,
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
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub async fn get_broadcast_receiver(&self, name: &str) -> BytesReceiver {
        let mut map = self.map.lock().await;
        match map.get(name) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
                map.insert(name.to_owned(), tx);
                rx
            }
        }
    }
}
