#![forbid(unsafe_code)]

use async_trait::async_trait;
use futures::StreamExt as _;
use redis::AsyncCommands as _;
use roomcast_protocol::ChatMessage;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::error::StoreError;

/// Channel name shared by all rooms; per-room routing happens at the
/// connection registry using the `roomId` each message carries.
pub const DEFAULT_BROADCAST_TOPIC: &str = "chat";

/// A live subscription to the fabric, yielding raw serialized payloads.
pub struct BroadcastSubscription {
	rx: mpsc::UnboundedReceiver<String>,
}

impl BroadcastSubscription {
	/// Next raw payload, or `None` once the subscription is closed.
	pub async fn recv(&mut self) -> Option<String> {
		self.rx.recv().await
	}
}

/// Cross-process publish/subscribe channel fanning each published message
/// out to every subscribed server process.
#[async_trait]
pub trait BroadcastFabric: Send + Sync {
	/// Publish a message to every subscriber, including this process.
	async fn publish(&self, message: &ChatMessage) -> Result<(), StoreError>;

	/// Open a subscription receiving every subsequently published message.
	async fn subscribe(&self) -> Result<BroadcastSubscription, StoreError>;
}

/// Redis pub/sub implementation over a single fixed topic.
pub struct RedisBroadcast {
	client: redis::Client,
	conn: redis::aio::ConnectionManager,
	topic: String,
}

impl RedisBroadcast {
	pub fn new(client: redis::Client, conn: redis::aio::ConnectionManager, topic: impl Into<String>) -> Self {
		Self {
			client,
			conn,
			topic: topic.into(),
		}
	}
}

#[async_trait]
impl BroadcastFabric for RedisBroadcast {
	async fn publish(&self, message: &ChatMessage) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let () = conn.publish(&self.topic, roomcast_protocol::encode(message)).await?;
		Ok(())
	}

	async fn subscribe(&self) -> Result<BroadcastSubscription, StoreError> {
		let mut pubsub = self.client.get_async_pubsub().await?;
		pubsub.subscribe(&self.topic).await?;

		let (tx, rx) = mpsc::unbounded_channel();
		let topic = self.topic.clone();
		tokio::spawn(async move {
			let mut stream = pubsub.on_message();
			while let Some(msg) = stream.next().await {
				match msg.get_payload::<String>() {
					Ok(payload) => {
						if tx.send(payload).is_err() {
							break;
						}
					}
					Err(e) => warn!(%topic, error = %e, "non-text payload on broadcast topic"),
				}
			}
			warn!(%topic, "broadcast subscription stream ended");
		});

		Ok(BroadcastSubscription { rx })
	}
}

/// In-process fabric for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryBroadcast {
	subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl InMemoryBroadcast {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl BroadcastFabric for InMemoryBroadcast {
	async fn publish(&self, message: &ChatMessage) -> Result<(), StoreError> {
		let payload = roomcast_protocol::encode(message);
		let mut subscribers = self.subscribers.lock().await;
		subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
		Ok(())
	}

	async fn subscribe(&self) -> Result<BroadcastSubscription, StoreError> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.subscribers.lock().await.push(tx);
		Ok(BroadcastSubscription { rx })
	}
}

#[cfg(test)]
mod tests {
	use roomcast_domain::{MessageType, RoomId};

	use super::*;

	#[tokio::test]
	async fn every_subscriber_sees_each_publish() {
		let fabric = InMemoryBroadcast::new();
		let mut sub_a = fabric.subscribe().await.expect("subscribe");
		let mut sub_b = fabric.subscribe().await.expect("subscribe");

		let message = ChatMessage::new(
			MessageType::Chat,
			"alice",
			"hello",
			RoomId::new("42").expect("valid RoomId"),
		);
		fabric.publish(&message).await.expect("publish");

		for sub in [&mut sub_a, &mut sub_b] {
			let payload = sub.recv().await.expect("payload");
			assert_eq!(roomcast_protocol::decode(&payload).expect("decode"), message);
		}
	}

	#[tokio::test]
	async fn dropped_subscribers_are_pruned() {
		let fabric = InMemoryBroadcast::new();
		drop(fabric.subscribe().await.expect("subscribe"));

		let message = ChatMessage::new(MessageType::Chat, "a", "x", RoomId::new("1").expect("valid RoomId"));
		fabric.publish(&message).await.expect("publish");
		assert!(fabric.subscribers.lock().await.is_empty());
	}
}
