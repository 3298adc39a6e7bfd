// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pub/Sub Engine
//!
//! Durable channel log plus live delivery. A publish appends under the
//! channel's sequencer and fans out before releasing it, so every live
//! subscriber sees ids in increasing order. Long-polls register with the hub
//! *before* reading the log; a message landing in between is then either in
//! the log or on its way to the waiter, never lost.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::application::error::{CoordinationError, CoordinationResult};
use crate::domain::clock::Clock;
use crate::domain::config::MessagesConfig;
use crate::domain::message::{payload_problem, validate_channel, ChannelSummary, Message, NewMessage};
use crate::domain::repository::MessageRepository;
use crate::domain::ttl::Ttl;
use crate::infrastructure::channel_hub::{ChannelHub, Subscription};

/// Poll timeout used when the caller does not name one.
const DEFAULT_POLL_TIMEOUT_MS: u64 = 30_000;

pub struct PubSubEngine {
    repo: Arc<dyn MessageRepository>,
    hub: Arc<ChannelHub>,
    clock: Arc<dyn Clock>,
    config: MessagesConfig,
}

impl PubSubEngine {
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        hub: Arc<ChannelHub>,
        clock: Arc<dyn Clock>,
        config: MessagesConfig,
    ) -> Self {
        Self {
            repo,
            hub,
            clock,
            config,
        }
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub async fn publish(
        &self,
        channel: &str,
        payload: Value,
        sender: Option<String>,
        ttl: Option<&Value>,
    ) -> CoordinationResult<Message> {
        let channel = channel_name(channel)?;
        if let Some(problem) = payload_problem(&payload) {
            return Err(CoordinationError::validation("payload", problem));
        }
        let ttl = match ttl {
            None | Some(Value::Null) => None,
            Some(raw) => Some(Ttl::parse(raw).map_err(|e| CoordinationError::validation("ttl", e))?),
        };
        let sender = sender
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let sequencer = self.hub.sequencer(&channel);
        let _turn = sequencer.lock().await;

        let now = self.clock.now_ms();
        let message = self
            .repo
            .append(&NewMessage {
                channel: channel.clone(),
                payload,
                sender,
                created_at: now,
                expires_at: ttl.map(|t| t.expires_at(now)),
            })
            .await?;

        let delivered = self.hub.deliver(&message);
        info!(channel = %channel, id = message.id, delivered, "Message published");

        Ok(message)
    }

    /// Live stream of every subsequent message on `channel`.
    pub fn subscribe(&self, channel: &str) -> CoordinationResult<Subscription> {
        let channel = channel_name(channel)?;
        self.hub
            .subscribe(&channel)
            .ok_or_else(|| CoordinationError::Internal("daemon is shutting down".to_string()))
    }

    /// Oldest message with `id > after`, waiting up to `timeout_ms` for one to
    /// arrive. Timing out is `Ok(None)`.
    pub async fn poll(
        &self,
        channel: &str,
        after: Option<i64>,
        timeout_ms: Option<u64>,
    ) -> CoordinationResult<Option<Message>> {
        let channel = channel_name(channel)?;
        let after = after.unwrap_or(0).max(0);
        let timeout_ms = timeout_ms
            .unwrap_or(DEFAULT_POLL_TIMEOUT_MS)
            .min(self.config.max_poll_timeout_ms);

        let now = self.clock.now_ms();
        let deadline = now.saturating_add(i64::try_from(timeout_ms).unwrap_or(i64::MAX));
        let waiter = if timeout_ms > 0 {
            self.hub.register_waiter(&channel, after, deadline)
        } else {
            None
        };

        if let Some(existing) = self.repo.list(&channel, Some(after), 1, now).await?.into_iter().next() {
            debug!(channel = %channel, after, id = existing.id, "Poll satisfied from log");
            return Ok(Some(existing));
        }

        let Some(waiter) = waiter else {
            return Ok(None);
        };

        debug!(channel = %channel, after, timeout_ms, "Poll waiting");
        Ok(waiter.wait(Duration::from_millis(timeout_ms)).await)
    }

    /// Ordered history read. `limit` is clamped to `1..=max_limit`.
    pub async fn messages(
        &self,
        channel: &str,
        limit: Option<u32>,
        after: Option<i64>,
    ) -> CoordinationResult<Vec<Message>> {
        let channel = channel_name(channel)?;
        let limit = limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);
        Ok(self
            .repo
            .list(&channel, after, limit, self.clock.now_ms())
            .await?)
    }

    /// Delete the channel's log. Live subscribers stay attached.
    pub async fn clear_channel(&self, channel: &str) -> CoordinationResult<u64> {
        let channel = channel_name(channel)?;
        let cleared = self.repo.clear(&channel).await?;
        self.hub.forget_sequencer(&channel);
        info!(channel = %channel, cleared, "Channel cleared");
        Ok(cleared)
    }

    pub async fn channels(&self) -> CoordinationResult<Vec<ChannelSummary>> {
        Ok(self.repo.channels(self.clock.now_ms()).await?)
    }

    pub async fn purge_expired(&self, now_ms: i64) -> CoordinationResult<u64> {
        Ok(self.repo.delete_expired(now_ms).await?)
    }
}

fn channel_name(raw: &str) -> CoordinationResult<String> {
    validate_channel(raw).map_err(|e| CoordinationError::validation("channel", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::repositories::InMemoryMessageRepository;
    use futures::StreamExt;
    use serde_json::json;

    fn engine() -> Arc<PubSubEngine> {
        Arc::new(PubSubEngine::new(
            Arc::new(InMemoryMessageRepository::new()),
            Arc::new(ChannelHub::new(8)),
            Arc::new(ManualClock::default()),
            MessagesConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_payloads() {
        let pubsub = engine();
        for bad in [json!(""), json!("   "), Value::Null, json!({}), json!([])] {
            let err = pubsub.publish("ch", bad, None, None).await.unwrap_err();
            assert_eq!(err.field(), Some("payload"));
        }
        let err = pubsub.publish("bad channel", json!(1), None, None).await.unwrap_err();
        assert_eq!(err.field(), Some("channel"));
    }

    #[tokio::test]
    async fn test_subscriber_sees_increasing_ids() {
        let pubsub = engine();
        let mut sub = pubsub.subscribe("builds").unwrap();

        for i in 0..5 {
            pubsub.publish("builds", json!({ "n": i }), None, None).await.unwrap();
        }
        pubsub.publish("other", json!("x"), None, None).await.unwrap();

        let mut last = 0;
        for _ in 0..5 {
            let msg = sub.next().await.unwrap();
            assert_eq!(msg.channel, "builds");
            assert!(msg.id > last);
            last = msg.id;
        }
    }

    #[tokio::test]
    async fn test_poll_returns_existing_message_immediately() {
        let pubsub = engine();
        let first = pubsub.publish("ch", json!("a"), None, None).await.unwrap();
        let second = pubsub.publish("ch", json!("b"), None, None).await.unwrap();

        let got = pubsub.poll("ch", Some(first.id), Some(10_000)).await.unwrap();
        assert_eq!(got.unwrap().id, second.id);
        assert_eq!(pubsub.hub().stats().waiters, 0);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let pubsub = engine();
        let poller = {
            let pubsub = pubsub.clone();
            tokio::spawn(async move { pubsub.poll("jobs", Some(0), Some(5_000)).await })
        };

        while pubsub.hub().stats().waiters == 0 {
            tokio::task::yield_now().await;
        }
        let published = pubsub.publish("jobs", json!("go"), None, None).await.unwrap();

        let got = poller.await.unwrap().unwrap().unwrap();
        assert_eq!(got.id, published.id);
    }

    #[tokio::test]
    async fn test_poll_timeout_is_empty_not_error() {
        let pubsub = engine();
        let got = pubsub.poll("quiet", None, Some(20)).await.unwrap();
        assert!(got.is_none());
        assert_eq!(pubsub.hub().stats().waiters, 0);
    }

    #[tokio::test]
    async fn test_messages_limit_and_clear() {
        let pubsub = engine();
        for i in 0..10 {
            pubsub.publish("log", json!(i), Some("me".into()), None).await.unwrap();
        }

        let page = pubsub.messages("log", Some(3), None).await.unwrap();
        assert_eq!(page.len(), 3);
        let next = pubsub.messages("log", Some(0), Some(page[2].id)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert!(next[0].id > page[2].id);

        let summary = pubsub.channels().await.unwrap();
        assert_eq!(summary[0].count, 10);

        assert_eq!(pubsub.clear_channel("log").await.unwrap(), 10);
        assert!(pubsub.messages("log", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clearing_channels_releases_sequencers() {
        let pubsub = engine();
        for i in 0..200 {
            let channel = format!("session-{}", i);
            pubsub.publish(&channel, json!("hi"), None, None).await.unwrap();
            pubsub.clear_channel(&channel).await.unwrap();
        }
        assert_eq!(pubsub.hub().sequencer_count(), 0);
    }
}
