// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Channel Hub - in-process delivery state for pub/sub
//!
//! Tracks, per channel, the live streaming subscribers (bounded `mpsc`
//! queues) and the pending long-poll waiters (`oneshot` senders with a
//! deadline). Removing an entry from the hub map is the only way a waiter is
//! resolved, so whichever of publish, timeout, cancellation, sweeper expiry,
//! or shutdown gets there first wins and the rest see nothing to do.
//!
//! Constructed once at daemon start, shared via `Arc`, and `close()`d on
//! shutdown.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::message::Message;

struct Waiter {
    after: i64,
    deadline_ms: i64,
    response_tx: oneshot::Sender<Option<Message>>,
}

#[derive(Default)]
struct HubState {
    closed: bool,
    subscribers: HashMap<String, HashMap<Uuid, mpsc::Sender<Message>>>,
    waiters: HashMap<String, HashMap<Uuid, Waiter>>,
}

impl HubState {
    fn remove_subscriber(&mut self, channel: &str, id: &Uuid) -> bool {
        let Some(subs) = self.subscribers.get_mut(channel) else {
            return false;
        };
        let removed = subs.remove(id).is_some();
        if subs.is_empty() {
            self.subscribers.remove(channel);
        }
        removed
    }

    fn take_waiter(&mut self, channel: &str, id: &Uuid) -> Option<Waiter> {
        let waiters = self.waiters.get_mut(channel)?;
        let waiter = waiters.remove(id);
        if waiters.is_empty() {
            self.waiters.remove(channel);
        }
        waiter
    }
}

/// Snapshot of live delivery state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub channels: usize,
    pub subscribers: usize,
    pub waiters: usize,
}

pub struct ChannelHub {
    state: Arc<Mutex<HubState>>,
    sequencers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    subscriber_buffer: usize,
}

impl ChannelHub {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            sequencers: Mutex::new(HashMap::new()),
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }

    /// Per-channel publish mutex. Holding it across store insert and
    /// [`ChannelHub::deliver`] keeps fan-out in id order.
    pub fn sequencer(&self, channel: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.sequencers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .clone()
    }

    /// Drop the sequencer for `channel` unless a publish is holding it.
    pub fn forget_sequencer(&self, channel: &str) -> bool {
        let mut sequencers = self.sequencers.lock();
        let idle = sequencers
            .get(channel)
            .is_some_and(|turn| Arc::strong_count(turn) == 1);
        if idle {
            sequencers.remove(channel);
        }
        idle
    }

    /// Drop every sequencer no publish is holding. Returns how many went.
    pub fn prune_sequencers(&self) -> usize {
        let mut sequencers = self.sequencers.lock();
        let before = sequencers.len();
        sequencers.retain(|_, turn| Arc::strong_count(turn) > 1);
        before - sequencers.len()
    }

    pub fn sequencer_count(&self) -> usize {
        self.sequencers.lock().len()
    }

    /// Open a streaming subscription. `None` once the hub is closed.
    pub fn subscribe(&self, channel: &str) -> Option<Subscription> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        state
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(id, tx);

        debug!(channel = %channel, subscriber = %id, "Subscriber attached");

        Some(Subscription {
            id,
            channel: channel.to_string(),
            rx,
            state: self.state.clone(),
        })
    }

    /// Register a long-poll waiter for the first message with `id > after`.
    /// `None` once the hub is closed.
    pub fn register_waiter(&self, channel: &str, after: i64, deadline_ms: i64) -> Option<PollWaiter> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        let id = Uuid::new_v4();
        let (response_tx, rx) = oneshot::channel();
        state.waiters.entry(channel.to_string()).or_default().insert(
            id,
            Waiter {
                after,
                deadline_ms,
                response_tx,
            },
        );

        Some(PollWaiter {
            id,
            channel: channel.to_string(),
            rx,
            state: self.state.clone(),
        })
    }

    /// Fan a freshly stored message out to live subscribers and matching
    /// waiters. Never blocks: a subscriber whose queue is full or closed is
    /// dropped. Returns the number of receivers reached.
    pub fn deliver(&self, message: &Message) -> usize {
        let mut state = self.state.lock();
        let mut delivered = 0;

        if let Some(subs) = state.subscribers.get_mut(&message.channel) {
            subs.retain(|id, tx| match tx.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(channel = %message.channel, subscriber = %id, "Subscriber queue full, dropping subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(channel = %message.channel, subscriber = %id, "Subscriber gone");
                    false
                }
            });
            if subs.is_empty() {
                state.subscribers.remove(&message.channel);
            }
        }

        if let Some(waiters) = state.waiters.get_mut(&message.channel) {
            let ready: Vec<Uuid> = waiters
                .iter()
                .filter(|(_, w)| message.id > w.after)
                .map(|(id, _)| *id)
                .collect();
            for id in ready {
                if let Some(waiter) = waiters.remove(&id) {
                    if waiter.response_tx.send(Some(message.clone())).is_ok() {
                        delivered += 1;
                    }
                }
            }
            if waiters.is_empty() {
                state.waiters.remove(&message.channel);
            }
        }

        delivered
    }

    /// Resolve every waiter whose deadline has passed with "no message".
    pub fn expire_waiters(&self, now_ms: i64) -> usize {
        let mut state = self.state.lock();
        let mut expired = 0;

        for waiters in state.waiters.values_mut() {
            let due: Vec<Uuid> = waiters
                .iter()
                .filter(|(_, w)| w.deadline_ms <= now_ms)
                .map(|(id, _)| *id)
                .collect();
            for id in due {
                if let Some(waiter) = waiters.remove(&id) {
                    let _ = waiter.response_tx.send(None);
                    expired += 1;
                }
            }
        }
        state.waiters.retain(|_, waiters| !waiters.is_empty());

        expired
    }

    /// End every subscription and resolve every waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let subscribers: usize = state.subscribers.values().map(HashMap::len).sum();
        state.subscribers.clear();

        let mut waiters = 0;
        for (_, channel_waiters) in state.waiters.drain() {
            for (_, waiter) in channel_waiters {
                let _ = waiter.response_tx.send(None);
                waiters += 1;
            }
        }

        info!(subscribers, waiters, "Channel hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> HubStats {
        let state = self.state.lock();
        let mut channels: Vec<&String> = state.subscribers.keys().chain(state.waiters.keys()).collect();
        channels.sort();
        channels.dedup();
        HubStats {
            channels: channels.len(),
            subscribers: state.subscribers.values().map(HashMap::len).sum(),
            waiters: state.waiters.values().map(HashMap::len).sum(),
        }
    }
}

/// A live streaming subscription. Dropping it detaches from the hub.
pub struct Subscription {
    id: Uuid,
    channel: String,
    rx: mpsc::Receiver<Message>,
    state: Arc<Mutex<HubState>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.state.lock().remove_subscriber(&self.channel, &self.id) {
            debug!(channel = %self.channel, subscriber = %self.id, "Subscriber detached");
        }
    }
}

/// A registered long-poll. Dropping it cancels the wait.
pub struct PollWaiter {
    id: Uuid,
    channel: String,
    rx: oneshot::Receiver<Option<Message>>,
    state: Arc<Mutex<HubState>>,
}

impl PollWaiter {
    /// Wait up to `timeout` for delivery.
    pub async fn wait(mut self, timeout: Duration) -> Option<Message> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => None,
            Err(_) => {
                if self.cancel() {
                    None
                } else {
                    // Lost the race: the message was sent while we were
                    // timing out and is already in the channel.
                    self.rx.try_recv().ok().flatten()
                }
            }
        }
    }

    /// Remove this waiter from the hub; `false` if something else already did.
    fn cancel(&self) -> bool {
        self.state.lock().take_waiter(&self.channel, &self.id).is_some()
    }
}

impl Drop for PollWaiter {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn message(id: i64, channel: &str) -> Message {
        Message {
            id,
            channel: channel.to_string(),
            payload: json!({ "n": id }),
            sender: None,
            created_at: 0,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let hub = ChannelHub::new(8);
        let mut sub = hub.subscribe("builds").unwrap();

        hub.deliver(&message(1, "builds"));
        hub.deliver(&message(2, "other"));
        hub.deliver(&message(3, "builds"));

        assert_eq!(sub.next().await.unwrap().id, 1);
        assert_eq!(sub.next().await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_dropping_subscription_detaches() {
        let hub = ChannelHub::new(8);
        let sub = hub.subscribe("c").unwrap();
        assert_eq!(hub.stats().subscribers, 1);
        drop(sub);
        assert_eq!(hub.stats(), HubStats::default());
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped_without_blocking() {
        let hub = ChannelHub::new(1);
        let mut slow = hub.subscribe("c").unwrap();
        let mut fast = hub.subscribe("c").unwrap();

        assert_eq!(hub.deliver(&message(1, "c")), 2);
        assert_eq!(fast.recv().await.unwrap().id, 1);

        // slow never drained its single slot
        assert_eq!(hub.deliver(&message(2, "c")), 1);
        assert_eq!(hub.stats().subscribers, 1);
        assert_eq!(fast.recv().await.unwrap().id, 2);

        assert_eq!(slow.recv().await.unwrap().id, 1);
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_waiter_only_takes_newer_messages() {
        let hub = ChannelHub::new(8);
        let waiter = hub.register_waiter("c", 5, i64::MAX).unwrap();

        hub.deliver(&message(5, "c"));
        assert_eq!(hub.stats().waiters, 1);
        hub.deliver(&message(6, "c"));
        assert_eq!(hub.stats().waiters, 0);

        let got = waiter.wait(Duration::from_secs(1)).await;
        assert_eq!(got.unwrap().id, 6);
    }

    #[tokio::test]
    async fn test_waiter_timeout_cleans_up() {
        let hub = ChannelHub::new(8);
        let waiter = hub.register_waiter("c", 0, i64::MAX).unwrap();
        assert!(waiter.wait(Duration::from_millis(20)).await.is_none());
        assert_eq!(hub.stats().waiters, 0);
    }

    #[tokio::test]
    async fn test_expire_and_close_resolve_waiters_once() {
        let hub = ChannelHub::new(8);
        let early = hub.register_waiter("c", 0, 100).unwrap();
        let late = hub.register_waiter("c", 0, 10_000).unwrap();
        let mut sub = hub.subscribe("c").unwrap();

        assert_eq!(hub.expire_waiters(100), 1);
        assert!(early.wait(Duration::from_secs(1)).await.is_none());

        hub.close();
        hub.close();
        assert!(hub.is_closed());
        assert!(late.wait(Duration::from_secs(1)).await.is_none());
        assert!(sub.recv().await.is_none());
        assert!(hub.subscribe("c").is_none());
        assert!(hub.register_waiter("c", 0, 0).is_none());
    }

    #[tokio::test]
    async fn test_idle_sequencers_are_pruned() {
        let hub = ChannelHub::new(8);
        for i in 0..500 {
            let turn = hub.sequencer(&format!("task-{}", i));
            drop(turn.lock().await);
        }
        assert_eq!(hub.sequencer_count(), 500);

        assert!(hub.forget_sequencer("task-0"));
        assert!(!hub.forget_sequencer("task-0"));

        let busy = hub.sequencer("task-1");
        let _held = busy.lock().await;
        assert!(!hub.forget_sequencer("task-1"));

        assert_eq!(hub.prune_sequencers(), 498);
        assert_eq!(hub.sequencer_count(), 1);
    }
}
