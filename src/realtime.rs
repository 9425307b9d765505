//! Realtime channel lifecycle for one client.
//!
//! At most one room channel and one round channel are open at a time. Both
//! feed the same event stream consumed by the scheduler.

use crate::backend::{BackendResult, Realtime};
use crate::protocol::{BroadcastHint, RealtimeEvent, Topic};
use std::sync::Arc;
use tokio::sync::mpsc;

struct ActiveSubscription {
    topic: Topic,
    rx: mpsc::UnboundedReceiver<RealtimeEvent>,
}

#[derive(Clone, Copy)]
enum Slot {
    Room,
    Round,
}

pub struct SubscriptionManager {
    realtime: Option<Arc<dyn Realtime>>,
    room: Option<ActiveSubscription>,
    round: Option<ActiveSubscription>,
}

impl SubscriptionManager {
    /// Without a realtime service the client relies on polling alone
    pub fn new(realtime: Option<Arc<dyn Realtime>>) -> Self {
        Self {
            realtime,
            room: None,
            round: None,
        }
    }

    pub fn is_push_enabled(&self) -> bool {
        self.realtime.is_some()
    }

    pub fn room_topic(&self) -> Option<&Topic> {
        self.room.as_ref().map(|s| &s.topic)
    }

    pub fn round_topic(&self) -> Option<&Topic> {
        self.round.as_ref().map(|s| &s.topic)
    }

    /// Open the room channel, closing every previous channel first.
    /// Returns whether a new channel was opened.
    pub async fn subscribe_room(&mut self, room_id: &str) -> BackendResult<bool> {
        let topic = Topic::Room(room_id.to_string());
        if self.room_topic() == Some(&topic) {
            return Ok(false);
        }

        self.unsubscribe_all();
        let Some(realtime) = self.realtime.clone() else {
            return Ok(false);
        };

        let rx = realtime.subscribe(topic.clone()).await?;
        tracing::debug!("Subscribed to {}", topic.channel_name());
        self.room = Some(ActiveSubscription { topic, rx });
        Ok(true)
    }

    /// Open the channel for a round, replacing the previous round's channel
    pub async fn subscribe_round(&mut self, round_id: &str) -> BackendResult<bool> {
        let topic = Topic::Round(round_id.to_string());
        if self.round_topic() == Some(&topic) {
            return Ok(false);
        }

        self.unsubscribe_round();
        let Some(realtime) = self.realtime.clone() else {
            return Ok(false);
        };

        let rx = realtime.subscribe(topic.clone()).await?;
        tracing::debug!("Subscribed to {}", topic.channel_name());
        self.round = Some(ActiveSubscription { topic, rx });
        Ok(true)
    }

    pub fn unsubscribe_round(&mut self) {
        if let Some(sub) = self.round.take() {
            tracing::debug!("Closed {}", sub.topic.channel_name());
        }
    }

    pub fn unsubscribe_all(&mut self) {
        self.unsubscribe_round();
        if let Some(sub) = self.room.take() {
            tracing::debug!("Closed {}", sub.topic.channel_name());
        }
    }

    /// Send a hint to the other clients in the room. Failures are logged only.
    pub async fn announce(&self, room_id: &str, hint: BroadcastHint) {
        let Some(realtime) = &self.realtime else {
            return;
        };
        if let Err(e) = realtime.broadcast(room_id, hint).await {
            tracing::warn!("Broadcast to room {} failed: {}", room_id, e);
        }
    }

    /// Wait for the next event on any open channel. Pends forever when
    /// nothing is open. Cancel safe.
    pub async fn recv(&mut self) -> RealtimeEvent {
        loop {
            let received = match (self.room.as_mut(), self.round.as_mut()) {
                (None, None) => std::future::pending().await,
                (Some(room), None) => room.rx.recv().await.ok_or(Slot::Room),
                (None, Some(round)) => round.rx.recv().await.ok_or(Slot::Round),
                (Some(room), Some(round)) => tokio::select! {
                    ev = room.rx.recv() => ev.ok_or(Slot::Room),
                    ev = round.rx.recv() => ev.ok_or(Slot::Round),
                },
            };

            match received {
                Ok(event) => return event,
                Err(Slot::Room) => {
                    tracing::warn!("Room channel closed by server");
                    self.room = None;
                }
                Err(Slot::Round) => {
                    tracing::warn!("Round channel closed by server");
                    self.round = None;
                }
            }
        }
    }

    /// Move already-queued events into `batch` without waiting
    pub fn drain_ready(&mut self, batch: &mut Vec<RealtimeEvent>) {
        for sub in [self.room.as_mut(), self.round.as_mut()].into_iter().flatten() {
            while let Ok(event) = sub.rx.try_recv() {
                batch.push(event);
            }
        }
    }
}
