//! In-process publish/subscribe hub for chat and presence events.
//!
//! Channels are named (`chat-room.{id}`, `user.{id}`, `presence`) and created on first use.
//! Delivery is best effort: a slow subscriber that falls behind skips the events it missed.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::config::PresenceConfig;
use crate::manager::{
    presence_manager::PresenceManager, ApprovalStatus, ChatMessage, DbError, ListingStatus,
    PropertyId, RoomId, UserId,
};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Room(RoomId),
    User(UserId),
    Presence,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Room(id) => write!(f, "chat-room.{id}"),
            Channel::User(id) => write!(f, "user.{id}"),
            Channel::Presence => f.write_str("presence"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MessageSent {
        room_id: RoomId,
        message: ChatMessage,
    },
    UnreadCount {
        room_id: RoomId,
        unread: i64,
        total_unread: i64,
    },
    MessagesRead {
        room_id: RoomId,
        reader_id: UserId,
    },
    PresenceChanged {
        user_id: UserId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },
    PropertyStatusChanged {
        property_id: PropertyId,
        status: ListingStatus,
        approval_status: ApprovalStatus,
    },
}

/// An event together with the channel it was published on.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel: String,
    #[serde(flatten)]
    pub event: Event,
}

#[derive(Default)]
pub struct Hub {
    channels: Mutex<HashMap<Channel, broadcast::Sender<Event>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire and forget. Returns how many subscribers the event reached.
    pub fn publish(&self, channel: Channel, event: Event) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = channels.get(&channel) else {
            return 0;
        };
        match sender.send(event) {
            Ok(n) => n,
            Err(_) => {
                // Every receiver is gone.
                channels.remove(&channel);
                0
            }
        }
    }

    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(&channel).map_or(0, |s| s.receiver_count())
    }

    /// Drops `rx` and forgets the channel if that was its last subscriber.
    pub fn release(&self, channel: Channel, rx: broadcast::Receiver<Event>) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        drop(rx);
        if channels.get(&channel).map_or(false, |s| s.receiver_count() == 0) {
            channels.remove(&channel);
        }
    }
}

/// A receiver that is handed back to the hub when dropped, including on task abort.
struct Lease {
    hub: Arc<Hub>,
    channel: Channel,
    rx: Option<broadcast::Receiver<Event>>,
}

impl Lease {
    fn new(hub: Arc<Hub>, channel: Channel) -> Self {
        let rx = hub.subscribe(channel);
        Self {
            hub,
            channel,
            rx: Some(rx),
        }
    }

    async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.hub.release(self.channel, rx);
        }
    }
}

/// The set of channels one connection listens to, funnelled into a single queue.
pub struct Subscriptions {
    hub: Arc<Hub>,
    tx: mpsc::Sender<Envelope>,
    tasks: HashMap<Channel, JoinHandle<()>>,
}

impl Subscriptions {
    pub fn new(hub: Arc<Hub>, buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                hub,
                tx,
                tasks: HashMap::new(),
            },
            rx,
        )
    }

    /// Returns `false` if the channel was already subscribed.
    pub fn add(&mut self, channel: Channel) -> bool {
        if self.tasks.contains_key(&channel) {
            return false;
        }
        let mut lease = Lease::new(self.hub.clone(), channel);
        let tx = self.tx.clone();
        let name = channel.to_string();
        let task = tokio::spawn(async move {
            loop {
                match lease.recv().await {
                    Ok(event) => {
                        let envelope = Envelope {
                            channel: name.clone(),
                            event,
                        };
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %name, skipped, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(channel, task);
        true
    }

    /// Returns `false` if the channel was not subscribed.
    pub fn remove(&mut self, channel: Channel) -> bool {
        match self.tasks.remove(&channel) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.tasks.contains_key(&channel)
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Flips users whose heartbeat expired before `now` to offline and announces each one.
pub async fn sweep_presence(
    pool: &sqlx::SqlitePool,
    hub: &Hub,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<usize, DbError> {
    let swept = PresenceManager::new(pool, window).sweep(now).await?;
    for &(user_id, last_seen) in &swept {
        hub.publish(
            Channel::Presence,
            Event::PresenceChanged {
                user_id,
                online: false,
                last_seen: Some(last_seen),
            },
        );
    }
    Ok(swept.len())
}

/// Runs [`sweep_presence`] every `sweep_interval_secs`.
pub fn spawn_presence_sweeper(
    pool: sqlx::SqlitePool,
    hub: Arc<Hub>,
    config: PresenceConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = sweep_presence(&pool, &hub, config.online_window(), Utc::now()).await {
                tracing::error!("presence sweep failed: {e:#}");
            }
        }
    })
}
