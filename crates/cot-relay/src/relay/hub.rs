//! Room hub: the broadcast side of the relay.
//!
//! Only rooms named at construction can be joined. Each joined room is a
//! tokio broadcast channel, created on first subscribe and dropped when its
//! last subscriber leaves. Emitting delivers to whoever is subscribed at that
//! instant; nothing is retained for subscribers that join later.

use cot_core::{Broadcast, BroadcastFrame, RelayError, RelayResult};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Registry of broadcast rooms keyed by name (e.g. `/debugger`).
pub struct RoomHub {
    rooms: RwLock<HashMap<String, broadcast::Sender<BroadcastFrame>>>,
    /// Rooms subscribers may join.
    known: HashSet<String>,
    /// Per-room buffer; subscribers further behind than this lag and skip.
    capacity: usize,
}

impl RoomHub {
    /// Create an empty hub accepting subscribers for `known` rooms.
    pub fn new<I, S>(capacity: usize, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rooms: RwLock::new(HashMap::new()),
            known: known.into_iter().map(Into::into).collect(),
            capacity: capacity.max(1),
        }
    }

    /// Whether subscribers may join `room`.
    pub fn is_known(&self, room: &str) -> bool {
        self.known.contains(room)
    }

    /// Join `room`, creating its channel if needed. Unknown rooms are refused.
    pub fn subscribe(&self, room: &str) -> RelayResult<broadcast::Receiver<BroadcastFrame>> {
        if !self.is_known(room) {
            return Err(RelayError::Broadcast(format!("unknown room: {room}")));
        }
        let mut rooms = self.rooms.write().map_err(|_| poisoned())?;
        let tx = rooms.entry(room.to_string()).or_insert_with(|| {
            debug!(room = %room, "room created");
            broadcast::channel(self.capacity).0
        });
        Ok(tx.subscribe())
    }

    /// Number of subscribers currently joined to `room`.
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .ok()
            .and_then(|rooms| rooms.get(room).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Names of rooms that currently have a channel.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms
            .read()
            .map(|rooms| rooms.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop `room` if every subscriber has left. Called by a subscriber after
    /// its receiver is gone, and on emit into an empty room.
    pub fn release(&self, room: &str) -> RelayResult<()> {
        let mut rooms = self.rooms.write().map_err(|_| poisoned())?;
        if rooms.get(room).is_some_and(|tx| tx.receiver_count() == 0) {
            rooms.remove(room);
            debug!(room = %room, "room released");
        }
        Ok(())
    }
}

impl Broadcast for RoomHub {
    fn emit(&self, event: &str, payload: &str, room: &str) -> RelayResult<()> {
        let frame = BroadcastFrame::new(event, payload);
        let delivered = {
            let rooms = self.rooms.read().map_err(|_| poisoned())?;
            match rooms.get(room) {
                // Send only fails when no receiver is left.
                Some(tx) => tx.send(frame).ok(),
                None => {
                    trace!(room = %room, "no subscribers, frame discarded");
                    return Ok(());
                }
            }
        };

        match delivered {
            Some(n) => trace!(room = %room, event = %event, subscribers = n, "frame emitted"),
            None => self.release(room)?,
        }
        Ok(())
    }
}

fn poisoned() -> RelayError {
    RelayError::Broadcast("room table lock poisoned".into())
}
