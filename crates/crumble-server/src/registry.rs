use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Outbound frame sender for one connection. Bounded so a slow client
/// cannot exhaust memory; see the lossy/reliable send discipline below.
pub type FrameSender = mpsc::Sender<String>;

/// How many outbound frames a connection may buffer.
pub const SEND_BUFFER: usize = 256;

pub struct ConnectionHandle {
    pub sender: FrameSender,
    pub name: String,
    pub avatar: String,
    /// Registration serial; a reconnecting user replaces the old handle,
    /// and the superseded socket's cleanup must not tear the new one down.
    pub serial: u64,
}

/// Result of removing a connection on socket close.
#[derive(Debug, PartialEq, Eq)]
pub enum Unregistered {
    /// A newer connection for the same user had already replaced this one.
    Superseded,
    /// Removed; carries the room the user was in, if any.
    Removed { room_id: Option<String> },
}

/// Replica-local connection map: `user_id -> connection` plus
/// `user_id -> current room`. One exclusive mutex for both, never held
/// across I/O — senders are cloned out before any send.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
    next_serial: Arc<AtomicU64>,
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<String, ConnectionHandle>,
    room_of: HashMap<String, String>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_serial: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a connection, replacing any previous one for the user.
    /// Returns the serial the caller must present at unregister time.
    pub fn register(&self, user_id: &str, name: &str, avatar: &str, sender: FrameSender) -> u64 {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("registry lock");
        inner.by_user.insert(
            user_id.to_string(),
            ConnectionHandle {
                sender,
                name: name.to_string(),
                avatar: avatar.to_string(),
                serial,
            },
        );
        serial
    }

    /// Remove a connection on socket close. A serial mismatch means the
    /// user reconnected and this close belongs to the superseded socket.
    pub fn unregister(&self, user_id: &str, serial: u64) -> Unregistered {
        let mut inner = self.inner.lock().expect("registry lock");
        match inner.by_user.get(user_id) {
            Some(handle) if handle.serial == serial => {
                inner.by_user.remove(user_id);
                let room_id = inner.room_of.remove(user_id);
                Unregistered::Removed { room_id }
            },
            _ => Unregistered::Superseded,
        }
    }

    /// Drop a connection unconditionally (reliable send failed).
    pub fn drop_connection(&self, user_id: &str) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.by_user.remove(user_id);
        inner.room_of.remove(user_id);
    }

    pub fn set_room(&self, user_id: &str, room_id: &str) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.room_of.insert(user_id.to_string(), room_id.to_string());
    }

    pub fn clear_room(&self, user_id: &str) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.room_of.remove(user_id);
    }

    pub fn room_of(&self, user_id: &str) -> Option<String> {
        let inner = self.inner.lock().expect("registry lock");
        inner.room_of.get(user_id).cloned()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        let inner = self.inner.lock().expect("registry lock");
        inner.by_user.contains_key(user_id)
    }

    /// Locally connected participants of a room.
    pub fn local_members(&self, room_id: &str) -> Vec<(String, FrameSender)> {
        let inner = self.inner.lock().expect("registry lock");
        inner
            .room_of
            .iter()
            .filter(|(_, r)| r.as_str() == room_id)
            .filter_map(|(user_id, _)| {
                inner
                    .by_user
                    .get(user_id)
                    .map(|h| (user_id.clone(), h.sender.clone()))
            })
            .collect()
    }

    pub fn sender_of(&self, user_id: &str) -> Option<FrameSender> {
        let inner = self.inner.lock().expect("registry lock");
        inner.by_user.get(user_id).map(|h| h.sender.clone())
    }

    /// Lossy send: drop the frame silently when the buffer is full. Used
    /// for state updates, spawns, and opponent-click notifications.
    pub fn send_lossy(&self, user_id: &str, frame: &str) {
        if let Some(sender) = self.sender_of(user_id)
            && let Err(e) = sender.try_send(frame.to_string())
        {
            tracing::debug!(user_id, error = %e, "dropping lossy frame for slow client");
        }
    }

    /// Reliable send: returns false when the frame could not be buffered.
    /// The caller must treat the connection as lost.
    #[must_use]
    pub fn send_reliable(&self, user_id: &str, frame: &str) -> bool {
        match self.sender_of(user_id) {
            Some(sender) => sender.try_send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock");
        inner.by_user.len()
    }
}
