//! Message pile: the set of live messages this node keeps gossiping.
//!
//! Deduplicates by signature, refuses messages that are already dead and
//! drops them again on the first vacuum after they expire.

use parking_lot::{Mutex, RwLock};
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::message::{Message, Signature};

pub type PileObserver = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
struct Slots {
    messages: HashMap<usize, Message>,
    by_signature: HashMap<Signature, usize>,
}

impl Slots {
    fn free_slot(&self) -> usize {
        (0..)
            .find(|slot| !self.messages.contains_key(slot))
            .unwrap_or(self.messages.len())
    }
}

#[derive(Default)]
pub struct MessagePile {
    slots: Mutex<Slots>,
    observers: RwLock<Vec<PileObserver>>,
}

impl MessagePile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observers run synchronously after every successful insert, with the
    /// pile unlocked.
    pub fn register_on_add(&self, observer: impl Fn(&Message) + Send + Sync + 'static) {
        self.observers.write().push(Arc::new(observer));
    }

    pub fn add(&self, message: Message) -> bool {
        self.add_at(message, now())
    }

    /// Returns false for duplicates and for messages dead at `now`.
    pub fn add_at(&self, message: Message, now: i64) -> bool {
        if !message.is_alive_at(now) {
            trace!("💀 Refusing expired message {}", message.signature().short());
            return false;
        }

        {
            let mut slots = self.slots.lock();
            if slots.by_signature.contains_key(message.signature()) {
                trace!("Duplicate message {}", message.signature().short());
                return false;
            }
            let slot = slots.free_slot();
            slots.by_signature.insert(*message.signature(), slot);
            slots.messages.insert(slot, message.clone());
        }

        let observers = self.observers.read().clone();
        for observer in observers {
            observer(&message);
        }
        true
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.slots.lock().by_signature.contains_key(signature)
    }

    pub fn get(&self, signature: &Signature) -> Option<Message> {
        let slots = self.slots.lock();
        let slot = slots.by_signature.get(signature)?;
        slots.messages.get(slot).cloned()
    }

    pub fn get_random(&self) -> Option<Message> {
        self.get_random_at(now())
    }

    /// Uniform over the entries still alive at `now`
    pub fn get_random_at(&self, now: i64) -> Option<Message> {
        let slots = self.slots.lock();
        slots
            .messages
            .values()
            .filter(|m| m.is_alive_at(now))
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    pub fn vacuum(&self) -> usize {
        self.vacuum_at(now())
    }

    /// Remove every entry dead at `now`; returns how many went.
    pub fn vacuum_at(&self, now: i64) -> usize {
        let mut slots = self.slots.lock();
        let dead: Vec<usize> = slots
            .messages
            .iter()
            .filter(|(_, m)| !m.is_alive_at(now))
            .map(|(slot, _)| *slot)
            .collect();
        for slot in &dead {
            if let Some(message) = slots.messages.remove(slot) {
                slots.by_signature.remove(message.signature());
            }
        }
        dead.len()
    }

    /// Entries stored, dead or alive
    pub fn len(&self) -> usize {
        self.slots.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live_len(&self) -> usize {
        self.live_len_at(now())
    }

    pub fn live_len_at(&self, now: i64) -> usize {
        self.slots
            .lock()
            .messages
            .values()
            .filter(|m| m.is_alive_at(now))
            .count()
    }

    pub fn messages(&self) -> Vec<Message> {
        let slots = self.slots.lock();
        let mut ordered: Vec<(&usize, &Message)> = slots.messages.iter().collect();
        ordered.sort_by_key(|(slot, _)| **slot);
        ordered.into_iter().map(|(_, m)| m.clone()).collect()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000;

    fn message_at(timestamp: i64, ttl: i64, payload: &[u8]) -> Message {
        Message::builder()
            .timestamp(timestamp)
            .unwrap()
            .ttl(ttl)
            .unwrap()
            .channel("test")
            .unwrap()
            .payload(payload.to_vec())
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_add_fires_observer_once() {
        let pile = MessagePile::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        pile.register_on_add(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let msg = message_at(T0, 60, b"hi");
        assert!(pile.add_at(msg.clone(), T0));
        assert!(!pile.add_at(msg.clone(), T0 + 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pile.len(), 1);
        assert_eq!(pile.get(msg.signature()), Some(msg));
    }

    #[test]
    fn test_expired_message_is_refused() {
        let pile = MessagePile::new();
        let msg = message_at(T0, 60, b"late");
        assert!(!pile.add_at(msg.clone(), T0 + 60));
        assert!(!pile.contains(msg.signature()));
    }

    #[test]
    fn test_vacuum_after_expiry() {
        let pile = MessagePile::new();
        let short = message_at(T0, 60, b"short");
        let long = message_at(T0, 3600, b"long");
        pile.add_at(short.clone(), T0);
        pile.add_at(long.clone(), T0);

        assert_eq!(pile.vacuum_at(T0 + 59), 0);
        assert_eq!(pile.vacuum_at(T0 + 60), 1);
        assert!(!pile.contains(short.signature()));
        assert!(pile.contains(long.signature()));
        assert_eq!(pile.live_len_at(T0 + 60), 1);
    }

    #[test]
    fn test_get_random_skips_dead_entries() {
        let pile = MessagePile::new();
        let short = message_at(T0, 60, b"short");
        let long = message_at(T0, 3600, b"long");
        pile.add_at(short, T0);
        pile.add_at(long.clone(), T0);

        for _ in 0..20 {
            assert_eq!(pile.get_random_at(T0 + 120), Some(long.clone()));
        }
        assert_eq!(pile.get_random_at(T0 + 4000), None);
        assert_eq!(MessagePile::new().get_random_at(T0), None);
    }

    #[test]
    fn test_get_random_covers_all_live_entries() {
        let pile = MessagePile::new();
        for i in 0..4u8 {
            pile.add_at(message_at(T0, 600, &[i + 1]), T0);
        }
        let mut seen = HashSet::new();
        for _ in 0..400 {
            if let Some(m) = pile.get_random_at(T0) {
                seen.insert(m.payload().to_vec());
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_slots_are_reused() {
        let pile = MessagePile::new();
        let a = message_at(T0, 60, b"a");
        let b = message_at(T0, 600, b"b");
        let c = message_at(T0 + 100, 600, b"c");
        pile.add_at(a, T0);
        pile.add_at(b.clone(), T0);
        pile.vacuum_at(T0 + 60);
        pile.add_at(c.clone(), T0 + 100);

        // c takes the slot a left behind, so it now sorts first
        assert_eq!(pile.messages(), vec![c, b]);
    }

    #[test]
    fn test_observer_may_read_the_pile() {
        let pile = Arc::new(MessagePile::new());
        let inner = pile.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let count = seen.clone();
        pile.register_on_add(move |m| {
            assert!(inner.contains(m.signature()));
            count.store(inner.len(), Ordering::SeqCst);
        });
        pile.add_at(message_at(T0, 60, b"x"), T0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
