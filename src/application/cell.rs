//! Durable, observable values keyed by name.
//!
//! Reads never fail: an absent key, an unreadable medium or a corrupt value
//! all yield the caller's fallback. Writes never fail either; a rejected
//! write is logged and the in-memory value stays authoritative.

use crate::infrastructure::storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Turns stored JSON into a value, or `None` when the shape is unusable.
/// This is where per-record repair passes hook in.
pub type Decoder<V> = fn(serde_json::Value) -> Option<V>;

fn decode_json<V: DeserializeOwned>(value: serde_json::Value) -> Option<V> {
    serde_json::from_value(value).ok()
}

pub fn read_or<V: DeserializeOwned>(store: &dyn KeyValueStore, key: &str, fallback: V) -> V {
    read_with(store, key, fallback, decode_json::<V>)
}

fn read_with<V>(store: &dyn KeyValueStore, key: &str, fallback: V, decode: Decoder<V>) -> V {
    let raw = match store.load(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return fallback,
        Err(error) => {
            warn!(key, %error, "storage read failed; using default");
            return fallback;
        }
    };
    let value = match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(key, %error, "stored value is not valid JSON; using default");
            return fallback;
        }
    };
    decode(value).unwrap_or_else(|| {
        warn!(key, "stored value has an unexpected shape; using default");
        fallback
    })
}

pub fn write<V: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &V) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(key, %error, "failed to encode value; write skipped");
            return;
        }
    };
    if let Err(error) = store.save(key, &raw) {
        warn!(key, %error, "storage write rejected; keeping in-memory value");
    }
}

pub struct PersistentCell<V> {
    key: String,
    store: Arc<dyn KeyValueStore>,
    default: V,
    decode: Decoder<V>,
    value: watch::Sender<V>,
}

impl<V> PersistentCell<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn open(store: Arc<dyn KeyValueStore>, key: impl Into<String>, default: V) -> Self {
        Self::open_with(store, key, default, decode_json::<V>)
    }

    /// Like [`PersistentCell::open`], with a custom decode/repair pass that
    /// runs on this and every later [`PersistentCell::reload`].
    pub fn open_with(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        default: V,
        decode: Decoder<V>,
    ) -> Self {
        let key = key.into();
        let initial = read_with(store.as_ref(), &key, default.clone(), decode);
        let (value, _) = watch::channel(initial);
        Self {
            key,
            store,
            default,
            decode,
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> V {
        self.value.borrow().clone()
    }

    pub fn with<R>(&self, read: impl FnOnce(&V) -> R) -> R {
        read(&self.value.borrow())
    }

    pub fn set(&self, value: V) {
        self.value.send_replace(value);
        self.persist();
    }

    /// Mutates in place and persists; returns the new value.
    pub fn update(&self, modify: impl FnOnce(&mut V)) -> V {
        self.value.send_modify(modify);
        self.persist();
        self.get()
    }

    pub fn reload(&self) -> V {
        let loaded = read_with(self.store.as_ref(), &self.key, self.default.clone(), self.decode);
        self.value.send_replace(loaded.clone());
        loaded
    }

    pub fn subscribe(&self) -> watch::Receiver<V> {
        self.value.subscribe()
    }

    fn persist(&self) {
        let current = self.value.borrow();
        write(self.store.as_ref(), &self.key, &*current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{decode_habits, default_habits, Habit};
    use crate::infrastructure::error::InfraError;
    use crate::infrastructure::storage::InMemoryKeyValueStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct UnavailableStore {
        save_attempts: AtomicUsize,
    }

    impl KeyValueStore for UnavailableStore {
        fn load(&self, _key: &str) -> Result<Option<String>, InfraError> {
            Err(InfraError::StorageUnavailable("medium offline".to_string()))
        }

        fn save(&self, _key: &str, _raw: &str) -> Result<(), InfraError> {
            self.save_attempts.fetch_add(1, Ordering::SeqCst);
            Err(InfraError::StorageUnavailable("quota exceeded".to_string()))
        }
    }

    fn memory_store() -> Arc<dyn KeyValueStore> {
        Arc::new(InMemoryKeyValueStore::default())
    }

    #[test]
    fn read_without_prior_write_returns_fallback() {
        let store = InMemoryKeyValueStore::default();
        assert_eq!(read_or(&store, "x", 7u32), 7);
    }

    #[test]
    fn read_after_write_returns_written_value() {
        let store = InMemoryKeyValueStore::default();
        write(&store, "x", &vec!["a", "b"]);
        assert_eq!(
            read_or(&store, "x", Vec::<String>::new()),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn corrupt_value_falls_back() {
        let store = InMemoryKeyValueStore::default();
        store.save("x", "{not json").expect("raw save");
        assert_eq!(read_or(&store, "x", 3u32), 3);

        store.save("x", "\"a string\"").expect("raw save");
        assert_eq!(read_or(&store, "x", 3u32), 3);
    }

    #[test]
    fn unavailable_store_falls_back_and_swallows_writes() {
        let store = UnavailableStore::default();
        assert!(read_or(&store, "x", true));
        write(&store, "x", &false);
        assert_eq!(store.save_attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cell_materializes_default_and_persists_updates() {
        let store = memory_store();
        let cell = PersistentCell::open(Arc::clone(&store), "dd_pomo_auto", true);
        assert_eq!(cell.key(), "dd_pomo_auto");
        assert!(cell.get());

        cell.set(false);
        assert!(!cell.get());
        assert_eq!(store.load("dd_pomo_auto").expect("load"), Some("false".to_string()));

        let reopened = PersistentCell::open(store, "dd_pomo_auto", true);
        assert!(!reopened.get());
    }

    #[test]
    fn rejected_write_keeps_in_memory_value_authoritative() {
        let store: Arc<dyn KeyValueStore> = Arc::new(UnavailableStore::default());
        let cell = PersistentCell::open(store, "dd_pomo_seconds", 1500u32);
        assert_eq!(cell.get(), 1500);
        cell.set(1200);
        assert_eq!(cell.get(), 1200);
        assert_eq!(cell.update(|seconds| *seconds -= 1), 1199);
    }

    #[test]
    fn subscribers_observe_every_change() {
        let cell = PersistentCell::open(memory_store(), "dd_reading_count", 0u32);
        let mut receiver = cell.subscribe();
        assert!(!receiver.has_changed().expect("sender alive"));

        cell.update(|value| *value += 2);
        assert!(receiver.has_changed().expect("sender alive"));
        assert_eq!(*receiver.borrow_and_update(), 2);
    }

    #[test]
    fn habit_cell_repairs_on_every_load() {
        let store = memory_store();
        store
            .save("dd_habits", r#"[{"id":"x","name":"y","history":null}]"#)
            .expect("seed legacy record");

        let cell = PersistentCell::open_with(Arc::clone(&store), "dd_habits", default_habits(), decode_habits);
        let habits: Vec<Habit> = cell.get();
        assert_eq!(habits.len(), 1);
        assert!(habits[0].history.is_empty());

        store
            .save("dd_habits", r#"[{"id":"x","name":"y","history":[true]}]"#)
            .expect("seed another legacy record");
        let reloaded = cell.reload();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded[0].history.is_empty());
    }

    #[test]
    fn habit_cell_without_stored_value_uses_defaults() {
        let cell = PersistentCell::open_with(memory_store(), "dd_habits", default_habits(), decode_habits);
        assert_eq!(cell.get(), default_habits());
    }
}
