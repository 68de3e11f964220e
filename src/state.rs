//! Conversation state, scoped key-value context and per-key async locks.
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("unknown state: {0}")]
    UnknownState(String),
}

/// Named states with trigger → next-state transitions, tracked per key
/// (usually a user or chat id).
#[derive(Debug, Default)]
pub struct StateMachine {
    states: RwLock<HashMap<String, HashMap<String, String>>>,
    current: RwLock<HashMap<String, String>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state<I, T, S>(&self, name: &str, transitions: I)
    where
        I: IntoIterator<Item = (T, S)>,
        T: Into<String>,
        S: Into<String>,
    {
        let map = transitions
            .into_iter()
            .map(|(t, s)| (t.into(), s.into()))
            .collect();
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), map);
    }

    pub fn set_state(&self, key: &str, state: &str) -> Result<(), StateError> {
        let known = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(state);
        if !known {
            return Err(StateError::UnknownState(state.to_string()));
        }
        self.current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), state.to_string());
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Follows `trigger` from the key's current state. Returns false when the
    /// key has no state, the trigger is not defined, or the target state was
    /// never added.
    pub fn transition(&self, key: &str, trigger: &str) -> bool {
        let Some(current) = self.get_state(key) else {
            return false;
        };
        let next = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&current)
            .and_then(|t| t.get(trigger))
            .cloned();
        match next {
            Some(next) => match self.set_state(key, &next) {
                Ok(()) => true,
                Err(err) => {
                    warn!(key, trigger, %err, "transition target missing");
                    false
                }
            },
            None => false,
        }
    }

    pub fn reset(&self, key: &str) {
        self.current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// In-process JSON data scoped to a user, a chat, or the whole bot.
#[derive(Debug, Default)]
pub struct ContextStore {
    user: Mutex<HashMap<i64, HashMap<String, Value>>>,
    chat: Mutex<HashMap<i64, HashMap<String, Value>>>,
    bot: Mutex<HashMap<String, Value>>,
}

fn decode_or<T: DeserializeOwned>(value: Option<&Value>, default: T) -> T {
    value
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(default)
}

fn encode<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user_data<T: Serialize>(&self, user_id: i64, key: &str, value: T) {
        let mut map = self.user.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(user_id)
            .or_default()
            .insert(key.to_string(), encode(value));
    }

    /// Stored value for `key`, or `default` when absent or of another shape.
    pub fn get_user_data<T: DeserializeOwned>(&self, user_id: i64, key: &str, default: T) -> T {
        let map = self.user.lock().unwrap_or_else(|e| e.into_inner());
        decode_or(map.get(&user_id).and_then(|m| m.get(key)), default)
    }

    pub fn set_chat_data<T: Serialize>(&self, chat_id: i64, key: &str, value: T) {
        let mut map = self.chat.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(chat_id)
            .or_default()
            .insert(key.to_string(), encode(value));
    }

    pub fn get_chat_data<T: DeserializeOwned>(&self, chat_id: i64, key: &str, default: T) -> T {
        let map = self.chat.lock().unwrap_or_else(|e| e.into_inner());
        decode_or(map.get(&chat_id).and_then(|m| m.get(key)), default)
    }

    pub fn set_bot_data<T: Serialize>(&self, key: &str, value: T) {
        let mut map = self.bot.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), encode(value));
    }

    pub fn get_bot_data<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let map = self.bot.lock().unwrap_or_else(|e| e.into_inner());
        decode_or(map.get(key), default)
    }

    pub fn clear_user_data(&self, user_id: i64) {
        self.user
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user_id);
    }
}

/// One async mutex per key; callers holding the same key run one at a time.
/// A key's entry is dropped once its last holder releases it and nobody is
/// waiting.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        KeyedGuard {
            owner: self,
            key: key.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    pub async fn with_lock<F, T>(&self, key: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        fut.await
    }

    /// Keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct KeyedGuard<'a> {
    owner: &'a KeyedLock,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        let ours = map
            .get(&self.key)
            .map_or(false, |l| Arc::ptr_eq(l, &self.lock));
        // The map entry and this guard are the only references left.
        if ours && Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.key);
        }
    }
}
