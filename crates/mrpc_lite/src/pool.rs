use dashmap::DashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Separator placed between the method name and the random suffix.
pub const SESSION_SEPARATOR: char = '/';

/// A reusable set of session identifiers.
///
/// Identifiers are `/` followed by a random decimal suffix. Released ids go back
/// into a free list and are handed out again before new ones are drawn. The pool
/// also tracks every live id, so the same id is never held by two calls at once
/// even if the random source repeats itself.
#[derive(Debug, Default)]
pub struct SessionPool {
    free: Mutex<Vec<String>>,
    live: DashSet<String, ahash::RandomState>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool pre-filled with `ids`, handed out last-first before any new ids are drawn.
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            free: Mutex::new(ids.into_iter().map(Into::into).collect()),
            live: DashSet::default(),
        }
    }

    /// Take an id out of the pool, creating a fresh one if none is free.
    ///
    /// The id is released back to the pool when the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> SessionId {
        let recycled = self.free.lock().ok().and_then(|mut free| free.pop());

        let id = match recycled {
            Some(id) if self.live.insert(id.clone()) => id,
            _ => loop {
                let candidate = Self::generate();
                if self.live.insert(candidate.clone()) {
                    break candidate;
                }
                tracing::debug!(session = %candidate, "Session id collision, drawing again");
            },
        };

        SessionId {
            id,
            pool: Arc::clone(self),
        }
    }

    /// Number of ids currently held by calls.
    pub fn in_use(&self) -> usize {
        self.live.len()
    }

    /// Number of released ids waiting to be reused.
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    fn release(&self, id: &str) {
        if self.live.remove(id).is_none() {
            return;
        }
        if let Ok(mut free) = self.free.lock() {
            free.push(id.to_owned());
        }
    }

    fn generate() -> String {
        let (random, _) = Uuid::new_v4().as_u64_pair();
        format!("{SESSION_SEPARATOR}{random}")
    }
}

/// A session id on loan from a [`SessionPool`]. Returned to the pool on drop.
pub struct SessionId {
    id: String,
    pool: Arc<SessionPool>,
}

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl Deref for SessionId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionId {
    fn drop(&mut self) {
        self.pool.release(&self.id);
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionId").field(&self.id).finish()
    }
}
