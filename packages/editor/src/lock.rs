//! # Write Lock
//!
//! Single-writer guard around the overlay lifecycle. At most one owner
//! holds the lock; the same owner may acquire again (depth counted). The
//! lock is free once every token of the holder has been released, in any
//! order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    #[error("Write lock is held by {holder}")]
    LockContention { holder: String },

    #[error("Lock token does not match the current holder")]
    InvalidToken,
}

/// Proof of acquisition; consumed by [`WriteLock::release`]
#[derive(Debug, PartialEq, Eq)]
pub struct LockToken {
    lock_id: u64,
    owner: String,
    id: u64,
}

impl LockToken {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[derive(Debug)]
struct Held {
    owner: String,
    /// Outstanding token ids, innermost last
    tokens: Vec<u64>,
}

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct WriteLock {
    id: u64,
    state: Mutex<Option<Held>>,
    next_token: AtomicU64,
}

impl WriteLock {
    pub fn new() -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    /// Acquire for `owner`; re-entrant for the current holder
    pub fn acquire(&self, owner: &str) -> Result<LockToken, LockError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);

        match state.as_mut() {
            Some(held) if held.owner == owner => held.tokens.push(id),
            Some(held) => {
                return Err(LockError::LockContention {
                    holder: held.owner.clone(),
                })
            }
            None => {
                *state = Some(Held {
                    owner: owner.to_string(),
                    tokens: vec![id],
                })
            }
        }

        Ok(LockToken {
            lock_id: self.id,
            owner: owner.to_string(),
            id,
        })
    }

    /// Release a token of the current holder
    pub fn release(&self, token: LockToken) -> Result<(), LockError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(held) = state.as_mut() else {
            return Err(LockError::InvalidToken);
        };
        if token.lock_id != self.id || held.owner != token.owner {
            return Err(LockError::InvalidToken);
        }
        let Some(slot) = held.tokens.iter().position(|id| *id == token.id) else {
            return Err(LockError::InvalidToken);
        };

        held.tokens.remove(slot);
        if held.tokens.is_empty() {
            *state = None;
        }
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn holder(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|held| held.owner.clone())
    }

    /// Current re-entrancy depth (0 when free)
    pub fn depth(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |held| held.tokens.len())
    }
}

impl Default for WriteLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its token when dropped, so every exit path unlocks
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a WriteLock,
    token: Option<LockToken>,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(lock: &'a WriteLock, owner: &str) -> Result<Self, LockError> {
        let token = lock.acquire(owner)?;
        Ok(Self {
            lock,
            token: Some(token),
        })
    }

    /// Release now and report the outcome
    pub fn release(mut self) -> Result<(), LockError> {
        match self.token.take() {
            Some(token) => self.lock.release(token),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.lock.release(token) {
                warn!(error = %e, "Failed to release write lock");
            }
        }
    }
}
