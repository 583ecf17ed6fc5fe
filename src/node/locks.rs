//! In-memory sentence-lock table.
//!
//! Locks are advisory triples `(filename, sentence, session)` guarded by one
//! coarse mutex. For any `(filename, sentence)` at most one lock exists at a
//! time; a session may hold locks in several files or sentences, and all of
//! a session's locks are released when its worker terminates.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one direct-client worker for the lifetime of its connection.
pub type SessionId = u64;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub fn next_session_id() -> SessionId {
    NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SentenceLock {
    file: String,
    sentence: usize,
    session: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Re-entry by the holding session is a no-op.
    AlreadyHeld,
    /// Another session holds the lock.
    Conflict,
}

#[derive(Default)]
pub struct LockTable {
    locks: Mutex<Vec<SentenceLock>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self, file: &str, sentence: usize, session: SessionId) -> LockOutcome {
        let mut locks = self.locks.lock().unwrap();
        for lock in locks.iter() {
            if lock.file == file && lock.sentence == sentence {
                return if lock.session == session {
                    LockOutcome::AlreadyHeld
                } else {
                    LockOutcome::Conflict
                };
            }
        }
        locks.push(SentenceLock {
            file: file.to_string(),
            sentence,
            session,
        });
        LockOutcome::Acquired
    }

    pub fn unlock(&self, file: &str, sentence: usize, session: SessionId) {
        let mut locks = self.locks.lock().unwrap();
        locks.retain(|l| !(l.file == file && l.sentence == sentence && l.session == session));
    }

    /// Whether any sentence of `file` is currently locked. Blocks UNDO,
    /// CHECKPOINT and REVERT while edits are in flight.
    pub fn file_locked(&self, file: &str) -> bool {
        self.locks.lock().unwrap().iter().any(|l| l.file == file)
    }

    /// Releases every lock held by `session`; returns how many were dropped.
    pub fn release_session(&self, session: SessionId) -> usize {
        let mut locks = self.locks.lock().unwrap();
        let before = locks.len();
        locks.retain(|l| l.session != session);
        before - locks.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}
