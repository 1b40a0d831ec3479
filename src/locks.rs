//! Per-project deployment locks.
//!
//! A lock is advisory: it records who is currently allowed to deploy a
//! project and until when. Expired locks are never swept; every operation
//! treats a lock whose `expires_at` is not after `now` as absent.
//!
//! All four operations take the table's single mutex for their whole
//! duration, so each call is atomic with respect to the others. Callers must
//! not build check-then-act sequences out of several calls.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::errors::{PployError, Result};
use crate::notify::{Notification, NotificationKind, NotifierSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_held_by(&self, user: &str) -> bool {
        self.holder == user
    }
}

/// In-memory lock table shared by every request.
pub struct LockTable {
    locks: Mutex<HashMap<String, Lock>>,
    duration: TimeDelta,
    notifier: NotifierSet,
}

impl LockTable {
    /// `duration` is both the lifetime of a fresh lock and the amount an
    /// extend adds.
    pub fn new(duration: Duration, notifier: NotifierSet) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            duration: TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX),
            notifier,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    fn expiry_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        from.checked_add_signed(self.duration).ok_or_else(|| {
            PployError::Validation(format!(
                "lock expiry beyond {} cannot be represented",
                from.format("%Y-%m-%d")
            ))
        })
    }

    // Every mutation is a single insert or remove, so a poisoned map is still consistent.
    fn table(&self) -> MutexGuard<'_, HashMap<String, Lock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The project's lock, if one is currently valid.
    pub fn check(&self, project: &str, now: DateTime<Utc>) -> Option<Lock> {
        self.table()
            .get(project)
            .filter(|lock| lock.is_valid(now))
            .cloned()
    }

    /// Take the lock, or refresh it to `now + duration` when `user` already holds it.
    pub fn gain(&self, project: &str, user: &str, now: DateTime<Utc>) -> Result<Lock> {
        let lock = {
            let mut locks = self.table();
            if let Some(existing) = locks.get(project)
                && existing.is_valid(now)
                && !existing.is_held_by(user)
            {
                return Err(PployError::Conflict {
                    holder: existing.holder.clone(),
                });
            }
            let lock = Lock {
                holder: user.to_string(),
                expires_at: self.expiry_after(now)?,
            };
            locks.insert(project.to_string(), lock.clone());
            lock
        };
        tracing::info!(project, user, expires_at = %lock.expires_at, "lock gained");
        self.notifier
            .emit(Notification::new(NotificationKind::LockGained, project, user));
        Ok(lock)
    }

    /// Push the expiry of a held lock out by one duration, counted from the
    /// previous expiry rather than from `now`.
    pub fn extend(&self, project: &str, user: &str, now: DateTime<Utc>) -> Result<Lock> {
        let lock = {
            let mut locks = self.table();
            let expires_at = match locks.get(project) {
                Some(existing) if existing.is_valid(now) && existing.is_held_by(user) => {
                    existing.expires_at
                }
                _ => return Err(not_held(project, user)),
            };
            let lock = Lock {
                holder: user.to_string(),
                expires_at: self.expiry_after(expires_at)?,
            };
            locks.insert(project.to_string(), lock.clone());
            lock
        };
        tracing::info!(project, user, expires_at = %lock.expires_at, "lock extended");
        self.notifier
            .emit(Notification::new(NotificationKind::LockExtended, project, user));
        Ok(lock)
    }

    pub fn release(&self, project: &str, user: &str, now: DateTime<Utc>) -> Result<()> {
        {
            let mut locks = self.table();
            match locks.get(project) {
                Some(existing) if existing.is_valid(now) && existing.is_held_by(user) => {
                    locks.remove(project);
                }
                _ => return Err(not_held(project, user)),
            }
        }
        tracing::info!(project, user, "lock released");
        self.notifier
            .emit(Notification::new(NotificationKind::LockReleased, project, user));
        Ok(())
    }

    /// Number of projects with a valid lock.
    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.table().values().filter(|l| l.is_valid(now)).count()
    }
}

fn not_held(project: &str, user: &str) -> PployError {
    PployError::NotHeld {
        project: project.to_string(),
        user: user.to_string(),
    }
}
