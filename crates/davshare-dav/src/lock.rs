//! WebDAV lock manager.
//!
//! Locks live in a sharded map keyed by normalized path, so operations on
//! unrelated paths never contend on a single table-wide mutex. A
//! depth-infinity lock on a collection covers every descendant through a
//! segment-prefix test against the table; no per-descendant entries are
//! materialized. Expired locks are purged lazily whenever an entry is
//! visited, there is no background sweeper.

use crate::path::DavPath;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

/// An active lock on one resource path.
#[derive(Debug, Clone)]
pub struct Lock {
    /// Opaque token, `urn:uuid:…`.
    pub token: String,
    pub scope: LockScope,
    pub depth: LockDepth,
    /// Opaque owner fragment from the lockinfo body, if any.
    pub owner: Option<String>,
    /// Normalized path of the lock root.
    pub path: String,
    /// Granted timeout, reported back in `Timeout: Second-N`.
    pub timeout: Duration,
    expires_at: Instant,
}

impl Lock {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Whether this lock covers `path`: its own root, or any descendant
    /// when depth is infinity.
    pub fn covers(&self, path: &DavPath) -> bool {
        if self.path == path.as_str() {
            return true;
        }
        match self.depth {
            LockDepth::Zero => false,
            LockDepth::Infinity => {
                let root = DavPath::parse(&self.path);
                root.is_ok_and(|r| r.is_ancestor_of(path))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    /// An incompatible lock already covers the path (or a descendant).
    #[error("conflicting lock")]
    Conflict,
    /// Token does not name a live lock.
    #[error("no such lock")]
    NotFound,
}

/// Tracks exclusive/shared locks with timeout-based expiry.
pub struct LockManager {
    /// Live locks keyed by lock-root path. DashMap shards give
    /// per-bucket locking; unrelated paths proceed independently.
    by_path: DashMap<String, Vec<Lock>>,
    /// Token index for refresh/release.
    by_token: DashMap<String, String>,
    /// Serializes conflict-check-then-insert during acquisition, which
    /// spans multiple table entries (ancestors and descendants).
    /// Reads (`covering`, `check`) never take it.
    admission: Mutex<()>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl LockManager {
    pub fn new(default_timeout: Duration, max_timeout: Duration) -> Self {
        LockManager {
            by_path: DashMap::new(),
            by_token: DashMap::new(),
            admission: Mutex::new(()),
            default_timeout,
            max_timeout,
        }
    }

    fn grant_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default_timeout).min(self.max_timeout)
    }

    /// Drop expired locks from one entry, updating the token index.
    fn purge_entry(&self, path: &str) {
        let mut remove_entry = false;
        if let Some(mut entry) = self.by_path.get_mut(path) {
            entry.retain(|l| {
                if l.is_expired() {
                    debug!(path = %l.path, token = %l.token, "purging expired lock");
                    self.by_token.remove(&l.token);
                    false
                } else {
                    true
                }
            });
            remove_entry = entry.is_empty();
        }
        if remove_entry {
            self.by_path.remove_if(path, |_, v| v.is_empty());
        }
    }

    /// Live locks whose coverage includes `path` (the path itself plus
    /// depth-infinity ancestors).
    pub fn covering(&self, path: &DavPath) -> Vec<Lock> {
        let mut out = Vec::new();
        let mut keys: Vec<String> = Vec::new();
        keys.push(path.as_str().to_string());
        let mut cur = path.clone();
        while let Some(parent) = cur.parent() {
            keys.push(parent.as_str().to_string());
            cur = parent;
        }
        for key in keys {
            self.purge_entry(&key);
            if let Some(entry) = self.by_path.get(&key) {
                for lock in entry.iter() {
                    if lock.covers(path) {
                        out.push(lock.clone());
                    }
                }
            }
        }
        out
    }

    /// Live locks rooted strictly below `path`.
    fn descendants(&self, path: &DavPath) -> Vec<Lock> {
        let keys: Vec<String> = self
            .by_path
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| DavPath::parse(k).is_ok_and(|p| path.is_ancestor_of(&p)))
            .collect();
        let mut out = Vec::new();
        for key in keys {
            self.purge_entry(&key);
            if let Some(entry) = self.by_path.get(&key) {
                out.extend(entry.iter().cloned());
            }
        }
        out
    }

    /// Acquire a new lock, or fail with `Conflict` when an existing lock
    /// excludes it: any lock vs. a new exclusive, an exclusive vs.
    /// anything. Shared locks coexist.
    pub fn acquire(
        &self,
        path: &DavPath,
        scope: LockScope,
        depth: LockDepth,
        owner: Option<String>,
        requested_timeout: Option<Duration>,
    ) -> Result<Lock, LockError> {
        let _admit = match self.admission.lock() {
            Ok(guard) => guard,
            // The guard protects no data; a poisoned admission mutex is
            // still a valid serialization point.
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut candidates = self.covering(path);
        if depth == LockDepth::Infinity {
            candidates.extend(self.descendants(path));
        }
        let conflict = candidates
            .iter()
            .any(|l| l.scope == LockScope::Exclusive || scope == LockScope::Exclusive);
        if conflict {
            return Err(LockError::Conflict);
        }

        let timeout = self.grant_timeout(requested_timeout);
        let lock = Lock {
            token: format!("urn:uuid:{}", Uuid::new_v4()),
            scope,
            depth,
            owner,
            path: path.as_str().to_string(),
            timeout,
            expires_at: Instant::now() + timeout,
        };
        debug!(path = %path, token = %lock.token, ?scope, ?depth, "lock acquired");
        self.by_token.insert(lock.token.clone(), lock.path.clone());
        self.by_path.entry(lock.path.clone()).or_default().push(lock.clone());
        Ok(lock)
    }

    /// Refresh a lock named by token, resetting its expiry.
    pub fn refresh(&self, token: &str, requested_timeout: Option<Duration>) -> Result<Lock, LockError> {
        let path = self.by_token.get(token).map(|e| e.value().clone()).ok_or(LockError::NotFound)?;
        self.purge_entry(&path);
        let mut entry = self.by_path.get_mut(&path).ok_or(LockError::NotFound)?;
        let lock = entry
            .iter_mut()
            .find(|l| l.token == token)
            .ok_or(LockError::NotFound)?;
        let timeout = self.grant_timeout(requested_timeout);
        lock.timeout = timeout;
        lock.expires_at = Instant::now() + timeout;
        debug!(path = %path, token = %token, "lock refreshed");
        Ok(lock.clone())
    }

    /// Live lock named by token, if any.
    pub fn find(&self, token: &str) -> Option<Lock> {
        let path = self.by_token.get(token).map(|e| e.value().clone())?;
        self.purge_entry(&path);
        let entry = self.by_path.get(&path)?;
        entry.iter().find(|l| l.token == token).cloned()
    }

    /// Release a lock named by token.
    pub fn release(&self, token: &str) -> Result<(), LockError> {
        let (_, path) = self.by_token.remove(token).ok_or(LockError::NotFound)?;
        let mut found = false;
        if let Some(mut entry) = self.by_path.get_mut(&path) {
            entry.retain(|l| {
                if l.token == token {
                    // An expired lock is gone as far as the client is
                    // concerned; releasing it reports NotFound.
                    found = !l.is_expired();
                    false
                } else {
                    true
                }
            });
        }
        self.by_path.remove_if(&path, |_, v| v.is_empty());
        if found {
            debug!(path = %path, token = %token, "lock released");
            Ok(())
        } else {
            Err(LockError::NotFound)
        }
    }

    /// Check whether an operation touching `path` (and its subtree when
    /// `affects_descendants`) may proceed given the lock tokens the
    /// request submitted. Every covering lock must be represented.
    pub fn check(
        &self,
        path: &DavPath,
        submitted: &[String],
        affects_descendants: bool,
    ) -> Result<(), LockError> {
        let mut relevant = self.covering(path);
        if affects_descendants {
            relevant.extend(self.descendants(path));
        }
        for lock in relevant {
            if !submitted.iter().any(|t| *t == lock.token) {
                return Err(LockError::Conflict);
            }
        }
        Ok(())
    }

    /// Drop all locks rooted at `path` or below. Used after DELETE and
    /// for the source of a MOVE.
    pub fn remove_tree(&self, path: &DavPath) {
        let keys: Vec<String> = self
            .by_path
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| {
                k == path.as_str() || DavPath::parse(k).is_ok_and(|p| path.is_ancestor_of(&p))
            })
            .collect();
        for key in keys {
            if let Some((_, locks)) = self.by_path.remove(&key) {
                for lock in locks {
                    self.by_token.remove(&lock.token);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> LockManager {
        LockManager::new(Duration::from_secs(3600), Duration::from_secs(3600))
    }

    fn p(s: &str) -> DavPath {
        DavPath::parse(s).unwrap()
    }

    #[test]
    fn test_exclusive_excludes_everything() {
        let m = mgr();
        let lock = m
            .acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, None)
            .unwrap();

        assert!(matches!(
            m.acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, None),
            Err(LockError::Conflict)
        ));
        assert!(matches!(
            m.acquire(&p("/f"), LockScope::Shared, LockDepth::Zero, None, None),
            Err(LockError::Conflict)
        ));

        m.release(&lock.token).unwrap();
        assert!(m.acquire(&p("/f"), LockScope::Shared, LockDepth::Zero, None, None).is_ok());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let m = mgr();
        m.acquire(&p("/f"), LockScope::Shared, LockDepth::Zero, None, None).unwrap();
        m.acquire(&p("/f"), LockScope::Shared, LockDepth::Zero, None, None).unwrap();
        // But an exclusive request is excluded by the shared holders.
        assert!(matches!(
            m.acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, None),
            Err(LockError::Conflict)
        ));
    }

    #[test]
    fn test_infinity_lock_covers_descendants() {
        let m = mgr();
        let lock = m
            .acquire(&p("/dir"), LockScope::Exclusive, LockDepth::Infinity, None, None)
            .unwrap();

        assert!(matches!(
            m.acquire(&p("/dir/sub/f"), LockScope::Exclusive, LockDepth::Zero, None, None),
            Err(LockError::Conflict)
        ));
        // Sibling trees are unaffected.
        m.acquire(&p("/dirx"), LockScope::Exclusive, LockDepth::Zero, None, None).unwrap();

        assert!(m.check(&p("/dir/sub/f"), &[], false).is_err());
        assert!(m.check(&p("/dir/sub/f"), &[lock.token.clone()], false).is_ok());
    }

    #[test]
    fn test_depth_zero_does_not_cover_children() {
        let m = mgr();
        m.acquire(&p("/dir"), LockScope::Exclusive, LockDepth::Zero, None, None).unwrap();
        assert!(m.acquire(&p("/dir/f"), LockScope::Exclusive, LockDepth::Zero, None, None).is_ok());
    }

    #[test]
    fn test_infinity_acquire_conflicts_with_descendant_lock() {
        let m = mgr();
        m.acquire(&p("/dir/f"), LockScope::Exclusive, LockDepth::Zero, None, None).unwrap();
        assert!(matches!(
            m.acquire(&p("/dir"), LockScope::Exclusive, LockDepth::Infinity, None, None),
            Err(LockError::Conflict)
        ));
    }

    #[test]
    fn test_expired_locks_purge_lazily() {
        let m = LockManager::new(Duration::from_millis(10), Duration::from_secs(10));
        let lock = m
            .acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, Some(Duration::from_millis(10)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));

        // Expiry is observed on access, and the token is gone.
        assert!(m.covering(&p("/f")).is_empty());
        assert!(m.acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, None).is_ok());
        assert!(matches!(m.release(&lock.token), Err(LockError::NotFound)));
    }

    #[test]
    fn test_refresh_extends_expiry() {
        let m = LockManager::new(Duration::from_millis(40), Duration::from_secs(3600));
        let lock = m
            .acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let refreshed = m.refresh(&lock.token, Some(Duration::from_secs(60))).unwrap();
        assert_eq!(refreshed.timeout, Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));
        // Would have expired without the refresh.
        assert_eq!(m.covering(&p("/f")).len(), 1);
    }

    #[test]
    fn test_timeout_capped_at_max() {
        let m = LockManager::new(Duration::from_secs(60), Duration::from_secs(120));
        let lock = m
            .acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, Some(Duration::from_secs(100_000)))
            .unwrap();
        assert_eq!(lock.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_check_requires_every_covering_token() {
        let m = mgr();
        let a = m.acquire(&p("/f"), LockScope::Shared, LockDepth::Zero, None, None).unwrap();
        let b = m.acquire(&p("/f"), LockScope::Shared, LockDepth::Zero, None, None).unwrap();

        assert!(m.check(&p("/f"), &[a.token.clone()], false).is_err());
        assert!(m.check(&p("/f"), &[a.token.clone(), b.token.clone()], false).is_ok());
    }

    #[test]
    fn test_check_descendants_for_tree_ops() {
        let m = mgr();
        let inner = m
            .acquire(&p("/dir/deep/f"), LockScope::Exclusive, LockDepth::Zero, None, None)
            .unwrap();
        // Deleting /dir touches the locked descendant.
        assert!(m.check(&p("/dir"), &[], true).is_err());
        assert!(m.check(&p("/dir"), &[inner.token.clone()], true).is_ok());
        // A plain read of /dir itself is not covered by the inner lock.
        assert!(m.check(&p("/dir"), &[], false).is_ok());
    }

    #[test]
    fn test_find_returns_live_lock_only() {
        let m = LockManager::new(Duration::from_millis(10), Duration::from_secs(10));
        let lock = m
            .acquire(&p("/f"), LockScope::Exclusive, LockDepth::Zero, None, Some(Duration::from_millis(10)))
            .unwrap();
        let found = m.find(&lock.token).unwrap();
        assert_eq!(found.path, "/f");
        assert!(m.find("urn:uuid:no-such-token").is_none());

        std::thread::sleep(Duration::from_millis(30));
        assert!(m.find(&lock.token).is_none());
    }

    #[test]
    fn test_remove_tree_clears_locks_and_tokens() {
        let m = mgr();
        let lock = m
            .acquire(&p("/dir/f"), LockScope::Exclusive, LockDepth::Zero, None, None)
            .unwrap();
        m.remove_tree(&p("/dir"));
        assert!(m.covering(&p("/dir/f")).is_empty());
        assert!(matches!(m.refresh(&lock.token, None), Err(LockError::NotFound)));
    }
}
