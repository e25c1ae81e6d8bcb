use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::core::ports::UserId;
use crate::core::upstream::types::{Item, PageCursor, UploadsHandle};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheService;

impl CacheService {
    pub fn name(&self) -> &'static str {
        "cache"
    }

    pub fn status(&self) -> &'static str {
        "ready"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCursor {
    pub handle: Option<UploadsHandle>,
    pub next: Option<PageCursor>,
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchState {
    pub items: Vec<Item>,
    pub sources: BTreeMap<String, SourceCursor>,
    epoch: u64,
}

impl FetchState {
    pub fn covers(&self, source_ids: &[String]) -> bool {
        let requested: BTreeSet<&str> = source_ids.iter().map(String::as_str).collect();
        requested.len() == self.sources.len()
            && requested
                .iter()
                .all(|source_id| self.sources.contains_key(*source_id))
    }

    pub fn has_open_sources(&self) -> bool {
        self.sources.values().any(|cursor| !cursor.exhausted)
    }
}

struct Slot {
    state: FetchState,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<UserId, Slot>,
    epochs: HashMap<UserId, u64>,
    locks: HashMap<UserId, Arc<tokio::sync::Mutex<()>>>,
}

pub struct FetchStateCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl Default for FetchStateCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl FetchStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, user: &UserId) -> Option<FetchState> {
        let now = self.clock.now();
        let inner = self.lock_inner();
        let slot = inner.entries.get(user)?;
        if now.saturating_duration_since(slot.stored_at) >= self.ttl {
            return None;
        }
        Some(slot.state.clone())
    }

    pub fn fresh(&self, user: &UserId, source_ids: &[String]) -> FetchState {
        let epoch = self.lock_inner().epochs.get(user).copied().unwrap_or(0);
        FetchState {
            items: Vec::new(),
            sources: source_ids
                .iter()
                .map(|source_id| (source_id.clone(), SourceCursor::default()))
                .collect(),
            epoch,
        }
    }

    // Rejected when the state predates the user's last invalidate.
    pub fn put(&self, user: &UserId, state: FetchState) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        let current = inner.epochs.get(user).copied().unwrap_or(0);
        if state.epoch != current {
            return false;
        }
        inner.entries.insert(
            user.clone(),
            Slot {
                state,
                stored_at: now,
            },
        );
        true
    }

    pub fn invalidate(&self, user: &UserId) {
        let mut inner = self.lock_inner();
        inner.entries.remove(user);
        *inner.epochs.entry(user.clone()).or_insert(0) += 1;
    }

    pub fn user_lock(&self, user: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        self.lock_inner()
            .locks
            .entry(user.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut inner = self.lock_inner();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, slot| now.saturating_duration_since(slot.stored_at) < ttl);
        let removed = before - inner.entries.len();

        let CacheInner { entries, locks, .. } = &mut *inner;
        locks.retain(|user, lock| entries.contains_key(user) || Arc::strong_count(lock) > 1);
        removed
    }

    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
