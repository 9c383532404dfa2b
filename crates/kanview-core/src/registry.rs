//! Per-board cache cells and the registry that owns them.
//!
//! Each board code maps to one [`BoardState`] for the life of the process
//! (or until [`BoardRegistry::evict`]). A state holds:
//!
//! - the **published** cell: the current snapshot and the change log that
//!   ends at it, swapped together as one `Arc`. Readers clone the `Arc` and
//!   never wait on a rebuild.
//! - the **flight**: a mutex + condvar permit that lets one rebuild run at
//!   a time. Callers arriving during a rebuild wait for it and share its
//!   outcome instead of starting another.
//! - the version counter, which survives [`BoardState::invalidate`] so
//!   version numbers never repeat for a cached board.
//!
//! Evicting a board keeps its highest version in the registry, and a state
//! created again for that code continues numbering from there.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::changes::log::ChangeLog;
use crate::error::{BoardError, Result};
use crate::snapshot::BoardSnapshot;

/// A snapshot and the change log ending at it.
#[derive(Debug)]
pub struct Published {
    pub snapshot: Arc<BoardSnapshot>,
    pub log: ChangeLog,
    pub published_at: DateTime<Utc>,
}

/// The most recent failed rebuild of a board.
#[derive(Debug, Clone)]
pub struct Failure {
    pub error: BoardError,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Flight {
    building: bool,
    generation: u64,
    outcome: Option<Result<u64>>,
}

/// Cache cell for one board.
#[derive(Debug)]
pub struct BoardState {
    code: String,
    published: RwLock<Option<Arc<Published>>>,
    last_version: AtomicU64,
    epoch: AtomicU64,
    flight: Mutex<Flight>,
    landed: Condvar,
    last_failure: RwLock<Option<Failure>>,
}

impl BoardState {
    fn new(code: &str) -> Self {
        Self::resuming(code, 0)
    }

    /// An empty state whose first build follows `last_version`.
    fn resuming(code: &str, last_version: u64) -> Self {
        Self {
            code: code.to_string(),
            published: RwLock::new(None),
            last_version: AtomicU64::new(last_version),
            epoch: AtomicU64::new(0),
            flight: Mutex::new(Flight::default()),
            landed: Condvar::new(),
            last_failure: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The current snapshot and log, if the board is built.
    #[must_use]
    pub fn published(&self) -> Option<Arc<Published>> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest version ever published for this board, 0 if none.
    #[must_use]
    pub fn last_version(&self) -> u64 {
        self.last_version.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_rebuilding(&self) -> bool {
        self.lock_flight().building
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<Failure> {
        self.last_failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the snapshot and change log. The next read rebuilds from scratch.
    pub fn invalidate(&self) {
        let mut published = self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        *published = None;
    }

    /// Counter bumped by every [`Self::invalidate`].
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Swap in a new snapshot and log, unless the board was invalidated
    /// since `epoch` was read. Returns whether the swap happened.
    pub(crate) fn publish(&self, epoch: u64, snapshot: BoardSnapshot, log: ChangeLog) -> bool {
        let mut published = self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.epoch() != epoch {
            return false;
        }
        self.last_version
            .fetch_max(snapshot.version, Ordering::AcqRel);
        *published = Some(Arc::new(Published {
            snapshot: Arc::new(snapshot),
            log,
            published_at: Utc::now(),
        }));
        drop(published);
        self.clear_failure();
        true
    }

    pub(crate) fn record_failure(&self, error: BoardError) {
        *self
            .last_failure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Failure {
            error,
            at: Utc::now(),
        });
    }

    fn clear_failure(&self) {
        *self
            .last_failure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Run `build` unless a rebuild is already in flight, in which case
    /// wait for that one and return its outcome.
    ///
    /// `wait` bounds how long a waiter blocks; `None` waits indefinitely.
    /// The builder itself is never interrupted.
    ///
    /// # Errors
    ///
    /// Returns whatever the build returned, or
    /// [`BoardError::RebuildTimeout`] if a waiter gave up.
    pub(crate) fn single_flight(
        &self,
        wait: Option<Duration>,
        build: impl FnOnce() -> Result<u64>,
    ) -> Result<u64> {
        let mut flight = self.lock_flight();
        if flight.building {
            return self.join(flight, wait);
        }
        flight.building = true;
        drop(flight);

        let mut landing = Landing {
            state: self,
            outcome: None,
        };
        let outcome = build();
        landing.outcome = Some(outcome.clone());
        outcome
    }

    fn join(&self, flight: MutexGuard<'_, Flight>, wait: Option<Duration>) -> Result<u64> {
        let generation = flight.generation;
        let started = Instant::now();
        tracing::debug!(board = %self.code, "waiting on in-flight rebuild");

        let flight = match wait {
            None => self
                .landed
                .wait_while(flight, |f| f.generation == generation)
                .unwrap_or_else(PoisonError::into_inner),
            Some(limit) => {
                let (flight, timeout) = self
                    .landed
                    .wait_timeout_while(flight, limit, |f| f.generation == generation)
                    .unwrap_or_else(PoisonError::into_inner);
                if timeout.timed_out() {
                    return Err(BoardError::RebuildTimeout {
                        board: self.code.clone(),
                        waited: started.elapsed(),
                    });
                }
                flight
            }
        };

        flight
            .outcome
            .clone()
            .unwrap_or_else(|| Err(BoardError::Internal(self.code.clone())))
    }

    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the rebuild permit and wakes waiters, even if the build panicked.
struct Landing<'a> {
    state: &'a BoardState,
    outcome: Option<Result<u64>>,
}

impl Drop for Landing<'_> {
    fn drop(&mut self) {
        let mut flight = self.state.lock_flight();
        flight.building = false;
        flight.generation = flight.generation.wrapping_add(1);
        flight.outcome = self.outcome.take();
        drop(flight);
        self.state.landed.notify_all();
    }
}

/// Board code to [`BoardState`] map shared by the whole process.
#[derive(Debug, Default)]
pub struct BoardRegistry {
    boards: RwLock<HashMap<String, Arc<BoardState>>>,
    /// Last version of each evicted board.
    retired: Mutex<HashMap<String, u64>>,
}

impl BoardRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The state for `code`, creating an empty one on first use.
    pub fn get_or_create(&self, code: &str) -> Arc<BoardState> {
        if let Some(state) = self.get(code) {
            return state;
        }
        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(boards.entry(code.to_string()).or_insert_with(|| {
            let last = self.retired_version(code);
            if last > 0 {
                tracing::debug!(board = %code, last_version = last, "resuming evicted board");
            }
            Arc::new(BoardState::resuming(code, last))
        }))
    }

    /// Highest version `code` has published, cached or evicted; 0 if none.
    #[must_use]
    pub fn last_version(&self, code: &str) -> u64 {
        self.get(code)
            .map_or(0, |state| state.last_version())
            .max(self.retired_version(code))
    }

    fn retired_version(&self, code: &str) -> u64 {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<Arc<BoardState>> {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
    }

    /// Discard the cached snapshot and change log for `code`, keeping the
    /// version counter. Returns whether the board was registered.
    pub fn invalidate(&self, code: &str) -> bool {
        match self.get(code) {
            Some(state) => {
                state.invalidate();
                tracing::info!(board = %code, "invalidated board");
                true
            }
            None => false,
        }
    }

    /// Forget the snapshot, log and rebuild state of `code`, keeping only
    /// its last version. Returns whether it was registered.
    pub fn evict(&self, code: &str) -> bool {
        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = boards.remove(code) else {
            return false;
        };
        let last = state.last_version();
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let mark = retired.entry(code.to_string()).or_insert(0);
        *mark = (*mark).max(last);
        drop(retired);
        drop(boards);
        tracing::info!(board = %code, last_version = last, "evicted board");
        true
    }

    /// Registered board codes, sorted.
    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        codes.sort();
        codes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
