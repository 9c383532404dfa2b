//! The board state engine.
//!
//! [`BoardEngine`] ties the pieces together: it looks boards up through a
//! [`ConfigurationProvider`], fetches issues through an [`IssueSource`],
//! builds and diffs snapshots, publishes them in the [`BoardRegistry`],
//! and projects them per user through a [`VisibilityPredicate`].
//!
//! # Lifecycle of a board
//!
//! ```text
//! ABSENT ──get_board──▶ BUILDING ──ok──▶ READY ──rebuild──▶ BUILDING ──▶ READY
//!    ▲                     │                │
//!    │                     └─err──▶ (stays ABSENT / READY, failure recorded)
//!    └──────── evict ──────────────────────┘
//! ```
//!
//! Reads of a READY board never wait. Only one rebuild runs per board;
//! everyone else who needs it waits for that rebuild and shares its
//! result. A failed rebuild leaves the previously published snapshot in
//! place.
//!
//! Issues are always fetched as the board's owner, so one snapshot serves
//! every user; the requesting user only narrows what they are shown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::changes::{ChangeRecord, RemovedIssue};
use crate::changes::log::ChangeLog;
use crate::config::EngineConfig;
use crate::error::{BoardError, Result};
use crate::model::{BoardConfiguration, Issue, User};
use crate::registry::{BoardRegistry, BoardState, Published};
use crate::snapshot::{self, BoardSnapshot};
use crate::source::{ConfigurationProvider, IssueSource, VisibilityPredicate};
use crate::view::{BoardView, ViewQuery, project_changes};

/// Coarse state of a board in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardPhase {
    Absent,
    Building,
    Ready,
}

/// The most recent rebuild failure, in reportable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureStatus {
    pub code: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// What a poller needs to know about one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardStatus {
    pub code: String,
    pub phase: BoardPhase,
    /// Version of the published snapshot, if any.
    pub version: Option<u64>,
    /// Highest version ever published; survives invalidation.
    pub last_version: u64,
    pub published_at: Option<DateTime<Utc>>,
    /// Oldest version `get_changes` can still start from.
    pub oldest_retained: Option<u64>,
    pub issues: usize,
    pub excluded: usize,
    pub rebuilding: bool,
    pub last_failure: Option<FailureStatus>,
}

pub struct BoardEngine {
    provider: Arc<dyn ConfigurationProvider>,
    source: Arc<dyn IssueSource>,
    visibility: Arc<dyn VisibilityPredicate>,
    registry: Arc<BoardRegistry>,
    config: EngineConfig,
}

impl BoardEngine {
    pub fn new(
        provider: Arc<dyn ConfigurationProvider>,
        source: Arc<dyn IssueSource>,
        visibility: Arc<dyn VisibilityPredicate>,
        registry: Arc<BoardRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            source,
            visibility,
            registry,
            config,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<BoardRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The board as `user` sees it through `query`, building it first if
    /// it is not cached.
    ///
    /// # Errors
    ///
    /// - [`BoardError::UnknownBoard`] if no configuration exists for `code`.
    /// - [`BoardError::Configuration`] or [`BoardError::SourceUnavailable`]
    ///   if the board had to be built and the build failed.
    /// - [`BoardError::RebuildTimeout`] if another caller's build took
    ///   longer than the configured wait.
    pub fn get_board(&self, code: &str, user: &User, query: &ViewQuery) -> Result<BoardView> {
        let published = self.ensure_published(code)?;
        let snapshot = &published.snapshot;
        Ok(BoardView::project(
            snapshot,
            self.admits(snapshot, user, query),
        ))
    }

    /// The full, unfiltered snapshot, building it first if needed.
    ///
    /// # Errors
    ///
    /// See [`Self::get_board`].
    pub fn snapshot(&self, code: &str) -> Result<Arc<BoardSnapshot>> {
        self.ensure_published(code)
            .map(|published| Arc::clone(&published.snapshot))
    }

    /// What changed for `user` between `from_version` and the current
    /// snapshot. Never triggers a rebuild.
    ///
    /// # Errors
    ///
    /// - [`BoardError::UnknownBoard`] if no configuration exists for `code`.
    /// - [`BoardError::StaleView`] if the board is not built, or
    ///   `from_version` is outside the retained change log; the caller
    ///   should fall back to [`Self::get_board`].
    pub fn get_changes(
        &self,
        code: &str,
        user: &User,
        from_version: u64,
        query: &ViewQuery,
    ) -> Result<ChangeRecord> {
        self.configuration(code)?;
        let Some(published) = self.registry.get(code).and_then(|s| s.published()) else {
            let last = self.registry.last_version(code);
            return Err(BoardError::StaleView {
                board: code.to_string(),
                requested: from_version,
                oldest: last,
                current: last,
            });
        };

        let snapshot = &published.snapshot;
        let changes = published.log.changes_since(from_version, snapshot)?;
        let admits = self.admits(snapshot, user, query);
        let current = BoardView::project(snapshot, &admits);
        let mut projected = project_changes(&changes, &current, &admits);
        if projected.from_version != projected.to_version {
            self.withdraw_hidden(&mut projected, snapshot, &current, user, query);
        }
        tracing::debug!(
            board = %code,
            from = from_version,
            to = projected.to_version,
            changes = projected.len(),
            "served board changes"
        );
        Ok(projected)
    }

    /// Fetch, build and publish the next version of `code`, joining a
    /// rebuild that is already running instead of starting another.
    ///
    /// Returns the version that is current once the rebuild lands.
    ///
    /// # Errors
    ///
    /// See [`Self::get_board`].
    pub fn rebuild(&self, code: &str) -> Result<u64> {
        self.configuration(code)?;
        let state = self.registry.get_or_create(code);
        state.single_flight(self.config.rebuild_wait(), || self.build_and_publish(&state))
    }

    /// Drop the cached snapshot and change log of `code`. Returns whether
    /// the board was cached.
    pub fn invalidate(&self, code: &str) -> bool {
        self.registry.invalidate(code)
    }

    /// React to a saved or deleted board definition: a board whose
    /// definition still exists is invalidated, otherwise it is evicted.
    pub fn invalidate_on_config_change(&self, code: &str) {
        if self.provider.configuration(code).is_some() {
            tracing::info!(board = %code, "board configuration changed");
            self.registry.invalidate(code);
        } else {
            tracing::info!(board = %code, "board configuration removed");
            self.registry.evict(code);
        }
    }

    /// Forget `code` entirely. Returns whether it was cached.
    pub fn evict(&self, code: &str) -> bool {
        self.registry.evict(code)
    }

    /// Cache status of `code`.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::UnknownBoard`] if `code` has neither a
    /// configuration nor a cache entry.
    pub fn status(&self, code: &str) -> Result<BoardStatus> {
        let Some(state) = self.registry.get(code) else {
            self.configuration(code)?;
            return Ok(BoardStatus {
                code: code.to_string(),
                phase: BoardPhase::Absent,
                version: None,
                last_version: self.registry.last_version(code),
                published_at: None,
                oldest_retained: None,
                issues: 0,
                excluded: 0,
                rebuilding: false,
                last_failure: None,
            });
        };

        let published = state.published();
        let rebuilding = state.is_rebuilding();
        let phase = if rebuilding {
            BoardPhase::Building
        } else if published.is_some() {
            BoardPhase::Ready
        } else {
            BoardPhase::Absent
        };
        let last_failure = state.last_failure().map(|failure| FailureStatus {
            code: failure.error.code().code().to_string(),
            message: failure.error.to_string(),
            at: failure.at,
        });

        Ok(BoardStatus {
            code: code.to_string(),
            phase,
            version: published.as_ref().map(|p| p.snapshot.version),
            last_version: state.last_version(),
            published_at: published.as_ref().map(|p| p.published_at),
            oldest_retained: published
                .as_ref()
                .map(|p| p.log.oldest_version().unwrap_or(p.snapshot.version)),
            issues: published.as_ref().map_or(0, |p| p.snapshot.len()),
            excluded: published.as_ref().map_or(0, |p| p.snapshot.excluded.len()),
            rebuilding,
            last_failure,
        })
    }

    fn configuration(&self, code: &str) -> Result<Arc<BoardConfiguration>> {
        self.provider
            .configuration(code)
            .ok_or_else(|| BoardError::UnknownBoard(code.to_string()))
    }

    fn ensure_published(&self, code: &str) -> Result<Arc<Published>> {
        self.configuration(code)?;
        let state = self.registry.get_or_create(code);
        loop {
            if let Some(published) = state.published() {
                tracing::debug!(board = %code, version = published.snapshot.version, "board cache hit");
                return Ok(published);
            }
            state.single_flight(self.config.rebuild_wait(), || {
                match state.published() {
                    Some(published) => Ok(published.snapshot.version),
                    None => self.build_and_publish(&state),
                }
            })?;
        }
    }

    fn build_and_publish(&self, state: &BoardState) -> Result<u64> {
        let started = Instant::now();
        let result = self.try_build_and_publish(state, started);
        if let Err(err) = &result {
            tracing::warn!(
                board = %state.code(),
                code = %err.code(),
                error = %err,
                "board rebuild failed, keeping previous snapshot"
            );
            state.record_failure(err.clone());
        }
        result
    }

    fn try_build_and_publish(&self, state: &BoardState, started: Instant) -> Result<u64> {
        loop {
            let epoch = state.epoch();
            let config = self.configuration(state.code())?;
            let issues = self.source.fetch_issues(&config, &config.owner)?;

            let last = state.last_version();
            let snapshot = snapshot::build(&config, issues, (last > 0).then_some(last))?;

            let log = match state.published() {
                Some(previous) => {
                    let mut log = previous.log.clone();
                    log.record_and_append(&previous.snapshot, &snapshot)?;
                    log
                }
                None => ChangeLog::new(self.config.retention),
            };

            let version = snapshot.version;
            let issues = snapshot.len();
            let excluded = snapshot.excluded.len();
            if state.publish(epoch, snapshot, log) {
                tracing::info!(
                    board = %state.code(),
                    version,
                    issues,
                    excluded,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "published board snapshot"
                );
                return Ok(version);
            }
            tracing::debug!(board = %state.code(), "board invalidated during rebuild, building again");
        }
    }

    /// Report as removed every issue that only visibility keeps out of
    /// `current` and that `projected` does not already mention.
    ///
    /// Whether the user could see such an issue at the base version is not
    /// recorded, so it is withdrawn on every poll; applying a removal for a
    /// key the client never held changes nothing.
    fn withdraw_hidden(
        &self,
        projected: &mut ChangeRecord,
        snapshot: &BoardSnapshot,
        current: &BoardView,
        user: &User,
        query: &ViewQuery,
    ) {
        let mentioned: HashSet<String> = projected
            .added
            .iter()
            .map(|a| a.key.clone())
            .chain(projected.removed.iter().map(|r| r.key.clone()))
            .chain(projected.updated.iter().map(|u| u.key.clone()))
            .collect();

        let before = projected.removed.len();
        for (key, placed) in &snapshot.issues {
            if mentioned.contains(key) || current.issues.contains_key(key) {
                continue;
            }
            let in_backlog = snapshot
                .columns
                .get(placed.placement.column)
                .is_some_and(|c| c.backlog);
            if query.admits(&placed.issue, in_backlog)
                && !self.visibility.is_visible(user, &placed.issue)
            {
                projected.removed.push(RemovedIssue {
                    key: key.clone(),
                    previous: placed.issue.clone(),
                    previous_placement: placed.placement,
                });
            }
        }

        if projected.removed.len() > before {
            projected.removed.sort_by(|a, b| a.key.cmp(&b.key));
            tracing::debug!(
                board = %snapshot.code,
                user = %user,
                withdrawn = projected.removed.len() - before,
                "withdrew issues hidden from user"
            );
        }
    }

    fn admits<'a>(
        &'a self,
        snapshot: &'a BoardSnapshot,
        user: &'a User,
        query: &'a ViewQuery,
    ) -> impl Fn(&Issue, usize) -> bool + 'a {
        move |issue: &Issue, column: usize| {
            let in_backlog = snapshot.columns.get(column).is_some_and(|c| c.backlog);
            query.admits(issue, in_backlog) && self.visibility.is_visible(user, issue)
        }
    }
}
