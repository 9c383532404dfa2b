//! Collaborators the engine is built from.
//!
//! The engine never talks to an issue tracker, a permission system or a
//! configuration store directly. It is handed three narrow trait objects:
//!
//! - [`IssueSource`]: runs the board's query and returns the issue list.
//! - [`VisibilityPredicate`]: decides whether a user may see an issue.
//! - [`ConfigurationProvider`]: looks up board definitions by code.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::error::Result;
use crate::model::{BoardConfiguration, Issue, User};
use crate::registry::BoardRegistry;

/// Fetches the point-in-time issue list for a board.
///
/// Implementations may block on I/O. The engine calls `fetch_issues` at
/// most once per board at a time.
pub trait IssueSource: Send + Sync {
    /// Fetch every issue relevant to `config`, as seen by `user`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BoardError::SourceUnavailable`] when the issue
    /// list cannot be produced.
    fn fetch_issues(&self, config: &BoardConfiguration, user: &User) -> Result<Vec<Issue>>;
}

impl<T: IssueSource + ?Sized> IssueSource for Arc<T> {
    fn fetch_issues(&self, config: &BoardConfiguration, user: &User) -> Result<Vec<Issue>> {
        (**self).fetch_issues(config, user)
    }
}

/// Per-user issue visibility.
pub trait VisibilityPredicate: Send + Sync {
    fn is_visible(&self, user: &User, issue: &Issue) -> bool;
}

impl<F> VisibilityPredicate for F
where
    F: Fn(&User, &Issue) -> bool + Send + Sync,
{
    fn is_visible(&self, user: &User, issue: &Issue) -> bool {
        self(user, issue)
    }
}

/// Every user sees every issue.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl VisibilityPredicate for AllowAll {
    fn is_visible(&self, _user: &User, _issue: &Issue) -> bool {
        true
    }
}

/// Board definitions by code.
pub trait ConfigurationProvider: Send + Sync {
    fn configuration(&self, code: &str) -> Option<Arc<BoardConfiguration>>;

    /// Every known board code, sorted.
    fn codes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A configuration store held in memory.
///
/// When attached to a [`BoardRegistry`], saving a definition invalidates
/// the cached board and deleting one evicts it.
#[derive(Debug, Default)]
pub struct InMemoryConfigurations {
    boards: RwLock<HashMap<String, Arc<BoardConfiguration>>>,
    registry: RwLock<Option<Weak<BoardRegistry>>>,
}

impl InMemoryConfigurations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify `registry` of later saves and deletes.
    pub fn attach(&self, registry: &Arc<BoardRegistry>) {
        *self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(registry));
    }

    /// Validate and store `config`, replacing any definition with the same code.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BoardError::Configuration`] if `config` is malformed;
    /// the store is unchanged in that case.
    pub fn save(&self, config: BoardConfiguration) -> Result<()> {
        config.validate()?;
        let code = config.code.clone();
        let replaced = self
            .boards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.clone(), Arc::new(config))
            .is_some();

        tracing::debug!(board = %code, replaced, "saved board configuration");
        if let Some(registry) = self.registry() {
            registry.invalidate(&code);
        }
        Ok(())
    }

    /// Remove the definition for `code`. Returns whether one existed.
    pub fn delete(&self, code: &str) -> bool {
        let removed = self
            .boards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(code)
            .is_some();

        if removed {
            tracing::debug!(board = %code, "deleted board configuration");
            if let Some(registry) = self.registry() {
                registry.evict(code);
            }
        }
        removed
    }

    fn registry(&self) -> Option<Arc<BoardRegistry>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl ConfigurationProvider for InMemoryConfigurations {
    fn configuration(&self, code: &str) -> Option<Arc<BoardConfiguration>> {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
    }

    fn codes(&self) -> Vec<String> {
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
}
