//! Lazy, access-time expiry.
//!
//! There is no sweeper: an expired object stays on disk until somebody asks
//! for it, at which point [`ExpiryPolicy::evaluate`] tells the caller to purge
//! it and answer not-found.

use crate::services::storage_service::{StorageResult, StorageService};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Serve,
    Purge,
}

#[derive(Clone)]
pub struct ExpiryPolicy {
    store: StorageService,
}

impl ExpiryPolicy {
    pub fn new(store: StorageService) -> Self {
        Self { store }
    }

    /// Decide whether a retrieval at `now` may be served.
    ///
    /// 1. At or past the expiry instant: purge.
    /// 2. With a use counter: consume one use. Reaching zero purges, and the
    ///    access that consumed the last use is itself not served.
    ///
    /// The decrement is a single atomic update, so concurrent retrievals
    /// each consume exactly one use.
    pub async fn evaluate(&self, name: &str, now: DateTime<Utc>) -> StorageResult<Verdict> {
        let Some(record) = self.store.expiry_record(name).await? else {
            return Ok(Verdict::Serve);
        };

        if record.expires_at.is_some_and(|at| now >= at) {
            return Ok(Verdict::Purge);
        }

        if record.uses_left.is_some() {
            return Ok(match self.store.consume_use(name).await? {
                Some(remaining) if remaining > 0 => Verdict::Serve,
                _ => Verdict::Purge,
            });
        }

        Ok(Verdict::Serve)
    }

    /// Time-only check for link previews. Never consumes a use, so preview
    /// crawlers cannot burn single-use links.
    pub async fn peek(&self, name: &str, now: DateTime<Utc>) -> StorageResult<Verdict> {
        let expired = self
            .store
            .expiry_record(name)
            .await?
            .and_then(|record| record.expires_at)
            .is_some_and(|at| now >= at);
        Ok(if expired { Verdict::Purge } else { Verdict::Serve })
    }
}
