//! Volatile queue of pending response candidates.
//!
//! Candidates are best-effort: a restart loses whatever was queued.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{KindredError, KindredResult};
use crate::types::ResponseCandidate;

/// Pending candidates keyed by id, with a per-user index.
#[derive(Default)]
pub struct CandidateQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    candidates: HashMap<Uuid, ResponseCandidate>,
    by_user: BTreeMap<String, Vec<Uuid>>,
    /// Checked out by a running tick.
    in_flight: HashSet<Uuid>,
}

impl QueueInner {
    fn unlink(&mut self, candidate: &ResponseCandidate) {
        self.in_flight.remove(&candidate.candidate_id);
        if let Some(ids) = self.by_user.get_mut(&candidate.user_id) {
            ids.retain(|id| *id != candidate.candidate_id);
            if ids.is_empty() {
                self.by_user.remove(&candidate.user_id);
            }
        }
    }
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KindredResult<MutexGuard<'_, QueueInner>> {
        self.inner
            .lock()
            .map_err(|e| KindredError::internal(format!("Candidate queue poisoned: {}", e)))
    }

    pub fn push(&self, candidate: ResponseCandidate) -> KindredResult<()> {
        let mut inner = self.lock()?;
        inner
            .by_user
            .entry(candidate.user_id.clone())
            .or_default()
            .push(candidate.candidate_id);
        inner.candidates.insert(candidate.candidate_id, candidate);
        Ok(())
    }

    pub fn extend(
        &self,
        candidates: impl IntoIterator<Item = ResponseCandidate>,
    ) -> KindredResult<()> {
        for candidate in candidates {
            self.push(candidate)?;
        }
        Ok(())
    }

    /// Due candidates grouped by user, each group ordered by
    /// `scheduled_not_before`. Users come out in id order.
    ///
    /// `filter` restricts which users are considered.
    pub fn due(
        &self,
        now: DateTime<Utc>,
        filter: impl Fn(&str) -> bool,
    ) -> KindredResult<Vec<(String, Vec<ResponseCandidate>)>> {
        let inner = self.lock()?;
        let mut groups = Vec::new();
        for (user_id, ids) in &inner.by_user {
            if !filter(user_id) {
                continue;
            }
            let mut due: Vec<ResponseCandidate> = ids
                .iter()
                .filter_map(|id| inner.candidates.get(id))
                .filter(|c| {
                    !c.approved && c.is_due(now) && !inner.in_flight.contains(&c.candidate_id)
                })
                .cloned()
                .collect();
            if due.is_empty() {
                continue;
            }
            due.sort_by_key(|c| (c.scheduled_not_before, c.created_at));
            groups.push((user_id.clone(), due));
        }
        Ok(groups)
    }

    /// Claim a queued candidate for one emission attempt.
    ///
    /// Returns `None` if it is gone or another tick holds it.
    pub fn checkout(&self, candidate_id: Uuid) -> KindredResult<Option<ResponseCandidate>> {
        let mut inner = self.lock()?;
        let Some(candidate) = inner.candidates.get(&candidate_id).cloned() else {
            return Ok(None);
        };
        if !inner.in_flight.insert(candidate_id) {
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    /// Return a checked-out candidate untouched.
    pub fn release(&self, candidate_id: Uuid) -> KindredResult<()> {
        self.lock()?.in_flight.remove(&candidate_id);
        Ok(())
    }

    /// Take a candidate out of the queue.
    pub fn remove(&self, candidate_id: Uuid) -> KindredResult<Option<ResponseCandidate>> {
        let mut inner = self.lock()?;
        let removed = inner.candidates.remove(&candidate_id);
        if let Some(candidate) = &removed {
            inner.unlink(candidate);
        }
        Ok(removed)
    }

    /// Bump the attempt counter after a failed emission and release the
    /// candidate. Returns the new count.
    pub fn record_failure(&self, candidate_id: Uuid) -> KindredResult<u32> {
        let mut inner = self.lock()?;
        inner.in_flight.remove(&candidate_id);
        Ok(inner
            .candidates
            .get_mut(&candidate_id)
            .map(|c| {
                c.attempts += 1;
                c.attempts
            })
            .unwrap_or(0))
    }

    /// Remove every candidate past its horizon and return them.
    pub fn purge_expired(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> KindredResult<Vec<ResponseCandidate>> {
        let mut inner = self.lock()?;
        let expired: Vec<Uuid> = inner
            .candidates
            .values()
            .filter(|c| c.is_expired(now, horizon) && !inner.in_flight.contains(&c.candidate_id))
            .map(|c| c.candidate_id)
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(candidate) = inner.candidates.remove(&id) {
                inner.unlink(&candidate);
                removed.push(candidate);
            }
        }
        Ok(removed)
    }

    /// Users that currently have at least one queued candidate.
    pub fn users(&self) -> KindredResult<Vec<String>> {
        Ok(self.lock()?.by_user.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.candidates.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
