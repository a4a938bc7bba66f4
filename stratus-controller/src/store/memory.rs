//! In-memory job store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use stratus_core::domain::cluster::ClusterId;
use stratus_core::domain::job::{Job, JobState};
use uuid::Uuid;

use super::{JobStore, StoreError, StoreResult, transitions};

/// Single-lock store, used when no database is configured
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    leases: HashSet<Uuid>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F>(&self, id: Uuid, apply: F) -> StoreResult<Job>
    where
        F: FnOnce(&mut Job) -> StoreResult<()>,
    {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Validate on a copy so a rejected transition leaves no trace
        let mut updated = job.clone();
        apply(&mut updated)?;
        *job = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Job> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, service: Option<&str>) -> StoreResult<Vec<Job>> {
        let inner = self.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| service.is_none_or(|s| job.service == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<Job> {
        let mut inner = self.lock();
        inner.leases.remove(&id);
        inner.jobs.remove(&id).ok_or(StoreError::NotFound(id))
    }

    async fn try_lease(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.lock();
        if !inner.jobs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(inner.leases.insert(id))
    }

    async fn release(&self, id: Uuid) -> StoreResult<()> {
        self.lock().leases.remove(&id);
        Ok(())
    }

    async fn record_attempt(&self, id: Uuid, cluster: &ClusterId) -> StoreResult<Job> {
        self.update(id, |job| transitions::record_attempt(job, cluster))
    }

    async fn assign(
        &self,
        id: Uuid,
        cluster: &ClusterId,
        remote_job_id: Option<Uuid>,
    ) -> StoreResult<Job> {
        let now = Utc::now();
        self.update(id, |job| transitions::assign(job, cluster, remote_job_id, now))
    }

    async fn mark_started(&self, id: Uuid) -> StoreResult<Job> {
        let now = Utc::now();
        self.update(id, |job| transitions::mark_started(job, now))
    }

    async fn finish(&self, id: Uuid, state: JobState) -> StoreResult<Job> {
        let now = Utc::now();
        self.update(id, |job| transitions::finish(job, state, now))
    }

    async fn return_to_pending(&self, id: Uuid) -> StoreResult<Job> {
        self.update(id, transitions::return_to_pending)
    }

    async fn in_flight_by_cluster(&self) -> StoreResult<HashMap<ClusterId, usize>> {
        let inner = self.lock();
        let mut counts = HashMap::new();
        for cluster in inner.jobs.values().filter_map(Job::assigned_cluster) {
            *counts.entry(cluster.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn stalled(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let inner = self.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| !inner.leases.contains(&job.id))
            .filter(|job| transitions::is_stalled(job, older_than))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.grace_anchor());
        Ok(jobs)
    }

    async fn assigned(&self) -> StoreResult<Vec<Job>> {
        let inner = self.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| !inner.leases.contains(&job.id) && job.assigned_cluster().is_some())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.grace_anchor());
        Ok(jobs)
    }

    async fn finished_before(&self, before: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let inner = self.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| !inner.leases.contains(&job.id))
            .filter(|job| transitions::is_expired(job, before))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.finished_at);
        Ok(jobs)
    }
}
