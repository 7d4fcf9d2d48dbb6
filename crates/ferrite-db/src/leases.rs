//! Named, time-bounded advisory leases.
//!
//! A lease is held on both sides at once: the remote advisory lock in the
//! shared store, and an in-process registry that keeps the same process from
//! double-acquiring a lock it already holds. Acquire and release keep the two
//! in lockstep: both sides or neither.

use chrono::{DateTime, Utc};
use ferrite_core::ids::{BuildId, JobId, LockId, PipelineId};
use ferrite_core::ports::{Clock, LockStore};
use ferrite_core::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// How long a trigger-immediately path may hold a job's resource-checking
/// lease.
pub const RESOURCE_CHECKING_FOR_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long a starter may hold a build's scheduling lease across the
/// `pending → scheduled` transition.
pub const BUILD_SCHEDULING_TIMEOUT: Duration = Duration::from_secs(10);

type AfterRelease = Box<dyn FnOnce() + Send>;

/// Creates leases sharing one in-process registry.
#[derive(Clone)]
pub struct LeaseService {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<Mutex<HashSet<LockId>>>,
}

impl LeaseService {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            registry: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Only one process schedules a given pipeline per tick interval.
    pub fn scheduling(&self, pipeline: PipelineId, interval: Duration) -> Lease {
        self.lease(LockId::pipeline_scheduling(pipeline), interval)
    }

    /// Held while a trigger-immediately path scans the job's resources.
    pub fn resource_checking_for_job(&self, job: JobId) -> Lease {
        self.lease(
            LockId::resource_checking_for_job(job),
            RESOURCE_CHECKING_FOR_JOB_TIMEOUT,
        )
    }

    /// Held while a build transitions `pending → scheduled`.
    pub fn build_scheduling(&self, build: BuildId) -> Lease {
        self.lease(LockId::build_scheduling(build), BUILD_SCHEDULING_TIMEOUT)
    }

    fn lease(&self, lock_id: LockId, ttl: Duration) -> Lease {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Lease {
            lock_id,
            deadline: self.clock.now() + ttl,
            store: self.store.clone(),
            registry: self.registry.clone(),
            after_release: Mutex::new(None),
        }
    }
}

/// One named advisory lock with a deadline.
pub struct Lease {
    lock_id: LockId,
    deadline: DateTime<Utc>,
    store: Arc<dyn LockStore>,
    registry: Arc<Mutex<HashSet<LockId>>>,
    after_release: Mutex<Option<AfterRelease>>,
}

impl Lease {
    /// Attempt to take the lease. Returns false without touching the store
    /// when this process already holds the lock.
    pub async fn acquire(&self) -> Result<bool> {
        {
            let registry = lock_unpoisoned(&self.registry);
            if registry.contains(&self.lock_id) {
                return Ok(false);
            }
        }

        let acquired = self.store.try_acquire(self.lock_id, self.deadline).await?;
        if acquired {
            lock_unpoisoned(&self.registry).insert(self.lock_id);
        }

        Ok(acquired)
    }

    /// Release the remote lock, unregister locally, then run the
    /// `on_release` hook if one was set.
    pub async fn release(&self) -> Result<()> {
        self.store.release(self.lock_id).await?;
        lock_unpoisoned(&self.registry).remove(&self.lock_id);

        let hook = lock_unpoisoned(&self.after_release).take();
        if let Some(hook) = hook {
            hook();
        }

        Ok(())
    }

    /// Register an idempotent cleanup callback, invoked after a successful
    /// release.
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        *lock_unpoisoned(&self.after_release) = Some(Box::new(hook));
    }

    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrite_core::ports::SystemClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Remote side that always grants.
    struct GrantingStore {
        held: Mutex<HashSet<LockId>>,
    }

    impl GrantingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                held: Mutex::new(HashSet::new()),
            })
        }
    }

    #[async_trait]
    impl LockStore for GrantingStore {
        async fn try_acquire(&self, lock: LockId, _deadline: DateTime<Utc>) -> Result<bool> {
            Ok(self.held.lock().unwrap().insert(lock))
        }

        async fn release(&self, lock: LockId) -> Result<()> {
            self.held.lock().unwrap().remove(&lock);
            Ok(())
        }
    }

    fn service(store: Arc<GrantingStore>) -> LeaseService {
        LeaseService::new(store, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_reacquire_in_same_process_returns_false() {
        let store = GrantingStore::new();
        let leases = service(store.clone());

        let first = leases.scheduling(PipelineId(1), Duration::from_secs(10));
        assert!(first.acquire().await.unwrap());

        // The registry blocks a second acquire before the store is asked.
        let second = leases.scheduling(PipelineId(1), Duration::from_secs(10));
        assert!(!second.acquire().await.unwrap());

        first.release().await.unwrap();
        assert!(second.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_services_contend_on_the_store() {
        let store = GrantingStore::new();
        let one = service(store.clone());
        let other = service(store.clone());

        let held = one.scheduling(PipelineId(1), Duration::from_secs(10));
        assert!(held.acquire().await.unwrap());

        let contender = other.scheduling(PipelineId(1), Duration::from_secs(10));
        assert!(!contender.acquire().await.unwrap());

        held.release().await.unwrap();
        assert!(contender.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_on_release_hook_runs_after_release() {
        let store = GrantingStore::new();
        let leases = service(store);

        let released = Arc::new(AtomicBool::new(false));
        let lease = leases.resource_checking_for_job(JobId(3));
        lease.acquire().await.unwrap();

        let flag = released.clone();
        lease.on_release(move || flag.store(true, Ordering::SeqCst));
        assert!(!released.load(Ordering::SeqCst));

        lease.release().await.unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_is_ttl_from_now() {
        let store = GrantingStore::new();
        let leases = service(store);

        let lease = leases.build_scheduling(BuildId(9));
        let remaining = lease.deadline() - Utc::now();
        assert!(remaining <= chrono::Duration::seconds(10));
        assert!(remaining > chrono::Duration::seconds(5));
    }
}
