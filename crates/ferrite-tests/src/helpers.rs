//! Test helper functions and utilities.

use ferrite_api::{create_router, AppState};
use ferrite_core::ports::SystemClock;
use ferrite_db::LeaseService;
use ferrite_scheduler::{BuildStarter, InputMapper, Scheduler};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::fakes::{FakeEngine, FakePlanFactory, FakeScanner, InMemoryLockStore, InMemoryStore};

/// Everything a scheduling test needs, wired over one in-memory store.
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub locks: Arc<InMemoryLockStore>,
    pub leases: LeaseService,
    pub scanner: Arc<FakeScanner>,
    pub engine: Arc<FakeEngine>,
    pub factory: Arc<FakePlanFactory>,
    pub input_mapper: Arc<InputMapper>,
    pub build_starter: Arc<BuildStarter>,
    pub scheduler: Arc<Scheduler>,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = InMemoryStore::new();
        let locks = InMemoryLockStore::new(Arc::new(SystemClock));
        Self::with_parts(store, locks)
    }

    /// Build a harness over shared store and lock fakes, as a second
    /// "process" against the same backing state.
    pub fn with_parts(store: Arc<InMemoryStore>, locks: Arc<InMemoryLockStore>) -> Self {
        let leases = LeaseService::new(locks.clone(), Arc::new(SystemClock));
        let scanner = FakeScanner::new();
        let engine = FakeEngine::new();
        let factory = FakePlanFactory::new();

        let input_mapper = Arc::new(InputMapper::new(store.clone()));
        let build_starter = Arc::new(BuildStarter::new(
            store.clone(),
            store.clone(),
            store.clone(),
            factory.clone(),
            engine.clone(),
            leases.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            scanner.clone(),
            input_mapper.clone(),
            build_starter.clone(),
            leases.clone(),
        ));

        Self {
            store,
            locks,
            leases,
            scanner,
            engine,
            factory,
            input_mapper,
            build_starter,
            scheduler,
        }
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.store.clone(),
            self.store.clone(),
            self.scheduler.clone(),
        ))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Start an API server for testing and return its address.
pub async fn start_test_server(
    state: Arc<AppState>,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Ok((addr, handle))
}

/// Wait for a condition with timeout.
pub async fn wait_for<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}
