//! Worker lifecycle coordinator
//!
//! Starts workers on their own OS thread (each driving a private
//! single-threaded tokio runtime), stops them cooperatively with a bounded
//! wait, and performs the budgeted mass stop that precedes an update.
//!
//! Lock discipline: the registry is only touched through its short,
//! non-blocking operations. Waiting on a worker's done signal always happens
//! after the registry guard has been released.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared::{fleet_debug, fleet_error, fleet_info, fleet_warn, Component, StopAllReport, WorkerConfig, WorkerId, WorkerStatus};
use tokio::sync::oneshot;

use crate::config::DEFAULT_PER_WORKER_CEILING;
use crate::core::handle::{cancel_pair, done_pair, next_generation};
use crate::core::{CancelToken, Registry, WorkerHandle};
use crate::error::{ManagerError, ManagerResult};
use crate::traits::WorkerRuntime;

pub struct LifecycleCoordinator {
    registry: Arc<Registry>,
    runtime: Arc<dyn WorkerRuntime>,
    per_worker_ceiling: Duration,
}

impl LifecycleCoordinator {
    pub fn new(registry: Arc<Registry>, runtime: Arc<dyn WorkerRuntime>) -> Self {
        Self {
            registry,
            runtime,
            per_worker_ceiling: DEFAULT_PER_WORKER_CEILING,
        }
    }

    /// Configure the per-worker stop ceiling used by `stop_all_for_update` (fluent API)
    pub fn with_per_worker_ceiling(mut self, ceiling: Duration) -> Self {
        self.per_worker_ceiling = ceiling;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Spawn the worker's execution context and mark it `running`
    pub fn start(&self, id: WorkerId) -> ManagerResult<()> {
        let view = self.registry.get(id).ok_or_else(|| ManagerError::not_found(id))?;
        if view.status.has_handle() {
            return Err(ManagerError::state(id, format!("already {}", view.status)));
        }

        let generation = next_generation();
        let (cancel, token) = cancel_pair();
        let (notifier, done) = done_pair();
        // The thread idles until the handle is attached so an instant exit
        // can never race the registry into a stale `running`
        let (go_tx, go_rx) = oneshot::channel::<()>();

        let registry = Arc::clone(&self.registry);
        let runtime = Arc::clone(&self.runtime);
        let config = view.config;

        let thread = std::thread::Builder::new().name(id.to_string()).spawn(move || {
            let _notifier = notifier;
            if go_rx.blocking_recv().is_err() {
                return;
            }

            let failure = run_worker(id, config, token, runtime).err();
            if let Some(message) = &failure {
                fleet_error!(Component::Worker(id), "💥 Worker exited with error: {}", message);
            }
            if registry.settle_exit(id, generation, failure) {
                fleet_info!(Component::Worker(id), "🏁 Worker exited on its own");
            }
        })?;

        self.registry
            .attach_handle(id, WorkerHandle::new(generation, cancel, done, Some(thread)))?;
        let _ = go_tx.send(());

        fleet_info!(Component::Coordinator, "▶️ Started {}", id);
        Ok(())
    }

    /// Start several workers, logging instead of failing on individual errors
    ///
    /// Returns the ids that actually started.
    pub fn start_many(&self, ids: &[WorkerId]) -> Vec<WorkerId> {
        let mut started = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.start(id) {
                Ok(()) => started.push(id),
                Err(e) => fleet_warn!(Component::Coordinator, "⚠️ Could not start {}: {}", id, e),
            }
        }
        started
    }

    /// Cancel a running worker and wait up to `timeout` for it to exit
    ///
    /// On timeout the entry is forced to `stopped` and the handle dropped
    /// even though the thread may still be alive; the caller gets
    /// `TimeoutError`.
    pub async fn stop(&self, id: WorkerId, timeout: Duration) -> ManagerResult<()> {
        let done = self.registry.begin_stop(id)?;
        fleet_debug!(Component::Coordinator, "⏹️ Stopping {} (budget {:?})", id, timeout);

        match tokio::time::timeout(timeout, done.wait()).await {
            Ok(()) => {
                self.registry.detach_handle(id, WorkerStatus::Stopped)?;
                fleet_info!(Component::Coordinator, "⏹️ Stopped {}", id);
                Ok(())
            }
            Err(_) => {
                let leaked = self.registry.force_stop(id)?;
                if leaked {
                    fleet_warn!(
                        Component::Coordinator,
                        "⏰ {} did not exit within {:?}; abandoning its thread",
                        id,
                        timeout
                    );
                }
                Err(ManagerError::TimeoutError { id, timeout })
            }
        }
    }

    /// Stop every running worker within `total_timeout`
    ///
    /// Workers are processed sequentially in registration order. Each gets
    /// `min(ceiling, remaining / remaining_count)`, recomputed before every
    /// worker. Workers that already exited on their own keep their `stopped`
    /// or `error` status; whatever else was not stopped gracefully is
    /// force-cleaned, so no entry is left `stopping`. Never fails.
    pub async fn stop_all_for_update(&self, total_timeout: Duration) -> StopAllReport {
        let started = Instant::now();
        let ids = self.registry.running_ids();
        if ids.is_empty() {
            fleet_info!(Component::Coordinator, "💤 No active workers to stop");
            return StopAllReport::empty();
        }

        let total = ids.len();
        fleet_info!(Component::Coordinator, "🛑 Stopping {} workers within {:?}", total, total_timeout);

        let mut graceful = 0;
        let mut exited = 0;
        let mut unsettled = Vec::new();

        for (index, &id) in ids.iter().enumerate() {
            let elapsed = started.elapsed();
            if elapsed >= total_timeout {
                fleet_warn!(
                    Component::Coordinator,
                    "⏰ Stop budget exhausted, {} workers left for forced cleanup",
                    total - index
                );
                for &left in &ids[index..] {
                    // Entries that settled by themselves keep their stopped or error status
                    if self.has_exited(left) {
                        exited += 1;
                    } else {
                        unsettled.push(left);
                    }
                }
                break;
            }

            let remaining = total_timeout - elapsed;
            let remaining_count = (total - index) as u32;
            let budget = self.per_worker_ceiling.min(remaining / remaining_count);

            match self.stop(id, budget).await {
                Ok(()) => graceful += 1,
                Err(ManagerError::StateError { .. }) if self.has_exited(id) => {
                    fleet_debug!(Component::Coordinator, "💤 {} exited on its own before the stop", id);
                    exited += 1;
                }
                Err(e) => {
                    fleet_warn!(Component::Coordinator, "⚠️ Graceful stop of {} failed: {}", id, e);
                    unsettled.push(id);
                }
            }
        }

        let mut forced = 0;
        for &id in &unsettled {
            match self.registry.force_stop(id) {
                Ok(_) => forced += 1,
                Err(e) => fleet_warn!(Component::Coordinator, "⚠️ Forced cleanup of {} failed: {}", id, e),
            }
        }

        let success = graceful + forced + exited == total;
        let mut message = format!("Stopped {total} workers: {graceful} graceful, {forced} forced");
        if exited > 0 {
            message.push_str(&format!(", {exited} already exited"));
        }
        let report = StopAllReport {
            total,
            graceful,
            forced,
            exited,
            success,
            message,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if forced > 0 {
            fleet_warn!(Component::Coordinator, "⚠️ {}", report.message);
        } else {
            fleet_info!(Component::Coordinator, "✅ {}", report.message);
        }
        report
    }

    fn has_exited(&self, id: WorkerId) -> bool {
        matches!(
            self.registry.status(id),
            Some(WorkerStatus::Stopped | WorkerStatus::Error)
        )
    }
}

/// Drive one worker to completion on the current thread
fn run_worker(
    id: WorkerId,
    config: WorkerConfig,
    token: CancelToken,
    runtime: Arc<dyn WorkerRuntime>,
) -> Result<(), String> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build worker runtime: {e}"))?;

    match panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(runtime.run(id, config, token)))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("worker panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockWorkerRuntime;

    /// Exits as soon as it is cancelled
    struct Cooperative;

    #[async_trait::async_trait]
    impl WorkerRuntime for Cooperative {
        async fn run(&self, _id: WorkerId, _config: WorkerConfig, cancel: CancelToken) -> ManagerResult<()> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    /// Ignores cancellation for a while
    struct Stubborn(Duration);

    #[async_trait::async_trait]
    impl WorkerRuntime for Stubborn {
        async fn run(&self, _id: WorkerId, _config: WorkerConfig, _cancel: CancelToken) -> ManagerResult<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    /// Behaviour picked by bot name: `slow` ignores cancel for a while, `crashing` fails on its own
    struct ByName;

    #[async_trait::async_trait]
    impl WorkerRuntime for ByName {
        async fn run(&self, _id: WorkerId, config: WorkerConfig, cancel: CancelToken) -> ManagerResult<()> {
            match config.bot_name.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(())
                }
                "crashing" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(ManagerError::config("token revoked"))
                }
                _ => {
                    cancel.cancelled().await;
                    Ok(())
                }
            }
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl WorkerRuntime for Panicking {
        async fn run(&self, _id: WorkerId, _config: WorkerConfig, _cancel: CancelToken) -> ManagerResult<()> {
            panic!("token rejected by api");
        }
    }

    fn coordinator(runtime: impl WorkerRuntime + 'static) -> LifecycleCoordinator {
        LifecycleCoordinator::new(Arc::new(Registry::new()), Arc::new(runtime))
    }

    fn register(coordinator: &LifecycleCoordinator, name: &str) -> WorkerId {
        coordinator
            .registry()
            .register(WorkerConfig::new(name, format!("5000:{name}")))
            .unwrap()
    }

    async fn wait_for_status(registry: &Registry, id: WorkerId, status: WorkerStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.status(id) != Some(status) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{id} never reached {status}"));
    }

    #[tokio::test]
    async fn test_start_then_stop_gracefully() {
        let coordinator = coordinator(Cooperative);
        let id = register(&coordinator, "alpha");

        coordinator.start(id).unwrap();
        assert_eq!(coordinator.registry().status(id), Some(WorkerStatus::Running));

        coordinator.stop(id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(coordinator.registry().status(id), Some(WorkerStatus::Stopped));
    }

    #[tokio::test]
    async fn test_start_rejects_running_and_unknown() {
        let coordinator = coordinator(Cooperative);
        let id = register(&coordinator, "alpha");
        coordinator.start(id).unwrap();

        assert!(matches!(coordinator.start(id), Err(ManagerError::StateError { .. })));
        assert!(matches!(coordinator.start(WorkerId(42)), Err(ManagerError::StateError { .. })));

        coordinator.stop(id, Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_requires_running() {
        let coordinator = coordinator(Cooperative);
        let id = register(&coordinator, "alpha");

        let err = coordinator.stop(id, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ManagerError::StateError { .. }));
    }

    #[tokio::test]
    async fn test_stop_timeout_forces_stopped() {
        let coordinator = coordinator(Stubborn(Duration::from_secs(2)));
        let id = register(&coordinator, "slow");
        coordinator.start(id).unwrap();

        let started = Instant::now();
        let err = coordinator.stop(id, Duration::from_millis(100)).await.unwrap_err();

        assert!(matches!(err, ManagerError::TimeoutError { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(coordinator.registry().status(id), Some(WorkerStatus::Stopped));
    }

    #[tokio::test]
    async fn test_worker_failure_settles_in_error() {
        let mut runtime = MockWorkerRuntime::new();
        runtime
            .expect_run()
            .times(1)
            .returning(|_, _, _| Err(ManagerError::config("telegram rejected the token")));

        let coordinator = coordinator(runtime);
        let id = register(&coordinator, "broken");
        coordinator.start(id).unwrap();

        wait_for_status(coordinator.registry(), id, WorkerStatus::Error).await;
        let view = coordinator.registry().get(id).unwrap();
        assert!(view.last_error.unwrap().contains("telegram rejected the token"));

        // A worker in error can be started again
        assert!(!view.status.has_handle());
    }

    #[tokio::test]
    async fn test_worker_panic_settles_in_error() {
        let coordinator = coordinator(Panicking);
        let id = register(&coordinator, "panicky");
        coordinator.start(id).unwrap();

        wait_for_status(coordinator.registry(), id, WorkerStatus::Error).await;
        let view = coordinator.registry().get(id).unwrap();
        assert!(view.last_error.unwrap().contains("token rejected by api"));
    }

    #[tokio::test]
    async fn test_clean_self_exit_settles_in_stopped() {
        let mut runtime = MockWorkerRuntime::new();
        runtime.expect_run().returning(|_, _, _| Ok(()));

        let coordinator = coordinator(runtime);
        let id = register(&coordinator, "oneshot");
        coordinator.start(id).unwrap();

        wait_for_status(coordinator.registry(), id, WorkerStatus::Stopped).await;
        assert!(coordinator.registry().get(id).unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_stop_all_reports_graceful_count() {
        let coordinator = coordinator(Cooperative);
        let ids: Vec<_> = ["a", "b", "c"].iter().map(|n| register(&coordinator, n)).collect();
        assert_eq!(coordinator.start_many(&ids), ids);

        let report = coordinator.stop_all_for_update(Duration::from_secs(30)).await;

        assert!(report.success);
        assert_eq!(report.total, 3);
        assert!(report.message.contains("3 graceful, 0 forced"));
        for id in ids {
            assert_eq!(coordinator.registry().status(id), Some(WorkerStatus::Stopped));
        }
    }

    #[tokio::test]
    async fn test_stop_all_with_no_workers() {
        let coordinator = coordinator(Cooperative);
        register(&coordinator, "idle");

        let report = coordinator.stop_all_for_update(Duration::from_secs(1)).await;
        assert!(report.success);
        assert_eq!(report.total, 0);
        assert_eq!(report.message, "No active workers");
    }

    #[tokio::test]
    async fn test_stop_all_respects_total_budget() {
        let coordinator = coordinator(Stubborn(Duration::from_secs(5))).with_per_worker_ceiling(Duration::from_secs(5));
        let ids: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| register(&coordinator, n)).collect();
        coordinator.start_many(&ids);

        let total = Duration::from_millis(400);
        let started = Instant::now();
        let report = coordinator.stop_all_for_update(total).await;

        assert!(started.elapsed() < total + Duration::from_millis(300));
        assert!(report.success);
        assert_eq!(report.graceful + report.forced, 4);
        assert_eq!(report.forced, 4);
        for id in ids {
            assert_eq!(coordinator.registry().status(id), Some(WorkerStatus::Stopped));
        }
    }

    #[tokio::test]
    async fn test_stop_all_keeps_error_of_worker_that_exited_itself() {
        let coordinator = coordinator(ByName);
        let slow = register(&coordinator, "slow");
        let crashing = register(&coordinator, "crashing");
        coordinator.start_many(&[slow, crashing]);

        let report = coordinator.stop_all_for_update(Duration::from_secs(5)).await;

        assert!(report.success);
        assert_eq!(report.total, 2);
        assert_eq!((report.graceful, report.forced, report.exited), (1, 0, 1));
        assert_eq!(report.message, "Stopped 2 workers: 1 graceful, 0 forced, 1 already exited");
        assert_eq!(coordinator.registry().status(slow), Some(WorkerStatus::Stopped));

        let view = coordinator.registry().get(crashing).unwrap();
        assert_eq!(view.status, WorkerStatus::Error);
        assert!(view.last_error.unwrap().contains("token revoked"));
    }
}
