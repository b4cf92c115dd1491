//! Scheduler - periodic tick driver for probes and timeout checks
//!
//! A single interval task. Each tick: run every live supervisor's timeout
//! check (cheap, non-blocking), release dependents whose parent completed,
//! and dispatch coordinator completion probes as spawned work items so the
//! tick loop itself never does blocking I/O. Probes that outlast a tick are
//! skipped by the coordinator's own try-lock guard rather than piling up.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinators::CoordinatorRegistry;
use crate::session::Session;

pub struct Scheduler {
    session: Arc<Session>,
    registry: Arc<CoordinatorRegistry>,
    tick: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(session: Arc<Session>, registry: Arc<CoordinatorRegistry>, tick: Duration) -> Self {
        Self {
            session,
            registry,
            tick,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the tick loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled
    pub async fn run(self) {
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.on_tick(),
            }
        }
        info!("scheduler stopped");
    }

    fn on_tick(&self) {
        // 1. Timeout checks for every live instance
        for supervisor in self.session.live_supervisors() {
            supervisor.check_timeouts();
        }

        // 2. Release dependents whose parent completed
        for supervisor in self.session.take_ready_dependents() {
            debug!(id = %supervisor.id(), "releasing dependent instance");
            let sup = supervisor.clone();
            tokio::spawn(async move {
                let prompt = sup.instance().task.clone();
                if let Err(e) = sup.start(&prompt).await {
                    warn!(id = %sup.id(), error = %e, "failed to start released dependent");
                }
            });
        }

        // 3. Coordinator completion probes, off the tick loop
        for coordinator in self.registry.active() {
            tokio::spawn(async move {
                coordinator.check_completion().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentScript, ScriptedLauncher};
    use crate::domain::InstanceStatus;
    use crate::events::EventBus;
    use crate::instance::{Instance, InstanceSupervisor, TimeoutConfig};

    fn add_instance(
        session: &Session,
        launcher: &Arc<ScriptedLauncher>,
        bus: &Arc<EventBus>,
        timeouts: TimeoutConfig,
        workdir: &std::path::Path,
    ) -> Arc<InstanceSupervisor> {
        let instance = Arc::new(Instance::new("scheduled task", 1 << 20, timeouts));
        instance.set_workdir(workdir.to_path_buf());
        let sup = Arc::new(InstanceSupervisor::new(
            instance.clone(),
            launcher.clone(),
            bus.emitter_for(instance.id.clone()),
        ));
        session.insert_instance(instance, sup.clone());
        sup
    }

    #[tokio::test]
    async fn test_tick_applies_timeouts() {
        let session = Arc::new(Session::new());
        let registry = Arc::new(CoordinatorRegistry::new());
        let bus = Arc::new(EventBus::with_default_capacity());
        let launcher = Arc::new(ScriptedLauncher::new());
        launcher.push(AgentScript::new().emit("hi\n").sleep_ms(60_000));
        let tmp = tempfile::tempdir().unwrap();

        let sup = add_instance(
            &session,
            &launcher,
            &bus,
            TimeoutConfig {
                activity: Duration::from_millis(20),
                ..Default::default()
            },
            tmp.path(),
        );
        sup.start("task").await.unwrap();

        let scheduler = Scheduler::new(session.clone(), registry, Duration::from_millis(10));
        let cancel = scheduler.cancel_token();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while sup.status() != InstanceStatus::Stuck {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler never marked the instance stuck");

        cancel.cancel();
        handle.await.unwrap();
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_releases_dependents() {
        let session = Arc::new(Session::new());
        let registry = Arc::new(CoordinatorRegistry::new());
        let bus = Arc::new(EventBus::with_default_capacity());
        let launcher = Arc::new(ScriptedLauncher::new());
        let tmp = tempfile::tempdir().unwrap();

        // Parent finishes fast; child waits on it
        launcher.push(AgentScript::new().emit("parent done\n"));
        launcher.push(AgentScript::new().emit("child ran\n"));

        let parent = add_instance(&session, &launcher, &bus, TimeoutConfig::default(), tmp.path());
        let child = add_instance(&session, &launcher, &bus, TimeoutConfig::default(), tmp.path());
        child.instance().set_waits_for(Some(parent.id().to_string()));

        parent.start("parent").await.unwrap();

        let scheduler = Scheduler::new(session.clone(), registry, Duration::from_millis(10));
        let cancel = scheduler.cancel_token();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while child.status() != InstanceStatus::Completed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("dependent never started");

        cancel.cancel();
        handle.await.unwrap();
        assert!(child.instance().buffer.contains("child ran"));
    }

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let scheduler = Scheduler::new(
            Arc::new(Session::new()),
            Arc::new(CoordinatorRegistry::new()),
            Duration::from_millis(10),
        );
        let cancel = scheduler.cancel_token();
        let handle = tokio::spawn(scheduler.run());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
