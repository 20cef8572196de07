//! Periodic scheduling — one cycle per workspace per tick.
//!
//! Workspaces run in parallel; an in-flight guard keeps a slow workspace
//! from overlapping itself (cycles within a workspace are serialized, the
//! engine's per-workspace lock is the backstop).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::cycle::{ComputeEngine, CycleRequest};
use crate::provider::DefinitionProvider;

pub struct Scheduler {
    engine: Arc<ComputeEngine>,
    provider: Arc<dyn DefinitionProvider>,
    interval: Duration,
    in_flight: Arc<DashSet<Uuid>>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<ComputeEngine>,
        provider: Arc<dyn DefinitionProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            provider,
            interval,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Runs forever, ticking every configured interval.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "compute scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// Starts a cycle task for every workspace not already mid-cycle.
    pub fn tick(&self) {
        for workspace_id in self.provider.workspaces() {
            if !self.in_flight.insert(workspace_id) {
                continue;
            }
            let engine = Arc::clone(&self.engine);
            let provider = Arc::clone(&self.provider);
            let in_flight = Arc::clone(&self.in_flight);
            tokio::spawn(async move {
                // run_cycle blocks on the workspace lock and the stores, so
                // it runs on the blocking pool, not a runtime worker.
                let outcome = tokio::task::spawn_blocking(move || {
                    let snapshot = provider.snapshot(workspace_id)?;
                    let request = CycleRequest {
                        snapshot,
                        current_time: Utc::now(),
                    };
                    engine.run_cycle(&request)
                })
                .await;
                match outcome {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        error!(
                            workspace_id = %workspace_id,
                            error = %err,
                            "cycle failed, will retry on next tick"
                        );
                    }
                    Err(err) => {
                        error!(
                            workspace_id = %workspace_id,
                            error = %err,
                            "cycle task panicked"
                        );
                    }
                }
                in_flight.remove(&workspace_id);
            });
        }
    }
}
