//! UserPulse worker — periodic computed-properties cycles over every
//! workspace.
//!
//! Development entry point wired to in-memory backends. Production
//! deployments swap the event store, workflow client, and assignment sink
//! for their durable counterparts behind the same traits.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use uuid::Uuid;

use pulse_compute::{ComputeEngine, InMemoryDefinitionStore};
use pulse_compute::scheduler::Scheduler;
use pulse_core::assignments::InMemoryAssignmentSink;
use pulse_core::config::AppConfig;
use pulse_core::workflow::{
    ComputedPropertyUpdate, SegmentUpdate, WorkflowClient,
};
use pulse_core::{InMemoryEventStore, PulseResult};

#[derive(Parser, Debug)]
#[command(name = "pulse-worker")]
#[command(about = "Incremental computed-properties worker")]
#[command(version)]
struct Cli {
    /// Seconds between computation cycles (overrides config)
    #[arg(long, env = "USERPULSE__COMPUTE__CYCLE_INTERVAL_SECS")]
    cycle_interval: Option<u64>,

    /// Assignments dispatched per batch (overrides config)
    #[arg(long, env = "USERPULSE__COMPUTE__PAGE_SIZE")]
    page_size: Option<usize>,
}

/// Workflow client that logs deliveries instead of reaching a workflow
/// engine. Stands in until a durable client is configured.
struct LoggingWorkflowClient;

impl WorkflowClient for LoggingWorkflowClient {
    fn signal_with_start(
        &self,
        workflow_id: &str,
        journey_id: Uuid,
        workspace_id: Uuid,
        user_id: &str,
        update: SegmentUpdate,
    ) -> PulseResult<()> {
        info!(
            workflow_id = %workflow_id,
            journey_id = %journey_id,
            workspace_id = %workspace_id,
            user_id = %user_id,
            segment_id = %update.segment_id,
            currently_in_segment = update.currently_in_segment,
            "journey signaled"
        );
        Ok(())
    }

    fn notify_integration(
        &self,
        integration_id: Uuid,
        workspace_id: Uuid,
        user_id: &str,
        update: ComputedPropertyUpdate,
    ) -> PulseResult<()> {
        info!(
            integration_id = %integration_id,
            workspace_id = %workspace_id,
            user_id = %user_id,
            update = ?update,
            "integration notified"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_worker=info,pulse_compute=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("UserPulse worker starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(secs) = cli.cycle_interval {
        config.compute.cycle_interval_secs = secs;
    }
    if let Some(page_size) = cli.page_size {
        config.compute.page_size = page_size;
    }

    info!(
        cycle_interval_secs = config.compute.cycle_interval_secs,
        page_size = config.compute.page_size,
        subscription_cache_ttl_secs = config.subscriptions.cache_ttl_secs,
        "Configuration loaded"
    );

    let event_store = Arc::new(InMemoryEventStore::new());
    let workflow = Arc::new(LoggingWorkflowClient);
    let sink = Arc::new(InMemoryAssignmentSink::new());
    let definitions = Arc::new(InMemoryDefinitionStore::new());

    let engine = Arc::new(ComputeEngine::new(
        event_store,
        workflow,
        sink,
        &config,
    ));

    let scheduler = Scheduler::new(
        engine,
        definitions,
        Duration::from_secs(config.compute.cycle_interval_secs),
    );

    info!("UserPulse worker is ready");

    // Blocks until shutdown.
    scheduler.run().await;

    Ok(())
}
