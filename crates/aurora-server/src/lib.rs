use std::sync::Arc;

use aurora_core::cancellation::CancelContext;
use aurora_core::event_bus::EventBus;
use aurora_core::store::DurableStore;
use aurora_orchestrator::{BudgetGovernor, OrchestratorService};

mod http;

pub use http::serve;

/// Everything the axum handlers need, behind a single `Arc` clone per
/// request (spec §6 External interfaces).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OrchestratorService>,
}

impl AppState {
    /// Builds a fresh orchestrator over a durable store rooted at
    /// `data_dir`, reloading any workflows persisted by a previous process
    /// (spec §4.8: pause/resume survives a restart), and spawns the two
    /// background drivers every workflow depends on to make progress: the
    /// scheduler tick (claims ready tasks and runs them) and the health
    /// monitor heartbeat sweep (spec §4.7).
    pub async fn bootstrap(
        data_dir: impl AsRef<std::path::Path>,
        daily_budget_cap: f64,
        global_budget_cap: f64,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(DurableStore::new(data_dir)?);
        let event_bus = EventBus::new();
        let budget = BudgetGovernor::new(daily_budget_cap, global_budget_cap);
        let orchestrator = Arc::new(OrchestratorService::new(store, event_bus, budget));
        orchestrator.load_from_disk().await?;

        let background_cancel = CancelContext::new();
        tokio::spawn(orchestrator.clone().run_scheduler_loop(background_cancel.child()));
        tokio::spawn(orchestrator.clone().run_health_monitor_loop(background_cancel.child()));

        Ok(Self { orchestrator })
    }
}
