pub mod export_flow;
pub mod run_ctx;

pub use export_flow::ExportOrchestrator;
pub use run_ctx::{RunCtx, RunKind};
