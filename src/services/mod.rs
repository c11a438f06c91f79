pub mod auth_flow;
pub mod ingestion;
pub mod session_manager;

pub use auth_flow::AuthFlow;
pub use ingestion::{InboxIngestor, Ingestor};
pub use session_manager::SessionManager;
