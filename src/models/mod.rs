pub mod export;
pub mod schedule;
pub mod site;
pub mod status;
pub mod storage_state;

pub use export::{AuthState, ExportResult, LoginOutcome, NoFileReason, PasscodeOutcome};
pub use schedule::{ScheduleConfig, ScheduleTime};
pub use site::{PageKind, SiteUrls};
pub use status::{AutomationStatus, Credentials, GenerationProgress, StatusRecord, StatusUpdate};
pub use storage_state::{OriginStorage, StorageEntry, StorageState, StoredCookie};
