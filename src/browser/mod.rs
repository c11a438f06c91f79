pub mod backend;
pub mod installer;
pub mod launcher;

pub use backend::{BrowserBackend, BrowserRuntime, ChromiumBackend, SessionHandle};
pub use installer::BrowserInstaller;
pub use launcher::launch_browser;
