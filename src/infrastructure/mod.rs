//! 基础设施层：持有页面资源，只暴露能力

pub mod js_executor;
pub mod page_driver;
pub mod selectors;

pub use js_executor::JsExecutor;
pub use page_driver::PageDriver;
pub use selectors::Locator;
