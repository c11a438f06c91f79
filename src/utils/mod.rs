pub mod fs;
pub mod logging;

pub use logging::{mask_email, truncate_text};
