#[cfg(feature = "browser")]
pub mod browser;
pub mod cleaner;
pub mod extraction;
pub mod metadata;
pub mod sanitize;

#[cfg(feature = "browser")]
pub use browser::{ChromeBrowser, ChromeSession};
pub use cleaner::DomPruner;
pub use extraction::ExtractionClient;
pub use metadata::MetaTagParser;
