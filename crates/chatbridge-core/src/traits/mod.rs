//! Capability traits for the external collaborators the core drives.
//!
//! Pages are unreliable external systems. The core only ever sees them
//! through these narrow interfaces; fallback chains live in the callers.

pub mod host;
pub mod messaging;
pub mod page;
pub mod store;

pub use host::{PageHost, PageId, PageKind};
pub use messaging::{MessageAuthor, MessagingSurface};
pub use page::{ElementHandle, Locator, PageDriver};
pub use store::SettingsStore;
