//! # ChatBridge Sim
//! In-memory stand-ins for the pages ChatBridge automates.
//!
//! - [`SimAnswerPage`]: answer service DOM behind [`PageDriver`](chatbridge_core::traits::PageDriver)
//! - [`SimMessenger`]: messaging page behind [`MessagingSurface`](chatbridge_core::traits::MessagingSurface)
//! - [`SimHost`]: page host with configurable load behavior and extractor injection
//!
//! Used by the test suites and the `simulate` command.

pub mod answer_page;
pub mod dom;
pub mod host;
pub mod messenger;

pub use answer_page::{AnswerPageOptions, InputVariant, ReplyLayout, SendControl, SimAnswerPage};
pub use dom::SimDom;
pub use host::{scripted_extractor, ScriptedReply, SimHost};
pub use messenger::SimMessenger;
