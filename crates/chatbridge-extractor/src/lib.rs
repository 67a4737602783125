//! # ChatBridge Extractor
//! The Answer Extractor context that runs inside the answer service page.
//!
//! Protocol for one question:
//! 1. acknowledge `askQuestion` (`processing` or `skipped_recent_duplicate`)
//! 2. find the input (primary locator, then fallback), set and verify the text
//! 3. submit: send control, Enter key, second pass over send controls
//! 4. wait for the answer service to generate, then read the latest reply
//! 5. report `chatGPTResponse` back to the Coordinator
//!
//! Only a missing input is a hard failure. Everything else degrades toward
//! reporting whatever reply text is on the page, possibly empty.

pub mod extractor;
pub mod reply;
pub mod submit;

pub use extractor::AnswerExtractor;
pub use submit::SubmitOutcome;
