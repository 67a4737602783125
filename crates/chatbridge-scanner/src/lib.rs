//! # ChatBridge Scanner
//! One Scanner runs per monitored messaging page.
//!
//! ```text
//! every poll ─▶ run_cycle ─┬─ delivery pending? ─▶ skip
//!                          ├─ disabled / awaiting "continue"? ─▶ skip
//!                          └─ extract questions ─▶ one at a time ─▶ Coordinator
//!                                                    │
//!                                  real answer ─▶ stage DeliveryJob, break
//!                                                    │
//!                               DeliveryMachine: Locating → VerifyingContext
//!                                  → Composing → VerifyingOutcome → done
//! ```

pub mod delivery;
pub mod scheduler;

pub use delivery::{AbandonReason, AttemptResult, Delivered, DeliveryMachine, DeliverySlot, DeliveryState, DeliveryTicket};
pub use scheduler::{CycleReport, CycleSummary, Scanner, SkipReason};
