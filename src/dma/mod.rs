//! CPPI 4.1 DMA completion-queue engine
//!
//! ```text
//! DmaEngine
//!     ├── queue manager   (linking RAM, pending words → CompletionLayout)
//!     ├── channel control (per-channel enable, checked before descheduling)
//!     └── scheduler       (fairness Schedule, 8 words / 16 channel pairs)
//! ```
//!
//! Completion queues are level-triggered: a queue that is missed in one
//! dispatch is still pending on the next one.

pub mod engine;
pub mod layout;
pub mod schedule;

pub use engine::{DmaEngine, DMA_IRQ_NAME};
pub use layout::{CompletionLayout, CompletionMasks, LAYOUTS, USB0_LAYOUT, USB1_LAYOUT};
pub use schedule::{SchedEntry, Schedule, SCHED_MAX_PAIRS};
