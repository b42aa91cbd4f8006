//! OTG role management
//!
//! ```text
//! Controller
//!     ├── OtgState   (A_IDLE, A_WAIT_*, B_IDLE, INACTIVE)
//!     ├── PollTimer  (deadline polled by the service task)
//!     └── machine    (VBUS interrupt and poll timer transitions)
//! ```
//!
//! The wrapper has no ID pin interrupt, so role detection on a dual-role
//! port is driven by polling DEVCTL while the port sits in `B_IDLE`.

mod machine;
pub mod state;
pub mod timer;

pub use state::{OtgState, OtgStatus};
pub use timer::PollTimer;
