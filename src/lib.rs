//! otg-glue - TI816x/AM35x USB OTG controller glue core
//!
//! Sits between a Mentor USB OTG controller and its USB protocol core:
//! width-safe register access with a shadow cache, interrupt dispatch, the
//! OTG role state machine with its poll timer, and the CPPI 4.1 DMA
//! completion-queue engine.

pub mod config;
pub mod controller;
pub mod dma;
pub mod error;
pub mod events;
pub mod irq;
pub mod mmio;
pub mod otg;
pub mod regs;
pub mod service;
pub mod shim;
pub mod uio;
pub mod usbcore;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{OtgError, Result};
