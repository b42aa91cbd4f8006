//! Collaborator interfaces
//!
//! The glue core talks to three outside parties: the USB protocol core
//! (notified once per dispatch cycle), the DMA consumers (notified once per
//! completed transfer) and the board's PHY power sequencing.

use serde::{Deserialize, Serialize};

/// Decoded interrupt sources of one dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreEvents {
    /// Transmit endpoints (bit 0 = EP0)
    pub tx: u16,
    /// Receive endpoints (bit 1 = EP1)
    pub rx: u16,
    /// Mentor INTRUSB bits plus DRVVBUS in bit 8
    pub usb: u16,
}

impl CoreEvents {
    pub fn is_empty(&self) -> bool {
        self.tx == 0 && self.rx == 0 && self.usb == 0
    }
}

/// Port operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    Host,
    Peripheral,
}

/// Transfer direction of a DMA completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Tx,
    Rx,
}

/// USB protocol core
pub trait UsbCore: Send {
    /// Process endpoint/core interrupt bits; returns whether they were handled
    fn interrupt(&mut self, events: &CoreEvents) -> bool;

    /// Hardware switched between host and peripheral operation
    fn port_mode_changed(&mut self, _mode: PortMode) {}
}

/// Consumer of DMA completions
///
/// Only the endpoint identity is delivered; the consumer pops the completed
/// descriptor itself.
pub trait CompletionSink: Send {
    fn transfer_completed(&mut self, endpoint: u8, direction: Direction);
}

/// Board hooks for the on-chip PHY
pub trait PhyPower: Send {
    fn power_up(&mut self);
    fn power_down(&mut self);
}
