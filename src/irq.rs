//! Interrupt dispatch
//!
//! One call per hardware interrupt, under the controller lock:
//!
//! ```text
//!   EP status ──┐
//!   core status ├─► snapshot + ack ─► VBUS ─► UsbCore ─► DMA drain ─► EOI
//!   USBSS status┘
//! ```
//!
//! Status registers are write-one-to-clear; each snapshot is written back
//! before anything else looks at it, so an event raised while we run is
//! seen by the next dispatch instead of being lost.

use std::time::Instant;

use serde::Serialize;

use crate::controller::Controller;
use crate::debug_throttled;
use crate::otg::OtgState;
use crate::regs::*;
use crate::usbcore::CoreEvents;

/// What one dispatch observed and did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IrqOutcome {
    /// Decoded endpoint and core sources (after VBUS handling)
    pub events: CoreEvents,
    /// Raw subsystem status snapshot
    pub dma_status: u32,
    /// Completions delivered to the DMA consumers
    pub completions: u32,
    /// Some collaborator or the state machine consumed the interrupt
    pub handled: bool,
    /// Nothing was pending
    pub spurious: bool,
}

impl Controller {
    /// Service one controller interrupt
    ///
    /// A detached controller returns an empty outcome without touching any
    /// register. Otherwise the core EOI is written exactly once.
    pub fn dispatch_interrupt(&mut self, now: Instant) -> IrqOutcome {
        let mut outcome = IrqOutcome::default();
        if self.state == OtgState::Inactive {
            return outcome;
        }

        let epintr = self.regs.ctrl_read32(USB_EP_INTR_STATUS_REG);
        if epintr != 0 {
            self.regs.ctrl_write32(USB_EP_INTR_STATUS_REG, epintr);
            outcome.events.rx = ((epintr & USB_RX_INTR_MASK) >> USB_INTR_RX_SHIFT) as u16;
            outcome.events.tx = ((epintr & USB_TX_INTR_MASK) >> USB_INTR_TX_SHIFT) as u16;
        }

        let usbintr = self.regs.ctrl_read32(USB_CORE_INTR_STATUS_REG);
        if usbintr != 0 {
            self.regs.ctrl_write32(USB_CORE_INTR_STATUS_REG, usbintr);
            outcome.events.usb = ((usbintr & USB_INTR_USB_MASK) >> USB_INTR_USB_SHIFT) as u16;
        }

        if self.dma.is_some() {
            let status = self.usbss.read32(USBSS_IRQ_STATUS);
            if status != 0 {
                self.usbss.write32(USBSS_IRQ_STATUS, status);
            }
            outcome.dma_status = status;
        }
        let dma_pending = outcome.dma_status & USBSS_INTR_DMA_MASK != 0;

        if epintr == 0 && usbintr == 0 && !dma_pending {
            outcome.spurious = true;
            debug_throttled!(self.throttle, "spurious_irq", "Spurious interrupt, nothing pending");
        } else {
            if usbintr & (USB_INTR_DRVVBUS << USB_INTR_USB_SHIFT) != 0 {
                self.handle_vbus_interrupt(&mut outcome.events, now);
                outcome.handled = true;
            }

            if outcome.events.tx != 0 || outcome.events.rx != 0 || outcome.events.usb != 0 {
                outcome.handled |= self.core.interrupt(&outcome.events);
            }

            if dma_pending {
                if let Some(dma) = self.dma.as_mut() {
                    let masks = dma.drain_completions(self.sink.as_mut());
                    outcome.completions = masks.count();
                }
                outcome.handled = true;
            }
        }

        // an acknowledged subsystem status always re-arms its line
        if outcome.dma_status != 0 {
            self.usbss.write32(USBSS_IRQ_EOI, 0);
        }
        self.regs.ctrl_write32(USB_IRQ_EOI, 0);

        // ID pin changes are not reported by the wrapper; keep polling
        if self.role().otg_enabled() && self.state == OtgState::BIdle {
            self.timer.arm(now, self.config.poll_interval());
        }

        outcome
    }
}
