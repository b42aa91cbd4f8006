//! OTG transitions driven by VBUS interrupts and the poll timer
//!
//! The TI wrapper reports neither ID pin changes nor VBUS validity directly,
//! so both are polled through DEVCTL:
//!
//! ```text
//!   B_IDLE ──poll, !BDEVICE──► A_IDLE
//!     ▲
//!     │ poll, BDEVICE                  VBUS irq, VBUS error
//!     │                       ┌──────────────────────────────┐
//!   A_WAIT_BCON ◄──VBUS ok── A_WAIT_VRISE ◄──poll, VBUS low── A_WAIT_VFALL
//!     │ poll, !BDEVICE
//!     ▼
//!   A_IDLE
//! ```
//!
//! The VBUS debounce in `A_WAIT_VFALL` and ID polling in `B_IDLE` share the
//! poll interval.

use std::time::Instant;

use tracing::debug;

use super::state::OtgState;
use crate::controller::Controller;
use crate::events::OtgEvent;
use crate::regs::*;
use crate::usbcore::{CoreEvents, PortMode};
use crate::warn_throttled;

impl Controller {
    /// Handle a DRVVBUS change reported by the core interrupt status
    ///
    /// A VBUS error is consumed here and removed from `events` before the
    /// USB core sees them.
    pub(crate) fn handle_vbus_interrupt(&mut self, events: &mut CoreEvents, now: Instant) {
        let drvvbus = self.regs.ctrl_read32(USB_STAT_REG) & USB_STAT_DRVVBUS != 0;
        let devctl = self.regs.read8(MUSB_DEVCTL);
        let host = self.role().host_enabled();
        let vbus_error = u32::from(events.usb) & MUSB_INTR_VBUSERROR != 0;

        if host && vbus_error {
            // Over-current on our own VBUS; give it time to discharge
            // before trying again
            events.usb &= !(MUSB_INTR_VBUSERROR as u16);
            self.set_state(OtgState::AWaitVfall);
            self.timer.arm(now, self.config.poll_interval());
            warn_throttled!(
                self.throttle,
                "vbus_error",
                "VBUS error workaround (delay coming), devctl {:02x}",
                devctl
            );
            self.publish(OtgEvent::VbusError { devctl });
        } else if host && drvvbus {
            match self.state {
                OtgState::AWaitVrise => {
                    self.regs.ctrl_write32(
                        USB_CORE_INTR_CLEAR_REG,
                        MUSB_INTR_VBUSERROR << USB_INTR_USB_SHIFT,
                    );
                    self.set_state(OtgState::AWaitBcon);
                    self.arm_bcon_timeout(now);
                }
                OtgState::AWaitBcon => {}
                _ => {
                    self.is_active = true;
                    self.default_a = true;
                    self.set_hw_mode(PortMode::Host);
                    self.set_state(OtgState::AWaitVrise);
                    self.timer.disarm();
                }
            }
        } else {
            self.is_active = false;
            self.default_a = false;
            self.set_hw_mode(PortMode::Peripheral);
            self.set_state(OtgState::BIdle);
        }

        self.source_power(drvvbus);
        debug!(
            "VBUS {} ({}){}, devctl {:02x}",
            if drvvbus { "on" } else { "off" },
            self.state,
            if vbus_error { " [VBUS error]" } else { "" },
            devctl
        );
    }

    /// Poll timer expiry
    ///
    /// Returns whether the timer had actually expired. A stale fire (after
    /// disarm, re-arm or detach) touches no register.
    pub fn poll_timer_fired(&mut self, now: Instant) -> bool {
        if self.state == OtgState::Inactive || !self.timer.take_expired(now) {
            return false;
        }

        let devctl = self.regs.read8(MUSB_DEVCTL);
        debug!("Poll devctl {:02x} ({})", devctl, self.state);

        match self.state {
            OtgState::AWaitBcon => {
                self.regs.write8(MUSB_DEVCTL, devctl & !MUSB_DEVCTL_SESSION);
                let devctl = self.regs.read8(MUSB_DEVCTL);
                self.is_active = false;
                if devctl & MUSB_DEVCTL_BDEVICE != 0 {
                    self.set_hw_mode(PortMode::Peripheral);
                    self.set_state(OtgState::BIdle);
                    if self.role().otg_enabled() {
                        self.timer.arm(now, self.config.poll_interval());
                    }
                } else {
                    self.set_hw_mode(PortMode::Host);
                    self.set_state(OtgState::AIdle);
                }
            }
            OtgState::AWaitVfall => {
                // Wait till VBUS falls below session end (~0.2 V)
                if devctl & MUSB_DEVCTL_VBUS != 0 {
                    self.timer.arm(now, self.config.poll_interval());
                    warn_throttled!(
                        self.throttle,
                        "vbus_vfall",
                        "VBUS still above session end, devctl {:02x}",
                        devctl
                    );
                } else {
                    self.throttle.clear("vbus_vfall");
                    self.set_state(OtgState::AWaitVrise);
                    self.regs.ctrl_write32(
                        USB_CORE_INTR_SET_REG,
                        MUSB_INTR_VBUSERROR << USB_INTR_USB_SHIFT,
                    );
                }
            }
            OtgState::BIdle => {
                if self.role().peripheral_enabled() {
                    let devctl = self.regs.read8(MUSB_DEVCTL);
                    if devctl & MUSB_DEVCTL_BDEVICE != 0 {
                        self.timer.arm(now, self.config.poll_interval());
                    } else {
                        self.set_state(OtgState::AIdle);
                    }
                }
            }
            _ => {}
        }
        true
    }

    fn arm_bcon_timeout(&mut self, now: Instant) {
        if let Some(timeout) = self.config.a_wait_bcon() {
            self.timer.arm(now, timeout);
        }
    }
}
