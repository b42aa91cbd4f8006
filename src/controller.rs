//! Per-controller context
//!
//! Architecture:
//! ```text
//!                 ┌──────────────────────────────────┐
//!                 │      ControllerHandle (Arc)      │
//!                 │  ┌────────────────────────────┐  │
//!   irq task ───► │  │ Mutex<Controller>          │  │ ◄─── poll timer task
//!                 │  │  RegisterShim  OtgState    │  │
//!  attach/detach ►│  │  DmaEngine     PollTimer   │  │
//!                 │  └────────────────────────────┘  │
//!                 └──────────────────────────────────┘
//!                        │            │          │
//!                     UsbCore  CompletionSink  PhyPower
//! ```
//!
//! Every context that touches the hardware (interrupt dispatch, poll timer,
//! attach/detach, mode requests) goes through the one lock, and nothing
//! under it sleeps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::{GlueConfig, PortRole};
use crate::dma::DmaEngine;
use crate::error::{OtgError, Result};
use crate::events::{EventBus, OtgEvent};
use crate::mmio::{Platform, RegionSpec, RegisterIo};
use crate::otg::{OtgState, OtgStatus, PollTimer};
use crate::regs::*;
use crate::shim::RegisterShim;
use crate::usbcore::{CompletionSink, Direction, PhyPower, PortMode, UsbCore};
use crate::utils::LogThrottler;

/// Upper bound on CTRL reads while waiting for the soft reset to self-clear
const SOFT_RESET_POLLS: u32 = 10_000;

/// Default delay for an idle request without explicit timeout
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(3);

/// Outside parties the controller reports to
pub struct Collaborators {
    pub core: Box<dyn UsbCore>,
    pub sink: Box<dyn CompletionSink>,
    pub phy: Box<dyn PhyPower>,
}

pub struct Controller {
    pub(crate) config: GlueConfig,
    pub(crate) regs: RegisterShim,
    pub(crate) usbss: Arc<dyn RegisterIo>,
    pub(crate) dma: Option<DmaEngine>,
    pub(crate) state: OtgState,
    pub(crate) mode: PortMode,
    /// Host session in progress
    pub(crate) is_active: bool,
    /// Port came up as A-device (we drive VBUS)
    pub(crate) default_a: bool,
    pub(crate) vbus_on: Option<bool>,
    pub(crate) timer: PollTimer,
    pub(crate) core: Box<dyn UsbCore>,
    pub(crate) sink: Box<dyn CompletionSink>,
    phy: Box<dyn PhyPower>,
    events: Option<Arc<EventBus>>,
    pub(crate) throttle: LogThrottler,
}

impl Controller {
    /// Bring up one controller
    ///
    /// On error nothing usable is left behind: the PHY is powered back down
    /// and the mapped windows are released.
    pub fn attach(config: GlueConfig, platform: &dyn Platform, collab: Collaborators) -> Result<Self> {
        config.validate()?;
        let regions = config.controller.clone();

        let ctrl = platform.map_region(RegionSpec {
            name: "musb_ctrl",
            base: regions.ctrl_base,
            len: regions.ctrl_len,
        })?;
        let usbss = platform.map_region(RegionSpec {
            name: "usbss",
            base: regions.usbss_base,
            len: regions.usbss_len,
        })?;

        let mut regs = RegisterShim::new(ctrl);
        regs.reset_shadow();

        let revision = regs.ctrl_read32(USB_REVISION_REG);
        if revision == 0 {
            return Err(OtgError::Init(format!(
                "usb{} revision reads 0, controller not clocked",
                regions.index
            )));
        }

        regs.ctrl_write32(USB_CTRL_REG, USB_SOFT_RESET_MASK);
        if !wait_soft_reset(&regs) {
            return Err(OtgError::Init(format!("usb{} soft reset did not complete", regions.index)));
        }
        info!("MUSB{} controller revision {:08x}", regions.index, revision);

        let Collaborators { core, sink, mut phy } = collab;
        phy.power_up();

        usbss.write32(USBSS_IRQ_EOI, 0);
        let pending = usbss.read32(USBSS_IRQ_STATUS);
        if pending != 0 {
            usbss.write32(USBSS_IRQ_STATUS, pending);
        }

        let dma = match &config.dma {
            Some(dma_config) => {
                match DmaEngine::initialize(dma_config, regions.index, usbss.clone(), platform) {
                    Ok(engine) => Some(engine),
                    Err(e) => {
                        phy.power_down();
                        return Err(e);
                    }
                }
            }
            None => {
                info!("usb{}: DMA disabled, PIO only", regions.index);
                None
            }
        };

        let mode = if config.role.host_enabled() {
            regs.ctrl_write32(USB_MODE_REG, USB_MODE_HOST);
            PortMode::Host
        } else {
            regs.ctrl_write32(USB_MODE_REG, USB_MODE_PERIPHERAL);
            PortMode::Peripheral
        };

        regs.ctrl_write32(USB_IRQ_EOI, 0);
        usbss.write32(USBSS_IRQ_EOI, 0);

        let state = OtgState::initial(config.role);
        info!("usb{} attached: role {:?}, state {}, mode {:?}", regions.index, config.role, state, mode);

        let mut controller = Self {
            config,
            regs,
            usbss,
            dma,
            state,
            mode,
            is_active: false,
            default_a: false,
            vbus_on: None,
            timer: PollTimer::new(),
            core,
            sink,
            phy,
            events: None,
            throttle: LogThrottler::default(),
        };
        controller.source_power(false);
        Ok(controller)
    }

    /// Publish state changes on `bus`
    pub fn set_event_bus(&mut self, bus: Arc<EventBus>) {
        self.events = Some(bus);
    }

    pub fn config(&self) -> &GlueConfig {
        &self.config
    }

    pub fn state(&self) -> OtgState {
        self.state
    }

    pub fn mode(&self) -> PortMode {
        self.mode
    }

    pub fn timer(&self) -> &PollTimer {
        &self.timer
    }

    pub fn dma(&self) -> Option<&DmaEngine> {
        self.dma.as_ref()
    }

    pub fn status(&self) -> OtgStatus {
        OtgStatus {
            state: self.state,
            mode: self.mode,
            role: self.config.role,
            active: self.is_active,
            vbus_on: self.vbus_on,
            poll_pending: self.timer.is_pending(),
        }
    }

    /// Unmask endpoint and core interrupts
    pub fn enable_interrupts(&mut self) {
        if self.state == OtgState::Inactive {
            return;
        }
        let epmask = USB_TX_INTR_MASK | USB_RX_INTR_MASK;
        let coremask = (USB_INTR_USB_MASK & !MUSB_INTR_SOF) << USB_INTR_USB_SHIFT;

        self.regs.ctrl_write32(USB_EP_INTR_SET_REG, epmask);
        self.regs.ctrl_write32(USB_CORE_INTR_SET_REG, coremask);

        // a DRVVBUS interrupt starts ID polling
        if self.config.role.otg_enabled() {
            self.regs
                .ctrl_write32(USB_CORE_INTR_SET_REG, USB_INTR_DRVVBUS << USB_INTR_USB_SHIFT);
        }
        debug!("Interrupts enabled: ep 0x{:08x}, core 0x{:08x}", epmask, coremask);
    }

    /// Mask everything and end the session
    pub fn disable_interrupts(&mut self) {
        if self.state == OtgState::Inactive {
            return;
        }
        self.regs.ctrl_write32(USB_CORE_INTR_CLEAR_REG, USB_INTR_USB_MASK);
        self.regs
            .ctrl_write32(USB_EP_INTR_CLEAR_REG, USB_TX_INTR_MASK | USB_RX_INTR_MASK);
        self.regs.write8(MUSB_DEVCTL, 0);
        self.regs.ctrl_write32(USB_IRQ_EOI, 0);
        debug!("Interrupts disabled");
    }

    /// Switch the port between host and peripheral operation
    ///
    /// Rejected without touching the hardware while a session is being
    /// negotiated, or when the configured role excludes `mode`.
    pub fn set_port_mode(&mut self, mode: PortMode) -> Result<()> {
        if self.state == OtgState::Inactive {
            return Err(OtgError::Inactive);
        }
        if self.is_active || self.state.in_session() {
            return Err(OtgError::SessionActive(self.state));
        }
        let allowed = match mode {
            PortMode::Host => self.config.role.host_enabled(),
            PortMode::Peripheral => self.config.role.peripheral_enabled(),
        };
        if !allowed {
            return Err(OtgError::Unsupported(format!(
                "{:?} mode with role {:?}",
                mode, self.config.role
            )));
        }

        let value = match mode {
            PortMode::Host => USB_MODE_HOST,
            PortMode::Peripheral => USB_MODE_PERIPHERAL,
        };
        self.regs.ctrl_write32(USB_MODE_REG, value);
        info!("Port mode set to {:?}", mode);
        self.set_hw_mode(mode);
        Ok(())
    }

    /// Ask for a poll `timeout` from now (3 ms by default)
    ///
    /// Only dual-role ports poll. An active session, or `A_WAIT_BCON`
    /// without connect timeout, cancels polling instead; an already pending
    /// later deadline is kept.
    pub fn try_idle(&mut self, now: Instant, timeout: Option<Duration>) {
        if self.state == OtgState::Inactive || !self.config.role.otg_enabled() {
            return;
        }
        if self.is_active || (self.config.a_wait_bcon().is_none() && self.state == OtgState::AWaitBcon) {
            debug!("{} active, deleting poll timer", self.state);
            self.timer.disarm();
            return;
        }

        let deadline = now + timeout.unwrap_or(DEFAULT_IDLE_DELAY);
        if let Some(pending) = self.timer.deadline() {
            if pending > deadline {
                debug!("Longer idle timer already pending, ignoring");
                return;
            }
        }
        debug!(
            "{} inactive, polling in {:?}",
            self.state,
            deadline.saturating_duration_since(now)
        );
        self.timer.arm(now, deadline - now);
    }

    /// Completion interrupt threshold for one endpoint
    pub fn set_dma_threshold(&self, endpoint: u8, count: u8, direction: Direction) -> Result<()> {
        if self.state == OtgState::Inactive {
            return Err(OtgError::Inactive);
        }
        let dma = self
            .dma
            .as_ref()
            .ok_or_else(|| OtgError::Unsupported("DMA not configured".to_string()))?;
        dma.set_threshold(endpoint, count, direction);
        Ok(())
    }

    /// Limit the DMA scheduler to the first `active` channel pairs
    pub fn reconfigure_dma_schedule(&mut self, active: usize) -> Result<()> {
        if self.state == OtgState::Inactive {
            return Err(OtgError::Inactive);
        }
        let dma = self
            .dma
            .as_mut()
            .ok_or_else(|| OtgError::Unsupported("DMA not configured".to_string()))?;
        dma.reconfigure_schedule(active)
    }

    /// Tear the controller down; afterwards every entry point is a no-op
    pub fn detach(&mut self) {
        if self.state == OtgState::Inactive {
            return;
        }
        self.timer.disarm();
        self.disable_interrupts();
        self.source_power(false);

        if self.config.role.host_enabled() && self.default_a {
            let devctl = self.regs.read8(MUSB_DEVCTL);
            if devctl & MUSB_DEVCTL_VBUS != 0 {
                warn!(
                    "VBUS {} still present after power off, another host may be driving it (devctl {:02x})",
                    (devctl & MUSB_DEVCTL_VBUS) >> MUSB_DEVCTL_VBUS_SHIFT,
                    devctl
                );
            }
        }

        self.phy.power_down();
        if let Some(dma) = self.dma.as_mut() {
            dma.shutdown();
        }

        self.is_active = false;
        self.set_state(OtgState::Inactive);
        self.publish(OtgEvent::Detached { status: self.status() });
        info!("usb{} detached", self.config.controller.index);
    }

    pub(crate) fn set_state(&mut self, next: OtgState) {
        if next == self.state {
            return;
        }
        debug!("OTG state {} -> {}", self.state, next);
        let from = std::mem::replace(&mut self.state, next);
        self.publish(OtgEvent::StateChanged { from, to: next });
    }

    /// Record the hardware's operating mode and tell the core
    pub(crate) fn set_hw_mode(&mut self, mode: PortMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.core.port_mode_changed(mode);
        self.publish(OtgEvent::ModeChanged { mode });
    }

    /// Track the VBUS source request; only changes are logged
    pub(crate) fn source_power(&mut self, on: bool) {
        if self.vbus_on == Some(on) {
            return;
        }
        self.vbus_on = Some(on);
        debug!("VBUS source power {}", if on { "on" } else { "off" });
    }

    pub(crate) fn publish(&self, event: OtgEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    pub(crate) fn role(&self) -> PortRole {
        self.config.role
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.state != OtgState::Inactive {
            self.detach();
        }
    }
}

fn wait_soft_reset(regs: &RegisterShim) -> bool {
    for _ in 0..SOFT_RESET_POLLS {
        if regs.ctrl_read32(USB_CTRL_REG) & USB_SOFT_RESET_MASK == 0 {
            return true;
        }
        std::hint::spin_loop();
    }
    false
}

/// Shared handle to one controller
///
/// Cloned into each context; there is no global controller instance.
#[derive(Clone)]
pub struct ControllerHandle {
    inner: Arc<Mutex<Controller>>,
    poll_wake: Arc<Notify>,
}

impl ControllerHandle {
    pub fn new(controller: Controller) -> Self {
        let poll_wake = controller.timer.waker();
        Self {
            inner: Arc::new(Mutex::new(controller)),
            poll_wake,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Controller> {
        self.inner.lock()
    }

    /// Notified whenever the poll timer is armed or disarmed
    pub fn poll_waker(&self) -> Arc<Notify> {
        self.poll_wake.clone()
    }

    pub fn status(&self) -> OtgStatus {
        self.lock().status()
    }

    pub fn detach(&self) {
        self.lock().detach()
    }
}
