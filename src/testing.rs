//! In-memory register bank and collaborators for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::GlueConfig;
use crate::controller::{Collaborators, Controller};
use crate::error::{OtgError, Result};
use crate::mmio::{Platform, RegionSpec, RegisterIo};
use crate::regs::*;
use crate::usbcore::{CompletionSink, CoreEvents, Direction, PhyPower, PortMode, UsbCore};

#[derive(Default)]
struct FakeState {
    values: HashMap<usize, u32>,
    /// Write-one-to-clear status registers
    w1c: HashSet<usize>,
    /// Registers that return their value and clear on read
    clear_on_read: HashSet<usize>,
    /// Value returned by reads instead of the stored one
    read_overrides: HashMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    reads: Vec<usize>,
}

/// Register bank recording every access
#[derive(Clone, Default)]
pub struct FakeRegs {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRegs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a value without recording a write
    pub fn set(&self, offset: usize, value: u32) {
        self.state.lock().values.insert(offset, value);
    }

    pub fn get(&self, offset: usize) -> u32 {
        self.state.lock().values.get(&offset).copied().unwrap_or(0)
    }

    pub fn mark_w1c(&self, offset: usize) {
        self.state.lock().w1c.insert(offset);
    }

    pub fn mark_clear_on_read(&self, offset: usize) {
        self.state.lock().clear_on_read.insert(offset);
    }

    /// Make hardware reads of `offset` return `value` regardless of writes
    pub fn override_read(&self, offset: usize, value: u32) {
        self.state.lock().read_overrides.insert(offset, value);
    }

    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn reads_of(&self, offset: usize) -> usize {
        self.state.lock().reads.iter().filter(|o| **o == offset).count()
    }

    pub fn access_count(&self) -> usize {
        let state = self.state.lock();
        state.reads.len() + state.writes.len()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.reads.clear();
        state.writes.clear();
    }
}

impl RegisterIo for FakeRegs {
    fn read32(&self, offset: usize) -> u32 {
        let mut state = self.state.lock();
        state.reads.push(offset);
        if let Some(v) = state.read_overrides.get(&offset) {
            return *v;
        }
        let value = state.values.get(&offset).copied().unwrap_or(0);
        if state.clear_on_read.contains(&offset) {
            state.values.insert(offset, 0);
        }
        value
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        state.writes.push((offset, value));
        if state.w1c.contains(&offset) {
            let current = state.values.get(&offset).copied().unwrap_or(0);
            state.values.insert(offset, current & !value);
        } else {
            state.values.insert(offset, value);
        }
    }
}

/// Platform handing out preconfigured fake windows keyed by base address
#[derive(Default)]
pub struct FakePlatform {
    pub regions: HashMap<u64, FakeRegs>,
    pub irqs: Mutex<Vec<(u32, String)>>,
    pub fail_irq: bool,
}

impl FakePlatform {
    pub fn with_region(mut self, base: u64, regs: FakeRegs) -> Self {
        self.regions.insert(base, regs);
        self
    }
}

impl Platform for FakePlatform {
    fn map_region(&self, region: RegionSpec) -> Result<Arc<dyn RegisterIo>> {
        self.regions
            .get(&region.base)
            .cloned()
            .map(|r| Arc::new(r) as Arc<dyn RegisterIo>)
            .ok_or_else(|| OtgError::Init(format!("cannot map {} at 0x{:x}", region.name, region.base)))
    }

    fn request_irq(&self, line: u32, name: &str) -> Result<()> {
        if self.fail_irq {
            return Err(OtgError::Init(format!("irq {} busy", line)));
        }
        self.irqs.lock().push((line, name.to_string()));
        Ok(())
    }
}

/// USB core stand-in recording notifications
#[derive(Clone, Default)]
pub struct RecordingCore {
    pub events: Arc<Mutex<Vec<CoreEvents>>>,
    pub modes: Arc<Mutex<Vec<PortMode>>>,
}

impl UsbCore for RecordingCore {
    fn interrupt(&mut self, events: &CoreEvents) -> bool {
        self.events.lock().push(*events);
        true
    }

    fn port_mode_changed(&mut self, mode: PortMode) {
        self.modes.lock().push(mode);
    }
}

/// DMA consumer stand-in recording completions
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub completions: Arc<Mutex<Vec<(u8, Direction)>>>,
}

impl CompletionSink for RecordingSink {
    fn transfer_completed(&mut self, endpoint: u8, direction: Direction) {
        self.completions.lock().push((endpoint, direction));
    }
}

#[derive(Clone, Default)]
pub struct RecordingPhy {
    pub log: Arc<Mutex<Vec<bool>>>,
}

impl PhyPower for RecordingPhy {
    fn power_up(&mut self) {
        self.log.lock().push(true);
    }

    fn power_down(&mut self) {
        self.log.lock().push(false);
    }
}

/// One attached controller worth of fake hardware and collaborators
pub struct Rig {
    pub ctrl: FakeRegs,
    pub usbss: FakeRegs,
    pub dma: FakeRegs,
    pub core: RecordingCore,
    pub sink: RecordingSink,
    pub phy: RecordingPhy,
}

impl Rig {
    pub fn new() -> Self {
        let ctrl = FakeRegs::new();
        ctrl.set(USB_REVISION_REG, 0x4ea2_0800);
        // soft reset completes immediately
        ctrl.override_read(USB_CTRL_REG, 0);
        ctrl.mark_w1c(USB_EP_INTR_STATUS_REG);
        ctrl.mark_w1c(USB_CORE_INTR_STATUS_REG);

        let usbss = FakeRegs::new();
        usbss.mark_w1c(USBSS_IRQ_STATUS);

        let dma = FakeRegs::new();
        dma.mark_clear_on_read(CPPI_QMGR_OFFSET + 0x98);
        dma.mark_clear_on_read(CPPI_QMGR_OFFSET + 0x9c);

        Self {
            ctrl,
            usbss,
            dma,
            core: RecordingCore::default(),
            sink: RecordingSink::default(),
            phy: RecordingPhy::default(),
        }
    }

    pub fn platform(&self, config: &GlueConfig) -> FakePlatform {
        let mut platform = FakePlatform::default()
            .with_region(config.controller.ctrl_base, self.ctrl.clone())
            .with_region(config.controller.usbss_base, self.usbss.clone());
        if let Some(dma) = &config.dma {
            platform = platform.with_region(dma.base, self.dma.clone());
        }
        platform
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            core: Box::new(self.core.clone()),
            sink: Box::new(self.sink.clone()),
            phy: Box::new(self.phy.clone()),
        }
    }

    pub fn attach(&self, config: GlueConfig) -> Controller {
        let platform = self.platform(&config);
        Controller::attach(config, &platform, self.collaborators()).unwrap()
    }

    /// Latch pending status in the three interrupt status registers
    pub fn raise(&self, ep: u32, core: u32, dma: u32) {
        self.ctrl.set(USB_EP_INTR_STATUS_REG, ep);
        self.ctrl.set(USB_CORE_INTR_STATUS_REG, core);
        self.usbss.set(USBSS_IRQ_STATUS, dma);
    }
}
