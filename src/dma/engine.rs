//! CPPI 4.1 completion-queue engine
//!
//! Owns the queue manager and scheduler of one DMA block and turns queue
//! pending bits into per-endpoint completion notifications.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::layout::{CompletionLayout, CompletionMasks, LAYOUTS};
use super::schedule::Schedule;
use crate::config::{DmaConfig, TxChannel};
use crate::error::{OtgError, Result};
use crate::mmio::{Platform, RegionSpec, RegisterIo, SubWindow};
use crate::regs::*;
use crate::usbcore::{CompletionSink, Direction};

/// Interrupt name registered for the subsystem line
pub const DMA_IRQ_NAME: &str = "musb_dma";

pub struct DmaEngine {
    global: SubWindow,
    channels: SubWindow,
    sched_ctrl: SubWindow,
    sched_table: SubWindow,
    qmgr: SubWindow,
    usbss: Arc<dyn RegisterIo>,
    layout: CompletionLayout,
    tx_channels: Vec<TxChannel>,
    schedule: Schedule,
    controller_index: u8,
}

impl DmaEngine {
    /// Bring up the DMA block
    ///
    /// Must run before the controller interrupt is unmasked. Any mapping or
    /// registration failure aborts without retry.
    pub fn initialize(
        config: &DmaConfig,
        controller_index: u8,
        usbss: Arc<dyn RegisterIo>,
        platform: &dyn Platform,
    ) -> Result<Self> {
        config.validate()?;
        let layout = *LAYOUTS.get(controller_index as usize).ok_or_else(|| {
            OtgError::Config(format!("No completion layout for usb{}", controller_index))
        })?;
        let schedule = Schedule::interleaved(config.tx_channels.len())?;

        let window = platform.map_region(RegionSpec {
            name: "cppi41",
            base: config.base,
            len: config.len,
        })?;
        info!("CPPI 4.1 DMA window mapped at 0x{:x}", config.base);

        let engine = Self {
            global: SubWindow::new(window.clone(), CPPI_GLOBAL_CTRL_OFFSET),
            channels: SubWindow::new(window.clone(), CPPI_CH_CTRL_OFFSET),
            sched_ctrl: SubWindow::new(window.clone(), CPPI_SCHED_CTRL_OFFSET),
            sched_table: SubWindow::new(window.clone(), CPPI_SCHED_TABLE_OFFSET),
            qmgr: SubWindow::new(window, CPPI_QMGR_OFFSET),
            usbss,
            layout,
            tx_channels: config.tx_channels.clone(),
            schedule,
            controller_index,
        };

        // Linking RAM region 0 only
        engine
            .qmgr
            .write32(QMGR_LINKING_RAM_RGN0_BASE_REG, config.linking_ram_base);
        engine
            .qmgr
            .write32(QMGR_LINKING_RAM_RGN0_SIZE_REG, QMGR_LINKING_RAM_RGN0_SIZE);
        engine.global.write32(
            DMA_TEARDOWN_FDQ_REG,
            ((config.queue_manager as u32) << DMA_TEARDOWN_QMGR_SHIFT)
                | config.free_desc_queue_base as u32,
        );
        debug!(
            "Queue manager {} ready, free descriptor queue base {}",
            config.queue_manager, config.free_desc_queue_base
        );

        engine.program_schedule();

        platform.request_irq(config.irq_line, DMA_IRQ_NAME)?;
        info!("Registered CPPI DMA interrupt on line {}", config.irq_line);

        engine.usbss.write32(USBSS_IRQ_EOI, 0);
        engine
            .usbss
            .write32(USBSS_IRQ_ENABLE_SET, USBSS_INTR_PD_CMPL);

        Ok(engine)
    }

    pub fn layout(&self) -> &CompletionLayout {
        &self.layout
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn tx_channels(&self) -> &[TxChannel] {
        &self.tx_channels
    }

    /// Deliver every pending completion exactly once
    ///
    /// Reads the pending pair (which the queue manager clears as it is read),
    /// so a second call without new hardware activity delivers nothing.
    pub fn drain_completions(&mut self, sink: &mut dyn CompletionSink) -> CompletionMasks {
        let lo = self.qmgr.read32(self.layout.pend_lo_reg());
        let hi = self.qmgr.read32(self.layout.pend_hi_reg());
        let masks = self.layout.decode(lo, hi);

        debug!(
            "[{:08x}][{:08x}] tx={:04x} rx={:04x}",
            lo, hi, masks.tx, masks.rx
        );

        for ch in set_bits(masks.tx) {
            match self.tx_channels.get(ch) {
                Some(info) => sink.transfer_completed(info.port, Direction::Tx),
                None => debug!("Tx completion on unconfigured channel {}", ch),
            }
        }
        for ch in set_bits(masks.rx) {
            // Rx channel N always serves port N + 1
            sink.transfer_completed(ch as u8 + 1, Direction::Rx);
        }

        masks
    }

    /// Restrict the fairness table to the first `active` channel pairs
    ///
    /// Channels dropped from the table must be idle: an enabled channel is
    /// rejected rather than descheduled mid-transfer.
    pub fn reconfigure_schedule(&mut self, active: usize) -> Result<()> {
        if active == 0 || active > self.tx_channels.len() {
            return Err(OtgError::Config(format!(
                "Cannot schedule {} channel pairs, {} configured",
                active,
                self.tx_channels.len()
            )));
        }
        let schedule = Schedule::interleaved(active)?;

        for ch in active..self.schedule.pairs() {
            if self.channel_enabled(ch) {
                return Err(OtgError::Config(format!(
                    "Channel {} still enabled, cannot remove it from the schedule",
                    ch
                )));
            }
        }

        info!(
            "Fairness schedule: {} -> {} channel pairs",
            self.schedule.pairs(),
            active
        );
        self.schedule = schedule;
        self.program_schedule();
        Ok(())
    }

    /// Set the completion interrupt threshold of one endpoint
    pub fn set_threshold(&self, endpoint: u8, count: u8, direction: Direction) {
        let base = match (self.controller_index, direction) {
            (0, Direction::Tx) => USBSS_IRQ_DMA_THRESHOLD_TX0,
            (0, Direction::Rx) => USBSS_IRQ_DMA_THRESHOLD_RX0,
            (_, Direction::Tx) => USBSS_IRQ_DMA_THRESHOLD_TX1,
            (_, Direction::Rx) => USBSS_IRQ_DMA_THRESHOLD_RX1,
        };
        let offset = base + 4 * (endpoint as usize / 4);
        let shift = (endpoint as u32 % 4) * 8;
        let value = (self.usbss.read32(offset) & !(0xff << shift)) | ((count as u32) << shift);

        debug!(
            "threshold write (usb{}-{:?}): offset=0x{:x}, val=0x{:x}",
            self.controller_index, direction, offset, value
        );
        self.usbss.write32(offset, value);
    }

    /// Mask completion interrupts, stop the scheduler and disable all channels
    pub fn shutdown(&mut self) {
        self.usbss
            .write32(USBSS_IRQ_ENABLE_CLEAR, USBSS_INTR_PD_CMPL);
        self.sched_ctrl.write32(0, 0);
        for ch in 0..self.tx_channels.len() {
            let base = ch * DMA_CH_STRIDE;
            self.channels.write32(base + DMA_CH_TX_GLOBAL_CFG_REG, 0);
            self.channels.write32(base + DMA_CH_RX_GLOBAL_CFG_REG, 0);
        }
        info!("CPPI DMA stopped");
    }

    fn channel_enabled(&self, ch: usize) -> bool {
        let base = ch * DMA_CH_STRIDE;
        let tx = self.channels.read32(base + DMA_CH_TX_GLOBAL_CFG_REG);
        let rx = self.channels.read32(base + DMA_CH_RX_GLOBAL_CFG_REG);
        if (tx | rx) & DMA_CH_ENABLE != 0 {
            warn!("DMA channel {} enabled (tx 0x{:08x}, rx 0x{:08x})", ch, tx, rx);
            return true;
        }
        false
    }

    fn program_schedule(&self) {
        // Stop the scheduler while the table changes
        self.sched_ctrl.write32(0, 0);
        for (i, word) in self.schedule.words().iter().enumerate() {
            self.sched_table.write32(i * 4, *word);
        }
        self.sched_ctrl.write32(
            0,
            DMA_SCHED_ENABLE | (self.schedule.last_entry() & DMA_SCHED_LAST_ENTRY_MASK),
        );
    }
}

/// Indices of set bits, lowest first
fn set_bits(mask: u16) -> impl Iterator<Item = usize> {
    (0..16).filter(move |bit| mask & (1 << bit) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, FakeRegs, RecordingSink};

    const DMA_BASE: u64 = 0x4740_2000;

    struct Fixture {
        engine: DmaEngine,
        dma: FakeRegs,
        usbss: FakeRegs,
        platform: FakePlatform,
    }

    fn fixture(config: DmaConfig) -> Fixture {
        let dma = FakeRegs::new();
        let usbss = FakeRegs::new();
        let qmgr = CPPI_QMGR_OFFSET;
        dma.mark_clear_on_read(qmgr + 0x98);
        dma.mark_clear_on_read(qmgr + 0x9c);
        let platform = FakePlatform::default().with_region(DMA_BASE, dma.clone());
        let engine =
            DmaEngine::initialize(&config, 0, Arc::new(usbss.clone()), &platform).unwrap();
        Fixture {
            engine,
            dma,
            usbss,
            platform,
        }
    }

    fn pend(f: &Fixture, lo: u32, hi: u32) {
        f.dma.set(CPPI_QMGR_OFFSET + 0x98, lo);
        f.dma.set(CPPI_QMGR_OFFSET + 0x9c, hi);
    }

    #[test]
    fn test_initialize_programs_hardware() {
        let f = fixture(DmaConfig::default());

        assert_eq!(
            f.dma.get(CPPI_SCHED_TABLE_OFFSET),
            0x81018000,
            "first schedule word"
        );
        assert_eq!(f.dma.get(CPPI_SCHED_TABLE_OFFSET + 28), 0x00008e0e);
        assert_eq!(f.dma.get(CPPI_SCHED_CTRL_OFFSET), DMA_SCHED_ENABLE | 29);
        assert_eq!(
            f.dma.get(CPPI_QMGR_OFFSET + QMGR_LINKING_RAM_RGN0_SIZE_REG),
            0x3fff
        );
        assert_eq!(f.usbss.writes_to(USBSS_IRQ_EOI), vec![0]);
        assert_eq!(
            f.usbss.writes_to(USBSS_IRQ_ENABLE_SET),
            vec![USBSS_INTR_PD_CMPL]
        );
        assert_eq!(f.platform.irqs.lock()[0], (17, DMA_IRQ_NAME.to_string()));
    }

    #[test]
    fn test_initialize_fails_when_unmappable() {
        let platform = FakePlatform::default();
        let result = DmaEngine::initialize(
            &DmaConfig::default(),
            0,
            Arc::new(FakeRegs::new()),
            &platform,
        );
        assert!(matches!(result, Err(OtgError::Init(_))));
    }

    #[test]
    fn test_initialize_fails_when_irq_busy() {
        let platform = FakePlatform {
            fail_irq: true,
            ..Default::default()
        }
        .with_region(DMA_BASE, FakeRegs::new());
        let result = DmaEngine::initialize(
            &DmaConfig::default(),
            0,
            Arc::new(FakeRegs::new()),
            &platform,
        );
        assert!(matches!(result, Err(OtgError::Init(_))));
    }

    #[test]
    fn test_drain_delivers_once() {
        let mut f = fixture(DmaConfig::default());
        let mut sink = RecordingSink::default();

        // Tx queue 93 (channel 0), Tx queue 96 (channel 3), Rx queue 109 (channel 0)
        pend(&f, 1 << 29, (1 << 0) | (1 << 13));
        let masks = f.engine.drain_completions(&mut sink);
        assert_eq!(masks.tx, 0b1001);
        assert_eq!(masks.rx, 0b1);
        assert_eq!(
            *sink.completions.lock(),
            vec![(1, Direction::Tx), (4, Direction::Tx), (1, Direction::Rx)]
        );

        let masks = f.engine.drain_completions(&mut sink);
        assert!(masks.is_empty());
        assert_eq!(sink.completions.lock().len(), 3);
    }

    #[test]
    fn test_drain_uses_channel_port_table() {
        let mut config = DmaConfig::default();
        config.tx_channels.truncate(2);
        config.tx_channels[1].port = 7;
        let mut f = fixture(config);
        let mut sink = RecordingSink::default();

        // Channels 1 and 2; channel 2 is not configured
        pend(&f, 0b11 << 30, 0);
        f.engine.drain_completions(&mut sink);
        assert_eq!(*sink.completions.lock(), vec![(7, Direction::Tx)]);
    }

    #[test]
    fn test_reconfigure_schedule_to_eight_pairs() {
        let mut f = fixture(DmaConfig::default());
        f.engine.reconfigure_schedule(8).unwrap();

        let schedule = f.engine.schedule();
        assert_eq!(schedule.pairs(), 8);
        assert!((0..8).all(|ch| schedule.contains(ch)));
        assert!((8..15).all(|ch| !schedule.contains(ch)));

        assert_eq!(f.dma.get(CPPI_SCHED_TABLE_OFFSET + 12), 0x87078606);
        assert_eq!(f.dma.get(CPPI_SCHED_TABLE_OFFSET + 16), 0);
        assert_eq!(f.dma.get(CPPI_SCHED_CTRL_OFFSET), DMA_SCHED_ENABLE | 15);
    }

    #[test]
    fn test_reconfigure_rejects_bad_counts() {
        let mut f = fixture(DmaConfig::default());
        assert!(matches!(
            f.engine.reconfigure_schedule(0),
            Err(OtgError::Config(_))
        ));
        assert!(matches!(
            f.engine.reconfigure_schedule(16),
            Err(OtgError::Config(_))
        ));
        assert_eq!(f.engine.schedule().pairs(), 15);
    }

    #[test]
    fn test_reconfigure_rejects_busy_channel() {
        let mut f = fixture(DmaConfig::default());
        f.dma.set(
            CPPI_CH_CTRL_OFFSET + 10 * DMA_CH_STRIDE + DMA_CH_RX_GLOBAL_CFG_REG,
            DMA_CH_ENABLE,
        );
        assert!(f.engine.reconfigure_schedule(8).is_err());
        assert!(f.engine.reconfigure_schedule(11).is_ok());
    }

    #[test]
    fn test_set_threshold() {
        let f = fixture(DmaConfig::default());
        f.usbss.set(USBSS_IRQ_DMA_THRESHOLD_RX0 + 4, 0x0000_ff00);
        f.engine.set_threshold(5, 0x10, Direction::Rx);
        assert_eq!(f.usbss.get(USBSS_IRQ_DMA_THRESHOLD_RX0 + 4), 0x0000_1000);
    }

    #[test]
    fn test_shutdown_stops_scheduler() {
        let mut f = fixture(DmaConfig::default());
        f.engine.shutdown();
        assert_eq!(f.dma.get(CPPI_SCHED_CTRL_OFFSET), 0);
        assert_eq!(
            f.usbss.writes_to(USBSS_IRQ_ENABLE_CLEAR),
            vec![USBSS_INTR_PD_CMPL]
        );
    }
}
