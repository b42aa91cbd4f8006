//! Register map of the TI816x / AM35x USB subsystem
//!
//! Offsets are grouped by register window. The control window holds the TI
//! wrapper registers followed by the Mentor core at [`MENTOR_CORE_OFFSET`];
//! the subsystem window is shared by both controllers and the CPPI 4.1 DMA.

// ============================================================================
// Control window (per controller)
// ============================================================================

pub const USB_REVISION_REG: usize = 0x00;
pub const USB_CTRL_REG: usize = 0x14;
pub const USB_STAT_REG: usize = 0x18;
pub const USB_IRQ_EOI: usize = 0x24;
pub const USB_EP_INTR_STATUS_REG: usize = 0x30;
pub const USB_CORE_INTR_STATUS_REG: usize = 0x34;
pub const USB_EP_INTR_SET_REG: usize = 0x38;
pub const USB_CORE_INTR_SET_REG: usize = 0x3c;
pub const USB_EP_INTR_CLEAR_REG: usize = 0x40;
pub const USB_CORE_INTR_CLEAR_REG: usize = 0x44;
pub const USB_MODE_REG: usize = 0xe8;

pub const USB_SOFT_RESET_MASK: u32 = 0x1;
/// DRVVBUS level in `USB_STAT_REG`
pub const USB_STAT_DRVVBUS: u32 = 0x1;

pub const USB_MODE_HOST: u32 = 0x0;
pub const USB_MODE_PERIPHERAL: u32 = 0x8;

/// Endpoint status: EP0 + 15 Tx endpoints in the low half, 15 Rx endpoints in the high half
pub const USB_INTR_TX_SHIFT: u32 = 0;
pub const USB_INTR_RX_SHIFT: u32 = 16;
pub const USB_TX_EP_MASK: u32 = 0xffff;
pub const USB_RX_EP_MASK: u32 = 0xfffe;
pub const USB_TX_INTR_MASK: u32 = USB_TX_EP_MASK << USB_INTR_TX_SHIFT;
pub const USB_RX_INTR_MASK: u32 = USB_RX_EP_MASK << USB_INTR_RX_SHIFT;

/// Core status: Mentor INTRUSB bits plus DRVVBUS
pub const USB_INTR_USB_SHIFT: u32 = 0;
pub const USB_INTR_USB_MASK: u32 = 0x1ff << USB_INTR_USB_SHIFT;
pub const USB_INTR_DRVVBUS: u32 = 0x100;

/// Mentor core offset inside the control window
pub const MENTOR_CORE_OFFSET: usize = 0x400;

// ============================================================================
// Mentor core (offsets relative to MENTOR_CORE_OFFSET)
// ============================================================================

pub const MUSB_FADDR: usize = 0x00;
pub const MUSB_POWER: usize = 0x01;
pub const MUSB_INTRTX: usize = 0x02;
pub const MUSB_INTRTXE: usize = 0x06;
pub const MUSB_INTRRXE: usize = 0x08;
pub const MUSB_INTRUSBE: usize = 0x0b;
pub const MUSB_DEVCTL: usize = 0x60;

pub const MUSB_INTR_SOF: u32 = 0x08;
pub const MUSB_INTR_VBUSERROR: u32 = 0x80;

pub const MUSB_DEVCTL_SESSION: u8 = 0x01;
pub const MUSB_DEVCTL_VBUS: u8 = 0x18;
pub const MUSB_DEVCTL_VBUS_SHIFT: u8 = 3;
pub const MUSB_DEVCTL_BDEVICE: u8 = 0x80;

// ============================================================================
// Subsystem window (shared)
// ============================================================================

pub const USBSS_IRQ_EOI: usize = 0x20;
pub const USBSS_IRQ_STATUS: usize = 0x28;
pub const USBSS_IRQ_ENABLE_SET: usize = 0x2c;
pub const USBSS_IRQ_ENABLE_CLEAR: usize = 0x30;
pub const USBSS_IRQ_DMA_THRESHOLD_TX0: usize = 0x100;
pub const USBSS_IRQ_DMA_THRESHOLD_RX0: usize = 0x110;
pub const USBSS_IRQ_DMA_THRESHOLD_TX1: usize = 0x120;
pub const USBSS_IRQ_DMA_THRESHOLD_RX1: usize = 0x130;

pub const USBSS_INTR_RX_STARV: u32 = 0x001;
pub const USBSS_INTR_PD_CMPL: u32 = 0x004;
/// Completion-queue class: packet-descriptor completion plus the per-queue-group bits
pub const USBSS_INTR_DMA_MASK: u32 = 0xf04 | USBSS_INTR_RX_STARV;

// ============================================================================
// CPPI 4.1 DMA window (offsets from the mapped DMA base)
// ============================================================================

pub const CPPI_GLOBAL_CTRL_OFFSET: usize = 0x0000;
pub const CPPI_CH_CTRL_OFFSET: usize = 0x0800;
pub const CPPI_SCHED_CTRL_OFFSET: usize = 0x1000;
pub const CPPI_SCHED_TABLE_OFFSET: usize = 0x1800;
pub const CPPI_QMGR_OFFSET: usize = 0x2000;

/// Teardown free-descriptor queue (global control region)
pub const DMA_TEARDOWN_FDQ_REG: usize = 0x04;
pub const DMA_TEARDOWN_QMGR_SHIFT: u32 = 12;

/// Per-channel control stride and enable bit (channel control region)
pub const DMA_CH_TX_GLOBAL_CFG_REG: usize = 0x00;
pub const DMA_CH_RX_GLOBAL_CFG_REG: usize = 0x08;
pub const DMA_CH_STRIDE: usize = 0x20;
pub const DMA_CH_ENABLE: u32 = 1 << 31;

pub const DMA_SCHED_ENABLE: u32 = 1 << 31;
pub const DMA_SCHED_LAST_ENTRY_MASK: u32 = 0xff;

/// Queue manager linking RAM region 0
pub const QMGR_LINKING_RAM_RGN0_BASE_REG: usize = 0x80;
pub const QMGR_LINKING_RAM_RGN0_SIZE_REG: usize = 0x84;
pub const QMGR_LINKING_RAM_RGN0_SIZE: u32 = 0x3fff;

/// Queue pending words, 32 queues each
pub const QMGR_PEND0_REG: usize = 0x90;
