//! Completion-queue pending-bit layout
//!
//! The queue manager reports queue occupancy in pending words of 32 queues
//! each (`QMGR_PEND0_REG` covers queues 0..31, the next word 32..63, ...).
//! A controller's 15 transmit and 15 receive completion queues straddle two
//! of those words: transmit queues start near the top of the low word and
//! continue into the high word, receive queues follow in the high word.
//! Concatenating the pair into 64 bits and shifting by `base - first_queue`
//! yields each mask.

use crate::regs::QMGR_PEND0_REG;

/// Completion queues per direction
pub const COMPLETION_QUEUES: u8 = 15;

/// Where a controller's completion queues live in the pending words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionLayout {
    pub name: &'static str,
    /// Queue number of bit 0 of the low pending word
    pub first_queue: u16,
    /// Completion queue of Tx channel 0
    pub tx_base: u16,
    /// Completion queue of Rx channel 0
    pub rx_base: u16,
    pub queues: u8,
}

/// usb0: Tx 93..107, Rx 109..123 in pending words 2/3
pub const USB0_LAYOUT: CompletionLayout = CompletionLayout {
    name: "usb0",
    first_queue: 64,
    tx_base: 93,
    rx_base: 109,
    queues: COMPLETION_QUEUES,
};

/// usb1: Tx 125..139, Rx 141..155 in pending words 3/4
pub const USB1_LAYOUT: CompletionLayout = CompletionLayout {
    name: "usb1",
    first_queue: 96,
    tx_base: 125,
    rx_base: 141,
    queues: COMPLETION_QUEUES,
};

/// Layouts indexed by controller instance
pub const LAYOUTS: [CompletionLayout; 2] = [USB0_LAYOUT, USB1_LAYOUT];

/// Per-channel completion bits (bit N = channel N)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionMasks {
    pub tx: u16,
    pub rx: u16,
}

impl CompletionMasks {
    pub fn is_empty(&self) -> bool {
        self.tx == 0 && self.rx == 0
    }

    pub fn count(&self) -> u32 {
        self.tx.count_ones() + self.rx.count_ones()
    }
}

impl CompletionLayout {
    /// Offset of the low pending word in the queue manager region
    pub const fn pend_lo_reg(&self) -> usize {
        QMGR_PEND0_REG + (self.first_queue as usize / 32) * 4
    }

    pub const fn pend_hi_reg(&self) -> usize {
        self.pend_lo_reg() + 4
    }

    pub const fn queue_mask(&self) -> u64 {
        (1u64 << self.queues) - 1
    }

    /// Decode a (low, high) pending snapshot into channel masks
    pub fn decode(&self, lo: u32, hi: u32) -> CompletionMasks {
        let pending = ((hi as u64) << 32) | lo as u64;
        let tx = (pending >> (self.tx_base - self.first_queue)) & self.queue_mask();
        let rx = (pending >> (self.rx_base - self.first_queue)) & self.queue_mask();
        CompletionMasks {
            tx: tx as u16,
            rx: rx as u16,
        }
    }

    /// Whether every completion queue fits inside the two pending words
    pub const fn is_consistent(&self) -> bool {
        self.first_queue % 32 == 0
            && self.tx_base >= self.first_queue
            && self.rx_base >= self.first_queue
            && self.tx_base + self.queues as u16 <= self.first_queue + 64
            && self.rx_base + self.queues as u16 <= self.first_queue + 64
            && self.queues <= 16
    }
}
