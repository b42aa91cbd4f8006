//! DMA fairness schedule
//!
//! The scheduler walks a table of one-byte entries, four per 32-bit word.
//! Each entry names a channel (low five bits) and a direction (bit 7 set for
//! receive). The default table interleaves every channel's transmit and
//! receive slot: `tx0 rx0 tx1 rx1 ...`, giving the familiar
//! `0x81018000, 0x83038202, ...` words for fifteen channels.

use crate::error::{OtgError, Result};
use crate::usbcore::Direction;

/// Words in the hardware table
pub const SCHED_TABLE_WORDS: usize = 8;
/// Channel pairs the table can hold
pub const SCHED_MAX_PAIRS: usize = SCHED_TABLE_WORDS * 2;

const ENTRY_RX: u8 = 0x80;
const ENTRY_CHANNEL_MASK: u8 = 0x1f;

/// One scheduler slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedEntry {
    pub channel: u8,
    pub direction: Direction,
}

impl SchedEntry {
    pub const fn encode(self) -> u8 {
        let dir = match self.direction {
            Direction::Tx => 0,
            Direction::Rx => ENTRY_RX,
        };
        dir | (self.channel & ENTRY_CHANNEL_MASK)
    }
}

/// Fairness schedule over the first `pairs` channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    entries: Vec<SchedEntry>,
}

impl Schedule {
    /// Interleaved tx/rx schedule for channels `0..pairs`
    pub fn interleaved(pairs: usize) -> Result<Self> {
        if pairs == 0 || pairs > SCHED_MAX_PAIRS {
            return Err(OtgError::Config(format!(
                "Invalid fairness table size: {} channel pairs (1..={})",
                pairs, SCHED_MAX_PAIRS
            )));
        }

        let entries = (0..pairs as u8)
            .flat_map(|channel| {
                [
                    SchedEntry {
                        channel,
                        direction: Direction::Tx,
                    },
                    SchedEntry {
                        channel,
                        direction: Direction::Rx,
                    },
                ]
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SchedEntry] {
        &self.entries
    }

    /// Channel pairs covered
    pub fn pairs(&self) -> usize {
        self.entries.len() / 2
    }

    /// Index of the last valid entry, as programmed into scheduler control
    pub fn last_entry(&self) -> u32 {
        (self.entries.len() - 1) as u32
    }

    /// Packed table words; unused trailing slots are zero
    pub fn words(&self) -> [u32; SCHED_TABLE_WORDS] {
        let mut words = [0u32; SCHED_TABLE_WORDS];
        for (i, entry) in self.entries.iter().enumerate() {
            words[i / 4] |= (entry.encode() as u32) << ((i % 4) * 8);
        }
        words
    }

    pub fn contains(&self, channel: u8) -> bool {
        self.entries.iter().any(|e| e.channel == channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifteen_channel_table() {
        let schedule = Schedule::interleaved(15).unwrap();
        assert_eq!(
            schedule.words(),
            [
                0x81018000, 0x83038202, 0x85058404, 0x87078606, 0x89098808, 0x8b0b8a0a,
                0x8d0d8c0c, 0x00008e0e
            ]
        );
        assert_eq!(schedule.last_entry(), 29);
    }

    #[test]
    fn test_eight_pairs_only() {
        let schedule = Schedule::interleaved(8).unwrap();
        assert_eq!(schedule.pairs(), 8);
        assert_eq!(schedule.entries().len(), 16);
        for ch in 0..8u8 {
            assert!(schedule.contains(ch));
        }
        for ch in 8..15u8 {
            assert!(!schedule.contains(ch));
        }
        let words = schedule.words();
        assert_eq!(&words[..4], &[0x81018000, 0x83038202, 0x85058404, 0x87078606]);
        assert!(words[4..].iter().all(|w| *w == 0));
    }

    #[test]
    fn test_size_limits() {
        assert!(matches!(Schedule::interleaved(0), Err(OtgError::Config(_))));
        assert!(Schedule::interleaved(16).is_ok());
        assert!(matches!(Schedule::interleaved(17), Err(OtgError::Config(_))));
    }
}
