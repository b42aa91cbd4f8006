use serde::{Deserialize, Serialize};

use crate::error::{OtgError, Result};

/// Shortest allowed poll interval; bounds the polling frequency
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
/// Hardware limit of transmit DMA channels per controller
pub const MAX_DMA_CHANNELS: usize = 15;

/// Glue core configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlueConfig {
    /// Which roles the port may take
    pub role: PortRole,
    /// OTG poll cadence (ID-change polling and VBUS-fall debounce)
    pub poll_interval_ms: u64,
    /// How long A_WAIT_BCON waits for a B-device before ending the session
    pub a_wait_bcon_ms: u64,
    /// Register windows of this controller
    pub controller: ControllerRegions,
    /// CPPI 4.1 DMA; `None` runs the controller in PIO mode
    pub dma: Option<DmaConfig>,
}

impl Default for GlueConfig {
    fn default() -> Self {
        Self {
            role: PortRole::DualRole,
            poll_interval_ms: 2000,
            a_wait_bcon_ms: 1100,
            controller: ControllerRegions::default(),
            dma: Some(DmaConfig::default()),
        }
    }
}

/// Enabled port roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    HostOnly,
    PeripheralOnly,
    DualRole,
}

impl Default for PortRole {
    fn default() -> Self {
        Self::DualRole
    }
}

impl PortRole {
    pub fn host_enabled(self) -> bool {
        matches!(self, PortRole::HostOnly | PortRole::DualRole)
    }

    pub fn peripheral_enabled(self) -> bool {
        matches!(self, PortRole::PeripheralOnly | PortRole::DualRole)
    }

    pub fn otg_enabled(self) -> bool {
        self == PortRole::DualRole
    }
}

/// Physical register windows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerRegions {
    /// Controller instance inside the subsystem (0 or 1)
    pub index: u8,
    /// Control window (TI wrapper + Mentor core)
    pub ctrl_base: u64,
    pub ctrl_len: usize,
    /// Shared subsystem window (interrupt controller, DMA thresholds)
    pub usbss_base: u64,
    pub usbss_len: usize,
}

impl Default for ControllerRegions {
    fn default() -> Self {
        Self {
            index: 0,
            ctrl_base: 0x4740_1000,
            ctrl_len: 0x800,
            usbss_base: 0x4740_0000,
            usbss_len: 0x1000,
        }
    }
}

/// CPPI 4.1 DMA configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DmaConfig {
    /// Base of the DMA window (global control region)
    pub base: u64,
    pub len: usize,
    /// Subsystem interrupt line shared by all completion queues
    pub irq_line: u32,
    /// Queue manager serving this DMA block
    pub queue_manager: u8,
    /// First free-descriptor/buffer queue, also used for teardown descriptors
    pub free_desc_queue_base: u16,
    /// Physical address of linking RAM region 0
    pub linking_ram_base: u32,
    /// Transmit channels; receive channel N serves port N + 1
    pub tx_channels: Vec<TxChannel>,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            base: 0x4740_2000,
            len: 0x6000,
            irq_line: 17,
            queue_manager: 0,
            free_desc_queue_base: 0,
            linking_ram_base: 0,
            tx_channels: (0..MAX_DMA_CHANNELS as u16)
                .map(|ch| TxChannel {
                    port: ch as u8 + 1,
                    queues: vec![32 + 2 * ch, 33 + 2 * ch],
                })
                .collect(),
        }
    }
}

/// Static description of one transmit DMA channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxChannel {
    /// Endpoint served by the channel
    pub port: u8,
    /// Submission queues in priority order
    pub queues: Vec<u16>,
}

impl GlueConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// B-device connect timeout; zero waits forever
    pub fn a_wait_bcon(&self) -> Option<std::time::Duration> {
        (self.a_wait_bcon_ms != 0).then(|| std::time::Duration::from_millis(self.a_wait_bcon_ms))
    }

    /// Check the configuration before anything touches hardware
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(OtgError::Config(format!(
                "Poll interval {} ms is below the {} ms minimum",
                self.poll_interval_ms, MIN_POLL_INTERVAL_MS
            )));
        }
        if self.controller.index > 1 {
            return Err(OtgError::Config(format!(
                "Controller index {} not present (0 or 1)",
                self.controller.index
            )));
        }
        if self.controller.ctrl_len == 0 || self.controller.usbss_len == 0 {
            return Err(OtgError::Config("Register window length is zero".to_string()));
        }
        if let Some(ref dma) = self.dma {
            dma.validate()?;
        }
        Ok(())
    }
}

impl DmaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.len == 0 {
            return Err(OtgError::Config("DMA window length is zero".to_string()));
        }
        if self.tx_channels.is_empty() || self.tx_channels.len() > MAX_DMA_CHANNELS {
            return Err(OtgError::Config(format!(
                "Unsupported DMA channel count {} (1..={})",
                self.tx_channels.len(),
                MAX_DMA_CHANNELS
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for (ch, info) in self.tx_channels.iter().enumerate() {
            if info.queues.is_empty() {
                return Err(OtgError::Config(format!(
                    "Tx channel {} has no submission queue",
                    ch
                )));
            }
            if let Some(q) = info.queues.iter().find(|q| !seen.insert(**q)) {
                return Err(OtgError::Config(format!(
                    "Queue {} assigned to more than one Tx channel (channel {})",
                    q, ch
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GlueConfig::default();
        assert!(config.validate().is_ok());
        let dma = config.dma.unwrap();
        assert_eq!(dma.tx_channels.len(), 15);
        assert_eq!(dma.tx_channels[0].port, 1);
        assert_eq!(dma.tx_channels[14].queues, vec![60, 61]);
    }

    #[test]
    fn test_poll_interval_floor() {
        let config = GlueConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OtgError::Config(_))));
    }

    #[test]
    fn test_shared_queue_rejected() {
        let mut dma = DmaConfig::default();
        dma.tx_channels[3].queues.push(32);
        assert!(matches!(dma.validate(), Err(OtgError::Config(_))));
    }

    #[test]
    fn test_empty_queue_list_rejected() {
        let mut dma = DmaConfig::default();
        dma.tx_channels[0].queues.clear();
        assert!(dma.validate().is_err());
    }

    #[test]
    fn test_channel_count_limits() {
        let mut dma = DmaConfig::default();
        dma.tx_channels.clear();
        assert!(dma.validate().is_err());

        let mut dma = DmaConfig::default();
        dma.tx_channels.push(TxChannel {
            port: 16,
            queues: vec![200],
        });
        assert!(dma.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GlueConfig =
            serde_json::from_str(r#"{ "role": "host_only", "poll_interval_ms": 500 }"#).unwrap();
        assert_eq!(config.role, PortRole::HostOnly);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.a_wait_bcon_ms, 1100);
        assert!(config.dma.is_some());
    }

    #[test]
    fn test_role_predicates() {
        assert!(PortRole::DualRole.otg_enabled());
        assert!(PortRole::HostOnly.host_enabled());
        assert!(!PortRole::HostOnly.peripheral_enabled());
        assert!(!PortRole::PeripheralOnly.host_enabled());
    }
}
