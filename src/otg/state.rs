//! OTG role/session states

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PortRole;
use crate::usbcore::PortMode;

/// Port state as tracked by the glue layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtgState {
    /// A-device, no session
    AIdle,
    /// A-device driving VBUS, waiting for it to become valid
    AWaitVrise,
    /// VBUS valid, waiting for a B-device to connect
    AWaitBcon,
    /// Session aborted on a VBUS error, waiting for VBUS to fall
    AWaitVfall,
    /// B-device (peripheral), no session
    BIdle,
    /// Detached; absorbs every further event
    Inactive,
}

impl OtgState {
    /// Initial state for the configured role
    pub fn initial(role: PortRole) -> Self {
        if role == PortRole::HostOnly {
            OtgState::AIdle
        } else {
            OtgState::BIdle
        }
    }

    /// A session is being negotiated or torn down
    pub fn in_session(self) -> bool {
        matches!(
            self,
            OtgState::AWaitVrise | OtgState::AWaitBcon | OtgState::AWaitVfall
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OtgState::AIdle => "a_idle",
            OtgState::AWaitVrise => "a_wait_vrise",
            OtgState::AWaitBcon => "a_wait_bcon",
            OtgState::AWaitVfall => "a_wait_vfall",
            OtgState::BIdle => "b_idle",
            OtgState::Inactive => "inactive",
        }
    }
}

impl fmt::Display for OtgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot answered to the USB core's state query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtgStatus {
    pub state: OtgState,
    pub mode: PortMode,
    pub role: PortRole,
    /// Host session in progress
    pub active: bool,
    /// Last VBUS source-power request, `None` before the first one
    pub vbus_on: Option<bool>,
    pub poll_pending: bool,
}
