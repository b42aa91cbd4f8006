//! Glue-layer event types

use serde::{Deserialize, Serialize};

use crate::otg::{OtgState, OtgStatus};
use crate::usbcore::PortMode;

/// Events broadcast by the controller
///
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "otg.state_changed",
///   "data": { "from": "a_wait_vrise", "to": "a_wait_bcon" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OtgEvent {
    #[serde(rename = "otg.state_changed")]
    StateChanged { from: OtgState, to: OtgState },

    /// Over-current on VBUS; the session was aborted
    #[serde(rename = "otg.vbus_error")]
    VbusError {
        /// DEVCTL at the time of the error
        devctl: u8,
    },

    #[serde(rename = "otg.mode_changed")]
    ModeChanged { mode: PortMode },

    /// Controller detached; carries the last status
    #[serde(rename = "otg.detached")]
    Detached { status: OtgStatus },
}

impl OtgEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "otg.state_changed",
            Self::VbusError { .. } => "otg.vbus_error",
            Self::ModeChanged { .. } => "otg.mode_changed",
            Self::Detached { .. } => "otg.detached",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = OtgEvent::StateChanged {
            from: OtgState::AWaitVrise,
            to: OtgState::AWaitBcon,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "otg.state_changed");
        assert_eq!(value["data"]["to"], "a_wait_bcon");
        assert_eq!(event.event_name(), "otg.state_changed");
    }

    #[test]
    fn test_mode_event_round_trip() {
        let event = OtgEvent::ModeChanged {
            mode: PortMode::Peripheral,
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: OtgEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
