//! Device identity and lifecycle events.
//!
//! A lab device is named by an opaque, platform-assigned serial string.  The
//! tracker observes devices entering and leaving the lab and reports them as
//! [`DeviceEvent`]s; the registry consumes those events and keeps the live set.
//!
//! The raw connection states reported by the ADB server ([`AdbDeviceState`])
//! are collapsed into the three-valued [`DeviceStatus`] that the rest of the
//! system cares about: a device is either usable, gone, or in some transitional
//! state that is neither.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque unique identifier for a lab device.
///
/// For devices discovered through the ADB tracker this is the serial number
/// (e.g. `"emulator-5554"` or `"R5CT31ABCDE"`), but nothing in the core
/// inspects its contents.  The newtype exists so device ids cannot be mixed up
/// with other strings (commands, display types) at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Coarse connection status of a device, as the registry sees it.
///
/// Only `Connected` and `Disconnected` drive registry membership; an `Other`
/// status (booting, waiting for authorization, and so on) leaves the live set
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The device is fully usable.
    Connected,
    /// The device is attached but unreachable.
    Disconnected,
    /// Any transitional or degraded state.
    Other,
}

/// Raw device state strings reported by the ADB server.
///
/// The server's wire vocabulary is open-ended (new states have been added over
/// the years), so parsing never fails: an unrecognised state is preserved
/// verbatim in [`AdbDeviceState::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdbDeviceState {
    /// Online and ready for commands.
    Device,
    /// Attached but not responding.
    Offline,
    /// Attached, but the host key has not been accepted on the device.
    Unauthorized,
    /// In the bootloader (fastboot).
    Bootloader,
    /// In recovery mode.
    Recovery,
    /// In sideload mode (recovery accepting an OTA package).
    Sideload,
    /// Authorization handshake in progress.
    Authorizing,
    /// TCP transport still connecting.
    Connecting,
    /// The server lacks permission to open the USB device node.
    NoPermissions,
    /// The entry is the host itself (seen on `adb devices -l` style listings).
    Host,
    /// Any state string this build does not know about.
    Unknown(String),
}

impl AdbDeviceState {
    /// Parses a state string exactly as it appears on the wire.
    ///
    /// Never fails: an unrecognised string becomes [`AdbDeviceState::Unknown`].
    pub fn from_wire(s: &str) -> Self {
        match s {
            "device" => AdbDeviceState::Device,
            "offline" => AdbDeviceState::Offline,
            "unauthorized" => AdbDeviceState::Unauthorized,
            "bootloader" => AdbDeviceState::Bootloader,
            "recovery" => AdbDeviceState::Recovery,
            "sideload" => AdbDeviceState::Sideload,
            "authorizing" => AdbDeviceState::Authorizing,
            "connecting" => AdbDeviceState::Connecting,
            // The server prints this one with an embedded space.
            "no permissions" => AdbDeviceState::NoPermissions,
            "host" => AdbDeviceState::Host,
            other => AdbDeviceState::Unknown(other.to_string()),
        }
    }

    /// Collapses the raw server state into the registry's three-valued status.
    ///
    /// Only `device` means usable and only `offline` means gone; every other
    /// state is transitional and maps to [`DeviceStatus::Other`], which the
    /// registry ignores.
    pub fn status(&self) -> DeviceStatus {
        match self {
            AdbDeviceState::Device => DeviceStatus::Connected,
            AdbDeviceState::Offline => DeviceStatus::Disconnected,
            _ => DeviceStatus::Other,
        }
    }
}

impl FromStr for AdbDeviceState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_wire(s))
    }
}

impl fmt::Display for AdbDeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdbDeviceState::Device => "device",
            AdbDeviceState::Offline => "offline",
            AdbDeviceState::Unauthorized => "unauthorized",
            AdbDeviceState::Bootloader => "bootloader",
            AdbDeviceState::Recovery => "recovery",
            AdbDeviceState::Sideload => "sideload",
            AdbDeviceState::Authorizing => "authorizing",
            AdbDeviceState::Connecting => "connecting",
            AdbDeviceState::NoPermissions => "no permissions",
            AdbDeviceState::Host => "host",
            AdbDeviceState::Unknown(other) => other,
        };
        f.write_str(s)
    }
}

/// A device lifecycle event, as pushed by a device event source.
///
/// This is the vocabulary shared between the tracker (producer) and the
/// registry event pump (consumer).  `Added` and `Changed` carry the status the
/// device had when the event was observed; `Removed` does not, because the
/// device is simply gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device appeared in the tracked set.
    Added {
        /// Serial of the new device.
        id: DeviceId,
        /// Status at the time it appeared.
        status: DeviceStatus,
    },
    /// A device left the tracked set.
    Removed {
        /// Serial of the departed device.
        id: DeviceId,
    },
    /// A tracked device changed state without leaving the set.
    Changed {
        /// Serial of the device.
        id: DeviceId,
        /// The new status.
        status: DeviceStatus,
    },
}

impl DeviceEvent {
    /// Returns the device id the event refers to.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            DeviceEvent::Added { id, .. }
            | DeviceEvent::Removed { id }
            | DeviceEvent::Changed { id, .. } => id,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
