//! Typed update payloads.
//!
//! Updates carry a string tag and a free-form `results` object. The tags the
//! client understands are parsed into [`ParsedUpdate`]; everything else is
//! passed through as [`ParsedUpdate::Other`].
//!
//! | Tag | Variant | Payload |
//! |-----|---------|---------|
//! | `scanResult` | [`ParsedUpdate::ScanResult`] | `address`, `name`, `rssi` |
//! | `characteristicChanged` | [`ParsedUpdate::CharacteristicChanged`] | `address`, `service`, `characteristic`, `value` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Update;

// ============================================================================
// Constants
// ============================================================================

/// Tag of scan result updates.
pub const SCAN_RESULT: &str = "scanResult";

/// Tag of characteristic change notifications.
pub const CHARACTERISTIC_CHANGED: &str = "characteristicChanged";

// ============================================================================
// UpdateKind
// ============================================================================

/// Known update tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// A device seen during a scan.
    ScanResult,
    /// A characteristic value changed on a connected device.
    CharacteristicChanged,
    /// Any other tag.
    Other,
}

impl UpdateKind {
    /// Classifies an update tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            SCAN_RESULT => Self::ScanResult,
            CHARACTERISTIC_CHANGED => Self::CharacteristicChanged,
            _ => Self::Other,
        }
    }
}

// ============================================================================
// DiscoveredDevice
// ============================================================================

/// A device reported by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Device address.
    pub address: String,

    /// Advertised name.
    #[serde(default)]
    pub name: Option<String>,

    /// Signal strength in dBm.
    #[serde(default)]
    pub rssi: Option<i32>,
}

impl DiscoveredDevice {
    /// Reads a device from a results object.
    ///
    /// Returns `None` unless the object carries a non-empty `address`.
    #[must_use]
    pub fn from_results(results: &Value) -> Option<Self> {
        let address = results.get("address")?.as_str()?;
        if address.is_empty() {
            return None;
        }

        Some(Self {
            address: address.to_string(),
            name: results
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            rssi: results
                .get("rssi")
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok()),
        })
    }
}

// ============================================================================
// CharacteristicChange
// ============================================================================

/// A characteristic notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicChange {
    /// Device address.
    pub address: String,

    /// Service UUID.
    pub service: String,

    /// Characteristic UUID.
    pub characteristic: String,

    /// New value as sent by the gateway (usually hex or base64).
    pub value: String,
}

impl CharacteristicChange {
    /// Reads a change from a results object.
    #[must_use]
    pub fn from_results(results: &Value) -> Option<Self> {
        let field = |key: &str| results.get(key).and_then(Value::as_str).map(str::to_string);

        Some(Self {
            address: field("address")?,
            service: field("service").unwrap_or_default(),
            characteristic: field("characteristic")?,
            value: field("value").unwrap_or_default(),
        })
    }
}

// ============================================================================
// ParsedUpdate
// ============================================================================

/// Parsed update variants for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedUpdate {
    /// Scan result naming a device.
    ScanResult(DiscoveredDevice),

    /// Characteristic value change.
    CharacteristicChanged(CharacteristicChange),

    /// Unknown tag, or a known tag with an unusable payload.
    Other {
        /// Update tag.
        tag: String,
        /// Raw results.
        results: Value,
    },
}

impl ParsedUpdate {
    /// Parses an update.
    #[must_use]
    pub fn from_update(update: &Update) -> Self {
        let parsed = match UpdateKind::from_tag(&update.update) {
            UpdateKind::ScanResult => {
                DiscoveredDevice::from_results(&update.results).map(Self::ScanResult)
            }
            UpdateKind::CharacteristicChanged => {
                CharacteristicChange::from_results(&update.results)
                    .map(Self::CharacteristicChanged)
            }
            UpdateKind::Other => None,
        };

        parsed.unwrap_or_else(|| Self::Other {
            tag: update.update.clone(),
            results: update.results.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
