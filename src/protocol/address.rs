//! Bluetooth device address
//!
//! Sessions, transaction namespaces and notification registries are all
//! keyed on the remote device's 48-bit address.

use crate::error::{AvrcpError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Bluetooth device address
///
/// Stored big-endian, displayed in the conventional colon-separated hex
/// form (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BtAddr(pub [u8; 6]);

impl BtAddr {
    /// The all-zero address, never assigned to a real device
    pub const ZERO: BtAddr = BtAddr([0; 6]);

    /// Create an address from raw bytes
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Parse from a byte slice
    ///
    /// # Errors
    ///
    /// `AvrcpError::Decode` if the slice is not exactly 6 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 6] = bytes
            .try_into()
            .map_err(|_| AvrcpError::decode(format!("address must be 6 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for BtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for BtAddr {
    type Err = AvrcpError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AvrcpError::decode(format!("malformed address '{}'", s)))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| AvrcpError::decode(format!("malformed address '{}'", s)))?;
        }
        if parts.next().is_some() {
            return Err(AvrcpError::decode(format!("malformed address '{}'", s)));
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for BtAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}
