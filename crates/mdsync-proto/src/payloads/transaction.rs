//! Transaction lock messages.
//!
//! A transaction is a device-group-wide lock tagged with an encrypted scope.
//! Only one device may hold a lock at a time; the others receive
//! [`TransactionRejected`] until the holder commits, after which every device
//! sees [`TransactionEnded`].

use serde::{Deserialize, Serialize};

/// Reason a transaction is held. Sent encrypted under the transaction-scope
/// key as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionScope {
    /// User profile update
    UserProfileSync = 0x00,
    /// Contact create/update/delete
    ContactSync = 0x01,
    /// Group create/update/delete
    GroupSync = 0x02,
    /// Distribution list change
    DistributionListSync = 0x03,
    /// Settings change
    SettingsSync = 0x04,
    /// MDM parameter change
    MdmParameterSync = 0x05,
    /// Linking a new device
    NewDeviceSync = 0x06,
}

impl TransactionScope {
    /// Parse a scope byte. `None` for unknown values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::UserProfileSync),
            0x01 => Some(Self::ContactSync),
            0x02 => Some(Self::GroupSync),
            0x03 => Some(Self::DistributionListSync),
            0x04 => Some(Self::SettingsSync),
            0x05 => Some(Self::MdmParameterSync),
            0x06 => Some(Self::NewDeviceSync),
            _ => None,
        }
    }

    /// Scope byte.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.to_u8())
    }
}

/// Begin a transaction (`Lock`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginTransaction {
    /// Sealed scope byte
    pub encrypted_scope: Vec<u8>,
    /// Lock lifetime in seconds, `None` for the mediator default
    pub ttl_secs: Option<u32>,
}

/// Transaction refused because another device holds a lock (`Rejected`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRejected {
    /// Device holding the lock
    pub device_id: u64,
    /// Sealed scope of the held lock
    pub encrypted_scope: Vec<u8>,
}

/// A lock held by another device was released (`Ended`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnded {
    /// Device that held the lock
    pub device_id: u64,
    /// Sealed scope of the released lock
    pub encrypted_scope: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_bytes() {
        for value in 0..=6u8 {
            let scope = TransactionScope::from_u8(value).unwrap();
            assert_eq!(scope.to_u8(), value);
        }
        assert_eq!(TransactionScope::from_u8(7), None);
        assert_eq!(TransactionScope::GroupSync.to_string(), "0x02");
    }
}
