//! Protocol module
//!
//! AVRCP wire-format types and codecs.
//!
//! This module contains:
//! - `address`: 48-bit Bluetooth device address
//! - `types`: PDU ids, event ids, scopes, status codes and the other
//!   fixed-value enums of the AVRCP 1.6 specification
//! - `frame`: vendor-dependent and browsing frame codec, including
//!   Start/Continue/End fragmentation and reassembly
//! - `params`: typed parameter payloads for each supported PDU
//! - `items`: the Player/Folder/MediaElement browse item model

pub mod address;
pub mod frame;
pub mod items;
pub mod params;
pub mod types;

// Re-exports for convenience
pub use address::BtAddr;
pub use frame::{BrowseFrame, Reassembler, VendorDependentFrame};
pub use items::{BrowseItem, FolderItem, MediaAttribute, MediaElementItem, PlayerItem};
pub use params::{BrowsePdu, ControlCommand, ControlResponse, NotificationEvent};
pub use types::{
    AttributeRequest, AvcPanelKey, CType, Direction, EventId, FolderType, ItemType, KeyState,
    MediaAttributeId, MediaType, PacketType, PduId, PlayStatus, ResponseCode, Scope, StatusCode,
    Uid,
};

/// Bluetooth SIG company id carried in every vendor-dependent frame
pub const BT_SIG_COMPANY_ID: [u8; 3] = [0x00, 0x19, 0x58];

/// Size in bytes of an AVRCP browse item UID
pub const UID_SIZE: usize = 8;

/// AV/C opcode for vendor-dependent commands
pub const OPCODE_VENDOR_DEPENDENT: u8 = 0x00;

/// AV/C opcode for PASS THROUGH commands
pub const OPCODE_PASSTHROUGH: u8 = 0x7c;

/// AV/C subunit byte for the panel subunit (type 0x09, id 0)
pub const SUBUNIT_PANEL: u8 = 0x48;
