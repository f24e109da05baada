//! Fixed-value AVRCP wire enums
//!
//! Every enum here mirrors a numeric field of the AVRCP 1.6 specification.
//! Conversions to the raw value are infallible; conversions from the wire
//! fail with a `Decode` error for unassigned values.

use crate::error::AvrcpError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declare an enum backed by a fixed-width wire value, with `raw()`,
/// `From<enum> for raw` and `TryFrom<raw>` conversions.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident <$raw:ty> {
            $($(#[$vmeta:meta])* $variant:ident = $val:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// The wire value
            pub const fn raw(self) -> $raw {
                match self {
                    $(Self::$variant => $val),+
                }
            }
        }

        impl From<$name> for $raw {
            fn from(value: $name) -> $raw {
                value.raw()
            }
        }

        impl TryFrom<$raw> for $name {
            type Error = AvrcpError;

            fn try_from(value: $raw) -> Result<Self, AvrcpError> {
                match value {
                    $($val => Ok(Self::$variant),)+
                    other => Err(AvrcpError::Decode(format!(
                        concat!("unknown ", stringify!($name), " 0x{:02x}"),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum! {
    /// AVRCP PDU ids, shared between the vendor-dependent control channel
    /// and the browsing channel
    pub enum PduId<u8> {
        GetCapabilities = 0x10,
        ListPlayerApplicationSettingAttributes = 0x11,
        ListPlayerApplicationSettingValues = 0x12,
        GetCurrentPlayerApplicationSettingValue = 0x13,
        SetPlayerApplicationSettingValue = 0x14,
        GetElementAttributes = 0x20,
        GetPlayStatus = 0x30,
        RegisterNotification = 0x31,
        RequestContinuingResponse = 0x40,
        AbortContinuingResponse = 0x41,
        SetAbsoluteVolume = 0x50,
        SetAddressedPlayer = 0x60,
        SetBrowsedPlayer = 0x70,
        GetFolderItems = 0x71,
        ChangePath = 0x72,
        GetItemAttributes = 0x73,
        PlayItem = 0x74,
        GetTotalNumberOfItems = 0x75,
        Search = 0x80,
        AddToNowPlaying = 0x90,
        GeneralReject = 0xa0,
    }
}

wire_enum! {
    /// Vendor-dependent packet type, low two bits of the packet-type byte
    pub enum PacketType<u8> {
        Single = 0b00,
        Start = 0b01,
        Continue = 0b10,
        End = 0b11,
    }
}

wire_enum! {
    /// AV/C command type for outbound commands
    pub enum CType<u8> {
        Control = 0x00,
        Status = 0x01,
        Notify = 0x03,
    }
}

wire_enum! {
    /// AV/C response code
    pub enum ResponseCode<u8> {
        NotImplemented = 0x08,
        Accepted = 0x09,
        Rejected = 0x0a,
        InTransition = 0x0b,
        Stable = 0x0c,
        Changed = 0x0d,
        Interim = 0x0f,
    }
}

wire_enum! {
    /// AVRCP status codes carried in rejection and browsing responses
    pub enum StatusCode<u8> {
        InvalidCommand = 0x00,
        InvalidParameter = 0x01,
        ParameterContentError = 0x02,
        InternalError = 0x03,
        Success = 0x04,
        UidChanged = 0x05,
        InvalidDirection = 0x07,
        NonDirectory = 0x08,
        DoesNotExist = 0x09,
        InvalidScope = 0x0a,
        RangeOutOfBounds = 0x0b,
        ItemNotPlayable = 0x0c,
        MediaInUse = 0x0d,
        InvalidPlayerId = 0x11,
        PlayerNotBrowsable = 0x12,
        PlayerNotAddressed = 0x13,
        NoValidSearchResults = 0x14,
        NoAvailablePlayers = 0x15,
        AddressedPlayerChanged = 0x16,
    }
}

wire_enum! {
    /// Notification event ids
    pub enum EventId<u8> {
        PlaybackStatusChanged = 0x01,
        TrackChanged = 0x02,
        TrackReachedEnd = 0x03,
        TrackReachedStart = 0x04,
        PlaybackPosChanged = 0x05,
        BattStatusChanged = 0x06,
        SystemStatusChanged = 0x07,
        PlayerApplicationSettingChanged = 0x08,
        NowPlayingContentChanged = 0x09,
        AvailablePlayersChanged = 0x0a,
        AddressedPlayerChanged = 0x0b,
        UidsChanged = 0x0c,
        VolumeChanged = 0x0d,
    }
}

wire_enum! {
    /// Browsing scope
    pub enum Scope<u8> {
        MediaPlayerList = 0x00,
        VirtualFileSystem = 0x01,
        Search = 0x02,
        NowPlaying = 0x03,
    }
}

wire_enum! {
    /// ChangePath direction
    pub enum Direction<u8> {
        Up = 0x00,
        Down = 0x01,
    }
}

wire_enum! {
    /// Playback status reported by GetPlayStatus and notifications
    pub enum PlayStatus<u8> {
        Stopped = 0x00,
        Playing = 0x01,
        Paused = 0x02,
        FwdSeek = 0x03,
        RevSeek = 0x04,
        Error = 0xff,
    }
}

wire_enum! {
    /// Browse item discriminator
    pub enum ItemType<u8> {
        MediaPlayer = 0x01,
        Folder = 0x02,
        MediaElement = 0x03,
    }
}

wire_enum! {
    /// Folder classification within the virtual filesystem
    pub enum FolderType<u8> {
        Mixed = 0x00,
        Titles = 0x01,
        Albums = 0x02,
        Artists = 0x03,
        Genres = 0x04,
        Playlists = 0x05,
        Years = 0x06,
    }
}

wire_enum! {
    /// Media element classification
    pub enum MediaType<u8> {
        Audio = 0x00,
        Video = 0x01,
    }
}

wire_enum! {
    /// Media attribute ids for element/item attribute queries
    pub enum MediaAttributeId<u8> {
        Title = 0x01,
        ArtistName = 0x02,
        AlbumName = 0x03,
        TrackNumber = 0x04,
        TotalNumberOfTracks = 0x05,
        Genre = 0x06,
        PlayingTime = 0x07,
        DefaultCoverArt = 0x08,
    }
}

wire_enum! {
    /// AV/C panel passthrough key codes (the subset this engine surfaces)
    pub enum AvcPanelKey<u8> {
        Select = 0x00,
        Up = 0x01,
        Down = 0x02,
        Left = 0x03,
        Right = 0x04,
        RootMenu = 0x09,
        VolumeUp = 0x41,
        VolumeDown = 0x42,
        Mute = 0x43,
        Play = 0x44,
        Stop = 0x45,
        Pause = 0x46,
        Record = 0x47,
        Rewind = 0x48,
        FastForward = 0x49,
        Forward = 0x4b,
        Backward = 0x4c,
    }
}

/// Passthrough key state, the high bit of the operation byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    Pressed,
    Released,
}

impl KeyState {
    /// Wire value: 0 for press, 1 for release
    pub fn raw(self) -> u8 {
        match self {
            KeyState::Pressed => 0,
            KeyState::Released => 1,
        }
    }

    /// Decode from the high bit of the operation byte
    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            KeyState::Pressed
        } else {
            KeyState::Released
        }
    }
}

/// UTF-8 charset id from the IANA MIB enum, the only charset this engine emits
pub const CHARSET_UTF8: u16 = 106;

/// An 8-byte browse item UID
///
/// Opaque wire token: never interpreted numerically, only compared for
/// equality and echoed back to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid(pub [u8; 8]);

impl Uid {
    /// The all-zero UID, carried when no item is named
    pub const ZERO: Uid = Uid([0; 8]);

    /// Create a UID from raw bytes
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw UID bytes
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Which media attributes a query asks for
///
/// The AVRCP wire convention: a count byte of 0x00 means all attributes,
/// 0xff means none, anything else is an explicit list. Modeling this as an
/// enum keeps the two sentinels from being confused at call sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeRequest {
    /// 0x00 on the wire: every attribute the item has
    All,
    /// 0xff on the wire: no attributes wanted
    None,
    /// Explicit attribute list
    Some(Vec<MediaAttributeId>),
}

impl AttributeRequest {
    /// Count byte for the wire
    pub fn count_byte(&self) -> u8 {
        match self {
            AttributeRequest::All => 0x00,
            AttributeRequest::None => 0xff,
            AttributeRequest::Some(ids) => ids.len() as u8,
        }
    }

    /// The explicit attribute list, empty for the sentinels
    pub fn ids(&self) -> &[MediaAttributeId] {
        match self {
            AttributeRequest::Some(ids) => ids,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_id_roundtrip() {
        for raw in [0x10u8, 0x31, 0x50, 0x71, 0x74, 0x80, 0xa0] {
            let id = PduId::try_from(raw).unwrap();
            assert_eq!(id.raw(), raw);
        }
        assert!(PduId::try_from(0xfe).is_err());
    }

    #[test]
    fn test_play_status_error_sentinel() {
        assert_eq!(PlayStatus::try_from(0xff).unwrap(), PlayStatus::Error);
        assert!(PlayStatus::try_from(0x05).is_err());
    }

    #[test]
    fn test_key_state() {
        assert_eq!(KeyState::Pressed.raw(), 0);
        assert_eq!(KeyState::from_bit(1), KeyState::Released);
        assert_eq!(KeyState::from_bit(0), KeyState::Pressed);
    }

    #[test]
    fn test_attribute_request_count_byte() {
        assert_eq!(AttributeRequest::All.count_byte(), 0x00);
        assert_eq!(AttributeRequest::None.count_byte(), 0xff);
        let some = AttributeRequest::Some(vec![MediaAttributeId::Title, MediaAttributeId::Genre]);
        assert_eq!(some.count_byte(), 2);
        assert_eq!(some.ids().len(), 2);
    }

    #[test]
    fn test_uid_display() {
        let uid = Uid::new([0, 1, 2, 3, 4, 5, 6, 0xff]);
        assert_eq!(uid.to_string(), "00010203040506ff");
    }
}
