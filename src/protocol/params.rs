//! Typed PDU parameter payloads
//!
//! Encode/decode for the parameter bytes of every PDU this engine speaks.
//! Framing (headers, fragmentation, labels) lives in `frame`; this module
//! only sees the parameter payload.
//!
//! Commands and responses are separate enums because the same PDU id
//! carries different layouts in each direction.

use crate::error::{AvrcpError, Result};
use crate::protocol::items::{decode_items, encode_items, BrowseItem, MediaAttribute, TextLimit};
use crate::protocol::types::{
    AttributeRequest, CType, Direction, EventId, MediaAttributeId, PduId, PlayStatus, Scope,
    StatusCode, Uid, CHARSET_UTF8,
};
use crate::protocol::UID_SIZE;

/// Capability id for the supported-events query, the only one this engine uses
pub const CAPABILITY_EVENTS_SUPPORTED: u8 = 0x03;

/// Sequential reader over a parameter payload
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.offset..self.offset + n)
            .ok_or_else(|| AvrcpError::decode("parameter payload truncated"))?;
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("len checked")))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("len checked")))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("len checked")))
    }

    fn uid(&mut self) -> Result<Uid> {
        Ok(Uid::new(self.take(UID_SIZE)?.try_into().expect("len checked")))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(AvrcpError::decode(format!(
                "{} trailing parameter bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

fn encode_attribute_request(out: &mut Vec<u8>, attrs: &AttributeRequest) {
    out.push(attrs.count_byte());
    for id in attrs.ids() {
        out.extend_from_slice(&(id.raw() as u32).to_be_bytes());
    }
}

fn decode_attribute_request(r: &mut Reader<'_>) -> Result<AttributeRequest> {
    match r.u8()? {
        0x00 => Ok(AttributeRequest::All),
        0xff => Ok(AttributeRequest::None),
        count => {
            let mut ids = Vec::with_capacity(count as usize);
            for _ in 0..count {
                ids.push(MediaAttributeId::try_from(r.u32()? as u8)?);
            }
            Ok(AttributeRequest::Some(ids))
        }
    }
}

fn encode_attribute_values(out: &mut Vec<u8>, attrs: &[MediaAttribute]) -> Result<()> {
    if attrs.len() > u8::MAX as usize {
        return Err(AvrcpError::decode("too many attribute values"));
    }
    out.push(attrs.len() as u8);
    for attr in attrs {
        if attr.value.len() > u16::MAX as usize {
            return Err(AvrcpError::decode("attribute value exceeds 16-bit length"));
        }
        out.extend_from_slice(&(attr.id.raw() as u32).to_be_bytes());
        out.extend_from_slice(&CHARSET_UTF8.to_be_bytes());
        out.extend_from_slice(&(attr.value.len() as u16).to_be_bytes());
        out.extend_from_slice(attr.value.as_bytes());
    }
    Ok(())
}

fn decode_attribute_values(r: &mut Reader<'_>, limit: &TextLimit) -> Result<Vec<MediaAttribute>> {
    let count = r.u8()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let id = MediaAttributeId::try_from(r.u32()? as u8)?;
        let _charset = r.u16()?;
        let len = r.u16()? as usize;
        let raw = r.take(len)?;
        let value = decode_text(raw, limit)?;
        attrs.push(MediaAttribute { id, value });
    }
    Ok(attrs)
}

fn decode_text(raw: &[u8], limit: &TextLimit) -> Result<String> {
    limit.apply(String::from_utf8_lossy(raw).into_owned())
}

/// An outbound (or peer-initiated inbound) control-channel command payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    GetCapabilities {
        capability_id: u8,
    },
    GetElementAttributes {
        /// 0 on the wire means the currently playing element
        identifier: u64,
        attrs: AttributeRequest,
    },
    GetPlayStatus,
    RegisterNotification {
        event: EventId,
        /// Position-change granularity in ms; only meaningful for
        /// PlaybackPosChanged, zero otherwise
        playback_interval: u32,
    },
    SetAbsoluteVolume {
        volume: u8,
    },
    SetAddressedPlayer {
        player_id: u16,
    },
    PlayItem {
        scope: Scope,
        uid: Uid,
        uid_counter: u16,
    },
    AddToNowPlaying {
        scope: Scope,
        uid: Uid,
        uid_counter: u16,
    },
}

impl ControlCommand {
    /// The PDU id this command encodes to
    pub fn pdu_id(&self) -> PduId {
        match self {
            ControlCommand::GetCapabilities { .. } => PduId::GetCapabilities,
            ControlCommand::GetElementAttributes { .. } => PduId::GetElementAttributes,
            ControlCommand::GetPlayStatus => PduId::GetPlayStatus,
            ControlCommand::RegisterNotification { .. } => PduId::RegisterNotification,
            ControlCommand::SetAbsoluteVolume { .. } => PduId::SetAbsoluteVolume,
            ControlCommand::SetAddressedPlayer { .. } => PduId::SetAddressedPlayer,
            ControlCommand::PlayItem { .. } => PduId::PlayItem,
            ControlCommand::AddToNowPlaying { .. } => PduId::AddToNowPlaying,
        }
    }

    /// The AV/C ctype this command is sent with
    pub fn ctype(&self) -> CType {
        match self {
            ControlCommand::GetCapabilities { .. }
            | ControlCommand::GetElementAttributes { .. }
            | ControlCommand::GetPlayStatus => CType::Status,
            ControlCommand::RegisterNotification { .. } => CType::Notify,
            ControlCommand::SetAbsoluteVolume { .. }
            | ControlCommand::SetAddressedPlayer { .. }
            | ControlCommand::PlayItem { .. }
            | ControlCommand::AddToNowPlaying { .. } => CType::Control,
        }
    }

    /// Encode the parameter payload
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlCommand::GetCapabilities { capability_id } => vec![*capability_id],
            ControlCommand::GetElementAttributes { identifier, attrs } => {
                let mut out = Vec::with_capacity(9 + attrs.ids().len() * 4);
                out.extend_from_slice(&identifier.to_be_bytes());
                encode_attribute_request(&mut out, attrs);
                out
            }
            ControlCommand::GetPlayStatus => Vec::new(),
            ControlCommand::RegisterNotification {
                event,
                playback_interval,
            } => {
                let mut out = Vec::with_capacity(5);
                out.push(event.raw());
                out.extend_from_slice(&playback_interval.to_be_bytes());
                out
            }
            ControlCommand::SetAbsoluteVolume { volume } => vec![volume & 0x7f],
            ControlCommand::SetAddressedPlayer { player_id } => player_id.to_be_bytes().to_vec(),
            ControlCommand::PlayItem {
                scope,
                uid,
                uid_counter,
            }
            | ControlCommand::AddToNowPlaying {
                scope,
                uid,
                uid_counter,
            } => {
                let mut out = Vec::with_capacity(11);
                out.push(scope.raw());
                out.extend_from_slice(uid.as_bytes());
                out.extend_from_slice(&uid_counter.to_be_bytes());
                out
            }
        }
    }

    /// Decode a peer-initiated command payload
    pub fn decode(pdu_id: PduId, params: &[u8]) -> Result<Self> {
        let mut r = Reader::new(params);
        let cmd = match pdu_id {
            PduId::GetCapabilities => ControlCommand::GetCapabilities {
                capability_id: r.u8()?,
            },
            PduId::GetElementAttributes => {
                let identifier = r.u64()?;
                let attrs = decode_attribute_request(&mut r)?;
                ControlCommand::GetElementAttributes { identifier, attrs }
            }
            PduId::GetPlayStatus => ControlCommand::GetPlayStatus,
            PduId::RegisterNotification => ControlCommand::RegisterNotification {
                event: EventId::try_from(r.u8()?)?,
                playback_interval: r.u32()?,
            },
            PduId::SetAbsoluteVolume => ControlCommand::SetAbsoluteVolume {
                volume: r.u8()? & 0x7f,
            },
            PduId::SetAddressedPlayer => ControlCommand::SetAddressedPlayer {
                player_id: r.u16()?,
            },
            PduId::PlayItem => ControlCommand::PlayItem {
                scope: Scope::try_from(r.u8()?)?,
                uid: r.uid()?,
                uid_counter: r.u16()?,
            },
            PduId::AddToNowPlaying => ControlCommand::AddToNowPlaying {
                scope: Scope::try_from(r.u8()?)?,
                uid: r.uid()?,
                uid_counter: r.u16()?,
            },
            other => {
                return Err(AvrcpError::decode(format!(
                    "{:?} is not a control command this engine decodes",
                    other
                )))
            }
        };
        r.finish()?;
        Ok(cmd)
    }
}

/// The payload of a register-notification response, one variant per event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    PlaybackStatusChanged(PlayStatus),
    TrackChanged(Uid),
    TrackReachedEnd,
    TrackReachedStart,
    PlaybackPosChanged(u32),
    BattStatusChanged(u8),
    SystemStatusChanged(u8),
    PlayerApplicationSettingChanged(Vec<(u8, u8)>),
    NowPlayingContentChanged,
    AvailablePlayersChanged,
    AddressedPlayerChanged { player_id: u16, uid_counter: u16 },
    UidsChanged { uid_counter: u16 },
    VolumeChanged(u8),
}

impl NotificationEvent {
    /// The event id this payload belongs to
    pub fn event_id(&self) -> EventId {
        match self {
            NotificationEvent::PlaybackStatusChanged(_) => EventId::PlaybackStatusChanged,
            NotificationEvent::TrackChanged(_) => EventId::TrackChanged,
            NotificationEvent::TrackReachedEnd => EventId::TrackReachedEnd,
            NotificationEvent::TrackReachedStart => EventId::TrackReachedStart,
            NotificationEvent::PlaybackPosChanged(_) => EventId::PlaybackPosChanged,
            NotificationEvent::BattStatusChanged(_) => EventId::BattStatusChanged,
            NotificationEvent::SystemStatusChanged(_) => EventId::SystemStatusChanged,
            NotificationEvent::PlayerApplicationSettingChanged(_) => {
                EventId::PlayerApplicationSettingChanged
            }
            NotificationEvent::NowPlayingContentChanged => EventId::NowPlayingContentChanged,
            NotificationEvent::AvailablePlayersChanged => EventId::AvailablePlayersChanged,
            NotificationEvent::AddressedPlayerChanged { .. } => EventId::AddressedPlayerChanged,
            NotificationEvent::UidsChanged { .. } => EventId::UidsChanged,
            NotificationEvent::VolumeChanged(_) => EventId::VolumeChanged,
        }
    }

    /// Encode event id plus event-specific payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.event_id().raw()];
        match self {
            NotificationEvent::PlaybackStatusChanged(status) => out.push(status.raw()),
            NotificationEvent::TrackChanged(uid) => out.extend_from_slice(uid.as_bytes()),
            NotificationEvent::TrackReachedEnd
            | NotificationEvent::TrackReachedStart
            | NotificationEvent::NowPlayingContentChanged
            | NotificationEvent::AvailablePlayersChanged => {}
            NotificationEvent::PlaybackPosChanged(pos) => {
                out.extend_from_slice(&pos.to_be_bytes())
            }
            NotificationEvent::BattStatusChanged(status)
            | NotificationEvent::SystemStatusChanged(status) => out.push(*status),
            NotificationEvent::PlayerApplicationSettingChanged(settings) => {
                out.push(settings.len() as u8);
                for (attr, value) in settings {
                    out.push(*attr);
                    out.push(*value);
                }
            }
            NotificationEvent::AddressedPlayerChanged {
                player_id,
                uid_counter,
            } => {
                out.extend_from_slice(&player_id.to_be_bytes());
                out.extend_from_slice(&uid_counter.to_be_bytes());
            }
            NotificationEvent::UidsChanged { uid_counter } => {
                out.extend_from_slice(&uid_counter.to_be_bytes())
            }
            NotificationEvent::VolumeChanged(volume) => out.push(volume & 0x7f),
        }
        out
    }

    /// Decode event id plus event-specific payload
    pub fn decode(params: &[u8]) -> Result<Self> {
        let mut r = Reader::new(params);
        let event = EventId::try_from(r.u8()?)?;
        let decoded = match event {
            EventId::PlaybackStatusChanged => {
                NotificationEvent::PlaybackStatusChanged(PlayStatus::try_from(r.u8()?)?)
            }
            EventId::TrackChanged => NotificationEvent::TrackChanged(r.uid()?),
            EventId::TrackReachedEnd => NotificationEvent::TrackReachedEnd,
            EventId::TrackReachedStart => NotificationEvent::TrackReachedStart,
            EventId::PlaybackPosChanged => NotificationEvent::PlaybackPosChanged(r.u32()?),
            EventId::BattStatusChanged => NotificationEvent::BattStatusChanged(r.u8()?),
            EventId::SystemStatusChanged => NotificationEvent::SystemStatusChanged(r.u8()?),
            EventId::PlayerApplicationSettingChanged => {
                let count = r.u8()? as usize;
                let mut settings = Vec::with_capacity(count);
                for _ in 0..count {
                    settings.push((r.u8()?, r.u8()?));
                }
                NotificationEvent::PlayerApplicationSettingChanged(settings)
            }
            EventId::NowPlayingContentChanged => NotificationEvent::NowPlayingContentChanged,
            EventId::AvailablePlayersChanged => NotificationEvent::AvailablePlayersChanged,
            EventId::AddressedPlayerChanged => NotificationEvent::AddressedPlayerChanged {
                player_id: r.u16()?,
                uid_counter: r.u16()?,
            },
            EventId::UidsChanged => NotificationEvent::UidsChanged {
                uid_counter: r.u16()?,
            },
            EventId::VolumeChanged => NotificationEvent::VolumeChanged(r.u8()? & 0x7f),
        };
        r.finish()?;
        Ok(decoded)
    }
}

/// A control-channel response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Capabilities { events: Vec<EventId> },
    ElementAttributes { attributes: Vec<MediaAttribute> },
    PlayStatus {
        song_length_ms: u32,
        song_position_ms: u32,
        status: PlayStatus,
    },
    Notification(NotificationEvent),
    AbsoluteVolume { volume: u8 },
    /// Single status byte: SetAddressedPlayer, PlayItem, AddToNowPlaying
    Status { status: StatusCode },
    /// A rejected response: the status code explaining why
    Rejected { status: StatusCode },
}

impl ControlResponse {
    /// Encode the parameter payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            ControlResponse::Capabilities { events } => {
                let mut out = Vec::with_capacity(2 + events.len());
                out.push(CAPABILITY_EVENTS_SUPPORTED);
                out.push(events.len() as u8);
                out.extend(events.iter().map(|e| e.raw()));
                out
            }
            ControlResponse::ElementAttributes { attributes } => {
                let mut out = Vec::new();
                encode_attribute_values(&mut out, attributes)?;
                out
            }
            ControlResponse::PlayStatus {
                song_length_ms,
                song_position_ms,
                status,
            } => {
                let mut out = Vec::with_capacity(9);
                out.extend_from_slice(&song_length_ms.to_be_bytes());
                out.extend_from_slice(&song_position_ms.to_be_bytes());
                out.push(status.raw());
                out
            }
            ControlResponse::Notification(event) => event.encode(),
            ControlResponse::AbsoluteVolume { volume } => vec![volume & 0x7f],
            ControlResponse::Status { status } | ControlResponse::Rejected { status } => {
                vec![status.raw()]
            }
        })
    }

    /// Decode a response payload for the PDU it answers
    pub fn decode(
        pdu_id: PduId,
        params: &[u8],
        limit: &TextLimit,
    ) -> Result<Self> {
        let mut r = Reader::new(params);
        let rsp = match pdu_id {
            PduId::GetCapabilities => {
                let capability_id = r.u8()?;
                if capability_id != CAPABILITY_EVENTS_SUPPORTED {
                    return Err(AvrcpError::decode(format!(
                        "unsupported capability id 0x{:02x}",
                        capability_id
                    )));
                }
                let count = r.u8()? as usize;
                let mut events = Vec::with_capacity(count);
                for _ in 0..count {
                    events.push(EventId::try_from(r.u8()?)?);
                }
                ControlResponse::Capabilities { events }
            }
            PduId::GetElementAttributes => ControlResponse::ElementAttributes {
                attributes: decode_attribute_values(&mut r, limit)?,
            },
            PduId::GetPlayStatus => ControlResponse::PlayStatus {
                song_length_ms: r.u32()?,
                song_position_ms: r.u32()?,
                status: PlayStatus::try_from(r.u8()?)?,
            },
            PduId::RegisterNotification => {
                let event = NotificationEvent::decode(params)?;
                // NotificationEvent::decode consumed everything
                return Ok(ControlResponse::Notification(event));
            }
            PduId::SetAbsoluteVolume => ControlResponse::AbsoluteVolume {
                volume: r.u8()? & 0x7f,
            },
            PduId::SetAddressedPlayer | PduId::PlayItem | PduId::AddToNowPlaying => {
                ControlResponse::Status {
                    status: StatusCode::try_from(r.u8()?)?,
                }
            }
            other => {
                return Err(AvrcpError::decode(format!(
                    "{:?} is not a control response this engine decodes",
                    other
                )))
            }
        };
        r.finish()?;
        Ok(rsp)
    }
}

/// A browsing-channel PDU, command or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowsePdu {
    SetBrowsedPlayerCommand {
        player_id: u16,
    },
    SetBrowsedPlayerResponse {
        status: StatusCode,
        uid_counter: u16,
        num_items: u32,
        folder_path: Vec<String>,
    },
    GetFolderItemsCommand {
        scope: Scope,
        start: u32,
        end: u32,
        attrs: AttributeRequest,
    },
    GetFolderItemsResponse {
        status: StatusCode,
        uid_counter: u16,
        items: Vec<BrowseItem>,
    },
    ChangePathCommand {
        uid_counter: u16,
        direction: Direction,
        folder_uid: Uid,
    },
    ChangePathResponse {
        status: StatusCode,
        num_items: u32,
    },
    GetItemAttributesCommand {
        scope: Scope,
        uid: Uid,
        uid_counter: u16,
        attrs: AttributeRequest,
    },
    GetItemAttributesResponse {
        status: StatusCode,
        attributes: Vec<MediaAttribute>,
    },
    GetTotalNumberOfItemsCommand {
        scope: Scope,
    },
    GetTotalNumberOfItemsResponse {
        status: StatusCode,
        uid_counter: u16,
        num_items: u32,
    },
    SearchCommand {
        text: String,
    },
    SearchResponse {
        status: StatusCode,
        uid_counter: u16,
        num_items: u32,
    },
    GeneralReject {
        status: StatusCode,
    },
}

impl BrowsePdu {
    /// The PDU id for the frame header
    pub fn pdu_id(&self) -> PduId {
        match self {
            BrowsePdu::SetBrowsedPlayerCommand { .. }
            | BrowsePdu::SetBrowsedPlayerResponse { .. } => PduId::SetBrowsedPlayer,
            BrowsePdu::GetFolderItemsCommand { .. } | BrowsePdu::GetFolderItemsResponse { .. } => {
                PduId::GetFolderItems
            }
            BrowsePdu::ChangePathCommand { .. } | BrowsePdu::ChangePathResponse { .. } => {
                PduId::ChangePath
            }
            BrowsePdu::GetItemAttributesCommand { .. }
            | BrowsePdu::GetItemAttributesResponse { .. } => PduId::GetItemAttributes,
            BrowsePdu::GetTotalNumberOfItemsCommand { .. }
            | BrowsePdu::GetTotalNumberOfItemsResponse { .. } => PduId::GetTotalNumberOfItems,
            BrowsePdu::SearchCommand { .. } | BrowsePdu::SearchResponse { .. } => PduId::Search,
            BrowsePdu::GeneralReject { .. } => PduId::GeneralReject,
        }
    }

    /// Whether this variant is a response
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            BrowsePdu::SetBrowsedPlayerResponse { .. }
                | BrowsePdu::GetFolderItemsResponse { .. }
                | BrowsePdu::ChangePathResponse { .. }
                | BrowsePdu::GetItemAttributesResponse { .. }
                | BrowsePdu::GetTotalNumberOfItemsResponse { .. }
                | BrowsePdu::SearchResponse { .. }
                | BrowsePdu::GeneralReject { .. }
        )
    }

    /// Encode the parameter payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            BrowsePdu::SetBrowsedPlayerCommand { player_id } => player_id.to_be_bytes().to_vec(),
            BrowsePdu::SetBrowsedPlayerResponse {
                status,
                uid_counter,
                num_items,
                folder_path,
            } => {
                let mut out = vec![status.raw()];
                out.extend_from_slice(&uid_counter.to_be_bytes());
                out.extend_from_slice(&num_items.to_be_bytes());
                out.extend_from_slice(&CHARSET_UTF8.to_be_bytes());
                out.push(folder_path.len() as u8);
                for name in folder_path {
                    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
                    out.extend_from_slice(name.as_bytes());
                }
                out
            }
            BrowsePdu::GetFolderItemsCommand {
                scope,
                start,
                end,
                attrs,
            } => {
                let mut out = Vec::with_capacity(10 + attrs.ids().len() * 4);
                out.push(scope.raw());
                out.extend_from_slice(&start.to_be_bytes());
                out.extend_from_slice(&end.to_be_bytes());
                encode_attribute_request(&mut out, attrs);
                out
            }
            BrowsePdu::GetFolderItemsResponse {
                status,
                uid_counter,
                items,
            } => {
                let mut out = vec![status.raw()];
                if *status == StatusCode::Success {
                    out.extend_from_slice(&uid_counter.to_be_bytes());
                    out.extend_from_slice(&(items.len() as u16).to_be_bytes());
                    out.extend_from_slice(&encode_items(items)?);
                }
                out
            }
            BrowsePdu::ChangePathCommand {
                uid_counter,
                direction,
                folder_uid,
            } => {
                let mut out = Vec::with_capacity(11);
                out.extend_from_slice(&uid_counter.to_be_bytes());
                out.push(direction.raw());
                out.extend_from_slice(folder_uid.as_bytes());
                out
            }
            BrowsePdu::ChangePathResponse { status, num_items } => {
                let mut out = vec![status.raw()];
                if *status == StatusCode::Success {
                    out.extend_from_slice(&num_items.to_be_bytes());
                }
                out
            }
            BrowsePdu::GetItemAttributesCommand {
                scope,
                uid,
                uid_counter,
                attrs,
            } => {
                let mut out = Vec::with_capacity(12 + attrs.ids().len() * 4);
                out.push(scope.raw());
                out.extend_from_slice(uid.as_bytes());
                out.extend_from_slice(&uid_counter.to_be_bytes());
                encode_attribute_request(&mut out, attrs);
                out
            }
            BrowsePdu::GetItemAttributesResponse { status, attributes } => {
                let mut out = vec![status.raw()];
                encode_attribute_values(&mut out, attributes)?;
                out
            }
            BrowsePdu::GetTotalNumberOfItemsCommand { scope } => vec![scope.raw()],
            BrowsePdu::GetTotalNumberOfItemsResponse {
                status,
                uid_counter,
                num_items,
            }
            | BrowsePdu::SearchResponse {
                status,
                uid_counter,
                num_items,
            } => {
                let mut out = vec![status.raw()];
                out.extend_from_slice(&uid_counter.to_be_bytes());
                out.extend_from_slice(&num_items.to_be_bytes());
                out
            }
            BrowsePdu::SearchCommand { text } => {
                if text.len() > u16::MAX as usize {
                    return Err(AvrcpError::decode("search string exceeds 16-bit length"));
                }
                let mut out = Vec::with_capacity(4 + text.len());
                out.extend_from_slice(&CHARSET_UTF8.to_be_bytes());
                out.extend_from_slice(&(text.len() as u16).to_be_bytes());
                out.extend_from_slice(text.as_bytes());
                out
            }
            BrowsePdu::GeneralReject { status } => vec![status.raw()],
        })
    }

    /// Decode a payload, picking the command or response layout
    pub fn decode(
        pdu_id: PduId,
        is_response: bool,
        params: &[u8],
        limit: &TextLimit,
    ) -> Result<Self> {
        let mut r = Reader::new(params);
        let pdu = match (pdu_id, is_response) {
            (PduId::SetBrowsedPlayer, false) => BrowsePdu::SetBrowsedPlayerCommand {
                player_id: r.u16()?,
            },
            (PduId::SetBrowsedPlayer, true) => {
                let status = StatusCode::try_from(r.u8()?)?;
                let uid_counter = r.u16()?;
                let num_items = r.u32()?;
                let _charset = r.u16()?;
                let depth = r.u8()? as usize;
                let mut folder_path = Vec::with_capacity(depth);
                for _ in 0..depth {
                    let len = r.u16()? as usize;
                    folder_path.push(decode_text(r.take(len)?, limit)?);
                }
                BrowsePdu::SetBrowsedPlayerResponse {
                    status,
                    uid_counter,
                    num_items,
                    folder_path,
                }
            }
            (PduId::GetFolderItems, false) => BrowsePdu::GetFolderItemsCommand {
                scope: Scope::try_from(r.u8()?)?,
                start: r.u32()?,
                end: r.u32()?,
                attrs: decode_attribute_request(&mut r)?,
            },
            (PduId::GetFolderItems, true) => {
                let status = StatusCode::try_from(r.u8()?)?;
                if status != StatusCode::Success {
                    r.finish()?;
                    return Ok(BrowsePdu::GetFolderItemsResponse {
                        status,
                        uid_counter: 0,
                        items: Vec::new(),
                    });
                }
                let uid_counter = r.u16()?;
                let count = r.u16()? as usize;
                let rest = r.take(r.remaining())?;
                BrowsePdu::GetFolderItemsResponse {
                    status,
                    uid_counter,
                    items: decode_items(count, rest, limit)?,
                }
            }
            (PduId::ChangePath, false) => BrowsePdu::ChangePathCommand {
                uid_counter: r.u16()?,
                direction: Direction::try_from(r.u8()?)?,
                folder_uid: r.uid()?,
            },
            (PduId::ChangePath, true) => {
                let status = StatusCode::try_from(r.u8()?)?;
                let num_items = if status == StatusCode::Success {
                    r.u32()?
                } else {
                    0
                };
                BrowsePdu::ChangePathResponse { status, num_items }
            }
            (PduId::GetItemAttributes, false) => BrowsePdu::GetItemAttributesCommand {
                scope: Scope::try_from(r.u8()?)?,
                uid: r.uid()?,
                uid_counter: r.u16()?,
                attrs: decode_attribute_request(&mut r)?,
            },
            (PduId::GetItemAttributes, true) => BrowsePdu::GetItemAttributesResponse {
                status: StatusCode::try_from(r.u8()?)?,
                attributes: decode_attribute_values(&mut r, limit)?,
            },
            (PduId::GetTotalNumberOfItems, false) => BrowsePdu::GetTotalNumberOfItemsCommand {
                scope: Scope::try_from(r.u8()?)?,
            },
            (PduId::GetTotalNumberOfItems, true) => BrowsePdu::GetTotalNumberOfItemsResponse {
                status: StatusCode::try_from(r.u8()?)?,
                uid_counter: r.u16()?,
                num_items: r.u32()?,
            },
            (PduId::Search, false) => {
                let _charset = r.u16()?;
                let len = r.u16()? as usize;
                let text = decode_text(r.take(len)?, limit)?;
                BrowsePdu::SearchCommand { text }
            }
            (PduId::Search, true) => BrowsePdu::SearchResponse {
                status: StatusCode::try_from(r.u8()?)?,
                uid_counter: r.u16()?,
                num_items: r.u32()?,
            },
            (PduId::GeneralReject, _) => BrowsePdu::GeneralReject {
                status: StatusCode::try_from(r.u8()?)?,
            },
            (other, _) => {
                return Err(AvrcpError::decode(format!(
                    "{:?} is not a browsing PDU",
                    other
                )))
            }
        };
        r.finish()?;
        Ok(pdu)
    }
}
