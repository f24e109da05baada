//! Browse item model
//!
//! The three discriminated item kinds returned by GetFolderItems: media
//! player, folder and media element. Each is a tagged variant rather than
//! a class hierarchy; the wire discriminator is `ItemType`.
//!
//! Wire layout per AVRCP 1.6 §6.10.2: every item starts with the item
//! type byte and a big-endian u16 item length, followed by type-specific
//! fields. Names and attribute values are charset-tagged, length-prefixed
//! text; this engine emits UTF-8 only and applies the configured oversize
//! policy on decode.

use crate::config::OversizeTextPolicy;
use crate::error::{AvrcpError, Result};
use crate::protocol::types::{
    FolderType, ItemType, MediaAttributeId, MediaType, PlayStatus, Uid, CHARSET_UTF8,
};
use crate::protocol::UID_SIZE;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Bound and policy for decoded text fields
#[derive(Debug, Clone, Copy)]
pub struct TextLimit {
    /// Maximum accepted text length in bytes
    pub max_len: usize,
    /// What to do beyond the maximum
    pub policy: OversizeTextPolicy,
}

impl Default for TextLimit {
    fn default() -> Self {
        Self {
            max_len: crate::config::DEFAULT_MAX_ATTRIBUTE_TEXT_LEN,
            policy: OversizeTextPolicy::Truncate,
        }
    }
}

impl TextLimit {
    pub(crate) fn apply(&self, text: String) -> Result<String> {
        if text.len() <= self.max_len {
            return Ok(text);
        }
        match self.policy {
            OversizeTextPolicy::Reject => Err(AvrcpError::decode(format!(
                "text field of {} bytes exceeds maximum {}",
                text.len(),
                self.max_len
            ))),
            OversizeTextPolicy::Truncate => {
                let mut end = self.max_len;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                debug!(len = text.len(), max = self.max_len, "truncating oversize text field");
                Ok(text[..end].to_string())
            }
        }
    }
}

/// One media attribute: id plus UTF-8 text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttribute {
    pub id: MediaAttributeId,
    pub value: String,
}

/// A media player entry from the MediaPlayerList scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerItem {
    pub player_id: u16,
    pub major_type: u8,
    pub sub_type: u32,
    pub play_status: PlayStatus,
    /// 128-bit feature bitmask, as sent on the wire
    pub features: [u8; 16],
    pub name: String,
}

/// A folder entry from the virtual filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderItem {
    pub uid: Uid,
    pub folder_type: FolderType,
    pub is_playable: bool,
    pub name: String,
}

/// A playable media element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaElementItem {
    pub uid: Uid,
    pub media_type: MediaType,
    pub name: String,
    pub attributes: Vec<MediaAttribute>,
}

/// A browse item of any kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowseItem {
    Player(PlayerItem),
    Folder(FolderItem),
    MediaElement(MediaElementItem),
}

impl BrowseItem {
    /// The wire discriminator for this item
    pub fn item_type(&self) -> ItemType {
        match self {
            BrowseItem::Player(_) => ItemType::MediaPlayer,
            BrowseItem::Folder(_) => ItemType::Folder,
            BrowseItem::MediaElement(_) => ItemType::MediaElement,
        }
    }

    /// The display name of the item
    pub fn name(&self) -> &str {
        match self {
            BrowseItem::Player(p) => &p.name,
            BrowseItem::Folder(f) => &f.name,
            BrowseItem::MediaElement(m) => &m.name,
        }
    }

    /// Encode with the item-type/item-length header
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            BrowseItem::Player(p) => encode_player(p)?,
            BrowseItem::Folder(f) => encode_folder(f)?,
            BrowseItem::MediaElement(m) => encode_media_element(m)?,
        };
        if payload.len() > u16::MAX as usize {
            return Err(AvrcpError::decode("item payload exceeds 16-bit length"));
        }
        let mut out = Vec::with_capacity(3 + payload.len());
        out.push(self.item_type().raw());
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode one item from the front of `bytes`, returning the item and
    /// the number of bytes consumed
    pub fn decode(bytes: &[u8], limit: &TextLimit) -> Result<(Self, usize)> {
        if bytes.len() < 3 {
            return Err(AvrcpError::decode("browse item header truncated"));
        }
        let item_type = ItemType::try_from(bytes[0])?;
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let payload = bytes
            .get(3..3 + len)
            .ok_or_else(|| AvrcpError::decode("browse item payload truncated"))?;
        let item = match item_type {
            ItemType::MediaPlayer => BrowseItem::Player(decode_player(payload, limit)?),
            ItemType::Folder => BrowseItem::Folder(decode_folder(payload, limit)?),
            ItemType::MediaElement => {
                BrowseItem::MediaElement(decode_media_element(payload, limit)?)
            }
        };
        Ok((item, 3 + len))
    }
}

/// Encode a list of items back to back
pub fn encode_items(items: &[BrowseItem]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for item in items {
        out.extend_from_slice(&item.encode()?);
    }
    Ok(out)
}

/// Decode exactly `count` items, rejecting trailing bytes
pub fn decode_items(count: usize, bytes: &[u8], limit: &TextLimit) -> Result<Vec<BrowseItem>> {
    let mut items = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let (item, used) = BrowseItem::decode(&bytes[offset..], limit)?;
        items.push(item);
        offset += used;
    }
    if offset != bytes.len() {
        return Err(AvrcpError::decode(format!(
            "{} trailing bytes after {} items",
            bytes.len() - offset,
            count
        )));
    }
    Ok(items)
}

fn push_text(out: &mut Vec<u8>, text: &str) -> Result<()> {
    if text.len() > u16::MAX as usize {
        return Err(AvrcpError::decode("text field exceeds 16-bit length"));
    }
    out.extend_from_slice(&CHARSET_UTF8.to_be_bytes());
    out.extend_from_slice(&(text.len() as u16).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

/// Parse a charset-tagged, length-prefixed text field. Returns the text
/// and bytes consumed. Non-UTF-8 charsets are decoded lossily; this
/// engine never emits them.
fn take_text(bytes: &[u8], limit: &TextLimit) -> Result<(String, usize)> {
    if bytes.len() < 4 {
        return Err(AvrcpError::decode("text field header truncated"));
    }
    let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let raw = bytes
        .get(4..4 + len)
        .ok_or_else(|| AvrcpError::decode("text field truncated"))?;
    let text = limit.apply(String::from_utf8_lossy(raw).into_owned())?;
    Ok((text, 4 + len))
}

fn encode_player(p: &PlayerItem) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(28 + p.name.len());
    out.extend_from_slice(&p.player_id.to_be_bytes());
    out.push(p.major_type);
    out.extend_from_slice(&p.sub_type.to_be_bytes());
    out.push(p.play_status.raw());
    out.extend_from_slice(&p.features);
    push_text(&mut out, &p.name)?;
    Ok(out)
}

fn decode_player(bytes: &[u8], limit: &TextLimit) -> Result<PlayerItem> {
    if bytes.len() < 28 {
        return Err(AvrcpError::decode("player item truncated"));
    }
    let features: [u8; 16] = bytes[8..24].try_into().expect("slice length checked");
    let (name, _) = take_text(&bytes[24..], limit)?;
    Ok(PlayerItem {
        player_id: u16::from_be_bytes([bytes[0], bytes[1]]),
        major_type: bytes[2],
        sub_type: u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        play_status: PlayStatus::try_from(bytes[7])?,
        features,
        name,
    })
}

fn encode_folder(f: &FolderItem) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(14 + f.name.len());
    out.extend_from_slice(f.uid.as_bytes());
    out.push(f.folder_type.raw());
    out.push(f.is_playable as u8);
    push_text(&mut out, &f.name)?;
    Ok(out)
}

fn decode_folder(bytes: &[u8], limit: &TextLimit) -> Result<FolderItem> {
    if bytes.len() < 14 {
        return Err(AvrcpError::decode("folder item truncated"));
    }
    let uid = Uid::new(bytes[..UID_SIZE].try_into().expect("slice length checked"));
    let (name, _) = take_text(&bytes[10..], limit)?;
    Ok(FolderItem {
        uid,
        folder_type: FolderType::try_from(bytes[8])?,
        is_playable: bytes[9] != 0,
        name,
    })
}

fn encode_media_element(m: &MediaElementItem) -> Result<Vec<u8>> {
    if m.attributes.len() > u8::MAX as usize {
        return Err(AvrcpError::decode("too many media attributes"));
    }
    let mut out = Vec::with_capacity(14 + m.name.len());
    out.extend_from_slice(m.uid.as_bytes());
    out.push(m.media_type.raw());
    push_text(&mut out, &m.name)?;
    out.push(m.attributes.len() as u8);
    for attr in &m.attributes {
        out.extend_from_slice(&(attr.id.raw() as u32).to_be_bytes());
        push_text(&mut out, &attr.value)?;
    }
    Ok(out)
}

fn decode_media_element(bytes: &[u8], limit: &TextLimit) -> Result<MediaElementItem> {
    if bytes.len() < 13 {
        return Err(AvrcpError::decode("media element item truncated"));
    }
    let uid = Uid::new(bytes[..UID_SIZE].try_into().expect("slice length checked"));
    let media_type = MediaType::try_from(bytes[8])?;
    let (name, used) = take_text(&bytes[9..], limit)?;
    let mut offset = 9 + used;
    let num_attrs = *bytes
        .get(offset)
        .ok_or_else(|| AvrcpError::decode("media element attribute count truncated"))? as usize;
    offset += 1;
    let mut attributes = Vec::with_capacity(num_attrs);
    for _ in 0..num_attrs {
        let id_bytes = bytes
            .get(offset..offset + 4)
            .ok_or_else(|| AvrcpError::decode("media attribute id truncated"))?;
        let raw_id = u32::from_be_bytes(id_bytes.try_into().expect("slice length checked"));
        let id = MediaAttributeId::try_from(raw_id as u8)?;
        offset += 4;
        let (value, used) = take_text(&bytes[offset..], limit)?;
        offset += used;
        attributes.push(MediaAttribute { id, value });
    }
    Ok(MediaElementItem {
        uid,
        media_type,
        name,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_element() -> MediaElementItem {
        MediaElementItem {
            uid: Uid::new([0, 0, 0, 0, 0, 0, 0, 9]),
            media_type: MediaType::Audio,
            name: "Harvest Moon".to_string(),
            attributes: vec![
                MediaAttribute {
                    id: MediaAttributeId::ArtistName,
                    value: "Neil Young".to_string(),
                },
                MediaAttribute {
                    id: MediaAttributeId::PlayingTime,
                    value: "305000".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_media_element_roundtrip() {
        let item = BrowseItem::MediaElement(sample_element());
        let bytes = item.encode().unwrap();
        let (decoded, used) = BrowseItem::decode(&bytes, &TextLimit::default()).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_folder_roundtrip() {
        let item = BrowseItem::Folder(FolderItem {
            uid: Uid::new([1; 8]),
            folder_type: FolderType::Albums,
            is_playable: true,
            name: "Albums".to_string(),
        });
        let bytes = item.encode().unwrap();
        let (decoded, _) = BrowseItem::decode(&bytes, &TextLimit::default()).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_player_roundtrip() {
        let item = BrowseItem::Player(PlayerItem {
            player_id: 2,
            major_type: 0x01,
            sub_type: 0,
            play_status: PlayStatus::Paused,
            features: [0xb7; 16],
            name: "Player".to_string(),
        });
        let bytes = item.encode().unwrap();
        let (decoded, _) = BrowseItem::decode(&bytes, &TextLimit::default()).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_item_list_roundtrip() {
        let items = vec![
            BrowseItem::Folder(FolderItem {
                uid: Uid::new([2; 8]),
                folder_type: FolderType::Artists,
                is_playable: false,
                name: "Artists".to_string(),
            }),
            BrowseItem::MediaElement(sample_element()),
        ];
        let bytes = encode_items(&items).unwrap();
        let decoded = decode_items(2, &bytes, &TextLimit::default()).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn test_decode_items_rejects_trailing_garbage() {
        let items = vec![BrowseItem::Folder(FolderItem {
            uid: Uid::new([2; 8]),
            folder_type: FolderType::Mixed,
            is_playable: false,
            name: "x".to_string(),
        })];
        let mut bytes = encode_items(&items).unwrap();
        bytes.push(0xee);
        assert!(decode_items(1, &bytes, &TextLimit::default()).is_err());
    }

    #[test]
    fn test_oversize_text_truncates() {
        let limit = TextLimit {
            max_len: 4,
            policy: OversizeTextPolicy::Truncate,
        };
        let item = BrowseItem::Folder(FolderItem {
            uid: Uid::new([0; 8]),
            folder_type: FolderType::Mixed,
            is_playable: false,
            name: "longer than four".to_string(),
        });
        let bytes = item.encode().unwrap();
        let (decoded, _) = BrowseItem::decode(&bytes, &limit).unwrap();
        assert_eq!(decoded.name(), "long");
    }

    #[test]
    fn test_oversize_text_rejects() {
        let limit = TextLimit {
            max_len: 4,
            policy: OversizeTextPolicy::Reject,
        };
        let item = BrowseItem::Folder(FolderItem {
            uid: Uid::new([0; 8]),
            folder_type: FolderType::Mixed,
            is_playable: false,
            name: "longer than four".to_string(),
        });
        let bytes = item.encode().unwrap();
        assert!(BrowseItem::decode(&bytes, &limit).is_err());
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let limit = TextLimit {
            max_len: 5,
            policy: OversizeTextPolicy::Truncate,
        };
        // 'é' is two bytes; byte 5 falls inside the second 'é'
        let text = limit.apply("abcéé".to_string()).unwrap();
        assert_eq!(text, "abcé");
    }
}
