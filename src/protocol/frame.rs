//! AVRCP frame codec
//!
//! Two wire formats share this module:
//!
//! - **Control channel**: an AVCTP label byte followed by an AV/C frame,
//!   either vendor-dependent (opcode 0x00: company id, PDU id, packet
//!   type, big-endian parameter length, parameters) or PASS THROUGH
//!   (opcode 0x7c: key operation byte, zero-length data field).
//! - **Browsing channel**: an AVCTP label byte followed by PDU id,
//!   big-endian parameter length and parameters. The browsing channel
//!   never fragments; oversize payloads are an encode error.
//!
//! Vendor-dependent parameters exceeding the negotiated MTU are split
//! across Start/Continue/End packets; `Reassembler` rebuilds the logical
//! PDU before anything reaches the dispatcher.
//!
//! The AVCTP PID field and L2CAP framing belong to the transport and are
//! not modeled here.

use crate::error::{AvrcpError, Result};
use crate::protocol::types::{AvcPanelKey, KeyState, PacketType, PduId};
use crate::protocol::{BT_SIG_COMPANY_ID, OPCODE_PASSTHROUGH, OPCODE_VENDOR_DEPENDENT, SUBUNIT_PANEL};
use tracing::warn;

/// Bytes of a vendor-dependent frame before the parameters:
/// AVCTP label byte, AV/C code, subunit, opcode, 3-byte company id,
/// PDU id, packet type, 2-byte parameter length.
pub const VENDOR_HEADER_LEN: usize = 11;

/// Bytes of a browsing frame before the parameters:
/// AVCTP label byte, PDU id, 2-byte parameter length.
pub const BROWSE_HEADER_LEN: usize = 4;

const CR_RESPONSE_BIT: u8 = 0x02;

/// One de-framed unit from the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    /// 4-bit AVCTP transaction label
    pub label: u8,
    /// AVCTP command/response bit
    pub is_response: bool,
    /// AV/C payload
    pub body: ControlBody,
}

/// AV/C payload of a control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlBody {
    VendorDependent(VendorDependentFrame),
    Passthrough(PassthroughFrame),
}

/// An AV/C vendor-dependent frame carrying one AVRCP PDU (or one fragment)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorDependentFrame {
    /// AV/C ctype on commands, response code on responses
    pub code: u8,
    /// AVRCP PDU id
    pub pdu_id: PduId,
    /// Single, or the fragment position for oversize metadata responses
    pub packet_type: PacketType,
    /// Raw PDU parameters
    pub params: Vec<u8>,
}

/// An AV/C PASS THROUGH frame: one key code plus press/release state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughFrame {
    /// AV/C ctype on commands, response code on responses
    pub code: u8,
    /// Raw 7-bit key code; may be a key this engine has no name for
    pub key: u8,
    pub state: KeyState,
}

impl PassthroughFrame {
    /// The typed panel key, if the code is one this engine names
    pub fn panel_key(&self) -> Option<AvcPanelKey> {
        AvcPanelKey::try_from(self.key).ok()
    }
}

impl ControlFrame {
    /// Encode to wire bytes
    ///
    /// # Errors
    ///
    /// `AvrcpError::Decode` if vendor-dependent parameters exceed the
    /// 16-bit length field; oversize logical PDUs go through
    /// [`encode_fragmented`](Self::encode_fragmented) instead.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let avctp = (self.label << 4) | if self.is_response { CR_RESPONSE_BIT } else { 0 };
        let out = match &self.body {
            ControlBody::VendorDependent(vd) => {
                if vd.params.len() > u16::MAX as usize {
                    return Err(AvrcpError::decode(format!(
                        "vendor-dependent parameters too long: {} bytes",
                        vd.params.len()
                    )));
                }
                let mut out = Vec::with_capacity(VENDOR_HEADER_LEN + vd.params.len());
                out.push(avctp);
                out.push(vd.code);
                out.push(SUBUNIT_PANEL);
                out.push(OPCODE_VENDOR_DEPENDENT);
                out.extend_from_slice(&BT_SIG_COMPANY_ID);
                out.push(vd.pdu_id.raw());
                out.push(vd.packet_type.raw());
                out.extend_from_slice(&(vd.params.len() as u16).to_be_bytes());
                out.extend_from_slice(&vd.params);
                out
            }
            ControlBody::Passthrough(pt) => {
                // operation byte: state bit in bit 7, key code in bits 6..0
                vec![
                    avctp,
                    pt.code,
                    SUBUNIT_PANEL,
                    OPCODE_PASSTHROUGH,
                    (pt.state.raw() << 7) | (pt.key & 0x7f),
                    0x00,
                ]
            }
        };
        Ok(out)
    }

    /// Decode from wire bytes
    ///
    /// # Errors
    ///
    /// `AvrcpError::Decode` for truncated frames, unknown opcodes, a wrong
    /// company id, or a parameter length that disagrees with the payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(AvrcpError::decode(format!(
                "control frame too short: {} bytes",
                bytes.len()
            )));
        }
        let label = bytes[0] >> 4;
        let is_response = bytes[0] & CR_RESPONSE_BIT != 0;
        let code = bytes[1];
        if bytes[2] != SUBUNIT_PANEL {
            return Err(AvrcpError::decode(format!(
                "unexpected subunit byte 0x{:02x}",
                bytes[2]
            )));
        }
        let body = match bytes[3] {
            OPCODE_VENDOR_DEPENDENT => {
                if bytes.len() < VENDOR_HEADER_LEN {
                    return Err(AvrcpError::decode("vendor-dependent header truncated"));
                }
                if bytes[4..7] != BT_SIG_COMPANY_ID {
                    return Err(AvrcpError::decode(format!(
                        "unexpected company id {:02x}:{:02x}:{:02x}",
                        bytes[4], bytes[5], bytes[6]
                    )));
                }
                let pdu_id = PduId::try_from(bytes[7])?;
                let packet_type = PacketType::try_from(bytes[8] & 0b11)?;
                let param_len = u16::from_be_bytes([bytes[9], bytes[10]]) as usize;
                let params = &bytes[VENDOR_HEADER_LEN..];
                if params.len() != param_len {
                    return Err(AvrcpError::decode(format!(
                        "parameter length mismatch: header says {}, payload is {}",
                        param_len,
                        params.len()
                    )));
                }
                ControlBody::VendorDependent(VendorDependentFrame {
                    code,
                    pdu_id,
                    packet_type,
                    params: params.to_vec(),
                })
            }
            OPCODE_PASSTHROUGH => {
                if bytes.len() < 6 {
                    return Err(AvrcpError::decode("passthrough frame truncated"));
                }
                ControlBody::Passthrough(PassthroughFrame {
                    code,
                    key: bytes[4] & 0x7f,
                    state: KeyState::from_bit(bytes[4] >> 7),
                })
            }
            other => {
                return Err(AvrcpError::decode(format!(
                    "unsupported AV/C opcode 0x{:02x}",
                    other
                )))
            }
        };
        Ok(Self {
            label,
            is_response,
            body,
        })
    }

    /// Encode, splitting vendor-dependent parameters across fragments when
    /// the single-frame encoding would exceed `mtu`
    ///
    /// Passthrough frames always fit and come back as one frame.
    pub fn encode_fragmented(&self, mtu: usize) -> Result<Vec<Vec<u8>>> {
        let vd = match &self.body {
            ControlBody::VendorDependent(vd) => vd,
            ControlBody::Passthrough(_) => return Ok(vec![self.encode()?]),
        };
        if VENDOR_HEADER_LEN + vd.params.len() <= mtu {
            return Ok(vec![self.encode()?]);
        }

        // each fragment must also fit its own 16-bit length field
        let chunk_len = mtu
            .saturating_sub(VENDOR_HEADER_LEN)
            .clamp(1, u16::MAX as usize);
        let chunks: Vec<&[u8]> = vd.params.chunks(chunk_len).collect();
        let last = chunks.len() - 1;
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let packet_type = if i == 0 {
                    PacketType::Start
                } else if i == last {
                    PacketType::End
                } else {
                    PacketType::Continue
                };
                ControlFrame {
                    label: self.label,
                    is_response: self.is_response,
                    body: ControlBody::VendorDependent(VendorDependentFrame {
                        code: vd.code,
                        pdu_id: vd.pdu_id,
                        packet_type,
                        params: chunk.to_vec(),
                    }),
                }
                .encode()
            })
            .collect()
    }
}

/// One de-framed unit from the browsing channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseFrame {
    /// 4-bit AVCTP transaction label
    pub label: u8,
    /// AVCTP command/response bit
    pub is_response: bool,
    /// AVRCP browsing PDU id
    pub pdu_id: PduId,
    /// Raw PDU parameters
    pub params: Vec<u8>,
}

impl BrowseFrame {
    /// Encode to wire bytes
    ///
    /// # Errors
    ///
    /// `AvrcpError::Decode` if the parameters exceed the 16-bit length
    /// field. MTU enforcement happens in the session, which knows the
    /// negotiated value.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.params.len() > u16::MAX as usize {
            return Err(AvrcpError::decode(format!(
                "browse parameters too long: {} bytes",
                self.params.len()
            )));
        }
        let mut out = Vec::with_capacity(BROWSE_HEADER_LEN + self.params.len());
        out.push((self.label << 4) | if self.is_response { CR_RESPONSE_BIT } else { 0 });
        out.push(self.pdu_id.raw());
        out.extend_from_slice(&(self.params.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.params);
        Ok(out)
    }

    /// Decode from wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BROWSE_HEADER_LEN {
            return Err(AvrcpError::decode(format!(
                "browse frame too short: {} bytes",
                bytes.len()
            )));
        }
        let pdu_id = PduId::try_from(bytes[1])?;
        let param_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let params = &bytes[BROWSE_HEADER_LEN..];
        if params.len() != param_len {
            return Err(AvrcpError::decode(format!(
                "parameter length mismatch: header says {}, payload is {}",
                param_len,
                params.len()
            )));
        }
        Ok(Self {
            label: bytes[0] >> 4,
            is_response: bytes[0] & CR_RESPONSE_BIT != 0,
            pdu_id,
            params: params.to_vec(),
        })
    }
}

/// Rebuilds fragmented vendor-dependent PDUs
///
/// Holds at most one open fragment sequence. Any out-of-order fragment
/// aborts the sequence in progress and surfaces a `Fragmentation` error;
/// the caller drops the frame and the session continues.
#[derive(Debug, Default)]
pub struct Reassembler {
    open: Option<VendorDependentFrame>,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fragment sequence is open
    pub fn in_progress(&self) -> bool {
        self.open.is_some()
    }

    /// Feed one vendor-dependent frame
    ///
    /// Returns `Ok(Some(frame))` with a complete logical PDU (packet type
    /// `Single`) when the frame was Single or closed an open sequence,
    /// `Ok(None)` while a sequence is accumulating.
    ///
    /// # Errors
    ///
    /// `AvrcpError::Fragmentation` when a Continue or End arrives with no
    /// open sequence or for a different PDU id, or a Start/Single
    /// interrupts an open sequence. The open sequence is discarded either
    /// way.
    pub fn push(&mut self, frame: VendorDependentFrame) -> Result<Option<VendorDependentFrame>> {
        match frame.packet_type {
            PacketType::Single => {
                if self.open.take().is_some() {
                    warn!(pdu_id = ?frame.pdu_id, "single frame interrupted open fragment sequence");
                    return Err(AvrcpError::fragmentation(
                        "single frame interrupted an open fragment sequence",
                    ));
                }
                Ok(Some(frame))
            }
            PacketType::Start => {
                if self.open.take().is_some() {
                    warn!(pdu_id = ?frame.pdu_id, "start frame interrupted open fragment sequence");
                    return Err(AvrcpError::fragmentation(
                        "start frame interrupted an open fragment sequence",
                    ));
                }
                self.open = Some(frame);
                Ok(None)
            }
            PacketType::Continue => {
                let open = self.open.as_mut().ok_or_else(|| {
                    AvrcpError::fragmentation("continue frame without a preceding start")
                })?;
                if open.pdu_id != frame.pdu_id {
                    let open_id = open.pdu_id;
                    self.open = None;
                    return Err(AvrcpError::fragmentation(format!(
                        "continue for {:?} while reassembling {:?}",
                        frame.pdu_id, open_id
                    )));
                }
                open.params.extend_from_slice(&frame.params);
                Ok(None)
            }
            PacketType::End => {
                let mut open = self.open.take().ok_or_else(|| {
                    AvrcpError::fragmentation("end frame without a preceding start")
                })?;
                if open.pdu_id != frame.pdu_id {
                    return Err(AvrcpError::fragmentation(format!(
                        "end for {:?} while reassembling {:?}",
                        frame.pdu_id, open.pdu_id
                    )));
                }
                open.params.extend_from_slice(&frame.params);
                open.packet_type = PacketType::Single;
                Ok(Some(open))
            }
        }
    }

    /// Drop any sequence in progress
    pub fn reset(&mut self) {
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{CType, ResponseCode};

    fn vendor_frame(label: u8, params: Vec<u8>) -> ControlFrame {
        ControlFrame {
            label,
            is_response: false,
            body: ControlBody::VendorDependent(VendorDependentFrame {
                code: CType::Status.raw(),
                pdu_id: PduId::GetElementAttributes,
                packet_type: PacketType::Single,
                params,
            }),
        }
    }

    #[test]
    fn test_vendor_roundtrip() {
        let frame = vendor_frame(7, vec![0xde, 0xad, 0xbe, 0xef]);
        let decoded = ControlFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_vendor_roundtrip_empty_params() {
        let frame = vendor_frame(0, vec![]);
        let decoded = ControlFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_passthrough_roundtrip() {
        let frame = ControlFrame {
            label: 3,
            is_response: true,
            body: ControlBody::Passthrough(PassthroughFrame {
                code: ResponseCode::Accepted.raw(),
                key: AvcPanelKey::Play.raw(),
                state: KeyState::Released,
            }),
        };
        let decoded = ControlFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        match decoded.body {
            ControlBody::Passthrough(pt) => assert_eq!(pt.panel_key(), Some(AvcPanelKey::Play)),
            _ => panic!("expected passthrough body"),
        }
    }

    #[test]
    fn test_encode_rejects_oversize_params() {
        let frame = vendor_frame(1, vec![0; u16::MAX as usize + 1]);
        assert!(matches!(frame.encode(), Err(AvrcpError::Decode(_))));
        // fragmenting still produces valid frames from the same payload
        for fragment in frame.encode_fragmented(512).unwrap() {
            assert!(ControlFrame::decode(&fragment).is_ok());
        }
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let frame = vendor_frame(1, vec![1, 2, 3]);
        let mut bytes = frame.encode().unwrap();
        bytes.pop();
        assert!(matches!(
            ControlFrame::decode(&bytes),
            Err(AvrcpError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_length_lie() {
        let frame = vendor_frame(1, vec![1, 2, 3]);
        let mut bytes = frame.encode().unwrap();
        bytes[10] = 9; // claim more parameters than are present
        assert!(ControlFrame::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_company_id() {
        let frame = vendor_frame(1, vec![]);
        let mut bytes = frame.encode().unwrap();
        bytes[5] = 0x42;
        assert!(ControlFrame::decode(&bytes).is_err());
    }

    #[test]
    fn test_browse_roundtrip() {
        let frame = BrowseFrame {
            label: 9,
            is_response: false,
            pdu_id: PduId::GetFolderItems,
            params: vec![0x01, 0x00, 0x00, 0x00, 0x00],
        };
        let decoded = BrowseFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_fragmentation_roundtrip() {
        let params: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let frame = vendor_frame(5, params.clone());
        let fragments = frame.encode_fragmented(300).unwrap();
        assert!(fragments.len() > 1);

        let mut reassembler = Reassembler::new();
        let mut complete = None;
        for fragment in &fragments {
            let decoded = ControlFrame::decode(fragment).unwrap();
            let vd = match decoded.body {
                ControlBody::VendorDependent(vd) => vd,
                _ => panic!("expected vendor-dependent fragment"),
            };
            if let Some(done) = reassembler.push(vd).unwrap() {
                complete = Some(done);
            }
        }
        let complete = complete.expect("sequence should complete");
        assert_eq!(complete.params, params);
        assert_eq!(complete.packet_type, PacketType::Single);
        // reconstructed PDU matches the unfragmented encoding
        let unfragmented = vendor_frame(5, params);
        match unfragmented.body {
            ControlBody::VendorDependent(vd) => assert_eq!(complete, vd),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_fragment_fits_mtu() {
        let frame = vendor_frame(5, (0..1000).map(|i| i as u8).collect());
        for fragment in frame.encode_fragmented(300).unwrap() {
            assert!(fragment.len() <= 300);
        }
    }

    #[test]
    fn test_end_without_start() {
        let mut reassembler = Reassembler::new();
        let result = reassembler.push(VendorDependentFrame {
            code: CType::Status.raw(),
            pdu_id: PduId::GetElementAttributes,
            packet_type: PacketType::End,
            params: vec![1, 2, 3],
        });
        assert!(matches!(result, Err(AvrcpError::Fragmentation(_))));
    }

    #[test]
    fn test_continue_with_different_pdu_id() {
        let mut reassembler = Reassembler::new();
        reassembler
            .push(VendorDependentFrame {
                code: CType::Status.raw(),
                pdu_id: PduId::GetElementAttributes,
                packet_type: PacketType::Start,
                params: vec![1],
            })
            .unwrap();
        let result = reassembler.push(VendorDependentFrame {
            code: CType::Status.raw(),
            pdu_id: PduId::GetPlayStatus,
            packet_type: PacketType::Continue,
            params: vec![2],
        });
        assert!(matches!(result, Err(AvrcpError::Fragmentation(_))));
        // sequence aborted, a fresh start is accepted again
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_start_interrupts_open_sequence() {
        let mut reassembler = Reassembler::new();
        let start = VendorDependentFrame {
            code: CType::Status.raw(),
            pdu_id: PduId::GetElementAttributes,
            packet_type: PacketType::Start,
            params: vec![1],
        };
        reassembler.push(start.clone()).unwrap();
        assert!(matches!(
            reassembler.push(start),
            Err(AvrcpError::Fragmentation(_))
        ));
    }
}
