//! Encode and decode ISO-TP protocol control information.
//!
//! Classic CAN, normal addressing only: the PCI always starts at byte 0 and every frame on the
//! wire carries exactly eight bytes.

use core::time::Duration;
use embedded_can::Id;

use crate::errors::FrameError;
use crate::frame::{FRAME_LEN, RawFrame};

/// Largest payload carried by a Single Frame.
pub const MAX_SINGLE_FRAME_LEN: usize = 7;
/// Payload bytes carried by a First Frame.
pub const FIRST_FRAME_DATA_LEN: usize = 6;
/// Payload bytes carried by a Consecutive Frame.
pub const CONSECUTIVE_FRAME_DATA_LEN: usize = 7;
/// Largest payload a First Frame can announce (12-bit length).
pub const MAX_PAYLOAD_LEN: usize = 4095;

const PCI_SINGLE: u8 = 0x0;
const PCI_FIRST: u8 = 0x1;
const PCI_CONSECUTIVE: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

/// Flow control status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Clear to send the next block of consecutive frames.
    ContinueToSend,
    /// Receiver is busy; keep waiting for another Flow Control.
    Wait,
    /// Receiver cannot take the announced payload; abort.
    Overflow,
}

impl FlowStatus {
    fn nibble(self) -> u8 {
        match self {
            FlowStatus::ContinueToSend => 0x0,
            FlowStatus::Wait => 0x1,
            FlowStatus::Overflow => 0x2,
        }
    }
}

/// Parsed ISO-TP Protocol Data Unit (PDU).
///
/// Data fields borrow from the raw frame they were decoded from, or from the payload being sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu<'a> {
    /// Complete payload of at most 7 bytes.
    SingleFrame { len: u8, data: &'a [u8] },
    /// Total length of a segmented payload and its first bytes.
    FirstFrame { len: u16, data: &'a [u8] },
    /// Sequence number (mod 16) and the next bytes of the payload.
    ConsecutiveFrame { sn: u8, data: &'a [u8] },
    /// Pacing instructions from the receiver.
    FlowControl {
        status: FlowStatus,
        /// Frames per block (0 = unbounded).
        block_size: u8,
        /// STmin in its one-byte wire encoding, see [`st_min_to_duration`].
        st_min: u8,
    },
}

/// Decoded contents of a Flow Control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    pub status: FlowStatus,
    /// Frames per block (0 = unbounded).
    pub block_size: u8,
    /// Raw STmin byte.
    pub st_min: u8,
}

impl FlowControl {
    /// Clear-to-send with the given block size and STmin byte.
    pub fn continue_to_send(block_size: u8, st_min: u8) -> Self {
        Self {
            status: FlowStatus::ContinueToSend,
            block_size,
            st_min,
        }
    }

    /// The PDU carrying this Flow Control.
    pub fn pdu(&self) -> Pdu<'static> {
        Pdu::FlowControl {
            status: self.status,
            block_size: self.block_size,
            st_min: self.st_min,
        }
    }

    /// Separation time the sender must keep.
    ///
    /// Reserved encodings are treated as the longest legal value, 127 ms.
    pub fn separation_time(&self) -> Duration {
        st_min_to_duration(self.st_min).unwrap_or(Duration::from_millis(0x7F))
    }
}

/// Encode a PDU into an eight-byte CAN payload, filling unused bytes with `padding`.
pub fn encode(pdu: &Pdu<'_>, padding: u8) -> Result<[u8; FRAME_LEN], FrameError> {
    let mut buf = [padding; FRAME_LEN];
    match pdu {
        Pdu::SingleFrame { len, data } => {
            let len = usize::from(*len);
            if len > MAX_SINGLE_FRAME_LEN || len > data.len() {
                return Err(FrameError::LengthOutOfRange {
                    len,
                    min: 0,
                    max: MAX_SINGLE_FRAME_LEN.min(data.len()),
                });
            }
            buf[0] = (PCI_SINGLE << 4) | len as u8;
            buf[1..1 + len].copy_from_slice(&data[..len]);
        }
        Pdu::FirstFrame { len, data } => {
            let total = usize::from(*len);
            if total <= MAX_SINGLE_FRAME_LEN || total > MAX_PAYLOAD_LEN {
                return Err(FrameError::LengthOutOfRange {
                    len: total,
                    min: MAX_SINGLE_FRAME_LEN + 1,
                    max: MAX_PAYLOAD_LEN,
                });
            }
            buf[0] = (PCI_FIRST << 4) | ((*len >> 8) as u8 & 0x0F);
            buf[1] = (*len & 0xFF) as u8;
            let chunk = data.len().min(FIRST_FRAME_DATA_LEN);
            buf[2..2 + chunk].copy_from_slice(&data[..chunk]);
        }
        Pdu::ConsecutiveFrame { sn, data } => {
            if data.len() > CONSECUTIVE_FRAME_DATA_LEN {
                return Err(FrameError::LengthOutOfRange {
                    len: data.len(),
                    min: 0,
                    max: CONSECUTIVE_FRAME_DATA_LEN,
                });
            }
            buf[0] = (PCI_CONSECUTIVE << 4) | (*sn & 0x0F);
            buf[1..1 + data.len()].copy_from_slice(data);
        }
        Pdu::FlowControl {
            status,
            block_size,
            st_min,
        } => {
            buf[0] = (PCI_FLOW_CONTROL << 4) | status.nibble();
            buf[1] = *block_size;
            buf[2] = *st_min;
        }
    }
    Ok(buf)
}

/// Build a [`RawFrame`] carrying the given PDU.
pub fn encode_frame(id: Id, pdu: &Pdu<'_>, padding: u8) -> Result<RawFrame, FrameError> {
    encode(pdu, padding).map(|data| RawFrame::from_parts(id, data))
}

/// Decode raw CAN data into a PDU view.
///
/// A First Frame announcing 7 bytes or fewer is rejected with [`FrameError::LengthOutOfRange`]:
/// such a payload fits a Single Frame, so the frame is treated as malformed and dropped.
pub fn decode(data: &[u8]) -> Result<Pdu<'_>, FrameError> {
    let Some(&pci) = data.first() else {
        return Err(FrameError::Truncated { len: 0 });
    };
    match pci >> 4 {
        PCI_SINGLE => {
            let len = usize::from(pci & 0x0F);
            if len > MAX_SINGLE_FRAME_LEN {
                return Err(FrameError::LengthOutOfRange {
                    len,
                    min: 0,
                    max: MAX_SINGLE_FRAME_LEN,
                });
            }
            let payload = data
                .get(1..1 + len)
                .ok_or(FrameError::Truncated { len: data.len() })?;
            Ok(Pdu::SingleFrame {
                len: len as u8,
                data: payload,
            })
        }
        PCI_FIRST => {
            if data.len() < 2 {
                return Err(FrameError::Truncated { len: data.len() });
            }
            let len = (u16::from(pci & 0x0F) << 8) | u16::from(data[1]);
            if usize::from(len) <= MAX_SINGLE_FRAME_LEN {
                return Err(FrameError::LengthOutOfRange {
                    len: usize::from(len),
                    min: MAX_SINGLE_FRAME_LEN + 1,
                    max: MAX_PAYLOAD_LEN,
                });
            }
            let end = data.len().min(2 + FIRST_FRAME_DATA_LEN);
            Ok(Pdu::FirstFrame {
                len,
                data: &data[2..end],
            })
        }
        PCI_CONSECUTIVE => {
            let end = data.len().min(1 + CONSECUTIVE_FRAME_DATA_LEN);
            Ok(Pdu::ConsecutiveFrame {
                sn: pci & 0x0F,
                data: &data[1..end],
            })
        }
        PCI_FLOW_CONTROL => {
            if data.len() < 3 {
                return Err(FrameError::Truncated { len: data.len() });
            }
            let status = match pci & 0x0F {
                0x0 => FlowStatus::ContinueToSend,
                0x1 => FlowStatus::Wait,
                0x2 => FlowStatus::Overflow,
                _ => return Err(FrameError::MalformedHeader(pci)),
            };
            Ok(Pdu::FlowControl {
                status,
                block_size: data[1],
                st_min: data[2],
            })
        }
        _ => Err(FrameError::MalformedHeader(pci)),
    }
}

/// Convert an STmin byte to a `Duration`, returning `None` for reserved values.
pub fn st_min_to_duration(raw: u8) -> Option<Duration> {
    match raw {
        0x00..=0x7F => Some(Duration::from_millis(u64::from(raw))),
        0xF1..=0xF9 => Some(Duration::from_micros(u64::from(raw - 0xF0) * 100)),
        _ => None,
    }
}

/// Encode a `Duration` into an STmin byte.
///
/// Whole 100 µs steps below one millisecond use the 0xF1..=0xF9 range; anything else is
/// truncated to whole milliseconds. Durations above 127 ms are not representable.
pub fn duration_to_st_min(duration: Duration) -> Option<u8> {
    let micros = duration.as_micros();
    if micros < 1000 && micros % 100 == 0 && micros > 0 {
        return Some(0xF0 + (micros / 100) as u8);
    }
    let millis = duration.as_millis();
    if millis <= 0x7F {
        Some(millis as u8)
    } else {
        None
    }
}
