//! Fixed-size classic CAN frame exchanged with the raw frame channel.

use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Payload size of a classic CAN data frame.
pub const FRAME_LEN: usize = 8;

/// A classic CAN data frame: identifier plus exactly eight payload bytes.
///
/// Shorter payloads are padded with zeroes on construction, so the codec always sees a full
/// eight-byte view regardless of what the driver reported as DLC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFrame {
    id: Id,
    data: [u8; FRAME_LEN],
}

impl RawFrame {
    /// Build a frame from an identifier and a full eight-byte payload.
    pub fn from_parts(id: impl Into<Id>, data: [u8; FRAME_LEN]) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Build a frame with an 11-bit identifier.
    ///
    /// Returns `None` when `raw` does not fit in 11 bits or `data` is longer than eight bytes.
    pub fn standard(raw: u16, data: &[u8]) -> Option<Self> {
        let id = StandardId::new(raw)?;
        <Self as Frame>::new(id, data)
    }

    /// Build a frame with a 29-bit identifier.
    pub fn extended(raw: u32, data: &[u8]) -> Option<Self> {
        let id = ExtendedId::new(raw)?;
        <Self as Frame>::new(id, data)
    }

    /// Adapt a frame produced by any `embedded-can` driver.
    ///
    /// Remote frames and frames longer than eight bytes (CAN FD) are not representable here.
    pub fn from_frame<F: Frame>(frame: &F) -> Option<Self> {
        if frame.is_remote_frame() {
            return None;
        }
        <Self as Frame>::new(frame.id(), frame.data())
    }

    /// The frame identifier.
    pub fn id(&self) -> Id {
        self.id
    }

    /// The eight payload bytes.
    pub fn payload(&self) -> &[u8; FRAME_LEN] {
        &self.data
    }
}

impl Frame for RawFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > FRAME_LEN {
            return None;
        }
        let mut buf = [0u8; FRAME_LEN];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            data: buf,
        })
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        FRAME_LEN
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payload_is_zero_padded() {
        let frame = RawFrame::standard(0x727, &[0x02, 0xAA, 0xBB]).unwrap();
        assert_eq!(frame.payload(), &[0x02, 0xAA, 0xBB, 0, 0, 0, 0, 0]);
        assert_eq!(Frame::dlc(&frame), 8);
        assert!(!Frame::is_extended(&frame));
    }

    #[test]
    fn oversized_payload_and_identifier_are_rejected() {
        assert!(RawFrame::standard(0x727, &[0u8; 9]).is_none());
        assert!(RawFrame::standard(0x800, &[]).is_none());
        assert!(RawFrame::extended(0x2000_0000, &[]).is_none());
    }

    #[test]
    fn extended_identifier_is_preserved() {
        let frame = RawFrame::extended(0x18DA_F110, &[1]).unwrap();
        assert!(Frame::is_extended(&frame));
        assert_eq!(frame.id(), Id::Extended(ExtendedId::new(0x18DA_F110).unwrap()));
    }

    #[test]
    fn from_frame_copies_id_and_data() {
        let original = RawFrame::standard(0x123, &[9, 8, 7]).unwrap();
        let copy = RawFrame::from_frame(&original).unwrap();
        assert_eq!(copy, original);
    }
}
