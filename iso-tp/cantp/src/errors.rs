//! Transport-layer error types.

use thiserror::Error;

/// Local failure to decode or encode one frame.
///
/// The offending frame is discarded; no session is advanced by it.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Header nibble (or Flow Control status) does not name a known frame type.
    #[error("malformed frame header 0x{0:02X}")]
    MalformedHeader(u8),
    /// A declared length is outside what the frame type can carry.
    #[error("declared length {len} outside {min}..={max}")]
    LengthOutOfRange { len: usize, min: usize, max: usize },
    /// The raw bytes end before the header does.
    #[error("frame truncated to {len} bytes")]
    Truncated { len: usize },
}

/// Failure of the underlying raw frame channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has been shut down.
    #[error("raw frame channel closed")]
    Closed,
    /// Driver-specific failure.
    #[error("raw frame channel failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ChannelError {
    /// Wrap a driver error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ChannelError::Backend(Box::new(err))
    }
}

/// Errors surfaced to the caller of a send.
///
/// Every variant except [`SendError::SessionBusy`], [`SendError::UnknownPeer`] and
/// [`SendError::PayloadTooLarge`] means the transfer started and was aborted; the pair is free
/// again once the error is observed.
#[derive(Debug, Error)]
pub enum SendError {
    /// Another send is already active on this identifier pair.
    #[error("a transfer is already active on this identifier pair")]
    SessionBusy,
    /// No identifier pair is configured for the requested remote id.
    #[error("no identifier pair configured for this remote id")]
    UnknownPeer,
    /// Payload exceeds the configured (or protocol) maximum.
    #[error("payload of {len} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    /// No Flow Control frame arrived in time.
    #[error("timed out waiting for flow control")]
    FlowControlTimeout,
    /// The receiver answered with Flow Control status Overflow.
    #[error("receiver reported overflow")]
    ReceiverOverflow,
    /// The receiver kept answering Wait beyond the configured limit.
    #[error("receiver sent more than {0} consecutive wait frames")]
    WaitLimitExceeded(u32),
    /// The whole transfer exceeded its configured bound.
    #[error("transfer did not complete in time")]
    TransferTimeout,
    /// The send was cancelled by the application.
    #[error("transfer cancelled")]
    Cancelled,
    /// The raw frame channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Reassembly failures. The partial payload is discarded and the session returns to idle.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ReceiveError {
    /// A Consecutive Frame carried an unexpected sequence number.
    #[error("sequence mismatch: expected {expected}, found {found}")]
    SequenceMismatch { expected: u8, found: u8 },
    /// The sender went quiet in the middle of a transfer.
    #[error("timed out waiting for a consecutive frame")]
    ConsecutiveFrameTimeout,
    /// The announced payload does not fit in the receive buffer.
    #[error("declared length {declared} exceeds receive capacity {capacity}")]
    BufferOverrun { declared: usize, capacity: usize },
}

/// Configuration rejected at construction time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_payload_len` must be within `1..=4095`.
    #[error("max_payload_len {0} outside 1..=4095")]
    MaxPayloadLen(usize),
    /// Transmit and receive identifiers must differ.
    #[error("tx_id and rx_id must differ")]
    MirroredIds,
    /// The advertised STmin cannot be encoded in a Flow Control frame.
    #[error("st_min of {0:?} cannot be encoded")]
    StMin(core::time::Duration),
    /// Two pairs share a transmit or receive identifier.
    #[error("identifier used by more than one pair")]
    DuplicatePair,
}
