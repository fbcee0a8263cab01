//! Raw frame channel contract consumed by the transport layer.
//!
//! The CAN driver (SocketCAN, a virtual bus, a test harness) lives outside this crate. It plugs in
//! through these two traits: one to put a frame on the bus, one to observe every frame the node
//! sees, including frames addressed elsewhere.

use core::future::Future;

use crate::errors::ChannelError;
use crate::frame::RawFrame;

/// Transmit half of a raw CAN channel.
///
/// The session manager serializes all calls behind a single lock, so implementations never see
/// concurrent sends.
pub trait FrameTx: Send + 'static {
    /// Put one frame on the bus.
    fn send(&mut self, frame: &RawFrame) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

/// Receive half of a raw CAN channel.
pub trait FrameRx: Send {
    /// Wait for the next frame observed on the bus.
    ///
    /// Returns [`ChannelError::Closed`] once no more frames will arrive.
    fn recv(&mut self) -> impl Future<Output = Result<RawFrame, ChannelError>> + Send;
}

impl FrameTx for tokio::sync::mpsc::UnboundedSender<RawFrame> {
    fn send(&mut self, frame: &RawFrame) -> impl Future<Output = Result<(), ChannelError>> + Send {
        let res = tokio::sync::mpsc::UnboundedSender::send(self, *frame)
            .map_err(|_| ChannelError::Closed);
        core::future::ready(res)
    }
}

impl FrameRx for tokio::sync::mpsc::UnboundedReceiver<RawFrame> {
    fn recv(&mut self) -> impl Future<Output = Result<RawFrame, ChannelError>> + Send {
        async move {
            tokio::sync::mpsc::UnboundedReceiver::recv(self)
                .await
                .ok_or(ChannelError::Closed)
        }
    }
}
