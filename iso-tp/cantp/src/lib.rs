//! `cantp`: ISO-TP (ISO 15765-2) segmentation and flow control over classic CAN.
//!
//! ISO-TP carries payloads larger than one CAN frame by splitting them into:
//! - a **Single Frame** (up to 7 bytes),
//! - a **First Frame** + multiple **Consecutive Frames** (8 to 4095 bytes), and
//! - **Flow Control** frames sent back by the receiver to pace the sender in blocks.
//!
//! This crate provides:
//! - the frame codec ([`pdu`]) over a fixed eight-byte [`RawFrame`],
//! - the receive ([`rx`]) and send ([`tx`]) state machines,
//! - a [`SessionManager`] that owns one send and one receive session per identifier pair,
//!   dispatches inbound frames to them and runs every send as its own tokio task.
//!
//! The CAN driver itself is not part of this crate. It plugs in through [`FrameTx`] (put a frame
//! on the bus) and [`FrameRx`] (observe frames on the bus); `tokio::sync::mpsc` unbounded
//! channels implement both, which is enough to wire two nodes together in-process.
//!
//! # Concepts
//! - **Identifier pair**: every conversation is configured as a [`TpConfig`] with a `tx_id` (the
//!   remote's address, used for everything we send) and an `rx_id` (our address). ISO-TP has no
//!   session id on the wire, so only one transfer per direction and pair can be in flight.
//! - **Timeouts**: N_Bs bounds the sender's wait for Flow Control, N_Cr bounds the receiver's wait
//!   for the next Consecutive Frame. Both run on a [`PacingClock`], [`TokioClock`] by default.
//! - **Errors**: decode errors drop the frame, receive errors reset the receive session and are
//!   reported to the [`PayloadHandler`], send errors are returned to whoever awaits the send.
//!
//! # Quick start
//! ```rust,ignore
//! use cantp::{RawFrame, SessionManager, TpConfig};
//! use embedded_can::StandardId;
//!
//! # async fn example(tx: impl cantp::FrameTx, rx: impl cantp::FrameRx) -> Result<(), Box<dyn std::error::Error>> {
//! let remote = StandardId::new(0x727).unwrap();
//! let local = StandardId::new(0x72F).unwrap();
//! let node = SessionManager::builder(tx)
//!     .pair(TpConfig::new(remote, local))
//!     .on_payload(|from, payload| println!("{from:?}: {payload:?}"))
//!     .build()?;
//!
//! let pump = tokio::spawn({
//!     let node = node.clone();
//!     async move { node.run(rx).await }
//! });
//! node.send(remote.into(), b"a payload longer than one frame".to_vec()).await?;
//! # Ok(()) }
//! ```

pub mod channel;
pub mod clock;
pub mod config;
pub mod errors;
pub mod frame;
pub mod manager;
pub mod pdu;
pub mod rx;
pub mod tx;

pub use channel::{FrameRx, FrameTx};
pub use clock::{PacingClock, TimedOut, TokioClock};
pub use config::TpConfig;
pub use errors::{ChannelError, ConfigError, FrameError, ReceiveError, SendError};
pub use frame::{FRAME_LEN, RawFrame};
pub use manager::{PayloadHandler, SendHandle, SessionManager, SessionManagerBuilder};
pub use pdu::{FlowControl, FlowStatus, Pdu};
pub use rx::{RxOutcome, RxSession, RxState};
pub use tx::{FlowDecision, TxSession, TxState};
