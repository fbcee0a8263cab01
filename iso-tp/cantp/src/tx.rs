//! Transmit-side segmentation and flow-control handling.
//!
//! [`TxSession`] holds the bookkeeping of one transfer and is purely synchronous. [`transmit`]
//! drives it: emitting frames through the shared link, waiting for Flow Control and pacing
//! Consecutive Frames by STmin.

use core::cmp::min;
use core::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::FrameTx;
use crate::clock::{PacingClock, TimedOut};
use crate::config::TpConfig;
use crate::errors::{ChannelError, SendError};
use crate::pdu::{
    CONSECUTIVE_FRAME_DATA_LEN, FIRST_FRAME_DATA_LEN, FlowControl, FlowStatus, MAX_PAYLOAD_LEN,
    MAX_SINGLE_FRAME_LEN, Pdu, encode_frame,
};

/// Transmit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing sent yet.
    Idle,
    /// First Frame (or previous block) sent; waiting for Flow Control.
    AwaitingFlowControl,
    /// Sending Consecutive Frames of the current block.
    SendingBlock,
    /// Payload fully sent.
    Done,
    /// Transfer aborted by the receiver, a timeout, cancellation or the channel.
    Aborted,
}

/// What to do after a Flow Control frame has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDecision {
    /// Send the next block.
    SendBlock,
    /// Receiver asked to wait; keep listening with a fresh timeout.
    KeepWaiting,
}

/// Bookkeeping for one outgoing transfer.
#[derive(Debug)]
pub struct TxSession {
    payload: Vec<u8>,
    offset: usize,
    next_sn: u8,
    block_size: u8,
    frames_in_block: u8,
    st_min: Duration,
    wait_count: u32,
    state: TxState,
}

impl TxSession {
    /// Start a transfer of `payload`.
    ///
    /// Fails with [`SendError::PayloadTooLarge`] above the 4095-byte ISO-TP limit.
    pub fn new(payload: Vec<u8>) -> Result<Self, SendError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(SendError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            payload,
            offset: 0,
            next_sn: 1,
            block_size: 0,
            frames_in_block: 0,
            st_min: Duration::ZERO,
            wait_count: 0,
            state: TxState::Idle,
        })
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Negotiated separation time between Consecutive Frames.
    pub fn st_min(&self) -> Duration {
        self.st_min
    }

    /// True once every payload byte has been handed to a frame.
    pub fn is_complete(&self) -> bool {
        self.offset >= self.payload.len() && self.state != TxState::Idle
    }

    /// True when the current block quota has been used up.
    pub fn block_exhausted(&self) -> bool {
        self.block_size > 0 && self.frames_in_block >= self.block_size
    }

    /// The opening PDU: a Single Frame for up to 7 bytes, otherwise a First Frame.
    pub fn opening_pdu(&mut self) -> Pdu<'_> {
        let len = self.payload.len();
        if len <= MAX_SINGLE_FRAME_LEN {
            self.offset = len;
            self.state = TxState::Done;
            return Pdu::SingleFrame {
                len: len as u8,
                data: &self.payload,
            };
        }
        self.offset = FIRST_FRAME_DATA_LEN;
        self.state = TxState::AwaitingFlowControl;
        Pdu::FirstFrame {
            len: len as u16,
            data: &self.payload[..FIRST_FRAME_DATA_LEN],
        }
    }

    /// Apply a Flow Control frame received while waiting for one.
    pub fn on_flow_control(
        &mut self,
        fc: FlowControl,
        cfg: &TpConfig,
    ) -> Result<FlowDecision, SendError> {
        match fc.status {
            FlowStatus::ContinueToSend => {
                self.block_size = fc.block_size;
                self.st_min = fc.separation_time();
                self.frames_in_block = 0;
                self.wait_count = 0;
                self.state = TxState::SendingBlock;
                Ok(FlowDecision::SendBlock)
            }
            FlowStatus::Wait => {
                self.wait_count += 1;
                if let Some(max) = cfg.max_wait_frames {
                    if self.wait_count > max {
                        self.state = TxState::Aborted;
                        return Err(SendError::WaitLimitExceeded(max));
                    }
                }
                Ok(FlowDecision::KeepWaiting)
            }
            FlowStatus::Overflow => {
                self.state = TxState::Aborted;
                Err(SendError::ReceiverOverflow)
            }
        }
    }

    /// Take the next Consecutive Frame of the current block.
    ///
    /// Returns `None` when the payload is exhausted or the block quota is used up.
    pub fn next_consecutive(&mut self) -> Option<Pdu<'_>> {
        if self.state != TxState::SendingBlock || self.block_exhausted() {
            return None;
        }
        let start = self.offset;
        let end = min(start + CONSECUTIVE_FRAME_DATA_LEN, self.payload.len());
        let sn = self.next_sn;
        self.offset = end;
        self.next_sn = (sn + 1) & 0x0F;
        if self.block_size > 0 {
            self.frames_in_block += 1;
        }
        if end >= self.payload.len() {
            self.state = TxState::Done;
        } else if self.block_exhausted() {
            self.state = TxState::AwaitingFlowControl;
        }
        Some(Pdu::ConsecutiveFrame {
            sn,
            data: &self.payload[start..end],
        })
    }

    fn abort(&mut self) {
        self.state = TxState::Aborted;
    }
}

/// Shared handles a transfer needs while it runs.
pub(crate) struct TxLink<'a, T, C> {
    pub(crate) tx: &'a Mutex<T>,
    pub(crate) clock: &'a C,
    pub(crate) cfg: &'a TpConfig,
    pub(crate) cancel: &'a CancellationToken,
}

/// Drive a whole transfer to completion.
///
/// `flow_control` delivers Flow Control frames dispatched for this pair, in arrival order.
pub(crate) async fn transmit<T, C>(
    link: TxLink<'_, T, C>,
    payload: Vec<u8>,
    flow_control: &mut mpsc::UnboundedReceiver<FlowControl>,
) -> Result<(), SendError>
where
    T: FrameTx,
    C: PacingClock,
{
    let mut session = TxSession::new(payload)?;
    let res = match link.cfg.transfer_timeout {
        Some(limit) => link
            .clock
            .timeout(limit, run(&link, &mut session, flow_control))
            .await
            .unwrap_or(Err(SendError::TransferTimeout)),
        None => run(&link, &mut session, flow_control).await,
    };
    if res.is_err() {
        session.abort();
    }
    res
}

async fn run<T, C>(
    link: &TxLink<'_, T, C>,
    session: &mut TxSession,
    flow_control: &mut mpsc::UnboundedReceiver<FlowControl>,
) -> Result<(), SendError>
where
    T: FrameTx,
    C: PacingClock,
{
    let opening = session.opening_pdu();
    emit(link, &opening).await?;
    if session.is_complete() {
        trace!("single frame sent");
        return Ok(());
    }

    loop {
        await_flow_control(link, session, flow_control).await?;

        let mut first_in_block = true;
        loop {
            if link.cancel.is_cancelled() {
                return Err(SendError::Cancelled);
            }
            if !first_in_block && !session.st_min().is_zero() {
                pace(link, session.st_min()).await?;
            }
            first_in_block = false;

            // A Flow Control can only be legitimate once this block's last frame is out.
            while let Ok(stray) = flow_control.try_recv() {
                warn!(?stray, "flow control received mid-block, discarding");
            }

            let Some(pdu) = session.next_consecutive() else {
                break;
            };
            emit(link, &pdu).await?;

            match session.state() {
                TxState::Done => {
                    debug!("segmented payload sent");
                    return Ok(());
                }
                TxState::AwaitingFlowControl => {
                    trace!("block complete, waiting for flow control");
                    break;
                }
                _ => {}
            }
        }
    }
}

async fn await_flow_control<T, C>(
    link: &TxLink<'_, T, C>,
    session: &mut TxSession,
    flow_control: &mut mpsc::UnboundedReceiver<FlowControl>,
) -> Result<(), SendError>
where
    T: FrameTx,
    C: PacingClock,
{
    loop {
        let received = tokio::select! {
            biased;
            () = link.cancel.cancelled() => return Err(SendError::Cancelled),
            res = link.clock.timeout(link.cfg.n_bs, flow_control.recv()) => res,
        };
        let fc = match received {
            Ok(Some(fc)) => fc,
            Ok(None) => return Err(SendError::Channel(ChannelError::Closed)),
            Err(TimedOut) => {
                warn!(timeout = ?link.cfg.n_bs, "no flow control received");
                return Err(SendError::FlowControlTimeout);
            }
        };
        trace!(?fc, "flow control received");
        match session.on_flow_control(fc, link.cfg)? {
            FlowDecision::SendBlock => return Ok(()),
            FlowDecision::KeepWaiting => continue,
        }
    }
}

async fn pace<T, C>(link: &TxLink<'_, T, C>, st_min: Duration) -> Result<(), SendError>
where
    C: PacingClock,
{
    tokio::select! {
        biased;
        () = link.cancel.cancelled() => Err(SendError::Cancelled),
        () = link.clock.sleep(st_min) => Ok(()),
    }
}

async fn emit<T, C>(link: &TxLink<'_, T, C>, pdu: &Pdu<'_>) -> Result<(), SendError>
where
    T: FrameTx,
{
    let frame = encode_frame(link.cfg.tx_id, pdu, link.cfg.padding)
        .map_err(|err| SendError::Channel(ChannelError::backend(err)))?;
    trace!(id = ?frame.id(), data = ?frame.payload(), "tx frame");
    link.tx.lock().await.send(&frame).await?;
    Ok(())
}
