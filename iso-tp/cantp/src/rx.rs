//! Receive-side reassembly and flow-control decisions.
//!
//! [`RxSession`] is synchronous and never blocks: it consumes one decoded PDU at a time and tells
//! the caller what to do next. Emitting Flow Control frames, arming the N_Cr watchdog and
//! delivering payloads is left to the session manager.

use core::cmp::min;
use core::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::TpConfig;
use crate::errors::ReceiveError;
use crate::pdu::{FIRST_FRAME_DATA_LEN, FlowControl, FlowStatus, Pdu};

/// High-level receive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// No transfer active.
    Idle,
    /// First Frame accepted, waiting for Consecutive Frames.
    AwaitingConsecutive,
}

/// Outcome after processing a PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxOutcome {
    /// Nothing to do (frame absorbed or ignored).
    None,
    /// Emit a Flow Control frame once `delay` has elapsed.
    SendFlowControl { fc: FlowControl, delay: Duration },
    /// A payload has been reassembled.
    Completed(Vec<u8>),
}

/// Receive state machine for one identifier pair.
#[derive(Debug)]
pub struct RxSession {
    state: RxState,
    buffer: Vec<u8>,
    total_len: usize,
    next_sn: u8,
    block_size: u8,
    frames_in_block: u8,
}

impl Default for RxSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RxSession {
    /// A fresh, idle session.
    pub fn new() -> Self {
        Self {
            state: RxState::Idle,
            buffer: Vec::new(),
            total_len: 0,
            next_sn: 0,
            block_size: 0,
            frames_in_block: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Bytes accumulated so far in the current transfer.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Sequence number the next Consecutive Frame must carry.
    pub fn expected_sn(&self) -> u8 {
        self.next_sn
    }

    /// Drop any partial transfer and go idle.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.buffer.clear();
        self.total_len = 0;
        self.next_sn = 0;
        self.block_size = 0;
        self.frames_in_block = 0;
    }

    /// The N_Cr watchdog fired.
    ///
    /// Returns the error to report if a transfer was in progress; an idle session is unaffected.
    pub fn on_timeout(&mut self) -> Option<ReceiveError> {
        if self.state == RxState::Idle {
            return None;
        }
        warn!(
            received = self.buffer.len(),
            total = self.total_len,
            "consecutive frame timeout, dropping partial payload"
        );
        self.reset();
        Some(ReceiveError::ConsecutiveFrameTimeout)
    }

    /// Handle an incoming PDU and return the action to take.
    ///
    /// On error the partial payload has already been discarded.
    pub fn on_pdu(&mut self, cfg: &TpConfig, pdu: Pdu<'_>) -> Result<RxOutcome, ReceiveError> {
        match pdu {
            Pdu::SingleFrame { len, data } => self.handle_single(cfg, len, data),
            Pdu::FirstFrame { len, data } => self.handle_first(cfg, len, data),
            Pdu::ConsecutiveFrame { sn, data } => self.handle_consecutive(cfg, sn, data),
            Pdu::FlowControl { .. } => {
                trace!("flow control is not for the receive side, ignoring");
                Ok(RxOutcome::None)
            }
        }
    }

    fn abandon_in_flight(&mut self, why: &str) {
        if self.state != RxState::Idle {
            warn!(
                received = self.buffer.len(),
                total = self.total_len,
                "{why} during reassembly, restarting"
            );
            self.reset();
        }
    }

    fn handle_single(
        &mut self,
        cfg: &TpConfig,
        len: u8,
        data: &[u8],
    ) -> Result<RxOutcome, ReceiveError> {
        self.abandon_in_flight("single frame");
        let len = usize::from(len);
        if len > cfg.max_payload_len {
            return Err(ReceiveError::BufferOverrun {
                declared: len,
                capacity: cfg.max_payload_len,
            });
        }
        let payload = data[..min(len, data.len())].to_vec();
        debug!(len, "single frame payload received");
        Ok(RxOutcome::Completed(payload))
    }

    fn handle_first(
        &mut self,
        cfg: &TpConfig,
        len: u16,
        data: &[u8],
    ) -> Result<RxOutcome, ReceiveError> {
        self.abandon_in_flight("first frame");
        let len = usize::from(len);
        if len > cfg.max_payload_len {
            warn!(len, max = cfg.max_payload_len, "first frame exceeds receive capacity");
            return Err(ReceiveError::BufferOverrun {
                declared: len,
                capacity: cfg.max_payload_len,
            });
        }

        let copy_len = min(min(data.len(), FIRST_FRAME_DATA_LEN), len);
        self.buffer.clear();
        self.buffer.reserve(len);
        self.buffer.extend_from_slice(&data[..copy_len]);
        self.total_len = len;
        self.next_sn = 1;
        self.block_size = cfg.block_size;
        self.frames_in_block = 0;
        self.state = RxState::AwaitingConsecutive;
        debug!(total = len, block_size = cfg.block_size, "first frame accepted");

        Ok(RxOutcome::SendFlowControl {
            fc: FlowControl::continue_to_send(cfg.block_size, advertised_st_min(cfg)),
            delay: Duration::ZERO,
        })
    }

    fn handle_consecutive(
        &mut self,
        cfg: &TpConfig,
        sn: u8,
        data: &[u8],
    ) -> Result<RxOutcome, ReceiveError> {
        if self.state != RxState::AwaitingConsecutive {
            trace!(sn, "orphan consecutive frame ignored");
            return Ok(RxOutcome::None);
        }
        if sn != self.next_sn {
            let expected = self.next_sn;
            warn!(expected, found = sn, "consecutive frame out of sequence");
            self.reset();
            return Err(ReceiveError::SequenceMismatch {
                expected,
                found: sn,
            });
        }

        let remaining = self.total_len - self.buffer.len();
        let chunk = min(data.len(), remaining);
        self.buffer.extend_from_slice(&data[..chunk]);
        self.next_sn = (self.next_sn + 1) & 0x0F;

        if self.buffer.len() >= self.total_len {
            let payload = core::mem::take(&mut self.buffer);
            debug!(len = payload.len(), "segmented payload complete");
            self.reset();
            return Ok(RxOutcome::Completed(payload));
        }

        if self.block_size > 0 {
            self.frames_in_block += 1;
            if self.frames_in_block == self.block_size {
                self.frames_in_block = 0;
                trace!(received = self.buffer.len(), "block boundary reached");
                return Ok(RxOutcome::SendFlowControl {
                    fc: FlowControl::continue_to_send(self.block_size, advertised_st_min(cfg)),
                    delay: cfg.fc_guard_delay,
                });
            }
        }

        Ok(RxOutcome::None)
    }
}

/// Flow Control answering a First Frame we cannot hold.
pub fn overflow_flow_control() -> FlowControl {
    FlowControl {
        status: FlowStatus::Overflow,
        block_size: 0,
        st_min: 0,
    }
}

fn advertised_st_min(cfg: &TpConfig) -> u8 {
    // Validated configs always encode; fall back to the slowest legal pacing otherwise.
    cfg.st_min_byte().unwrap_or(0x7F)
}
