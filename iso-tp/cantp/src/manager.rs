//! Session manager: routes raw frames to per-pair sessions and runs sends as tasks.
//!
//! Each configured identifier pair owns at most one [`RxSession`] and one in-flight send. The
//! dispatch path is synchronous and never sleeps: Flow Control emission, the N_Cr watchdog and
//! sends all run on spawned tokio tasks sharing one transmit lock.

use std::sync::{Arc, MutexGuard, PoisonError};

use core::time::Duration;

use embedded_can::Id;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{FrameRx, FrameTx};
use crate::clock::{PacingClock, TokioClock};
use crate::config::TpConfig;
use crate::errors::{ChannelError, ConfigError, ReceiveError, SendError};
use crate::frame::RawFrame;
use crate::pdu::{FlowControl, Pdu, decode, encode_frame};
use crate::rx::{RxOutcome, RxSession, RxState, overflow_flow_control};
use crate::tx::{TxLink, transmit};

/// Application callbacks for the receive direction.
pub trait PayloadHandler: Send + Sync + 'static {
    /// A payload has been reassembled on the pair listening on `rx_id`.
    ///
    /// Called exactly once per completed transfer.
    fn on_payload_received(&self, rx_id: Id, payload: Vec<u8>);

    /// A transfer on `rx_id` failed and was discarded.
    fn on_receive_error(&self, rx_id: Id, error: ReceiveError) {
        let _ = (rx_id, error);
    }
}

impl<F> PayloadHandler for F
where
    F: Fn(Id, Vec<u8>) + Send + Sync + 'static,
{
    fn on_payload_received(&self, rx_id: Id, payload: Vec<u8>) {
        self(rx_id, payload);
    }
}

struct ActiveSend {
    id: u64,
    flow_control: mpsc::UnboundedSender<FlowControl>,
}

struct PairState {
    rx: RxSession,
    watchdog: Option<JoinHandle<()>>,
    watchdog_generation: u64,
    active_send: Option<ActiveSend>,
    send_counter: u64,
}

struct PairSlot {
    cfg: TpConfig,
    state: std::sync::Mutex<PairState>,
}

impl PairSlot {
    fn new(cfg: TpConfig) -> Self {
        Self {
            cfg,
            state: std::sync::Mutex::new(PairState {
                rx: RxSession::new(),
                watchdog: None,
                watchdog_generation: 0,
                active_send: None,
                send_counter: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PairState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_send(&self, id: u64) {
        let mut state = self.lock();
        if state.active_send.as_ref().is_some_and(|a| a.id == id) {
            state.active_send = None;
        }
    }
}

struct Shared<T, C> {
    tx: Mutex<T>,
    clock: C,
    pairs: Vec<PairSlot>,
    handler: Arc<dyn PayloadHandler>,
}

/// Owns every identifier pair of one node and the shared transmit side.
pub struct SessionManager<T, C = TokioClock> {
    shared: Arc<Shared<T, C>>,
}

impl<T, C> Clone for SessionManager<T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Handle to a send running in the background.
///
/// Dropping the handle detaches the transfer; it still runs to completion.
#[derive(Debug)]
pub struct SendHandle {
    join: JoinHandle<Result<(), SendError>>,
    cancel: CancellationToken,
}

impl SendHandle {
    /// Abort the transfer at its next suspension point.
    ///
    /// There is no abort frame in ISO-TP; the far receiver times out on its own.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the transfer has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the transfer to finish.
    pub async fn wait(self) -> Result<(), SendError> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => {
                warn!(%err, "send task did not complete");
                Err(SendError::Cancelled)
            }
        }
    }
}

impl<T> SessionManager<T, TokioClock>
where
    T: FrameTx,
{
    /// Start building a manager that transmits through `tx`.
    pub fn builder(tx: T) -> SessionManagerBuilder<T, TokioClock> {
        SessionManagerBuilder {
            tx,
            clock: TokioClock,
            pairs: Vec::new(),
            handler: None,
        }
    }
}

impl<T, C> SessionManager<T, C>
where
    T: FrameTx,
    C: PacingClock,
{
    /// Configuration of the pair that transmits on `remote`.
    pub fn pair_config(&self, remote: Id) -> Option<&TpConfig> {
        self.pair_by_remote(remote)
            .map(|idx| &self.shared.pairs[idx].cfg)
    }

    /// Whether a send is currently active towards `remote`.
    pub fn is_sending(&self, remote: Id) -> bool {
        self.pair_by_remote(remote)
            .is_some_and(|idx| self.shared.pairs[idx].lock().active_send.is_some())
    }

    /// Start sending `payload` to `remote` and return immediately.
    ///
    /// Fails with [`SendError::SessionBusy`] while another send to the same remote is active.
    /// Must be called from within a tokio runtime.
    pub fn send_payload(
        &self,
        remote: Id,
        payload: impl Into<Vec<u8>>,
    ) -> Result<SendHandle, SendError> {
        let idx = self.pair_by_remote(remote).ok_or(SendError::UnknownPeer)?;
        let slot = &self.shared.pairs[idx];
        let payload = payload.into();
        if payload.len() > slot.cfg.max_payload_len {
            return Err(SendError::PayloadTooLarge {
                len: payload.len(),
                max: slot.cfg.max_payload_len,
            });
        }

        let (fc_tx, mut fc_rx) = mpsc::unbounded_channel();
        let send_id = {
            let mut state = slot.lock();
            if state.active_send.is_some() {
                return Err(SendError::SessionBusy);
            }
            state.send_counter += 1;
            let id = state.send_counter;
            state.active_send = Some(ActiveSend {
                id,
                flow_control: fc_tx,
            });
            id
        };
        debug!(?remote, len = payload.len(), "send started");

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let join = tokio::spawn(async move {
            let slot = &shared.pairs[idx];
            let link = TxLink {
                tx: &shared.tx,
                clock: &shared.clock,
                cfg: &slot.cfg,
                cancel: &task_cancel,
            };
            let res = transmit(link, payload, &mut fc_rx).await;
            slot.release_send(send_id);
            if let Err(err) = &res {
                warn!(remote = ?slot.cfg.tx_id, %err, "send aborted");
            }
            res
        });

        Ok(SendHandle { join, cancel })
    }

    /// Send `payload` to `remote` and wait for the transfer to finish.
    pub async fn send(&self, remote: Id, payload: impl Into<Vec<u8>>) -> Result<(), SendError> {
        self.send_payload(remote, payload)?.wait().await
    }

    /// Route one inbound frame to its session.
    ///
    /// Frames whose identifier matches no pair are dropped. Must be called from within a tokio
    /// runtime; it never blocks.
    pub fn dispatch(&self, frame: &RawFrame) {
        let Some(idx) = self.pair_by_local(frame.id()) else {
            trace!(id = ?frame.id(), "frame for unknown identifier dropped");
            return;
        };
        let slot = &self.shared.pairs[idx];
        trace!(id = ?frame.id(), data = ?frame.payload(), "rx frame");

        let pdu = match decode(frame.payload()) {
            Ok(pdu) => pdu,
            Err(err) => {
                warn!(id = ?frame.id(), %err, "undecodable frame dropped");
                return;
            }
        };

        if let Pdu::FlowControl {
            status,
            block_size,
            st_min,
        } = pdu
        {
            self.forward_flow_control(
                slot,
                FlowControl {
                    status,
                    block_size,
                    st_min,
                },
            );
            return;
        }

        let opens_transfer = matches!(pdu, Pdu::FirstFrame { .. });
        let res = {
            let mut state = slot.lock();
            let res = state.rx.on_pdu(&slot.cfg, pdu);
            if state.rx.state() == RxState::AwaitingConsecutive {
                self.arm_watchdog(idx, &mut state);
            } else {
                disarm_watchdog(&mut state);
            }
            res
        };

        match res {
            Ok(RxOutcome::None) => {}
            Ok(RxOutcome::SendFlowControl { fc, delay }) => self.spawn_flow_control(idx, fc, delay),
            Ok(RxOutcome::Completed(payload)) => {
                debug!(rx_id = ?slot.cfg.rx_id, len = payload.len(), "payload received");
                self.shared
                    .handler
                    .on_payload_received(slot.cfg.rx_id, payload);
            }
            Err(err) => {
                // Single Frames are never answered with Flow Control.
                if opens_transfer && matches!(err, ReceiveError::BufferOverrun { .. }) {
                    self.spawn_flow_control(idx, overflow_flow_control(), Duration::ZERO);
                }
                self.shared.handler.on_receive_error(slot.cfg.rx_id, err);
            }
        }
    }

    /// Pump frames from `rx` into [`SessionManager::dispatch`] until the channel closes.
    pub async fn run<R: FrameRx>(&self, mut rx: R) -> Result<(), ChannelError> {
        loop {
            match rx.recv().await {
                Ok(frame) => self.dispatch(&frame),
                Err(ChannelError::Closed) => {
                    debug!("ingress channel closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn pair_by_remote(&self, remote: Id) -> Option<usize> {
        self.shared.pairs.iter().position(|p| p.cfg.tx_id == remote)
    }

    fn pair_by_local(&self, local: Id) -> Option<usize> {
        self.shared.pairs.iter().position(|p| p.cfg.rx_id == local)
    }

    fn forward_flow_control(&self, slot: &PairSlot, fc: FlowControl) {
        let state = slot.lock();
        match &state.active_send {
            Some(active) => {
                if active.flow_control.send(fc).is_err() {
                    trace!(?fc, "send already finishing, flow control ignored");
                }
            }
            None => trace!(?fc, "orphan flow control ignored"),
        }
    }

    fn arm_watchdog(&self, idx: usize, state: &mut PairState) {
        disarm_watchdog(state);
        state.watchdog_generation += 1;
        let generation = state.watchdog_generation;
        let shared = Arc::clone(&self.shared);
        state.watchdog = Some(tokio::spawn(async move {
            let slot = &shared.pairs[idx];
            shared.clock.sleep(slot.cfg.n_cr).await;
            let err = {
                let mut state = slot.lock();
                if state.watchdog_generation != generation {
                    return;
                }
                state.watchdog = None;
                state.rx.on_timeout()
            };
            if let Some(err) = err {
                shared.handler.on_receive_error(slot.cfg.rx_id, err);
            }
        }));
    }

    fn spawn_flow_control(&self, idx: usize, fc: FlowControl, delay: Duration) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if !delay.is_zero() {
                shared.clock.sleep(delay).await;
            }
            let cfg = &shared.pairs[idx].cfg;
            let frame = match encode_frame(cfg.tx_id, &fc.pdu(), cfg.padding) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, "failed to encode flow control");
                    return;
                }
            };
            trace!(id = ?frame.id(), data = ?frame.payload(), "tx flow control");
            if let Err(err) = shared.tx.lock().await.send(&frame).await {
                warn!(%err, "failed to send flow control");
            }
        });
    }
}

fn disarm_watchdog(state: &mut PairState) {
    if let Some(handle) = state.watchdog.take() {
        handle.abort();
    }
    state.watchdog_generation += 1;
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder<T, C> {
    tx: T,
    clock: C,
    pairs: Vec<TpConfig>,
    handler: Option<Arc<dyn PayloadHandler>>,
}

impl<T, C> SessionManagerBuilder<T, C>
where
    T: FrameTx,
    C: PacingClock,
{
    /// Use a different pacing clock.
    pub fn clock<C2: PacingClock>(self, clock: C2) -> SessionManagerBuilder<T, C2> {
        SessionManagerBuilder {
            tx: self.tx,
            clock,
            pairs: self.pairs,
            handler: self.handler,
        }
    }

    /// Add an identifier pair.
    pub fn pair(mut self, cfg: TpConfig) -> Self {
        self.pairs.push(cfg);
        self
    }

    /// Receive-side callbacks.
    pub fn handler(mut self, handler: impl PayloadHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Shorthand for [`SessionManagerBuilder::handler`] with a payload-only closure.
    pub fn on_payload<F>(self, f: F) -> Self
    where
        F: Fn(Id, Vec<u8>) + Send + Sync + 'static,
    {
        self.handler(f)
    }

    /// Validate every pair and build the manager.
    pub fn build(self) -> Result<SessionManager<T, C>, ConfigError> {
        for (i, cfg) in self.pairs.iter().enumerate() {
            cfg.validate()?;
            let clash = self.pairs[..i]
                .iter()
                .any(|other| other.tx_id == cfg.tx_id || other.rx_id == cfg.rx_id);
            if clash {
                return Err(ConfigError::DuplicatePair);
            }
        }
        let handler: Arc<dyn PayloadHandler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(|rx_id: Id, payload: Vec<u8>| {
                debug!(?rx_id, len = payload.len(), "payload received without a handler");
            }),
        };
        Ok(SessionManager {
            shared: Arc::new(Shared {
                tx: Mutex::new(self.tx),
                clock: self.clock,
                pairs: self.pairs.into_iter().map(PairSlot::new).collect(),
                handler,
            }),
        })
    }
}
