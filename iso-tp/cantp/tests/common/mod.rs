//! In-process CAN bus shared by the integration tests.
#![allow(dead_code)]

use core::time::Duration;
use std::sync::{Arc, Mutex};

use cantp::pdu::{Pdu, decode, encode};
use cantp::{
    ChannelError, FrameTx, PayloadHandler, RawFrame, ReceiveError, SessionManager, TpConfig,
};
use embedded_can::{Id, StandardId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub fn sid(raw: u16) -> Id {
    Id::Standard(StandardId::new(raw).unwrap())
}

#[derive(Clone, Debug)]
pub struct LoggedFrame {
    pub at: Instant,
    pub port: usize,
    pub frame: RawFrame,
}

/// Broadcast bus: every frame reaches every port except the one that sent it.
#[derive(Default)]
pub struct TokioBus {
    peers: Mutex<Vec<mpsc::UnboundedSender<RawFrame>>>,
    log: Mutex<Vec<LoggedFrame>>,
}

impl TokioBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a raw interface.
    pub fn add_interface(self: &Arc<Self>) -> (BusTx, mpsc::UnboundedReceiver<RawFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peers = self.peers.lock().unwrap();
        peers.push(tx);
        let port = peers.len() - 1;
        (
            BusTx {
                bus: Arc::clone(self),
                port,
            },
            rx,
        )
    }

    fn transmit(&self, port: usize, frame: RawFrame) -> Result<(), ChannelError> {
        self.log.lock().unwrap().push(LoggedFrame {
            at: Instant::now(),
            port,
            frame,
        });
        let peers = self.peers.lock().unwrap();
        for (i, peer) in peers.iter().enumerate() {
            if i != port {
                let _ = peer.send(frame);
            }
        }
        Ok(())
    }

    pub fn logged_frames(&self) -> Vec<LoggedFrame> {
        self.log.lock().unwrap().clone()
    }

    /// Logged frames sent on `id`, decoded.
    pub fn pdus_on(&self, id: Id) -> Vec<(Instant, OwnedPdu)> {
        self.logged_frames()
            .into_iter()
            .filter(|entry| entry.frame.id() == id)
            .map(|entry| (entry.at, OwnedPdu::from_frame(&entry.frame)))
            .collect()
    }
}

pub struct BusTx {
    bus: Arc<TokioBus>,
    port: usize,
}

impl BusTx {
    /// Put a frame on the bus right away.
    pub fn inject(&self, frame: RawFrame) {
        self.bus.transmit(self.port, frame).unwrap();
    }

    /// Encode and inject a PDU on `id`.
    pub fn inject_pdu(&self, id: Id, pdu: &Pdu<'_>) {
        let data = encode(pdu, 0x00).unwrap();
        self.inject(RawFrame::from_parts(id, data));
    }
}

impl FrameTx for BusTx {
    fn send(
        &mut self,
        frame: &RawFrame,
    ) -> impl core::future::Future<Output = Result<(), ChannelError>> + Send {
        core::future::ready(self.bus.transmit(self.port, *frame))
    }
}

/// Owned copy of a decoded PDU, for assertions over the bus log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnedPdu {
    Single(Vec<u8>),
    First(u16, Vec<u8>),
    Consecutive(u8, Vec<u8>),
    FlowControl(u8),
    Invalid,
}

impl OwnedPdu {
    pub fn from_frame(frame: &RawFrame) -> Self {
        match decode(frame.payload()) {
            Ok(Pdu::SingleFrame { data, .. }) => OwnedPdu::Single(data.to_vec()),
            Ok(Pdu::FirstFrame { len, data }) => OwnedPdu::First(len, data.to_vec()),
            Ok(Pdu::ConsecutiveFrame { sn, data }) => OwnedPdu::Consecutive(sn, data.to_vec()),
            Ok(Pdu::FlowControl { .. }) => OwnedPdu::FlowControl(frame.payload()[0] & 0x0F),
            Err(_) => OwnedPdu::Invalid,
        }
    }

    pub fn is_consecutive(&self) -> bool {
        matches!(self, OwnedPdu::Consecutive(..))
    }

    pub fn is_flow_control(&self) -> bool {
        matches!(self, OwnedPdu::FlowControl(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Payload(Id, Vec<u8>),
    Error(Id, ReceiveError),
}

struct Collector(mpsc::UnboundedSender<Event>);

impl PayloadHandler for Collector {
    fn on_payload_received(&self, rx_id: Id, payload: Vec<u8>) {
        let _ = self.0.send(Event::Payload(rx_id, payload));
    }

    fn on_receive_error(&self, rx_id: Id, error: ReceiveError) {
        let _ = self.0.send(Event::Error(rx_id, error));
    }
}

/// A session manager attached to the bus with its ingress pump running.
pub struct Node {
    pub manager: SessionManager<BusTx>,
    pub events: mpsc::UnboundedReceiver<Event>,
    pump: JoinHandle<Result<(), ChannelError>>,
}

impl Node {
    pub fn attach(bus: &Arc<TokioBus>, pairs: &[TpConfig]) -> Self {
        let (tx, rx) = bus.add_interface();
        let (events_tx, events) = mpsc::unbounded_channel();
        let mut builder = SessionManager::builder(tx).handler(Collector(events_tx));
        for cfg in pairs {
            builder = builder.pair(cfg.clone());
        }
        let manager = builder.build().unwrap();
        let pump = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run(rx).await }
        });
        Self {
            manager,
            events,
            pump,
        }
    }

    /// Next receive event, failing the test if none arrives within ten (virtual) seconds.
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("no receive event")
            .expect("event channel closed")
    }

    /// Assert nothing is pending on the event queue.
    pub fn assert_no_event(&mut self) {
        assert!(self.events.try_recv().is_err(), "unexpected receive event");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Raw bus port used to play one side of the protocol by hand.
pub struct RawPort {
    pub tx: BusTx,
    pub rx: mpsc::UnboundedReceiver<RawFrame>,
}

impl RawPort {
    pub fn attach(bus: &Arc<TokioBus>) -> Self {
        let (tx, rx) = bus.add_interface();
        Self { tx, rx }
    }

    /// Next frame carrying `id`, skipping everything else.
    pub async fn expect_on(&mut self, id: Id) -> OwnedPdu {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
                .await
                .expect("no frame on the bus")
                .expect("bus closed");
            if frame.id() == id {
                return OwnedPdu::from_frame(&frame);
            }
        }
    }

    /// Assert no frame is queued for this port.
    pub fn assert_quiet(&mut self) {
        assert!(self.rx.try_recv().is_err(), "unexpected frame on the bus");
    }
}

/// `(a, b)` configs talking to each other over 0x727 (a -> b) and 0x72F (b -> a).
pub fn cfg_pair(block_size: u8, st_min: Duration) -> (TpConfig, TpConfig) {
    let a = TpConfig {
        block_size,
        st_min,
        ..TpConfig::new(sid(0x727), sid(0x72F))
    };
    let b = a.mirrored();
    (a, b)
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}
