//! Simulated Radio Link
//!
//! Stands in for RLC and the air interface between the two PDCP peers. PDUs are lost with
//! a configured probability and delivered after a delay plus jitter, so they may arrive
//! out of order. For AM bearers the link reports transmission and in-order delivery back
//! to the sending entity, the way RLC AM does.

use crate::config::LinkConfig;
use bytes::Bytes;
use common::types::{RbId, RbType};
use interfaces::LowerLayerMessage;
use pdcp::config::{RlcMode, SnSize};
use pdcp::pdu::{pdu_get_dc, read_data_pdu_header, DcField};
use pdcp::PdcpCommand;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver};
use tracing::{debug, trace};

/// Counters of one link direction
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStats {
    pub num_data_pdus: u64,
    pub num_control_pdus: u64,
    pub num_retx_pdus: u64,
    pub num_lost_pdus: u64,
    pub num_delivered_pdus: u64,
    pub num_discards: u64,
}

/// Highest SN delivered in sequence, as RLC AM would report it
#[derive(Debug)]
pub struct DeliveryTracker {
    sn_size: SnSize,
    next_sn: u32,
    pending: HashSet<u32>,
}

impl DeliveryTracker {
    pub fn new(sn_size: SnSize) -> Self {
        Self {
            sn_size,
            next_sn: 0,
            pending: HashSet::new(),
        }
    }

    /// Mark an SN as done (delivered or discarded). Returns the new highest in-sequence
    /// SN if it advanced.
    pub fn resolve(&mut self, sn: u32) -> Option<u32> {
        let offset = sn.wrapping_sub(self.next_sn) % self.sn_size.cardinality();
        if offset >= self.sn_size.window_size() {
            // Behind the in-sequence point, already accounted for
            return None;
        }
        self.pending.insert(sn);

        let mut highest = None;
        while self.pending.remove(&self.next_sn) {
            highest = Some(self.next_sn);
            self.next_sn = (self.next_sn + 1) % self.sn_size.cardinality();
        }
        highest
    }
}

/// One direction of the simulated link
pub struct RadioLink {
    name: &'static str,
    config: LinkConfig,
    rng: StdRng,
    rb_type: RbType,
    rlc_mode: RlcMode,
    sn_size: SnSize,
    /// Bearer task that sent the PDUs
    source: Sender<PdcpCommand>,
    /// Bearer task receiving the PDUs
    sink: Sender<PdcpCommand>,
    tracker: DeliveryTracker,
    stats: LinkStats,
}

/// PDU leaving the link after its delay
struct Arrival {
    pdu: Bytes,
    sn: Option<u32>,
}

impl RadioLink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        config: LinkConfig,
        seed: u64,
        rb_id: RbId,
        rlc_mode: RlcMode,
        sn_size: SnSize,
        source: Sender<PdcpCommand>,
        sink: Sender<PdcpCommand>,
    ) -> Self {
        Self {
            name,
            config,
            rng: StdRng::seed_from_u64(seed),
            rb_type: rb_id.rb_type(),
            rlc_mode,
            sn_size,
            source,
            sink,
            tracker: DeliveryTracker::new(sn_size),
            stats: LinkStats::default(),
        }
    }

    /// Carry PDUs until the sending entity goes away
    pub async fn run(mut self, mut lower_rx: UnboundedReceiver<LowerLayerMessage>) -> LinkStats {
        let (arrival_tx, mut arrival_rx) = mpsc::unbounded_channel::<Arrival>();

        loop {
            tokio::select! {
                msg = lower_rx.recv() => {
                    match msg {
                        Some(LowerLayerMessage::NewPdu { pdu, is_retx }) => {
                            self.handle_new_pdu(pdu, is_retx, &arrival_tx).await;
                        }
                        Some(LowerLayerMessage::DiscardPdu { pdcp_sn }) => {
                            self.stats.num_discards += 1;
                            debug!("{} link: discard. sn={}", self.name, pdcp_sn);
                            self.advance_delivery(pdcp_sn).await;
                        }
                        None => break,
                    }
                }
                Some(arrival) = arrival_rx.recv() => self.handle_arrival(arrival).await,
            }
        }

        debug!("{} link stopped. {:?}", self.name, self.stats);
        self.stats
    }

    fn is_am(&self) -> bool {
        self.rlc_mode == RlcMode::Am
    }

    /// SN of a data PDU, `None` for control PDUs
    fn data_pdu_sn(&self, pdu: &[u8]) -> Option<u32> {
        let first = *pdu.first()?;
        if self.rb_type == RbType::Drb && pdu_get_dc(first) == DcField::Control {
            return None;
        }
        read_data_pdu_header(pdu, self.sn_size).ok().map(|hdr| hdr.sn)
    }

    async fn handle_new_pdu(&mut self, pdu: Bytes, is_retx: bool, arrival_tx: &mpsc::UnboundedSender<Arrival>) {
        let sn = self.data_pdu_sn(&pdu);
        match sn {
            Some(sn) => {
                self.stats.num_data_pdus += 1;
                if is_retx {
                    self.stats.num_retx_pdus += 1;
                } else {
                    // Handed to the air interface right away
                    self.notify_source(PdcpCommand::TransmitNotification(sn)).await;
                }
            }
            None => self.stats.num_control_pdus += 1,
        }

        if self.rng.gen::<f64>() < self.config.loss_rate {
            self.stats.num_lost_pdus += 1;
            trace!("{} link: lost PDU. sn={:?}", self.name, sn);
            return;
        }

        let jitter = if self.config.jitter_ms > 0 {
            self.rng.gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        let delay = Duration::from_millis(self.config.delay_ms + jitter);
        let arrival_tx = arrival_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the link stopped
            let _ = arrival_tx.send(Arrival { pdu, sn });
        });
    }

    async fn handle_arrival(&mut self, arrival: Arrival) {
        self.stats.num_delivered_pdus += 1;
        if self.sink.send(PdcpCommand::Pdu(arrival.pdu)).await.is_err() {
            debug!("{} link: receiving bearer stopped", self.name);
            return;
        }
        if let Some(sn) = arrival.sn {
            self.advance_delivery(sn).await;
        }
    }

    async fn advance_delivery(&mut self, sn: u32) {
        if !self.is_am() {
            return;
        }
        if let Some(highest) = self.tracker.resolve(sn) {
            self.notify_source(PdcpCommand::DeliveryNotification(highest)).await;
        }
    }

    async fn notify_source(&self, cmd: PdcpCommand) {
        if self.source.send(cmd).await.is_err() {
            debug!("{} link: sending bearer stopped", self.name);
        }
    }
}
