//! PDCP TX Entity
//!
//! Transmit operation of TS 38.323 section 5.2.1: COUNT assignment, integrity protection
//! and ciphering, the TX window with per-SDU discard timers, lower layer notifications,
//! status report handling, retransmission and re-establishment.

use crate::config::{PdcpTimer, PdcpTxConfig, RlcMode, SnSize};
use crate::count::{estimate_count, sn};
use crate::metrics::PdcpTxMetrics;
use crate::pdu::{read_status_report_header, write_data_pdu_header, DataPduHeader};
use crate::security::{SecurityConfig, SecurityEngine, SecurityPrimitives, MAC_LEN};
use crate::window::SduWindow;
use crate::PdcpError;
use bytes::{Bytes, BytesMut};
use common::timers::{TimerId, TimerQueue};
use common::types::{RbId, RbType};
use common::utils::{bytes_to_hex, BitDecoder};
use interfaces::{PdcpStatusProvider, PdcpTxLowerNotifier, PdcpTxUpperControlNotifier};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, info_span, trace, warn, Span};

/// TX state variables (TS 38.323 section 7.1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdcpTxState {
    /// COUNT of the next SDU to be transmitted
    pub tx_next: u32,
    /// COUNT of the first SDU not yet reported as transmitted
    pub tx_trans: u32,
    /// COUNT of the first SDU not yet confirmed or discarded
    pub tx_next_ack: u32,
}

impl fmt::Display for PdcpTxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx_next_ack={} tx_trans={} tx_next={}",
            self.tx_next_ack, self.tx_trans, self.tx_next
        )
    }
}

/// Buffered SDU awaiting delivery confirmation or discard
#[derive(Debug)]
struct TxSduInfo {
    /// Copy of the SDU for retransmission (AM only)
    sdu: Option<Bytes>,
    /// Running discard timer, absent for an infinite discardTimer
    discard_timer: Option<TimerId>,
}

#[derive(Debug, Clone, Copy)]
enum TxTimerEvent {
    Discard(u32),
}

/// PDCP TX entity
pub struct PdcpEntityTx {
    rb_id: RbId,
    config: PdcpTxConfig,
    state: PdcpTxState,
    window: SduWindow<TxSduInfo>,
    timers: TimerQueue<TxTimerEvent>,
    security: SecurityEngine,
    lower_dn: Box<dyn PdcpTxLowerNotifier>,
    upper_cn: Box<dyn PdcpTxUpperControlNotifier>,
    max_count_notified: bool,
    max_count_overflow: bool,
    metrics: PdcpTxMetrics,
    span: Span,
}

impl PdcpEntityTx {
    /// Create a new TX entity
    pub fn new(
        ue_index: u32,
        rb_id: RbId,
        config: PdcpTxConfig,
        primitives: SecurityPrimitives,
        lower_dn: Box<dyn PdcpTxLowerNotifier>,
        upper_cn: Box<dyn PdcpTxUpperControlNotifier>,
    ) -> Result<Self, PdcpError> {
        config.validate(rb_id)?;

        let span = info_span!("pdcp", ue = ue_index, rb = %rb_id, dir = "tx");
        {
            let _entered = span.enter();
            info!(
                "PDCP TX entity created. rlc_mode={:?} sn_size={} discard_timer={:?} rlc_sdu_queue={}",
                config.rlc_mode, config.sn_size, config.discard_timer, config.custom.rlc_sdu_queue
            );
        }

        Ok(Self {
            rb_id,
            window: SduWindow::new(config.sn_size),
            timers: TimerQueue::new(),
            security: SecurityEngine::new(primitives, rb_id.bearer_id(), config.direction),
            state: PdcpTxState::default(),
            config,
            lower_dn,
            upper_cn,
            max_count_notified: false,
            max_count_overflow: false,
            metrics: PdcpTxMetrics::default(),
            span,
        })
    }

    fn is_srb(&self) -> bool {
        self.rb_id.is_srb()
    }

    fn is_am(&self) -> bool {
        self.config.rlc_mode == RlcMode::Am
    }

    fn is_um(&self) -> bool {
        self.config.rlc_mode == RlcMode::Um
    }

    fn sn_size(&self) -> SnSize {
        self.config.sn_size
    }

    /// Receive an SDU from upper layers, protect it and pass the PDU to the lower layer
    pub fn handle_sdu(&mut self, sdu: Bytes) {
        let _entered = self.span.clone().entered();
        let st = self.state;

        if st.tx_trans > st.tx_next {
            error!("Invalid state, tx_trans is larger than tx_next. {}", st);
            self.metrics.num_dropped_sdus += 1;
            return;
        }
        if st.tx_next - st.tx_trans >= self.config.custom.rlc_sdu_queue {
            if self.config.custom.warn_on_drop {
                warn!(
                    "Dropping SDU to avoid overloading RLC queue. rlc_sdu_queue={} {}",
                    self.config.custom.rlc_sdu_queue, st
                );
            } else {
                info!(
                    "Dropping SDU to avoid overloading RLC queue. rlc_sdu_queue={} {}",
                    self.config.custom.rlc_sdu_queue, st
                );
            }
            self.metrics.num_dropped_sdus += 1;
            return;
        }
        if st.tx_next - st.tx_trans >= self.sn_size().window_size() - 1 {
            info!("Dropping SDU to avoid going over the TX window size. {}", st);
            self.metrics.num_dropped_sdus += 1;
            return;
        }

        self.metrics.add_sdu(sdu.len());
        debug!("TX SDU. sdu_len={}", sdu.len());
        trace!("TX SDU payload: {}", bytes_to_hex(&sdu));

        // COUNT must never be reused under one key
        if st.tx_next >= self.config.max_count.hard {
            if !self.max_count_overflow {
                error!("Reached maximum count, refusing to transmit further. count={}", st.tx_next);
                self.upper_cn.on_protocol_failure();
                self.max_count_overflow = true;
            }
            self.metrics.num_dropped_sdus += 1;
            return;
        }
        if st.tx_next >= self.config.max_count.notify && !self.max_count_notified {
            warn!("Approaching count wrap-around, notifying RRC. count={}", st.tx_next);
            self.upper_cn.on_max_count_reached();
            self.max_count_notified = true;
        }

        let count = st.tx_next;
        let protected = match self.build_data_pdu(&sdu, count) {
            Ok(pdu) => pdu,
            Err(err) => {
                error!(
                    "Could not build data PDU, dropping SDU and notifying RRC. count={} err={}",
                    count, err
                );
                self.upper_cn.on_protocol_failure();
                self.metrics.num_dropped_sdus += 1;
                return;
            }
        };

        if let Some(discard_timer) = self.config.discard_timer {
            self.add_to_window(count, sdu, discard_timer);
        }

        self.write_data_pdu_to_lower_layers(count, protected, false);
        self.state.tx_next += 1;
    }

    /// Header, MAC-I and ciphering for the SDU at `count`
    fn build_data_pdu(&self, sdu: &[u8], count: u32) -> Result<Bytes, PdcpError> {
        let hdr_len = self.sn_size().header_len();
        let mut buf = BytesMut::with_capacity(hdr_len + sdu.len() + MAC_LEN);

        let hdr = DataPduHeader {
            sn: sn(count, self.sn_size()),
        };
        write_data_pdu_header(&mut buf, &hdr, self.rb_id.rb_type(), self.sn_size())?;
        buf.extend_from_slice(sdu);

        let append_mac = self.is_srb() || self.security.integrity_enabled();
        self.security.protect(&mut buf, hdr_len, count, append_mac);
        Ok(buf.freeze())
    }

    fn add_to_window(&mut self, count: u32, sdu: Bytes, discard_timer: PdcpTimer) {
        // Slot still held by an SDU from the previous window
        if let Some(old_count) = self.window.occupant(count) {
            error!("TX window full. Discarding old_count={}. tx_next={}", old_count, count);
            self.discard_pdu(old_count);
        }

        let discard_timer = discard_timer
            .duration()
            .map(|duration| self.timers.start(duration, TxTimerEvent::Discard(count)));
        let info = TxSduInfo {
            sdu: self.is_am().then_some(sdu),
            discard_timer,
        };
        if let Some((old_count, old)) = self.window.insert(count, info) {
            // discard_pdu refused the stale entry, drop it regardless
            if let Some(id) = old.discard_timer {
                self.timers.stop(id);
            }
            debug!("Overwrote stale TX window entry. old_count={}", old_count);
        }
        debug!("Added to TX window. count={} discard_timer={:?}", count, self.config.discard_timer);
    }

    fn remove_from_window(&mut self, count: u32) -> bool {
        match self.window.remove(count) {
            Some(info) => {
                if let Some(id) = info.discard_timer {
                    self.timers.stop(id);
                }
                true
            }
            None => false,
        }
    }

    fn write_data_pdu_to_lower_layers(&mut self, count: u32, pdu: Bytes, is_retx: bool) {
        info!(
            "TX PDU. type=data pdu_len={} sn={} count={} is_retx={}",
            pdu.len(),
            sn(count, self.sn_size()),
            count,
            is_retx
        );
        trace!("TX PDU payload: {}", bytes_to_hex(&pdu));
        self.metrics.add_pdu(pdu.len());
        self.lower_dn.on_new_pdu(pdu, is_retx);
    }

    fn write_control_pdu_to_lower_layers(&mut self, pdu: Bytes) {
        info!("TX PDU. type=ctrl pdu_len={}", pdu.len());
        trace!("TX PDU payload: {}", bytes_to_hex(&pdu));
        self.metrics.add_pdu(pdu.len());
        self.lower_dn.on_new_pdu(pdu, false);
    }

    /// Discard a buffered SDU, informing the lower layer
    fn discard_pdu(&mut self, count: u32) {
        if self.config.discard_timer.is_none() {
            debug!("Cannot discard PDU. No discard timer configured. count={}", count);
            return;
        }
        let st = self.state;
        if count < st.tx_next_ack || count >= st.tx_next {
            warn!("Cannot discard PDU. The PDU is outside tx_window. count={} {}", count, st);
            return;
        }
        if !self.window.contains(count) {
            warn!("Cannot discard PDU. The PDU is missing in tx_window. count={} {}", count, st);
            return;
        }
        debug!("Discarding PDU. count={}", count);

        // RLC drops the SDU if none of its segments went out yet
        self.lower_dn.on_discard_pdu(sn(count, self.sn_size()));
        self.remove_from_window(count);

        while self.state.tx_next_ack < self.state.tx_next && !self.window.contains(self.state.tx_next_ack) {
            self.state.tx_next_ack += 1;
        }
        if self.state.tx_trans < self.state.tx_next_ack {
            self.state.tx_trans = self.state.tx_next_ack;
        }
    }

    /// Stop discard timers of every SDU up to and including `highest_count`
    fn stop_discard_timer(&mut self, highest_count: u32) {
        if self.config.discard_timer.is_none() {
            debug!(
                "Cannot stop discard timers. No discard timer configured. highest_count={}",
                highest_count
            );
            return;
        }
        let st = self.state;
        if highest_count < st.tx_next_ack || highest_count >= st.tx_next {
            warn!(
                "Cannot stop discard timers. highest_count={} is outside tx_window. {}",
                highest_count, st
            );
            return;
        }
        debug!("Stopping discard timers. highest_count={}", highest_count);

        while self.state.tx_next_ack <= highest_count {
            if self.remove_from_window(self.state.tx_next_ack) {
                trace!("Stopped discard timer. count={}", self.state.tx_next_ack);
            }
            self.state.tx_next_ack += 1;
        }
        if self.state.tx_trans < self.state.tx_next_ack {
            self.state.tx_trans = self.state.tx_next_ack;
        }
    }

    /// COUNT of a notified SN relative to the lower edge of the TX window
    fn notification_count_estimation(&self, notif_sn: u32) -> u32 {
        let tx_lower = if self.config.discard_timer.is_some() {
            self.state.tx_next_ack
        } else {
            self.state.tx_trans
        };
        estimate_count(notif_sn, tx_lower, self.sn_size())
    }

    /// Lower layer reports that the PDU with `notif_sn` was transmitted
    pub fn handle_transmit_notification(&mut self, notif_sn: u32) {
        let _entered = self.span.clone().entered();
        debug!("Handling transmit notification. notif_sn={}", notif_sn);
        if notif_sn >= self.sn_size().cardinality() {
            error!(
                "Invalid transmit notification. notif_sn={} exceeds sn_size={}",
                notif_sn,
                self.sn_size()
            );
            return;
        }

        let notif_count = self.notification_count_estimation(notif_sn);
        if notif_count < self.state.tx_trans {
            info!(
                "Invalid notification SN, notif_count is too low. notif_sn={} notif_count={} {}",
                notif_sn, notif_count, self.state
            );
            return;
        }
        if notif_count >= self.state.tx_next {
            error!(
                "Invalid notification SN, notif_count is too high. notif_sn={} notif_count={} {}",
                notif_sn, notif_count, self.state
            );
            return;
        }
        self.state.tx_trans = notif_count + 1;
        debug!("Updated tx_trans. {}", self.state);

        if self.config.discard_timer.is_some() && self.is_um() {
            self.stop_discard_timer(notif_count);
        }
    }

    /// Lower layer reports that the PDU with `notif_sn` was delivered to the peer
    pub fn handle_delivery_notification(&mut self, notif_sn: u32) {
        let _entered = self.span.clone().entered();
        debug!("Handling delivery notification. notif_sn={}", notif_sn);
        if notif_sn >= self.sn_size().cardinality() {
            error!(
                "Invalid delivery notification. notif_sn={} exceeds sn_size={}",
                notif_sn,
                self.sn_size()
            );
            return;
        }

        let notif_count = self.notification_count_estimation(notif_sn);
        if notif_count >= self.state.tx_next {
            error!(
                "Got notification for invalid COUNT. notif_count={} {}",
                notif_count, self.state
            );
            return;
        }
        if self.config.discard_timer.is_none() {
            return;
        }

        if self.is_am() {
            self.stop_discard_timer(notif_count);
        } else {
            error!(
                "Ignored unexpected PDU delivery notification in UM bearer. notif_sn={}",
                notif_sn
            );
        }
    }

    /// Lower layer reports a retransmission of the PDU with `notif_sn`
    pub fn handle_retransmit_notification(&mut self, notif_sn: u32) {
        let _entered = self.span.clone().entered();
        if self.is_srb() {
            error!("Ignored unexpected PDU retransmit notification in SRB. notif_sn={}", notif_sn);
            return;
        }
        if self.is_um() {
            error!(
                "Ignored unexpected PDU retransmit notification in UM bearer. notif_sn={}",
                notif_sn
            );
            return;
        }
        debug!("Ignored PDU retransmit notification. notif_sn={}", notif_sn);
    }

    /// Lower layer reports delivery of a retransmitted PDU
    pub fn handle_delivery_retransmitted_notification(&mut self, notif_sn: u32) {
        let _entered = self.span.clone().entered();
        if self.is_srb() {
            error!(
                "Ignored unexpected PDU delivery retransmitted notification in SRB. notif_sn={}",
                notif_sn
            );
            return;
        }
        if self.is_um() {
            error!(
                "Ignored unexpected PDU delivery retransmitted notification in UM bearer. notif_sn={}",
                notif_sn
            );
            return;
        }
        // Retransmitted PDUs are cleaned up by the delivery notification of a later original
        debug!("Ignored PDU delivery retransmitted notification. notif_sn={}", notif_sn);
    }

    /// Apply a status report received from the peer
    pub fn handle_status_report(&mut self, status: Bytes) {
        let _entered = self.span.clone().entered();
        let mut dec = BitDecoder::new(&status);
        let fmc = match read_status_report_header(&mut dec) {
            Ok(fmc) => fmc,
            Err(err) => {
                warn!("Ignoring status report. err={} pdu={}", err, bytes_to_hex(&status));
                return;
            }
        };
        info!("Status report. fmc={} {}", fmc, self.state);

        // Everything below FMC is either delivered or given up by the peer
        let discard_end = fmc.min(self.state.tx_next);
        let mut count = self.state.tx_next_ack;
        while count < discard_end {
            if self.window.contains(count) {
                self.discard_pdu(count);
            }
            count += 1;
        }

        let mut bit_count = fmc;
        while let Some(bit) = dec.unpack(1) {
            bit_count = bit_count.wrapping_add(1);
            // 1: received by the peer, 0: missing
            if bit == 1 {
                self.discard_pdu(bit_count);
            }
        }
    }

    /// Retransmit every buffered SDU from tx_next_ack onwards, with its original COUNT
    pub fn retransmit_all_pdus(&mut self) {
        let _entered = self.span.clone().entered();
        if self.config.discard_timer.is_none() {
            debug!("Cannot retransmit. No discard timer configured.");
            return;
        }
        if !self.is_am() {
            error!("Cannot retransmit. Not an AM bearer.");
            return;
        }

        self.state.tx_trans = self.state.tx_next_ack;

        for count in self.state.tx_next_ack..self.state.tx_next {
            let sdu = match self.window.get(count).and_then(|info| info.sdu.clone()) {
                Some(sdu) => sdu,
                None => continue,
            };
            match self.build_data_pdu(&sdu, count) {
                Ok(pdu) => self.write_data_pdu_to_lower_layers(count, pdu, true),
                Err(err) => {
                    error!(
                        "Could not build data PDU during retransmission, notifying RRC. count={} err={} {}",
                        count, err, self.state
                    );
                    self.upper_cn.on_protocol_failure();
                    return;
                }
            }
        }
    }

    /// Send a status report compiled by the RX entity of this bearer
    pub fn send_status_report(&mut self, status_provider: &dyn PdcpStatusProvider) {
        let _entered = self.span.clone().entered();
        if self.config.status_report_required {
            info!("Status report triggered.");
            let status_report = status_provider.compile_status_report();
            self.write_control_pdu_to_lower_layers(status_report);
        } else {
            warn!("Status report triggered but not configured.");
        }
    }

    /// PDCP data recovery (TS 38.323 section 5.4), AM DRBs only
    pub fn data_recovery(&mut self, status_provider: &dyn PdcpStatusProvider) {
        let _entered = self.span.clone().entered();
        if self.is_srb() || !self.is_am() {
            error!("Invalid bearer type for data recovery. rlc_mode={:?}", self.config.rlc_mode);
            return;
        }
        info!("Data recovery requested. {}", self.state);

        if self.config.status_report_required {
            self.send_status_report(status_provider);
        }
        self.retransmit_all_pdus();
    }

    /// PDCP entity re-establishment (TS 38.323 section 5.1.2)
    pub fn reestablish(&mut self, sec_cfg: &SecurityConfig) {
        let _entered = self.span.clone().entered();
        debug!("Reestablishing PDCP. {}", self.state);

        // UM PDUs cannot be retransmitted and RLC already dropped them
        if self.is_srb() || self.is_um() {
            self.reset();
        }

        if let Err(err) = self.security.configure(sec_cfg) {
            error!("Could not apply security configuration on re-establishment. err={}", err);
            self.upper_cn.on_protocol_failure();
            return;
        }

        if self.is_am() {
            self.retransmit_all_pdus();
        }
        info!("Reestablished PDCP. {}", self.state);
    }

    /// Return to the initial state, cancelling every discard timer
    pub fn reset(&mut self) {
        self.timers.clear();
        self.window.clear();
        self.state = PdcpTxState::default();
        self.max_count_notified = false;
        self.max_count_overflow = false;
        debug!("Entity was reset. {}", self.state);
    }

    /// Advance the entity clock, handling expired discard timers
    pub fn tick(&mut self, elapsed: Duration) {
        let expired = self.timers.advance(elapsed);
        if expired.is_empty() {
            return;
        }
        let _entered = self.span.clone().entered();
        for (id, TxTimerEvent::Discard(count)) in expired {
            // Entry may have been replaced since the timer was armed
            let current = self.window.get(count).and_then(|info| info.discard_timer);
            if current != Some(id) {
                trace!("Ignoring stale discard timer. count={}", count);
                continue;
            }
            if let Some(info) = self.window.get_mut(count) {
                info.discard_timer = None;
            }
            debug!("Discard timer expired. count={}", count);
            self.discard_pdu(count);
            self.metrics.num_discard_timeouts += 1;
        }
    }

    /// Install new algorithms and keys
    pub fn configure_security(&mut self, sec_cfg: &SecurityConfig) -> Result<(), PdcpError> {
        let _entered = self.span.clone().entered();
        self.security.configure(sec_cfg)
    }

    /// Switch integrity protection and ciphering on or off
    pub fn enable_security(&mut self, integrity: bool, ciphering: bool) -> Result<(), PdcpError> {
        let _entered = self.span.clone().entered();
        self.security.enable(integrity, ciphering)?;
        info!("Security enabled. integrity={} ciphering={}", integrity, ciphering);
        Ok(())
    }

    pub fn state(&self) -> PdcpTxState {
        self.state
    }

    pub fn config(&self) -> &PdcpTxConfig {
        &self.config
    }

    pub fn rb_id(&self) -> RbId {
        self.rb_id
    }

    pub fn rb_type(&self) -> RbType {
        self.rb_id.rb_type()
    }

    /// Whether an SDU with this COUNT is buffered in the TX window
    pub fn is_buffered(&self, count: u32) -> bool {
        self.window.contains(count)
    }

    /// Number of SDUs buffered in the TX window
    pub fn buffered_sdus(&self) -> usize {
        self.window.len()
    }

    /// Number of running discard timers
    pub fn running_discard_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn metrics(&self) -> &PdcpTxMetrics {
        &self.metrics
    }

    /// Return the metrics and start counting from zero
    pub fn take_metrics(&mut self) -> PdcpTxMetrics {
        std::mem::take(&mut self.metrics)
    }
}
