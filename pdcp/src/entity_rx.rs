//! PDCP RX Entity
//!
//! Receive operation of TS 38.323 section 5.2.2: COUNT derivation, deciphering and
//! integrity verification, duplicate detection, reordering with t-Reordering, in-order
//! delivery, status report compilation and re-establishment.

use crate::config::{PdcpRxConfig, PdcpTimer, RlcMode, SnSize};
use crate::count::estimate_count;
use crate::metrics::PdcpRxMetrics;
use crate::pdu::{
    control_pdu_get_cpt, pdu_get_dc, read_data_pdu_header, write_status_report_header, ControlPduType,
    DcField, STATUS_REPORT_HEADER_SIZE, STATUS_REPORT_MAX_BITMAP_BITS,
};
use crate::security::{SecMac, SecurityConfig, SecurityEngine, SecurityPrimitives, MAC_LEN};
use crate::window::SduWindow;
use crate::PdcpError;
use bytes::{Bytes, BytesMut};
use common::timers::{TimerId, TimerQueue};
use common::types::RbId;
use common::utils::{bytes_to_hex, BitEncoder};
use interfaces::{PdcpRxStatusHandler, PdcpRxUpperControlNotifier, PdcpRxUpperDataNotifier, PdcpStatusProvider};
use num_traits::FromPrimitive;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, info_span, trace, warn, Span};

/// RX state variables (TS 38.323 section 7.1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdcpRxState {
    /// COUNT following the highest COUNT received so far
    pub rx_next: u32,
    /// COUNT of the first SDU not yet delivered to upper layers
    pub rx_deliv: u32,
    /// COUNT following the one that triggered t-Reordering
    pub rx_reord: u32,
}

impl fmt::Display for PdcpRxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx_next={} rx_deliv={} rx_reord={}",
            self.rx_next, self.rx_deliv, self.rx_reord
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum RxTimerEvent {
    Reordering,
}

/// PDCP RX entity
pub struct PdcpEntityRx {
    rb_id: RbId,
    config: PdcpRxConfig,
    state: PdcpRxState,
    window: SduWindow<Bytes>,
    timers: TimerQueue<RxTimerEvent>,
    reordering_timer: Option<TimerId>,
    security: SecurityEngine,
    upper_dn: Box<dyn PdcpRxUpperDataNotifier>,
    upper_cn: Box<dyn PdcpRxUpperControlNotifier>,
    status_handler: Box<dyn PdcpRxStatusHandler>,
    max_count_notified: bool,
    max_count_overflow: bool,
    metrics: PdcpRxMetrics,
    span: Span,
}

impl PdcpEntityRx {
    /// Create a new RX entity
    pub fn new(
        ue_index: u32,
        rb_id: RbId,
        config: PdcpRxConfig,
        primitives: SecurityPrimitives,
        upper_dn: Box<dyn PdcpRxUpperDataNotifier>,
        upper_cn: Box<dyn PdcpRxUpperControlNotifier>,
        status_handler: Box<dyn PdcpRxStatusHandler>,
    ) -> Result<Self, PdcpError> {
        config.validate(rb_id)?;

        let span = info_span!("pdcp", ue = ue_index, rb = %rb_id, dir = "rx");
        {
            let _entered = span.enter();
            if rb_id.is_drb() && config.t_reordering == PdcpTimer::Infinity {
                warn!("t-Reordering of infinity on DRBs is not advised. It can cause data stalls.");
            }
            info!(
                "PDCP RX entity created. rlc_mode={:?} sn_size={} t_reordering={}",
                config.rlc_mode, config.sn_size, config.t_reordering
            );
        }

        Ok(Self {
            rb_id,
            window: SduWindow::new(config.sn_size),
            timers: TimerQueue::new(),
            reordering_timer: None,
            security: SecurityEngine::new(primitives, rb_id.bearer_id(), config.direction),
            state: PdcpRxState::default(),
            config,
            upper_dn,
            upper_cn,
            status_handler,
            max_count_notified: false,
            max_count_overflow: false,
            metrics: PdcpRxMetrics::default(),
            span,
        })
    }

    fn is_srb(&self) -> bool {
        self.rb_id.is_srb()
    }

    fn is_um(&self) -> bool {
        self.config.rlc_mode == RlcMode::Um
    }

    fn sn_size(&self) -> SnSize {
        self.config.sn_size
    }

    fn is_reordering_running(&self) -> bool {
        self.reordering_timer
            .map_or(false, |id| self.timers.is_running(id))
    }

    /// Receive a PDU from the lower layer
    pub fn handle_pdu(&mut self, pdu: Bytes) {
        let _entered = self.span.clone().entered();
        self.metrics.add_pdu(pdu.len());
        debug!("RX PDU. pdu_len={}", pdu.len());
        trace!("RX PDU payload: {}", bytes_to_hex(&pdu));

        let Some(&first_byte) = pdu.first() else {
            error!("Dropping empty PDU.");
            self.metrics.num_dropped_pdus += 1;
            return;
        };

        // SRB PDUs carry no D/C field
        if self.is_srb() || pdu_get_dc(first_byte) == DcField::Data {
            self.handle_data_pdu(pdu);
        } else {
            self.handle_control_pdu(pdu);
        }
    }

    fn handle_control_pdu(&mut self, pdu: Bytes) {
        let cpt = control_pdu_get_cpt(pdu[0]);
        match ControlPduType::from_u8(cpt) {
            Some(ControlPduType::StatusReport) => {
                debug!("RX PDU. type=ctrl cpt=status_report pdu_len={}", pdu.len());
                self.status_handler.on_status_report(pdu);
            }
            _ => {
                error!("Unsupported control PDU type. cpt={} pdu_len={}", cpt, pdu.len());
                self.metrics.num_dropped_pdus += 1;
            }
        }
    }

    fn handle_data_pdu(&mut self, pdu: Bytes) {
        let hdr_len = self.sn_size().header_len();
        if pdu.len() <= hdr_len {
            error!("RX PDU too small. pdu_len={} hdr_len={}", pdu.len(), hdr_len);
            self.metrics.num_dropped_pdus += 1;
            return;
        }
        debug!("RX state. {}", self.state);

        let hdr = match read_data_pdu_header(&pdu, self.sn_size()) {
            Ok(hdr) => hdr,
            Err(err) => {
                error!("Failed to extract SN. err={}", err);
                self.metrics.num_dropped_pdus += 1;
                return;
            }
        };

        let rcvd_count = estimate_count(hdr.sn, self.state.rx_deliv, self.sn_size());
        info!(
            "RX PDU. type=data pdu_len={} sn={} count={}",
            pdu.len(),
            hdr.sn,
            rcvd_count
        );

        // COUNT must never be reused under one key
        if rcvd_count >= self.config.max_count.notify && !self.max_count_notified {
            warn!("Approaching max_count, notifying RRC. count={}", rcvd_count);
            self.upper_cn.on_max_count_reached();
            self.max_count_notified = true;
        }
        if rcvd_count >= self.config.max_count.hard {
            if !self.max_count_overflow {
                error!("Reached max_count, refusing further RX. count={}", rcvd_count);
                self.upper_cn.on_protocol_failure();
                self.max_count_overflow = true;
            }
            self.metrics.num_dropped_pdus += 1;
            return;
        }

        // Deciphering covers SDU and MAC-I
        let mut buf = BytesMut::from(&pdu[..]);
        self.security.apply_ciphering(rcvd_count, &mut buf[hdr_len..]);

        // MAC-I is always present on SRBs, on DRBs only with integrity protection
        if self.is_srb() || self.security.integrity_enabled() {
            if buf.len() < hdr_len + MAC_LEN {
                error!(
                    "PDU too small to extract MAC-I. pdu_len={} hdr_len={} mac_len={}",
                    buf.len(),
                    hdr_len,
                    MAC_LEN
                );
                self.metrics.num_dropped_pdus += 1;
                return;
            }
            let mac_bytes = buf.split_off(buf.len() - MAC_LEN);
            let mut mac: SecMac = [0; MAC_LEN];
            mac.copy_from_slice(&mac_bytes);

            if self.security.integrity_enabled() {
                if !self.security.verify_mac(rcvd_count, &buf, &mac) {
                    warn!("Integrity failed, dropping PDU. count={}", rcvd_count);
                    self.metrics.num_integrity_failed_pdus += 1;
                    if self.config.escalate_integrity_failure {
                        self.upper_cn.on_integrity_failure();
                    }
                    return;
                }
                self.metrics.num_integrity_verified_pdus += 1;
                trace!("Integrity passed. count={}", rcvd_count);
            }
        }

        let sdu = buf.split_off(hdr_len).freeze();

        if rcvd_count < self.state.rx_deliv {
            debug!(
                "Out-of-order after timeout, duplicate or count wrap-around. count={} {}",
                rcvd_count, self.state
            );
            self.metrics.num_dropped_pdus += 1;
            return;
        }
        match self.window.occupant(rcvd_count) {
            Some(count) if count == rcvd_count => {
                debug!("Duplicate PDU dropped. count={}", rcvd_count);
                self.metrics.num_dropped_pdus += 1;
                return;
            }
            Some(old_count) => {
                error!(
                    "Removing old PDU with count={} for new PDU with count={}",
                    old_count, rcvd_count
                );
                self.window.remove(old_count);
            }
            None => {}
        }

        self.window.insert(rcvd_count, sdu);
        if rcvd_count >= self.state.rx_next {
            self.state.rx_next = rcvd_count + 1;
        }

        if rcvd_count == self.state.rx_deliv {
            self.deliver_all_consecutive_counts();
        }

        if self.is_reordering_running() && self.state.rx_deliv >= self.state.rx_reord {
            self.stop_reordering_timer();
            debug!("Stopped t-Reordering. {}", self.state);
        }

        match self.config.t_reordering {
            PdcpTimer::Infinity => {}
            t_reordering if t_reordering.is_zero() => {
                self.state.rx_reord = self.state.rx_next;
                self.handle_t_reordering_expire();
            }
            PdcpTimer::Finite(duration) => {
                if !self.is_reordering_running() && self.state.rx_deliv < self.state.rx_next {
                    self.state.rx_reord = self.state.rx_next;
                    self.start_reordering_timer(duration);
                    debug!("Started t-Reordering. {}", self.state);
                }
            }
        }

        debug!("RX state. {}", self.state);
    }

    fn deliver_sdu(&mut self, count: u32, sdu: Bytes) {
        info!("RX SDU. count={} sdu_len={}", count, sdu.len());
        trace!("RX SDU payload: {}", bytes_to_hex(&sdu));
        self.metrics.add_sdu(sdu.len());
        self.upper_dn.on_new_sdu(sdu);
    }

    /// Deliver the consecutive run of SDUs starting at rx_deliv
    fn deliver_all_consecutive_counts(&mut self) {
        while self.state.rx_deliv != self.state.rx_next {
            let count = self.state.rx_deliv;
            let Some(sdu) = self.window.remove(count) else {
                break;
            };
            self.deliver_sdu(count, sdu);
            self.state.rx_deliv += 1;
        }
    }

    /// Deliver every stored SDU in ascending COUNT regardless of gaps, state is left alone
    fn deliver_all_sdus(&mut self) {
        for count in self.state.rx_deliv..self.state.rx_next {
            if let Some(sdu) = self.window.remove(count) {
                self.deliver_sdu(count, sdu);
            }
        }
    }

    fn discard_all_sdus(&mut self) {
        let discarded = self.window.len();
        self.window.clear();
        self.state.rx_deliv = self.state.rx_next;
        debug!("Discarded all RX SDUs. num_sdus={} {}", discarded, self.state);
    }

    fn start_reordering_timer(&mut self, duration: Duration) {
        self.stop_reordering_timer();
        self.reordering_timer = Some(self.timers.start(duration, RxTimerEvent::Reordering));
    }

    fn stop_reordering_timer(&mut self) {
        if let Some(id) = self.reordering_timer.take() {
            self.timers.stop(id);
        }
    }

    fn handle_t_reordering_expire(&mut self) {
        self.metrics.num_t_reordering_timeouts += 1;

        // Forced delivery of everything below RX_REORD
        while self.state.rx_deliv < self.state.rx_reord {
            let count = self.state.rx_deliv;
            if let Some(sdu) = self.window.remove(count) {
                self.deliver_sdu(count, sdu);
            }
            self.state.rx_deliv += 1;
        }

        self.deliver_all_consecutive_counts();
        debug!("RX state. {}", self.state);

        if self.state.rx_deliv < self.state.rx_next {
            match self.config.t_reordering {
                PdcpTimer::Finite(duration) if !duration.is_zero() => {
                    debug!("Updating rx_reord to rx_next. {}", self.state);
                    self.state.rx_reord = self.state.rx_next;
                    self.start_reordering_timer(duration);
                }
                _ => {
                    error!(
                        "Reordering timer expired after {} and rx_deliv < rx_next. {}",
                        self.config.t_reordering, self.state
                    );
                }
            }
        }
    }

    /// Advance the entity clock, handling an expired t-Reordering
    pub fn tick(&mut self, elapsed: Duration) {
        let expired = self.timers.advance(elapsed);
        if expired.is_empty() {
            return;
        }
        let _entered = self.span.clone().entered();
        for (id, RxTimerEvent::Reordering) in expired {
            if self.reordering_timer != Some(id) {
                trace!("Ignoring stale t-Reordering expiry.");
                continue;
            }
            self.reordering_timer = None;
            info!("Reordering timer expired. {}", self.state);
            self.handle_t_reordering_expire();
        }
    }

    /// Status report for the current receive state (TS 38.323 section 6.2.3.1)
    pub fn compile_status_report(&self) -> Bytes {
        let bitmap_begin = self.state.rx_deliv.wrapping_add(1);
        let mut bitmap_end = self.state.rx_next;
        if bitmap_begin < bitmap_end && (bitmap_end - bitmap_begin) as usize > STATUS_REPORT_MAX_BITMAP_BITS {
            bitmap_end = bitmap_begin + STATUS_REPORT_MAX_BITMAP_BITS as u32;
        }
        let bitmap_len = bitmap_end.saturating_sub(bitmap_begin) as usize;

        let mut enc = BitEncoder::with_capacity(STATUS_REPORT_HEADER_SIZE + bitmap_len.div_ceil(8));
        write_status_report_header(&mut enc, self.state.rx_deliv);
        for count in bitmap_begin..bitmap_end {
            // 1: received, 0: missing
            enc.pack(u64::from(self.window.contains(count)), 1);
        }
        enc.finish()
    }

    /// PDCP entity re-establishment (TS 38.323 section 5.1.2)
    pub fn reestablish(&mut self, sec_cfg: &SecurityConfig) {
        let _entered = self.span.clone().entered();
        debug!("Reestablishing PDCP. {}", self.state);

        if self.is_srb() {
            self.discard_all_sdus();
        }
        if self.is_srb() || self.is_um() {
            self.stop_reordering_timer();
            if self.is_um() {
                self.deliver_all_sdus();
            }
            self.state = PdcpRxState::default();
            self.max_count_notified = false;
            self.max_count_overflow = false;
        } else {
            warn!("Re-establishment of AM DRBs keeps the RX state, suspension is not supported. {}", self.state);
        }

        if let Err(err) = self.security.configure(sec_cfg) {
            error!("Could not apply security configuration on re-establishment. err={}", err);
            self.upper_cn.on_protocol_failure();
            return;
        }
        info!("Reestablished PDCP. {}", self.state);
    }

    /// Return to the initial state, dropping stored SDUs and t-Reordering
    pub fn reset(&mut self) {
        self.timers.clear();
        self.reordering_timer = None;
        self.window.clear();
        self.state = PdcpRxState::default();
        self.max_count_notified = false;
        self.max_count_overflow = false;
        debug!("Entity was reset. {}", self.state);
    }

    /// Install new algorithms and keys
    pub fn configure_security(&mut self, sec_cfg: &SecurityConfig) -> Result<(), PdcpError> {
        let _entered = self.span.clone().entered();
        self.security.configure(sec_cfg)
    }

    /// Switch integrity verification and deciphering on or off
    pub fn enable_security(&mut self, integrity: bool, ciphering: bool) -> Result<(), PdcpError> {
        let _entered = self.span.clone().entered();
        self.security.enable(integrity, ciphering)?;
        info!("Security enabled. integrity={} ciphering={}", integrity, ciphering);
        Ok(())
    }

    pub fn state(&self) -> PdcpRxState {
        self.state
    }

    pub fn config(&self) -> &PdcpRxConfig {
        &self.config
    }

    pub fn rb_id(&self) -> RbId {
        self.rb_id
    }

    /// Whether t-Reordering is running
    pub fn is_reordering(&self) -> bool {
        self.is_reordering_running()
    }

    /// Number of SDUs stored awaiting in-order delivery
    pub fn buffered_sdus(&self) -> usize {
        self.window.len()
    }

    pub fn metrics(&self) -> &PdcpRxMetrics {
        &self.metrics
    }

    /// Return the metrics and start counting from zero
    pub fn take_metrics(&mut self) -> PdcpRxMetrics {
        std::mem::take(&mut self.metrics)
    }
}

impl PdcpStatusProvider for PdcpEntityRx {
    fn compile_status_report(&self) -> Bytes {
        PdcpEntityRx::compile_status_report(self)
    }
}
