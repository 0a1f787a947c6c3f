//! SDU Sink
//!
//! Upper layer of the receiving peer. Every generated SDU starts with its sequence number,
//! so the sink can check that delivery is in order and count what never arrived.

use serde::Serialize;
use tracing::{trace, warn};

/// Delivery statistics of the receiving peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub num_sdus: u64,
    pub num_sdu_bytes: u64,
    /// SDUs delivered after a higher sequence number
    pub num_out_of_order: u64,
    /// Sequence numbers skipped over, lost for good
    pub num_missing: u64,
    pub num_malformed: u64,
}

#[derive(Debug, Default)]
pub struct SduSink {
    next_seq: u64,
    stats: SinkStats,
}

impl SduSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sdu: &[u8]) {
        let seq = match sdu.get(..8).and_then(|head| head.try_into().ok()) {
            Some(head) => u64::from_be_bytes(head),
            None => {
                warn!("Malformed SDU. len={}", sdu.len());
                self.stats.num_malformed += 1;
                return;
            }
        };
        self.stats.num_sdus += 1;
        self.stats.num_sdu_bytes += sdu.len() as u64;

        if seq < self.next_seq {
            warn!("SDU out of order. seq={} expected={}", seq, self.next_seq);
            self.stats.num_out_of_order += 1;
            // Counted as missing when it was skipped
            self.stats.num_missing = self.stats.num_missing.saturating_sub(1);
            return;
        }
        if seq > self.next_seq {
            trace!("SDUs skipped. from={} to={}", self.next_seq, seq - 1);
            self.stats.num_missing += seq - self.next_seq;
        }
        self.next_seq = seq + 1;
    }

    /// Account for SDUs never seen at the end of a run of `num_sdus`
    pub fn finish(mut self, num_sdus: u64) -> SinkStats {
        if num_sdus > self.next_seq {
            self.stats.num_missing += num_sdus - self.next_seq;
        }
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdu(seq: u64) -> Vec<u8> {
        let mut sdu = seq.to_be_bytes().to_vec();
        sdu.extend_from_slice(&[0xAB; 4]);
        sdu
    }

    #[test]
    fn test_in_order() {
        let mut sink = SduSink::new();
        for seq in 0..5 {
            sink.record(&sdu(seq));
        }
        let stats = sink.finish(5);
        assert_eq!(stats.num_sdus, 5);
        assert_eq!(stats.num_sdu_bytes, 60);
        assert_eq!(stats.num_missing, 0);
        assert_eq!(stats.num_out_of_order, 0);
    }

    #[test]
    fn test_gaps_and_reordering() {
        let mut sink = SduSink::new();
        sink.record(&sdu(0));
        sink.record(&sdu(3));
        sink.record(&sdu(1));
        sink.record(&[1, 2, 3]);
        let stats = sink.finish(6);
        assert_eq!(stats.num_sdus, 3);
        assert_eq!(stats.num_out_of_order, 1);
        // 2, 4 and 5 never arrived in order
        assert_eq!(stats.num_missing, 3);
        assert_eq!(stats.num_malformed, 1);
    }
}
