//! COUNT Arithmetic
//!
//! COUNT = [HFN, SN] (TS 38.323 section 6.3.2). Only the SN travels on the wire; the
//! HFN is recovered from a reference COUNT, see [`estimate_count`].

use crate::config::SnSize;

/// SN part of a COUNT
pub fn sn(count: u32, sn_size: SnSize) -> u32 {
    count & (sn_size.cardinality() - 1)
}

/// HFN part of a COUNT
pub fn hfn(count: u32, sn_size: SnSize) -> u32 {
    count >> sn_size.bits()
}

/// Assemble a COUNT from HFN and SN; HFN bits beyond 32 bits are dropped
pub fn count(hfn: u32, sn: u32, sn_size: SnSize) -> u32 {
    (hfn << sn_size.bits()) | (sn & (sn_size.cardinality() - 1))
}

/// Resolve a received or notified SN to the COUNT nearest to `reference`
///
/// Same rule as RCVD_COUNT in TS 38.323 section 5.2.2.1:
/// - SN < SN(ref) - Window_Size: HFN = HFN(ref) + 1
/// - SN >= SN(ref) + Window_Size: HFN = HFN(ref) - 1
/// - otherwise: HFN = HFN(ref)
pub fn estimate_count(rcvd_sn: u32, reference: u32, sn_size: SnSize) -> u32 {
    let window_size = i64::from(sn_size.window_size());
    let ref_sn = i64::from(sn(reference, sn_size));
    let ref_hfn = hfn(reference, sn_size);

    let rcvd_hfn = if i64::from(rcvd_sn) < ref_sn - window_size {
        ref_hfn.wrapping_add(1)
    } else if i64::from(rcvd_sn) >= ref_sn + window_size {
        ref_hfn.wrapping_sub(1)
    } else {
        ref_hfn
    };
    count(rcvd_hfn, rcvd_sn, sn_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_split() {
        let c = count(3, 0x123, SnSize::Size12);
        assert_eq!(c, 0x3123);
        assert_eq!(sn(c, SnSize::Size12), 0x123);
        assert_eq!(hfn(c, SnSize::Size12), 3);

        let c = count(1, 0x3FFFF, SnSize::Size18);
        assert_eq!(c, 0x7FFFF);
        assert_eq!(sn(c, SnSize::Size18), 0x3FFFF);
        assert_eq!(hfn(c, SnSize::Size18), 1);
    }

    #[test]
    fn test_estimate_count_same_hfn() {
        assert_eq!(estimate_count(5, 0, SnSize::Size12), 5);
        assert_eq!(estimate_count(2047, 0, SnSize::Size12), 2047);
        assert_eq!(estimate_count(100, 4096 + 50, SnSize::Size12), 4096 + 100);
    }

    #[test]
    fn test_estimate_count_wraps_forward() {
        // Reference near the end of an SN cycle, SN already wrapped
        assert_eq!(estimate_count(3, 4090, SnSize::Size12), 4096 + 3);
        assert_eq!(estimate_count(10, 262_140, SnSize::Size18), 262_144 + 10);
    }

    #[test]
    fn test_estimate_count_from_previous_wrap() {
        // Reference just past a wrap, SN still from the previous cycle
        assert_eq!(estimate_count(4090, 4096 + 3, SnSize::Size12), 4090);
        // HFN(ref) = 0 wraps to the top of the COUNT space
        assert_eq!(estimate_count(4095, 5, SnSize::Size12), u32::MAX);
    }

    #[test]
    fn test_estimate_count_recovers_count_within_window() {
        for sn_size in [SnSize::Size12, SnSize::Size18] {
            let window = sn_size.window_size();
            let references = [
                window,
                sn_size.cardinality() - 1,
                sn_size.cardinality() * 7 + 3,
                0x8000_1234,
                u32::MAX - window,
            ];
            for reference in references {
                let step = (window / 97).max(1);
                let mut offset = 0u32;
                while offset < 2 * window {
                    // COUNT in [reference - window, reference + window)
                    let c = reference.wrapping_sub(window).wrapping_add(offset);
                    assert_eq!(
                        estimate_count(sn(c, sn_size), reference, sn_size),
                        c,
                        "sn_size={} reference={} count={}",
                        sn_size,
                        reference,
                        c
                    );
                    offset += step;
                }
                // Both edges of the window
                let lower = reference.wrapping_sub(window);
                let upper = reference.wrapping_add(window - 1);
                assert_eq!(estimate_count(sn(lower, sn_size), reference, sn_size), lower);
                assert_eq!(estimate_count(sn(upper, sn_size), reference, sn_size), upper);
            }
        }
    }
}
