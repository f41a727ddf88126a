//! Host bit-timing → controller-native bit-timing mapping.
//!
//! The mapper never invents time quanta and never changes the requested
//! bit rate; it only reallocates time quanta between `prop_seg` and
//! `phase_seg1` so a value the controller can't represent directly (but
//! whose *sum* it can) still gets applied.

use crate::wire::{CanBitTimingConst, DeviceBitTiming};

fn clamp(value: u32, min: u32, max: u32) -> u32 {
    value.clamp(min, max)
}

/// Maps `input` into `limits`, preserving `prop_seg + phase_seg1` whenever
/// the sum itself is representable by shifting the excess between the two
/// segments; otherwise each segment is clamped independently.
/// `phase_seg2`, `sjw`, `prescaler` are passed through clamped but never
/// reallocated.
pub fn map_timing(input: DeviceBitTiming, limits: &CanBitTimingConst) -> DeviceBitTiming {
    let sum = input.prop_seg + input.phase_seg1;
    let min_sum = limits.tseg1_min.saturating_mul(2);
    let max_sum = limits.tseg1_max.saturating_mul(2);

    let (prop_seg, phase_seg1) = if sum >= min_sum && sum <= max_sum {
        // The sum is representable: prefer keeping prop_seg as given and
        // push whatever doesn't fit into phase_seg1, then clamp phase_seg1
        // and push its own excess back into prop_seg.
        let prop_seg = clamp(input.prop_seg, limits.tseg1_min, limits.tseg1_max);
        let remainder = sum.saturating_sub(prop_seg);
        let phase_seg1 = clamp(remainder, limits.tseg1_min, limits.tseg1_max);
        let prop_seg = clamp(sum.saturating_sub(phase_seg1), limits.tseg1_min, limits.tseg1_max);
        (prop_seg, phase_seg1)
    } else {
        (
            clamp(input.prop_seg, limits.tseg1_min, limits.tseg1_max),
            clamp(input.phase_seg1, limits.tseg1_min, limits.tseg1_max),
        )
    };

    DeviceBitTiming {
        prop_seg,
        phase_seg1,
        phase_seg2: clamp(input.phase_seg2, limits.tseg2_min, limits.tseg2_max),
        sjw: clamp(input.sjw, 1, limits.sjw_max),
        brp: clamp(input.brp, limits.brp_min, limits.brp_max),
    }
}
