//! Checkpoint scheduling.
//!
//! Checkpoints live on a fixed grid anchored at the origin block. Resuming
//! from the latest persisted block snaps back to that grid so every run
//! produces the same checkpoints for the same history.

/// Grid stride used to snap the latest persisted block back onto the
/// checkpoint grid.
pub const ALIGNMENT_STRIDE: u64 = 1200;

/// Largest value `origin + k * ALIGNMENT_STRIDE` (integer `k`, floor) that is
/// `<= latest`.
///
/// When `latest` lies before the origin the result lies before it as well
/// (floor division), mirroring a grid that extends in both directions.
pub fn closest_lower_aligned(latest: u64, origin: u64) -> u64 {
    let steps = (latest as i128 - origin as i128).div_euclid(ALIGNMENT_STRIDE as i128);
    let aligned = origin as i128 + steps * ALIGNMENT_STRIDE as i128;
    aligned.max(0) as u64
}

/// Checkpoints to fetch, in strictly increasing order.
///
/// Emits `base + k * interval` for every `k >= 1` with a value above
/// `latest_persisted` and below `head`, then `head` itself, where `base` is
/// [`closest_lower_aligned`]. The head is always last so the freshest state
/// is always attempted.
pub fn schedule(latest_persisted: u64, head: u64, interval: u64, origin: u64) -> Vec<u64> {
    debug_assert!(interval > 0, "checkpoint interval must be non-zero");
    let interval = interval.max(1);

    let mut checkpoints = Vec::new();
    let mut next = closest_lower_aligned(latest_persisted, origin).saturating_add(interval);
    // Intervals shorter than the stride can land on already persisted blocks
    if next <= latest_persisted {
        let skip = (latest_persisted - next) / interval + 1;
        next = next.saturating_add(skip.saturating_mul(interval));
    }
    while next < head {
        checkpoints.push(next);
        next = next.saturating_add(interval);
    }
    checkpoints.push(head);

    checkpoints
}

/// Whether enough blocks have passed since `latest_persisted` to justify a
/// fetch cycle.
pub fn needs_refresh(latest_persisted: u64, head: u64, interval: u64) -> bool {
    head.saturating_sub(interval) > latest_persisted
}
