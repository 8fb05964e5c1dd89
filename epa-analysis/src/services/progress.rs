//! Overall progress calculation
//!
//! Each phase owns a fixed band of the overall percentage:
//! phase 1 → 0-30, phase 2 → 30-70, phase 3 → 70-100.
//! Phase 2 runs the most units in parallel and dominates wall-clock time, so it
//! owns the widest band.

/// (start, end) of each phase's band, indexed by phase number - 1
pub const PHASE_BANDS: [(u8, u8); 3] = [(0, 30), (30, 70), (70, 100)];

/// Overall percentage after `completed_in_phase` of `total_in_phase` units of
/// `phase_number` reached a terminal state
///
/// Rounded down and clamped to the phase's band. A phase without units counts
/// as complete. Phase numbers above 3 report 100, below 1 report 0.
pub fn progress(phase_number: u8, completed_in_phase: u32, total_in_phase: u32) -> u8 {
    let (start, end) = match phase_number {
        0 => return 0,
        n if n as usize > PHASE_BANDS.len() => return 100,
        n => PHASE_BANDS[n as usize - 1],
    };

    if total_in_phase == 0 {
        return end;
    }

    let width = u64::from(end - start);
    let completed = u64::from(completed_in_phase.min(total_in_phase));
    let advanced = completed * width / u64::from(total_in_phase);

    (u64::from(start) + advanced).min(u64::from(end)) as u8
}

/// Band start of a phase (the progress reported before any unit finished)
pub fn band_start(phase_number: u8) -> u8 {
    progress(phase_number, 0, 1)
}
