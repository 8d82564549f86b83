//! Session risk level: trailing-window maximum with linear decay.
//!
//! ```text
//! age (turns ago)   0 .. window-1   window .. window+decay-1     beyond
//! weight            1.0             (decay - k) / decay          0
//!                                   k = age - window + 1
//! ```
//!
//! A single crisis turn keeps the session flagged for `window` turns, then
//! loses one step per turn until it no longer contributes.

use super::types::Turn;

/// Recompute the session risk level from its most recent turns
pub fn current_risk_level(turns: &[Turn], window: usize, decay: usize) -> u8 {
    turns
        .iter()
        .rev()
        .take(window + decay)
        .enumerate()
        .map(|(age, turn)| decayed_risk(turn.risk_score, age, window, decay))
        .max()
        .unwrap_or(0)
}

/// Contribution of one turn's risk at a given age
pub fn decayed_risk(risk: u8, age: usize, window: usize, decay: usize) -> u8 {
    if age < window {
        return risk;
    }
    let beyond = age - window + 1;
    if beyond >= decay {
        return 0;
    }
    let remaining = (decay - beyond) as u32;
    (risk as u32 * remaining / decay as u32) as u8
}
