//! Vehicle profile adapter.
//!
//! The scripting runtime is outside this pipeline; the adapter extracts the
//! three capabilities the expansion needs from the profile file once at
//! startup: the traffic-signal penalty, the u-turn penalty, and whether a
//! turn-cost function is declared. Scalars are scaled by 10 into
//! deci-seconds. A missing scalar is a fatal configuration error; a missing
//! turn function falls back to constant zero.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::{PrepareError, Result};
use crate::geo::turn_angle;

/// Angle-dependent turn cost.
#[derive(Debug, Clone, Copy)]
pub enum TurnCostFunction {
    /// No `turn_function` in the profile.
    Zero,
    /// The profile's sigmoid curve, steered by its `turn_penalty` scalar
    /// (deci-seconds). Sharpest at a full u-turn, free when going straight.
    Sigmoid { turn_penalty_ds: i32 },
}

impl TurnCostFunction {
    /// Penalty in deci-seconds for turning from `bearing_in` onto
    /// `bearing_out`.
    pub fn cost(&self, bearing_in: i16, bearing_out: i16) -> i32 {
        match *self {
            TurnCostFunction::Zero => 0,
            TurnCostFunction::Sigmoid { turn_penalty_ds } => {
                // Deviation from straight-through in degrees, 0..=180.
                let deviation = (180 - turn_angle(bearing_in, bearing_out)).abs() as f64;
                let cost =
                    turn_penalty_ds as f64 / (1.0 + (-(13.0 * deviation / 180.0 - 6.5)).exp());
                cost.round() as i32
            }
        }
    }
}

/// The profile values consumed by the edge-expansion stage.
#[derive(Debug, Clone)]
pub struct SpeedProfile {
    /// Deci-seconds added at every traffic-light node.
    pub traffic_signal_penalty: i32,
    /// Deci-seconds added to every permitted u-turn.
    pub u_turn_penalty: i32,
    pub turn_cost: TurnCostFunction,
}

impl SpeedProfile {
    /// Loads the profile from `path`, failing with a configuration error
    /// naming the offending key when either scalar is absent.
    pub fn load(path: &Path) -> Result<SpeedProfile> {
        let text = fs::read_to_string(path).map_err(|e| {
            PrepareError::config("profile", format!("cannot read {}: {e}", path.display()))
        })?;

        let signal = scalar(&text, "traffic_signal_penalty")
            .ok_or_else(|| PrepareError::config("traffic_signal_penalty", "missing from profile"))?;
        let u_turn = scalar(&text, "u_turn_penalty")
            .ok_or_else(|| PrepareError::config("u_turn_penalty", "missing from profile"))?;

        let turn_cost = if declares_turn_function(&text) {
            let turn_penalty = scalar(&text, "turn_penalty").unwrap_or(0);
            TurnCostFunction::Sigmoid {
                turn_penalty_ds: turn_penalty.saturating_mul(10),
            }
        } else {
            TurnCostFunction::Zero
        };

        info!(
            "profile: signal penalty {} ds, u-turn penalty {} ds, turn function: {}",
            signal * 10,
            u_turn * 10,
            matches!(turn_cost, TurnCostFunction::Sigmoid { .. })
        );

        Ok(SpeedProfile {
            traffic_signal_penalty: signal.saturating_mul(10),
            u_turn_penalty: u_turn.saturating_mul(10),
            turn_cost,
        })
    }
}

/// Finds the last top-level `name = <integer>` assignment in the script,
/// ignoring `--` comments.
fn scalar(text: &str, name: &str) -> Option<i32> {
    let mut value = None;
    for line in text.lines() {
        let line = line.split("--").next().unwrap_or("").trim();
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        let Some(rhs) = rest.trim_start().strip_prefix('=') else {
            continue;
        };
        if let Ok(v) = rhs.trim().parse::<i32>() {
            value = Some(v);
        }
    }
    value
}

fn declares_turn_function(text: &str) -> bool {
    text.lines()
        .map(|line| line.split("--").next().unwrap_or("").trim())
        .any(|line| line.starts_with("function turn_function"))
}
