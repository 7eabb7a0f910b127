// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Signal processing run by the simulated DSP thread.
//!
//! Filter coefficients are too large for a lock-free atomic and go through a
//! guarded slot; gain ramps are packed into 64 bits and stay lock-free.

use std::f64::consts::PI;

use bytemuck::{Pod, Zeroable};
use paramslot::guarded_payload;
use paramslot::memo::MemoCell;

/// Lowest level in the gain table; anything below is silence.
const TABLE_MIN_DB: i32 = -80;
/// Highest level in the gain table.
const TABLE_MAX_DB: i32 = 12;

static GAIN_TABLE: MemoCell<Vec<f32>> = MemoCell::new();

/// dB to linear lookup for whole-dB steps, built on first use.
pub fn gain_table() -> &'static [f32] {
    GAIN_TABLE.get_or_init(|| {
        (TABLE_MIN_DB..=TABLE_MAX_DB)
            .map(|db| {
                if db <= TABLE_MIN_DB {
                    0.0
                } else {
                    10.0_f32.powf(db as f32 / 20.0)
                }
            })
            .collect()
    })
}

/// Convert decibels to linear gain, interpolating the gain table.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    let table = gain_table();
    let pos = (db.clamp(TABLE_MIN_DB as f32, TABLE_MAX_DB as f32) - TABLE_MIN_DB as f32).max(0.0);
    let idx = (pos as usize).min(table.len() - 1);
    let next = (idx + 1).min(table.len() - 1);
    let frac = pos - idx as f32;
    table[idx] + (table[next] - table[idx]) * frac
}

/// Normalized biquad coefficients (a0 == 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

guarded_payload!(BiquadCoeffs);

impl BiquadCoeffs {
    /// Pass-through filter.
    pub const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Second-order lowpass (RBJ cookbook).
    pub fn lowpass(cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha;
        let b1 = (1.0 - cos_w0) / a0;
        Self {
            b0: b1 / 2.0,
            b1,
            b2: b1 / 2.0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Gain at DC. 1.0 for a lowpass.
    pub fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Transposed direct form II biquad state.
#[derive(Debug, Clone, Default)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Swap coefficients, keeping the filter state.
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// Gain change requested by a producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GainRamp {
    /// Target level in dB.
    pub target_db: f32,
    /// Time to reach ~63% of the target, in milliseconds.
    pub ramp_ms: f32,
}

impl GainRamp {
    pub fn unity() -> Self {
        Self {
            target_db: 0.0,
            ramp_ms: 10.0,
        }
    }
}

/// One-pole smoothed gain, owned by the DSP thread.
#[derive(Debug, Clone)]
pub struct SmoothedGain {
    target: f32,
    current: f32,
    coeff: f32,
    sample_rate: f32,
}

impl SmoothedGain {
    pub fn new(ramp: GainRamp, sample_rate: f32) -> Self {
        let target = db_to_linear(ramp.target_db);
        Self {
            target,
            current: target,
            coeff: Self::calc_coeff(ramp.ramp_ms, sample_rate),
            sample_rate,
        }
    }

    fn calc_coeff(time_ms: f32, sample_rate: f32) -> f32 {
        if time_ms <= 0.0 {
            1.0
        } else {
            let samples = (time_ms * 0.001 * sample_rate).max(1.0);
            1.0 - (-1.0 / samples).exp()
        }
    }

    /// Start ramping towards a new target.
    pub fn apply(&mut self, ramp: GainRamp) {
        self.target = db_to_linear(ramp.target_db);
        self.coeff = Self::calc_coeff(ramp.ramp_ms, self.sample_rate);
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        self.current += self.coeff * (self.target - self.current);
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }
}
