//! Second-order filter coefficients for loudspeaker DSP bands
//! (Audio EQ Cookbook formulas, normalized so that a0 = 1).

use std::f64::consts::PI;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BiquadError {
    #[error("unknown filter type '{0}'")]
    UnknownType(String),

    #[error("frequency {freq} Hz must lie between 0 and Nyquist ({nyquist} Hz)")]
    Frequency { freq: f64, nyquist: f64 },

    #[error("Q must be positive, got {0}")]
    Quality(f64),

    #[error("sample rate must be positive, got {0}")]
    SampleRate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Bell,
    HighShelf,
    LowShelf,
}

impl FromStr for FilterType {
    type Err = BiquadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bell" => Ok(FilterType::Bell),
            "high_shelf" => Ok(FilterType::HighShelf),
            "low_shelf" => Ok(FilterType::LowShelf),
            other => Err(BiquadError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadParams {
    pub filter_type: FilterType,
    pub gain_db: f64,
    pub freq: f64,
    pub q: f64,
    pub sample_rate: u32,
}

/// Normalized coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
}

impl Coefficients {
    /// Order expected by the workstations: `[a1, a2, b0, b1, b2]`
    pub fn to_wire(&self) -> [f64; 5] {
        [self.a1, self.a2, self.b0, self.b1, self.b2]
    }
}

pub fn compute(params: &BiquadParams) -> Result<Coefficients, BiquadError> {
    if params.sample_rate == 0 {
        return Err(BiquadError::SampleRate(params.sample_rate));
    }
    let fs = f64::from(params.sample_rate);
    let nyquist = fs / 2.0;
    if !(params.freq > 0.0 && params.freq < nyquist) {
        return Err(BiquadError::Frequency { freq: params.freq, nyquist });
    }
    if !(params.q > 0.0) {
        return Err(BiquadError::Quality(params.q));
    }

    let a = 10f64.powf(params.gain_db / 40.0);
    let w0 = 2.0 * PI * params.freq / fs;
    let (sin, cos) = w0.sin_cos();
    let alpha = sin / (2.0 * params.q);
    let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

    let (b0, b1, b2, a0, a1, a2) = match params.filter_type {
        FilterType::Bell => (
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        ),
        FilterType::LowShelf => (
            a * ((a + 1.0) - (a - 1.0) * cos + sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
            a * ((a + 1.0) - (a - 1.0) * cos - sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos + sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos),
            (a + 1.0) + (a - 1.0) * cos - sqrt_a_alpha,
        ),
        FilterType::HighShelf => (
            a * ((a + 1.0) + (a - 1.0) * cos + sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
            a * ((a + 1.0) + (a - 1.0) * cos - sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos + sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos),
            (a + 1.0) - (a - 1.0) * cos - sqrt_a_alpha,
        ),
    };

    Ok(Coefficients {
        a1: a1 / a0,
        a2: a2 / a0,
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
    })
}
