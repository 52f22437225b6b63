//! Output format negotiation.
//!
//! | Strategy         | Output rate           | Channels / bit depth |
//! |------------------|-----------------------|----------------------|
//! | `DirectResample` | input rate × m        | unchanged            |
//! | `TimeStretch`    | input rate            | unchanged            |
//!
//! For time-stretching the rate change lives in the processing graph, not in
//! the container header.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::AudioFormat;

/// Highest output rate accepted from negotiation (Hz).
pub const MAX_SAMPLE_RATE: f64 = 384_000.0;

/// Lowest output rate a WAV header can carry (Hz).
pub const MIN_SAMPLE_RATE: f64 = 1.0;

/// Slowest playback accepted. Below this the stretched output and the
/// completion deadline grow without practical bound.
pub const MIN_RATE_MULTIPLIER: f64 = 0.01;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How the rate change is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Relabel the stream at a new rate; pitch moves with speed.
    DirectResample,
    /// Stretch through a processing graph; pitch is preserved.
    TimeStretch,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::DirectResample
    }
}

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::DirectResample => "direct-resample",
            Strategy::TimeStretch => "time-stretch",
        }
    }
}

// ---------------------------------------------------------------------------
// FormatError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("Unsupported rate multiplier {0} (must be finite and >= 0.01)")]
    InvalidMultiplier(f64),

    #[error("Unsupported output sample rate {rate:.3} Hz (allowed 1..=384000)")]
    RateOutOfRange { rate: f64 },

    #[error("Unsupported input format: {0} channels")]
    NoChannels(u16),
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// Reject multipliers that can never yield a valid format.
///
/// Runs before any file is touched.
pub fn validate_multiplier(rate_multiplier: f64) -> Result<(), FormatError> {
    if rate_multiplier.is_finite() && rate_multiplier >= MIN_RATE_MULTIPLIER {
        Ok(())
    } else {
        Err(FormatError::InvalidMultiplier(rate_multiplier))
    }
}

/// Derive the output container format for `input` played at `rate_multiplier`.
///
/// ```
/// use slowdown::audio::{derive_output_format, AudioFormat, Strategy};
///
/// let input = AudioFormat::pcm16(44_100.0, 1);
///
/// let direct = derive_output_format(&input, 0.75, Strategy::DirectResample).unwrap();
/// assert_eq!(direct.sample_rate, 33_075.0);
/// assert_eq!(direct.channels, 1);
///
/// let stretch = derive_output_format(&input, 0.75, Strategy::TimeStretch).unwrap();
/// assert_eq!(stretch, input);
///
/// assert!(derive_output_format(&input, -1.0, Strategy::DirectResample).is_err());
/// ```
pub fn derive_output_format(
    input: &AudioFormat,
    rate_multiplier: f64,
    strategy: Strategy,
) -> Result<AudioFormat, FormatError> {
    validate_multiplier(rate_multiplier)?;

    if input.channels == 0 {
        return Err(FormatError::NoChannels(input.channels));
    }

    let rate = match strategy {
        Strategy::DirectResample => input.sample_rate * rate_multiplier,
        Strategy::TimeStretch => input.sample_rate,
    };

    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        return Err(FormatError::RateOutOfRange { rate });
    }

    Ok(input.with_rate(rate))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleKind;

    #[test]
    fn direct_resample_scales_rate_only() {
        let input = AudioFormat::new(48_000.0, 2, SampleKind::Int { bits: 24 });
        let out = derive_output_format(&input, 0.75, Strategy::DirectResample).unwrap();
        assert_eq!(out.sample_rate, 36_000.0);
        assert_eq!(out.channels, 2);
        assert_eq!(out.sample_kind, SampleKind::Int { bits: 24 });
    }

    #[test]
    fn time_stretch_keeps_input_format() {
        let input = AudioFormat::pcm16(22_050.0, 2);
        let out = derive_output_format(&input, 0.5, Strategy::TimeStretch).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn zero_multiplier_is_unsupported() {
        let input = AudioFormat::pcm16(44_100.0, 1);
        let err = derive_output_format(&input, 0.0, Strategy::DirectResample).unwrap_err();
        assert_eq!(err, FormatError::InvalidMultiplier(0.0));
    }

    #[test]
    fn nan_multiplier_is_unsupported() {
        assert!(validate_multiplier(f64::NAN).is_err());
        assert!(validate_multiplier(f64::INFINITY).is_err());
        assert!(validate_multiplier(0.75).is_ok());
    }

    #[test]
    fn vanishing_multiplier_is_unsupported() {
        assert!(validate_multiplier(MIN_RATE_MULTIPLIER).is_ok());
        assert_eq!(validate_multiplier(1e-20), Err(FormatError::InvalidMultiplier(1e-20)));
        assert!(validate_multiplier(0.009).is_err());
    }

    #[test]
    fn rate_above_bound_is_unsupported() {
        let input = AudioFormat::pcm16(96_000.0, 1);
        let err = derive_output_format(&input, 8.0, Strategy::DirectResample).unwrap_err();
        assert!(matches!(err, FormatError::RateOutOfRange { .. }), "{err}");
    }

    #[test]
    fn rate_below_one_hertz_is_unsupported() {
        let input = AudioFormat::pcm16(50.0, 1);
        let err = derive_output_format(&input, 0.01, Strategy::DirectResample).unwrap_err();
        assert!(matches!(err, FormatError::RateOutOfRange { .. }), "{err}");
    }

    #[test]
    fn time_stretch_still_validates_multiplier() {
        let input = AudioFormat::pcm16(8_000.0, 1);
        assert!(derive_output_format(&input, -0.5, Strategy::TimeStretch).is_err());
    }

    #[test]
    fn strategy_labels() {
        assert_eq!(Strategy::default(), Strategy::DirectResample);
        assert_eq!(Strategy::DirectResample.label(), "direct-resample");
        assert_eq!(Strategy::TimeStretch.label(), "time-stretch");
    }
}
