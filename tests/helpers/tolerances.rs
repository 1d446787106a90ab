//! Tolerance constants for encoder tests.
//!
//! Encoded values are quantized, so comparisons against the input signal
//! need tolerances matched to the quantization step.

/// Floating point rounding errors for exact arithmetic.
pub const FLOAT_EPSILON: f64 = 1e-9;

/// One idb step is 1/64 dB, about 0.18% in amplitude.
pub const IDB_EPSILON: f64 = 0.002;

/// One ifreq step is ln-spaced by 1/6000, about 0.017% in frequency.
pub const IFREQ_EPSILON: f64 = 0.0005;

/// Magnitude estimate of a windowed peak after parabolic interpolation.
pub const PEAK_MAG_EPSILON: f64 = 0.05;

/// Relative frequency error of a detected partial.
pub const PEAK_FREQ_EPSILON: f64 = 0.01;
