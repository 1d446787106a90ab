//! Decibel/frequency helpers and the 16-bit quantization used by encoded frames.
//!
//! Magnitudes are stored as *idb* values: `round(dB * 64 + 512 * 64)`, so one
//! step is 1/64 dB and 32768 is unity gain. Frequencies are stored as *ifreq*
//! values on a log scale: `round(ln(freq) * 6000 + 18000)`.

const IDB_STEPS_PER_DB: f64 = 64.0;
const IDB_OFFSET: f64 = 512.0 * IDB_STEPS_PER_DB;

const IFREQ_FAC: f64 = 6000.0;
const IFREQ_ADD: f64 = 3.0 * IFREQ_FAC;

/// Convert decibels to a linear factor.
pub fn db_to_factor(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert a linear factor to decibels, returning `min_db` for non-positive factors.
pub fn db_from_factor(factor: f64, min_db: f64) -> f64 {
    if factor > 0.0 {
        20.0 * factor.log10()
    } else {
        min_db
    }
}

/// Quantize a linear factor to an idb value.
pub fn factor_to_idb(factor: f64) -> u16 {
    let idb = db_from_factor(factor, -500.0) * IDB_STEPS_PER_DB + IDB_OFFSET;
    idb.round().clamp(0.0, 65535.0) as u16
}

/// Linear factor of an idb value.
pub fn idb_to_factor(idb: u16) -> f64 {
    db_to_factor(f64::from(idb) / IDB_STEPS_PER_DB - 512.0)
}

/// Change in idb units that corresponds to multiplying by `factor`.
pub fn factor_to_delta_idb(factor: f64) -> i32 {
    i32::from(factor_to_idb(factor)) - IDB_OFFSET as i32
}

/// Quantize a (relative) frequency to an ifreq value.
pub fn freq_to_ifreq(freq: f64) -> u16 {
    if freq <= 0.0 {
        return 0;
    }
    (freq.ln() * IFREQ_FAC + IFREQ_ADD).round().clamp(0.0, 65535.0) as u16
}

/// Frequency of an ifreq value.
pub fn ifreq_to_freq(ifreq: u16) -> f64 {
    ((f64::from(ifreq) - IFREQ_ADD) / IFREQ_FAC).exp()
}

/// Quantize a phase in radians to 16 bits; one turn spans the full range.
pub fn phase_to_iphase(phase: f64) -> u16 {
    let turns = phase.rem_euclid(2.0 * std::f64::consts::PI) / (2.0 * std::f64::consts::PI);
    ((turns * 65536.0).round() as u32 & 0xffff) as u16
}

/// Phase in radians `[0, 2pi)` of an iphase value.
pub fn iphase_to_phase(iphase: u16) -> f64 {
    f64::from(iphase) / 65536.0 * 2.0 * std::f64::consts::PI
}

/// Frequency of a (fractional) MIDI note, A4 = 440 Hz.
pub fn freq_from_note(note: f64) -> f64 {
    440.0 * 2f64.powf((note - 69.0) / 12.0)
}

/// Raised cosine over `[-1, 1]`, zero outside.
pub fn window_cos(x: f64) -> f64 {
    if x.abs() > 1.0 {
        return 0.0;
    }
    0.5 * (x * std::f64::consts::PI).cos() + 0.5
}
