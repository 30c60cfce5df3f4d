use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer-nanosecond control timestep.
///
/// The cyclic estimators integrate with a fixed step; tracking it as a `u64`
/// nanosecond count avoids floating-point drift when many cycles are
/// accumulated into an elapsed-time value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestep {
    nanos: u64,
}

impl Timestep {
    /// Create a timestep from a raw nanosecond count.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create a timestep from seconds. Negative or non-finite input clamps
    /// to zero; callers validate before constructing.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_secs(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self { nanos: 0 };
        }
        Self {
            nanos: (secs * 1_000_000_000.0).round() as u64,
        }
    }

    /// Raw nanosecond count.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }

    /// Timestep in seconds.
    #[must_use]
    pub fn as_secs(self) -> f64 {
        self.nanos as f64 / 1_000_000_000.0
    }

    /// Whether the step is usable for integration.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.nanos == 0
    }
}

impl Default for Timestep {
    /// 10 ms, a typical wearable-sensor control-loop rate.
    fn default() -> Self {
        Self { nanos: 10_000_000 }
    }
}

impl fmt::Display for Timestep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn roundtrip_seconds() {
        let dt = Timestep::from_secs(0.01);
        assert_eq!(dt.as_nanos(), 10_000_000);
        assert_relative_eq!(dt.as_secs(), 0.01, epsilon = 1e-12);
    }

    #[test]
    fn invalid_seconds_clamp_to_zero() {
        assert!(Timestep::from_secs(-1.0).is_zero());
        assert!(Timestep::from_secs(f64::NAN).is_zero());
        assert!(!Timestep::default().is_zero());
    }
}
