//! Treaty statements
//!
//! A statement is the predicate a treaty asserts about a metric's value.
//! Rate-based bounds move with time: `AtLeast { rate, base }` holds at time
//! `t` (seconds since the Unix epoch) when `value >= base + rate * t`.

use tessera_core::Timestamp;

/// Predicate over a metric's value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreatyStatement {
    /// `value >= base + rate * t`
    AtLeast {
        /// Change of the bound per second
        rate: f64,
        /// Bound at `t = 0`
        base: f64,
    },
    /// `value <= base + rate * t`
    AtMost {
        /// Change of the bound per second
        rate: f64,
        /// Bound at `t = 0`
        base: f64,
    },
    /// `value == target`
    Equals(f64),
}

pub(crate) fn seconds(at: Timestamp) -> f64 {
    at.as_micros() as f64 / 1_000_000.0
}

impl TreatyStatement {
    /// Fixed lower bound
    pub fn at_least(value: f64) -> Self {
        TreatyStatement::AtLeast {
            rate: 0.0,
            base: value,
        }
    }

    /// Fixed upper bound
    pub fn at_most(value: f64) -> Self {
        TreatyStatement::AtMost {
            rate: 0.0,
            base: value,
        }
    }

    /// Bound at time `at`, `None` for `Equals`
    pub fn bound_at(&self, at: Timestamp) -> Option<f64> {
        match *self {
            TreatyStatement::AtLeast { rate, base } | TreatyStatement::AtMost { rate, base } => {
                Some(base + rate * seconds(at))
            }
            TreatyStatement::Equals(_) => None,
        }
    }

    /// True if `value` satisfies the statement at time `at`
    pub fn holds(&self, value: f64, at: Timestamp) -> bool {
        match *self {
            TreatyStatement::AtLeast { rate, base } => value >= base + rate * seconds(at),
            TreatyStatement::AtMost { rate, base } => value <= base + rate * seconds(at),
            TreatyStatement::Equals(target) => value == target,
        }
    }

    /// Seconds until a metric at `value`, moving at `velocity` per second,
    /// stops satisfying the statement
    ///
    /// `Some(0.0)` if it already fails, `None` if it never will.
    pub fn time_to_violation(&self, value: f64, velocity: f64, at: Timestamp) -> Option<f64> {
        if !self.holds(value, at) {
            return Some(0.0);
        }
        match *self {
            TreatyStatement::AtLeast { rate, base } => {
                let margin = value - (base + rate * seconds(at));
                let closing = rate - velocity;
                (closing > 0.0).then(|| margin / closing)
            }
            TreatyStatement::AtMost { rate, base } => {
                let margin = (base + rate * seconds(at)) - value;
                let closing = velocity - rate;
                (closing > 0.0).then(|| margin / closing)
            }
            TreatyStatement::Equals(_) => (velocity != 0.0).then_some(0.0),
        }
    }
}

impl std::fmt::Display for TreatyStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreatyStatement::AtLeast { rate, base } => write!(f, ">= {} + {}t", base, rate),
            TreatyStatement::AtMost { rate, base } => write!(f, "<= {} + {}t", base, rate),
            TreatyStatement::Equals(target) => write!(f, "== {}", target),
        }
    }
}
