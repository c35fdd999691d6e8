use serde::{Deserialize, Serialize};

use crate::types::{JobRunRow, TestStats};

// ── Counts ──────────────────────────────────────────────────────────

/// Success / failure / flake totals for one side of a comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub success: u64,
    pub failure: u64,
    pub flake: u64,
}

impl Counts {
    pub fn new(success: u64, failure: u64, flake: u64) -> Self {
        Self {
            success,
            failure,
            flake,
        }
    }

    pub fn from_row(row: &JobRunRow) -> Self {
        Self {
            success: row.success_count,
            failure: row.failure_count(),
            flake: row.flake_count,
        }
    }

    pub fn add(&mut self, other: Counts) {
        self.success += other.success;
        self.failure += other.failure;
        self.flake += other.flake;
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure + self.flake
    }

    /// Display pass rate; flakes always count as passing.
    pub fn pass_rate(&self) -> f64 {
        pass_rate(self.success, self.failure, self.flake)
    }

    /// Pass rate under the request's flake policy.
    pub fn policy_pass_rate(&self, flake_as_failure: bool) -> f64 {
        policy_pass_rate(self.success, self.failure, self.flake, flake_as_failure)
    }

    /// (failures, successes) as seen by the hypothesis test.
    pub fn perceived(&self, flake_as_failure: bool) -> (u64, u64) {
        if flake_as_failure {
            (self.failure + self.flake, self.success)
        } else {
            (self.failure, self.success + self.flake)
        }
    }

    pub fn to_test_stats(&self) -> TestStats {
        TestStats {
            success_rate: self.pass_rate(),
            success_count: self.success,
            failure_count: self.failure,
            flake_count: self.flake,
        }
    }
}

/// (success + flake) / total, or 0.0 when there are no runs.
pub fn pass_rate(success: u64, failure: u64, flake: u64) -> f64 {
    policy_pass_rate(success, failure, flake, false)
}

pub fn policy_pass_rate(success: u64, failure: u64, flake: u64, flake_as_failure: bool) -> f64 {
    let total = success + failure + flake;
    if total == 0 {
        return 0.0;
    }
    let passed = if flake_as_failure {
        success
    } else {
        success + flake
    };
    passed as f64 / total as f64
}

// ── Fisher Exact Test ───────────────────────────────────────────────

/// p-values for a 2×2 contingency table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FisherResult {
    /// P(X <= a)
    pub left_p: f64,
    /// P(X >= a)
    pub right_p: f64,
    /// Sum of P(x) over every table no more likely than the observed one.
    pub two_tailed_p: f64,
}

// Relative tolerance when comparing table probabilities, so tables that tie
// with the observed one in exact arithmetic are not lost to rounding.
const TIE_TOLERANCE: f64 = 1e-7;

/// Fisher's exact test on the table
///
/// ```text
///   | a  b |
///   | c  d |
/// ```
///
/// Uses the hypergeometric distribution of the top-left cell with all
/// margins fixed. A table whose margins admit only one arrangement (for
/// example when one row is all zeros) yields p = 1.0 on every tail.
pub fn fisher_exact(a: u64, b: u64, c: u64, d: u64) -> FisherResult {
    let n = a + b + c + d;
    let row1 = a + b;
    let col1 = a + c;
    let row2 = c + d;

    if n == 0 {
        return FisherResult {
            left_p: 1.0,
            right_p: 1.0,
            two_tailed_p: 1.0,
        };
    }

    let ln_fact = ln_factorials(n);
    let ln_hyper = |x: u64| -> f64 {
        // C(row1, x) * C(row2, col1 - x) / C(n, col1)
        ln_choose(&ln_fact, row1, x) + ln_choose(&ln_fact, row2, col1 - x)
            - ln_choose(&ln_fact, n, col1)
    };

    let lo = col1.saturating_sub(row2);
    let hi = row1.min(col1);
    let observed = ln_hyper(a).exp();
    let threshold = observed * (1.0 + TIE_TOLERANCE);

    let mut left_p = 0.0;
    let mut right_p = 0.0;
    let mut two_tailed_p = 0.0;
    for x in lo..=hi {
        let p = ln_hyper(x).exp();
        if x <= a {
            left_p += p;
        }
        if x >= a {
            right_p += p;
        }
        if p <= threshold {
            two_tailed_p += p;
        }
    }

    FisherResult {
        left_p: left_p.min(1.0),
        right_p: right_p.min(1.0),
        two_tailed_p: two_tailed_p.min(1.0),
    }
}

/// ln(k!) for k in 0..=n.
fn ln_factorials(n: u64) -> Vec<f64> {
    let mut table = Vec::with_capacity(n as usize + 1);
    let mut acc = 0.0;
    table.push(acc);
    for k in 1..=n {
        acc += (k as f64).ln();
        table.push(acc);
    }
    table
}

fn ln_choose(ln_fact: &[f64], n: u64, k: u64) -> f64 {
    ln_fact[n as usize] - ln_fact[k as usize] - ln_fact[(n - k) as usize]
}

// ── Significance ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub p_value: f64,
    pub significant: bool,
}

/// Tests whether the sample fails more often than the base.
///
/// One-sided: the p-value is the right tail, P(X >= sample failures), so
/// a sample that improves on the base is never significant. Flake policy
/// only affects the perceived counts fed to the test; the display stats
/// built from `sample`/`base` are untouched.
pub fn compare(
    sample: &Counts,
    base: &Counts,
    flake_as_failure: bool,
    confidence: u32,
) -> Comparison {
    let (sample_failure, sample_success) = sample.perceived(flake_as_failure);
    let (base_failure, base_success) = base.perceived(flake_as_failure);
    let p_value =
        fisher_exact(sample_failure, sample_success, base_failure, base_success).right_p;
    Comparison {
        p_value,
        significant: is_significant(p_value, confidence),
    }
}

pub fn is_significant(p_value: f64, confidence: u32) -> bool {
    p_value < 1.0 - confidence as f64 / 100.0
}
