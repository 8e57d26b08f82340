//! Registered computations for composite and calculated cells.
//!
//! The set is closed: configuration names one of [`REGISTRY`] and the
//! resolver stores the [`Computation`] itself, so evaluation never looks a
//! name up.

use crate::grades::{NO_GRADE, NULL, UNCHOSEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Computation {
    pub name: &'static str,
    /// Digits after the decimal separator.
    decimals: u32,
    /// Minimum width of the integer part, zero padded.
    width: usize,
    /// Composite rules for inputs without a number: `NO_GRADE` wins over
    /// `UNCHOSEN`, which wins over `NULL`.
    tie_breaks: bool,
}

pub const REGISTRY: &[Computation] = &[
    Computation {
        name: "COMPOSITE",
        decimals: 0,
        width: 1,
        tie_breaks: true,
    },
    Computation {
        name: "COMPOSITE_SEKII",
        decimals: 0,
        width: 2,
        tie_breaks: true,
    },
    Computation {
        name: "AVERAGE",
        decimals: 2,
        width: 1,
        tie_breaks: false,
    },
    Computation {
        name: "AVERAGE_SEKII",
        decimals: 2,
        width: 2,
        tie_breaks: false,
    },
];

pub fn lookup(name: &str) -> Option<Computation> {
    REGISTRY.iter().copied().find(|c| c.name == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input<'a> {
    pub grade: &'a str,
    pub weight: u32,
}

impl<'a> Input<'a> {
    pub fn new(grade: &'a str, weight: u32) -> Self {
        Self { grade, weight }
    }
}

impl Computation {
    pub fn apply(&self, inputs: &[Input<'_>], decimal_sep: &str) -> String {
        if let Some((num, den)) = weighted_sum(inputs) {
            let scaled = round_half_away(num, den, self.decimals);
            return format_scaled(scaled, self.decimals, self.width, decimal_sep);
        }
        if !self.tie_breaks {
            return NULL.to_string();
        }
        if inputs.iter().any(|i| i.grade == NO_GRADE) {
            NO_GRADE.to_string()
        } else if inputs.iter().any(|i| i.grade == UNCHOSEN) {
            UNCHOSEN.to_string()
        } else {
            NULL.to_string()
        }
    }
}

/// Longest digit run read as a grade; anything longer has no value.
const MAX_GRADE_DIGITS: usize = 3;

/// Numeric value of a grade literal: one to three digits with an optional
/// trailing `+` or `-`. Everything else (`nt`, `/`, empty, …) has no value.
pub fn parse_grade(grade: &str) -> Option<i64> {
    let g = grade.trim().trim_end_matches(['+', '-']);
    if g.is_empty() || g.len() > MAX_GRADE_DIGITS || !g.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    g.parse::<i64>().ok()
}

/// `(Σ wᵢ·gᵢ, Σ wᵢ)` over the inputs that carry a number.
/// `None` when no input contributes.
fn weighted_sum(inputs: &[Input<'_>]) -> Option<(i128, i128)> {
    let mut num = 0_i128;
    let mut den = 0_i128;
    for input in inputs {
        if input.weight == 0 {
            continue;
        }
        let Some(g) = parse_grade(input.grade) else {
            continue;
        };
        let w = i128::from(input.weight);
        num += i128::from(g) * w;
        den += w;
    }
    if den > 0 {
        Some((num, den))
    } else {
        None
    }
}

/// `num/den` scaled by `10^decimals`, rounded half away from zero:
/// `trunc(|x|·10ⁿ + ½)·sign(x)`. Exact, `den` must be positive.
pub fn round_half_away(num: i128, den: i128, decimals: u32) -> i128 {
    let a = num.abs() * 10_i128.pow(decimals);
    let q = (2 * a + den) / (2 * den);
    if num < 0 {
        -q
    } else {
        q
    }
}

fn format_scaled(scaled: i128, decimals: u32, width: usize, sep: &str) -> String {
    let sign = if scaled < 0 { "-" } else { "" };
    let a = scaled.unsigned_abs();
    let factor = 10_u128.pow(decimals);
    let int_part = a / factor;
    if decimals == 0 {
        return format!("{}{:0width$}", sign, int_part, width = width);
    }
    let frac = a % factor;
    format!(
        "{}{:0width$}{}{:0dec$}",
        sign,
        int_part,
        sep,
        frac,
        width = width,
        dec = decimals as usize
    )
}
