//! Counterfactual value generation
//!
//! Adversarial JavaScript string and number literals that occasionally replace
//! grammar output. This mirrors constant injection in property-based testing:
//! most values come from the parameter grammar, a small fraction are drawn
//! from tables of known edge cases or synthesized to stress the engine's
//! string and number handling (surrogates, BOM-like prefixes, huge digit runs,
//! `MAX_SAFE_INTEGER` boundaries).
//!
//! Every function here is a pure function of the random source.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;

/// Hand-picked string expressions known to exercise odd engine paths.
pub const INTERESTING_STRINGS: &[&str] = &[
    r#""a" + String.fromCharCode(0x4141)"#,
    r#""\xfe\xff""#,
    r#""https://invalid.noexist.com/abc""#,
];

/// JavaScript numeric edge cases.
pub const NUMERIC_EDGE_CASES: &[&str] = &[
    "0",
    "-0",
    "-1",
    "0x7fffffff",
    "0xffffffff",
    // Number.MAX_SAFE_INTEGER
    "9007199254740991",
    "9007199254740992",
    // Number.MAX_VALUE
    "1.7976931348623157e+308",
    // Number.MIN_VALUE
    "5e-324",
    "0.000000000000000000001",
    "123456789012345678901234567890",
    "0xdeadbeef",
];

const SPECIAL_NUMBERS: &[&str] = &["Infinity", "-Infinity", "NaN"];

const MAX_LITERAL_LENGTH: usize = 2000;

/// Families of counterfactual numbers with their selection weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberMode {
    Integer,
    Float,
    Scientific,
    Hex,
    Special,
    Huge,
    EdgeCase,
}

impl NumberMode {
    pub const WEIGHTED: [(NumberMode, u32); 7] = [
        (NumberMode::Integer, 20),
        (NumberMode::Float, 15),
        (NumberMode::Scientific, 15),
        (NumberMode::Hex, 15),
        (NumberMode::Special, 5),
        (NumberMode::Huge, 15),
        (NumberMode::EdgeCase, 15),
    ];
}

/// Draw a Unicode code point, biased towards the BMP.
///
/// 70% BMP (surrogates excluded), 25% supplementary planes, 5% control
/// characters.
pub fn generate_code_point<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    let r: f64 = rng.gen();
    if r < 0.7 {
        if rng.gen_bool(0.5) {
            rng.gen_range(0x0000..=0xD7FF)
        } else {
            rng.gen_range(0xE000..=0xFFFF)
        }
    } else if r < 0.95 {
        rng.gen_range(0x10000..=0x10FFFF)
    } else if rng.gen_bool(0.5) {
        rng.gen_range(0x00..=0x1F)
    } else {
        0x7F
    }
}

/// Render a code point as a JavaScript escape sequence.
pub fn escape_code_point<R: Rng + ?Sized>(code_point: u32, rng: &mut R) -> String {
    if code_point <= 0xFF && rng.gen_bool(0.3) {
        return format!("\\x{:02x}", code_point);
    }
    if code_point > 0xFFFF {
        let shifted = code_point - 0x10000;
        let high = 0xD800 + (shifted >> 10);
        let low = 0xDC00 + (shifted & 0x3FF);
        return format!("\\u{:04x}\\u{:04x}", high, low);
    }
    format!("\\u{:04x}", code_point)
}

/// Standard normal sample via the Box-Muller transform.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// A double-quoted literal of escaped and printable characters.
pub fn generate_literal<R: Rng + ?Sized>(rng: &mut R) -> String {
    let length = (8.0 + 10.0 * standard_normal(rng)).abs() as usize;
    let length = length.min(MAX_LITERAL_LENGTH);

    let mut body = String::new();
    for _ in 0..length {
        let cp = generate_code_point(rng);
        let must_escape = cp == 0x22 || cp == 0x5C || cp <= 0x1F;
        if must_escape || rng.gen_bool(0.3) {
            body.push_str(&escape_code_point(cp, rng));
            continue;
        }
        match char::from_u32(cp) {
            Some(c) if (0x20..=0x7E).contains(&cp) => body.push(c),
            _ => body.push_str(&escape_code_point(cp, rng)),
        }
    }

    if rng.gen_bool(0.1) {
        body.insert_str(0, "\\xfe\\xff");
    }
    if rng.gen_bool(0.1) {
        body.push_str("\\xff\\xfe");
    }
    format!("\"{}\"", body)
}

/// A string built at runtime from literals and `String.fromCharCode` calls.
pub fn generate_dynamic<R: Rng + ?Sized>(rng: &mut R) -> String {
    let parts: Vec<String> = (0..rng.gen_range(1..=5))
        .map(|_| {
            if rng.gen_bool(0.5) {
                generate_literal(rng)
            } else {
                format!("String.fromCharCode(0x{:x})", generate_code_point(rng))
            }
        })
        .collect();

    let joined = parts.join(" + ");
    if rng.gen_bool(0.5) {
        format!("String({})", joined)
    } else {
        joined
    }
}

/// Repetition, buffer and raw-byte constructions.
pub fn generate_special_string<R: Rng + ?Sized>(rng: &mut R) -> String {
    match rng.gen_range(0..4) {
        0 => {
            let count = rng.gen_range(1..=10_000);
            format!("Array({}).join({})", count, generate_literal(rng))
        }
        1 => format!("new ArrayBuffer({})", rng.gen_range(0..=1024)),
        2 => {
            let cp = generate_code_point(rng);
            format!("\"{}\"", escape_code_point(cp, rng))
        }
        _ => format!(
            "\"\\x{:02x}\\x{:02x}\"",
            rng.gen_range(0..=0xFFu32),
            rng.gen_range(0..=0xFFu32)
        ),
    }
}

/// Draw an adversarial string expression.
pub fn counterfactual_string<R: Rng + ?Sized>(rng: &mut R) -> String {
    if rng.gen_bool(0.1) {
        if let Some(s) = INTERESTING_STRINGS.choose(rng) {
            return (*s).to_string();
        }
    }
    let r: f64 = rng.gen();
    if r < 0.45 {
        generate_literal(rng)
    } else if r < 0.75 {
        generate_dynamic(rng)
    } else {
        generate_special_string(rng)
    }
}

/// Draw an adversarial number literal.
pub fn counterfactual_number<R: Rng + ?Sized>(rng: &mut R) -> String {
    let weights = NumberMode::WEIGHTED.iter().map(|(_, w)| *w);
    let mode = match WeightedIndex::new(weights) {
        Ok(dist) => NumberMode::WEIGHTED[dist.sample(rng)].0,
        Err(_) => NumberMode::Integer,
    };

    match mode {
        NumberMode::Integer => generate_integer(rng),
        NumberMode::Float => generate_float(rng),
        NumberMode::Scientific => generate_scientific(rng),
        NumberMode::Hex => generate_hex(rng),
        NumberMode::Special => pick(SPECIAL_NUMBERS, rng),
        NumberMode::Huge => generate_huge(rng),
        NumberMode::EdgeCase => pick(NUMERIC_EDGE_CASES, rng),
    }
}

fn pick<R: Rng + ?Sized>(table: &[&str], rng: &mut R) -> String {
    table.choose(rng).copied().unwrap_or("0").to_string()
}

fn sign<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    if rng.gen_bool(0.3) {
        "-"
    } else {
        ""
    }
}

fn digits<R: Rng + ?Sized>(count: usize, alphabet: &[u8], rng: &mut R) -> String {
    (0..count)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

pub fn generate_integer<R: Rng + ?Sized>(rng: &mut R) -> String {
    let sign = sign(rng);
    let r: f64 = rng.gen();
    let magnitude: u64 = if r < 0.1 {
        0
    } else if r < 0.5 {
        rng.gen_range(0..=255)
    } else if r < 0.8 {
        rng.gen_range(256..=0xFFFF)
    } else {
        rng.gen_range(0x10000..=0x7FFF_FFFF)
    };
    format!("{}{}", sign, magnitude)
}

pub fn generate_float<R: Rng + ?Sized>(rng: &mut R) -> String {
    let sign = sign(rng);
    let mut frac = digits(rng.gen_range(1..=6), b"0123456789", rng);
    if rng.gen_bool(0.3) {
        frac.push_str(&"0".repeat(rng.gen_range(1..=3)));
    }
    if rng.gen_bool(0.5) {
        let int_part = generate_integer(rng);
        format!("{}{}.{}", sign, int_part.trim_start_matches('-'), frac)
    } else {
        format!("{}.{}", sign, frac)
    }
}

pub fn generate_scientific<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mantissa = if rng.gen_bool(0.5) {
        generate_float(rng)
    } else {
        generate_integer(rng)
    };
    let e = if rng.gen_bool(0.5) { 'e' } else { 'E' };
    let exp_sign = ["+", "-", ""][rng.gen_range(0..3)];
    format!("{}{}{}{}", mantissa, e, exp_sign, rng.gen_range(0..=308))
}

pub fn generate_hex<R: Rng + ?Sized>(rng: &mut R) -> String {
    let prefix = if rng.gen_bool(0.5) { "0x" } else { "0X" };
    let body = digits(rng.gen_range(1..=8), b"0123456789abcdefABCDEF", rng);
    format!("{}{}", prefix, body)
}

pub fn generate_huge<R: Rng + ?Sized>(rng: &mut R) -> String {
    let sign = sign(rng);
    let length = rng.gen_range(20..=30);
    let first = digits(1, b"123456789", rng);
    let rest = digits(length - 1, b"0123456789", rng);
    format!("{}{}{}", sign, first, rest)
}
