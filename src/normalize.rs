//! Canonicalization of grammar output into JavaScript literal text.
//!
//! Grammar expansions are loosely formatted: strings may or may not be
//! quoted, arrays and objects may contain unquoted keys or stray quoting.
//! [`ValueNormalizer`] infers the shape of a raw value from its text and
//! re-emits it as syntactically safe literal text, recursing into arrays and
//! objects. Characters that could break the surrounding statement
//! (`{ " \ ( ) }` and line breaks) are dropped from string content rather than
//! escaped.

use rand::Rng;

use crate::counterfactual::{counterfactual_number, counterfactual_string};

/// Chance that a string or number is replaced by a counterfactual value.
pub const DEFAULT_COUNTERFACTUAL_PROBABILITY: f64 = 0.01;

const DROPPED_CHARS: &[char] = &['{', '"', '\\', '\n', '\r', '(', ')', '}'];

const KEY_PREFIX_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Shape of a raw value as inferred from its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Array,
    Object,
    Boolean,
    Number,
    String,
}

/// Classify `value` by shallow syntactic inspection.
pub fn infer_value_kind(value: &str) -> ValueKind {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('[') && value.ends_with(']') {
        ValueKind::Array
    } else if value.len() >= 2 && value.starts_with('{') && value.ends_with('}') {
        ValueKind::Object
    } else if value == "true" || value == "false" {
        ValueKind::Boolean
    } else if is_number(value) {
        ValueKind::Number
    } else {
        ValueKind::String
    }
}

/// Optional leading `-`, at least one digit, at most one `.`.
fn is_number(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    let mut dots = 0;
    let mut has_digit = false;
    for c in s.chars() {
        match c {
            '0'..='9' => has_digit = true,
            '.' => {
                dots += 1;
                if dots > 1 {
                    return false;
                }
            }
            _ => return false,
        }
    }
    has_digit
}

/// Tracks nesting and quoting while scanning a composite literal.
#[derive(Debug, Default)]
struct ScanState {
    depth: i32,
    in_quotes: bool,
    escape: bool,
}

impl ScanState {
    /// Feed one character; returns true when it sits at the top level outside
    /// any string, i.e. when it may act as a separator.
    fn feed(&mut self, c: char) -> bool {
        if self.escape {
            self.escape = false;
            return false;
        }
        match c {
            '\\' => {
                self.escape = true;
                false
            }
            '"' => {
                self.in_quotes = !self.in_quotes;
                false
            }
            _ if self.in_quotes => false,
            '[' | '{' => {
                self.depth += 1;
                false
            }
            ']' | '}' => {
                self.depth -= 1;
                false
            }
            _ => self.depth == 0,
        }
    }
}

/// Split on top-level commas. Interior empty elements are kept.
pub fn parse_array_elements(s: &str) -> Vec<String> {
    let mut elements = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::default();

    for c in s.chars() {
        if state.feed(c) && c == ',' {
            elements.push(current.trim().to_string());
            current.clear();
            continue;
        }
        current.push(c);
    }
    let last = current.trim();
    if !last.is_empty() {
        elements.push(last.to_string());
    }
    elements
}

/// Split an object body into `(key, value)` pairs on top-level commas and the
/// first top-level colon of each member. A member without a colon becomes a
/// key with an empty value.
pub fn parse_object_members(s: &str) -> Vec<(String, String)> {
    let mut members = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::default();

    for c in s.chars() {
        if state.feed(c) && c == ',' {
            let member = current.trim();
            if !member.is_empty() {
                members.push(member.to_string());
            }
            current.clear();
            continue;
        }
        current.push(c);
    }
    let last = current.trim();
    if !last.is_empty() {
        members.push(last.to_string());
    }

    members
        .into_iter()
        .map(|member| {
            let mut state = ScanState::default();
            let colon = member
                .char_indices()
                .find(|&(_, c)| state.feed(c) && c == ':')
                .map(|(i, _)| i);
            match colon {
                Some(i) => (member[..i].trim().to_string(), member[i + 1..].trim().to_string()),
                None => (member.trim().to_string(), String::new()),
            }
        })
        .collect()
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn drop_unsafe_chars(s: &str) -> String {
    s.chars().filter(|c| !DROPPED_CHARS.contains(c)).collect()
}

/// Remove leading zeros while keeping the sign and any fractional part.
pub fn strip_leading_zeros(value: &str) -> String {
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", value),
    };
    match digits.split_once('.') {
        Some((int_part, frac_part)) => {
            let int_part = int_part.trim_start_matches('0');
            let int_part = if int_part.is_empty() { "0" } else { int_part };
            format!("{}{}.{}", sign, int_part, frac_part)
        }
        None => {
            let trimmed = digits.trim_start_matches('0');
            let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
            format!("{}{}", sign, trimmed)
        }
    }
}

/// Recursive, type-dispatched value canonicalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueNormalizer {
    /// Probability of swapping a string or number for a counterfactual value
    pub counterfactual_probability: f64,
}

impl Default for ValueNormalizer {
    fn default() -> Self {
        Self {
            counterfactual_probability: DEFAULT_COUNTERFACTUAL_PROBABILITY,
        }
    }
}

impl ValueNormalizer {
    pub fn new(counterfactual_probability: f64) -> Self {
        Self {
            counterfactual_probability: counterfactual_probability.clamp(0.0, 1.0),
        }
    }

    /// Normalizer that never substitutes counterfactual values.
    pub fn deterministic() -> Self {
        Self::new(0.0)
    }

    fn roll_counterfactual<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.counterfactual_probability > 0.0 && rng.gen_bool(self.counterfactual_probability)
    }

    pub fn normalize<R: Rng + ?Sized>(&self, value: &str, rng: &mut R) -> String {
        match infer_value_kind(value) {
            ValueKind::String => self.normalize_string(value, rng),
            ValueKind::Array => self.normalize_array(value.trim(), rng),
            ValueKind::Object => self.normalize_object(value.trim(), rng),
            ValueKind::Number => self.normalize_number(value.trim(), rng),
            ValueKind::Boolean => value.to_string(),
        }
    }

    fn normalize_string<R: Rng + ?Sized>(&self, value: &str, rng: &mut R) -> String {
        if self.roll_counterfactual(rng) {
            return counterfactual_string(rng);
        }
        format!("\"{}\"", drop_unsafe_chars(strip_quotes(value)))
    }

    fn normalize_number<R: Rng + ?Sized>(&self, value: &str, rng: &mut R) -> String {
        if self.roll_counterfactual(rng) {
            return counterfactual_number(rng);
        }
        strip_leading_zeros(value)
    }

    fn normalize_array<R: Rng + ?Sized>(&self, value: &str, rng: &mut R) -> String {
        let content = value[1..value.len() - 1].trim();
        if content.is_empty() {
            return "[]".to_string();
        }
        let elements: Vec<String> = parse_array_elements(content)
            .iter()
            .map(|element| self.normalize(element, rng))
            .collect();
        format!("[{}]", elements.join(", "))
    }

    fn normalize_object<R: Rng + ?Sized>(&self, value: &str, rng: &mut R) -> String {
        let content = value[1..value.len() - 1].trim();
        if content.is_empty() {
            return "{}".to_string();
        }
        let pairs: Vec<String> = parse_object_members(content)
            .iter()
            .map(|(key, val)| {
                let key = self.normalize_key(key, rng);
                let val = self.normalize(val, rng);
                format!("{}: {}", key, val)
            })
            .collect();
        format!("{{{}}}", pairs.join(", "))
    }

    fn normalize_key<R: Rng + ?Sized>(&self, key: &str, rng: &mut R) -> String {
        let mut key = strip_quotes(key).to_string();
        if key.chars().next().map_or(false, |c| !c.is_alphabetic()) {
            let letter = KEY_PREFIX_LETTERS[rng.gen_range(0..KEY_PREFIX_LETTERS.len())] as char;
            key.insert(0, letter);
        }
        format!("\"{}\"", drop_unsafe_chars(&key))
    }
}

/// Normalize with the default counterfactual probability.
pub fn normalize_generated_value<R: Rng + ?Sized>(value: &str, rng: &mut R) -> String {
    ValueNormalizer::default().normalize(value, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn norm(value: &str) -> String {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        ValueNormalizer::deterministic().normalize(value, &mut rng)
    }

    #[test]
    fn test_infer_value_kind() {
        assert_eq!(infer_value_kind("[1, 2]"), ValueKind::Array);
        assert_eq!(infer_value_kind(" {a: 1} "), ValueKind::Object);
        assert_eq!(infer_value_kind("true"), ValueKind::Boolean);
        assert_eq!(infer_value_kind("-12.5"), ValueKind::Number);
        assert_eq!(infer_value_kind("1.2.3"), ValueKind::String);
        assert_eq!(infer_value_kind("-"), ValueKind::String);
        assert_eq!(infer_value_kind("."), ValueKind::String);
        assert_eq!(infer_value_kind("0x10"), ValueKind::String);
        assert_eq!(infer_value_kind("["), ValueKind::String);
    }

    #[test]
    fn test_strings_are_quoted_and_filtered() {
        assert_eq!(norm("hello"), "\"hello\"");
        assert_eq!(norm("\"quoted\""), "\"quoted\"");
        assert_eq!(norm("f(x)\\n{y}"), "\"fxny\"");
        assert_eq!(norm("line\r\nbreak"), "\"linebreak\"");
        assert_eq!(norm(""), "\"\"");
        assert_eq!(norm("\""), "\"\"");
        assert_eq!(norm("["), "\"[\"");
    }

    #[test]
    fn test_numbers_lose_leading_zeros() {
        assert_eq!(norm("007"), "7");
        assert_eq!(norm("-0042.50"), "-42.50");
        assert_eq!(norm("000"), "0");
        assert_eq!(norm("00.5"), "0.5");
        assert_eq!(norm("-0"), "-0");
    }

    #[test]
    fn test_booleans_pass_through() {
        assert_eq!(norm("true"), "true");
        assert_eq!(norm("false"), "false");
    }

    #[test]
    fn test_arrays_normalize_elements() {
        assert_eq!(norm("[]"), "[]");
        assert_eq!(norm("[01, abc, \"x,y\", [true, 2]]"), "[1, \"abc\", \"x,y\", [true, 2]]");
    }

    #[test]
    fn test_objects_normalize_keys_and_values() {
        assert_eq!(norm("{}"), "{}");
        assert_eq!(norm("{cName: hi, nSize: 010}"), "{\"cName\": \"hi\", \"nSize\": 10}");
        assert_eq!(norm("{\"a\": {b: [1]}}"), "{\"a\": {\"b\": [1]}}");

        let out = norm("{1abc: x}");
        let key = out.trim_start_matches('{').split(':').next().unwrap();
        assert_eq!(key.len(), "\"?1abc\"".len());
        assert!(key.as_bytes()[1].is_ascii_alphabetic());
        assert!(key.ends_with("1abc\""));
    }

    #[test]
    fn test_member_without_colon_gets_empty_value() {
        assert_eq!(norm("{lonely}"), "{\"lonely\": \"\"}");
    }

    #[test]
    fn test_separators_inside_strings_are_ignored() {
        assert_eq!(
            parse_array_elements(r#""a,b", "c\"d", e"#),
            vec![r#""a,b""#.to_string(), r#""c\"d""#.to_string(), "e".to_string()]
        );
        assert_eq!(
            parse_object_members(r#""k:1": v, x: "y:z""#),
            vec![
                ("\"k:1\"".to_string(), "v".to_string()),
                ("x".to_string(), "\"y:z\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_counterfactual_always_when_probability_one() {
        let normalizer = ValueNormalizer::new(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut changed = 0;
        for _ in 0..50 {
            if normalizer.normalize("12", &mut rng) != "12" {
                changed += 1;
            }
        }
        assert!(changed > 30);
    }
}
