//! Context-free parameter grammars and their random expansion.
//!
//! A grammar maps a non-terminal to a list of expansion templates. Templates
//! reference other non-terminals with `{Name}` placeholders; a placeholder that
//! does not name a non-terminal is emitted as literal text. Grammars are
//! merged from every `*.json` rule file in a parameter directory, each file
//! holding an array of `[non_terminal, template]` pairs.
//!
//! Expansion threads an explicit [`ExpansionContext`] through the recursion so
//! depth and work limits are visible at every step, and builds output from
//! parsed template segments instead of repeated search-and-replace.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::warn;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;

use crate::catalog::{CatalogError, CatalogResult};

/// Private encoding for a literal `{` inside template text.
pub const LEFT_BRACE_ESCAPE: &str = "<<<LEFT_BRACE>>>";
/// Private encoding for a literal `}` inside template text.
pub const RIGHT_BRACE_ESCAPE: &str = "<<<RIGHT_BRACE>>>";

/// Inclusive range the per-call maximum depth is drawn from.
pub const MAX_DEPTH_RANGE: (usize, usize) = (30, 50);

/// Default number of symbol expansions allowed for one top-level call.
pub const DEFAULT_EXPANSION_BUDGET: usize = 20_000;

/// Levels a recursion may run past `max_depth` when no terminating template
/// exists, bounding stack use independently of the budget.
pub const MAX_OVERRUN_LEVELS: usize = 256;

/// Reasons a grammar could not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpansionError {
    #[error("grammar has no rules")]
    EmptyGrammar,

    #[error("expansion budget of {budget} symbols exhausted")]
    BudgetExhausted { budget: usize },

    #[error("expansion nested {depth} levels deep")]
    DepthExceeded { depth: usize },
}

/// State threaded through one recursive expansion.
#[derive(Debug, Clone)]
pub struct ExpansionContext {
    /// Depth at which self-recursive templates are filtered out
    pub max_depth: usize,
    /// Symbols that may still be expanded before giving up
    pub remaining_budget: usize,
    budget: usize,
}

impl ExpansionContext {
    pub fn new(max_depth: usize, budget: usize) -> Self {
        Self {
            max_depth,
            remaining_budget: budget,
            budget,
        }
    }

    /// Context with a randomized depth limit and the default budget.
    pub fn randomized<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let (low, high) = MAX_DEPTH_RANGE;
        Self::new(rng.gen_range(low..=high), DEFAULT_EXPANSION_BUDGET)
    }

    fn consume(&mut self) -> Result<(), ExpansionError> {
        if self.remaining_budget == 0 {
            return Err(ExpansionError::BudgetExhausted { budget: self.budget });
        }
        self.remaining_budget -= 1;
        Ok(())
    }
}

/// One piece of a parsed expansion template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Split a template into literal text and `{Name}` placeholders.
///
/// A placeholder name is non-empty and never contains a brace; an opening
/// brace that does not start such a placeholder is kept as literal text.
pub fn parse_template(template: &str) -> Vec<Segment<'_>> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && bytes[j] != b'{' && bytes[j] != b'}' {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'}' && j > i + 1 {
            if literal_start < i {
                segments.push(Segment::Literal(&template[literal_start..i]));
            }
            segments.push(Segment::Placeholder(&template[i + 1..j]));
            i = j + 1;
            literal_start = i;
        } else {
            i += 1;
        }
    }

    if literal_start < template.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }
    segments
}

/// A merged set of grammar rules for one parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grammar {
    rules: HashMap<String, Vec<String>>,
    start_symbol: Option<String>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a grammar from `(non_terminal, template)` pairs; the first
    /// non-terminal becomes the default start symbol.
    pub fn from_rules<'a, I>(rules: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut grammar = Self::new();
        for (non_terminal, template) in rules {
            grammar.add_rule(non_terminal, template);
        }
        grammar
    }

    /// Load and merge every `*.json` rule file in `dir`.
    ///
    /// Files are visited in file-name order. Unreadable files and rules that
    /// are not `[string, string]` pairs are skipped with a warning.
    pub fn from_dir(dir: &Path) -> CatalogResult<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| CatalogError::io(dir, e))? {
            let path = entry.map_err(|e| CatalogError::io(dir, e))?.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if path.is_file() && is_json {
                files.push(path);
            }
        }
        files.sort();

        let mut grammar = Self::new();
        for path in files {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!("skipping unreadable grammar file {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => grammar.merge_json_rules(&value),
                Err(e) => warn!("skipping malformed grammar file {}: {}", path.display(), e),
            }
        }
        Ok(grammar)
    }

    fn merge_json_rules(&mut self, value: &Value) {
        let Some(rules) = value.as_array() else {
            return;
        };
        for rule in rules {
            let pair = match rule.as_array() {
                Some(pair) if pair.len() == 2 => pair,
                _ => continue,
            };
            if let (Some(non_terminal), Some(template)) = (pair[0].as_str(), pair[1].as_str()) {
                self.add_rule(non_terminal, template);
            }
        }
    }

    pub fn add_rule(&mut self, non_terminal: &str, template: &str) {
        if self.start_symbol.is_none() {
            self.start_symbol = Some(non_terminal.to_string());
        }
        self.rules
            .entry(non_terminal.to_string())
            .or_default()
            .push(template.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn start_symbol(&self) -> Option<&str> {
        self.start_symbol.as_deref()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.rules.contains_key(symbol)
    }

    pub fn templates(&self, symbol: &str) -> Option<&[String]> {
        self.rules.get(symbol).map(Vec::as_slice)
    }

    /// Produce one parameter value.
    ///
    /// `start` falls back to the default start symbol when missing or unknown.
    pub fn generate_parameter<R: Rng + ?Sized>(
        &self,
        start: Option<&str>,
        rng: &mut R,
    ) -> Result<String, ExpansionError> {
        let symbol = match start {
            Some(symbol) if self.contains(symbol) => symbol,
            _ => self.start_symbol().ok_or(ExpansionError::EmptyGrammar)?,
        };
        if !self.contains(symbol) {
            return Err(ExpansionError::EmptyGrammar);
        }
        let mut ctx = ExpansionContext::randomized(rng);
        self.expand_with(symbol, &mut ctx, rng)
    }

    /// Expand `start` under a fresh randomized context.
    ///
    /// A symbol with no rules comes back unchanged.
    pub fn expand<R: Rng + ?Sized>(&self, start: &str, rng: &mut R) -> Result<String, ExpansionError> {
        let mut ctx = ExpansionContext::randomized(rng);
        self.expand_with(start, &mut ctx, rng)
    }

    /// Expand `start` with an explicit context and restore literal braces.
    pub fn expand_with<R: Rng + ?Sized>(
        &self,
        start: &str,
        ctx: &mut ExpansionContext,
        rng: &mut R,
    ) -> Result<String, ExpansionError> {
        let mut out = String::new();
        self.expand_symbol(start, 0, ctx, rng, &mut out)?;
        Ok(out
            .replace(LEFT_BRACE_ESCAPE, "{")
            .replace(RIGHT_BRACE_ESCAPE, "}"))
    }

    fn expand_symbol<R: Rng + ?Sized>(
        &self,
        symbol: &str,
        depth: usize,
        ctx: &mut ExpansionContext,
        rng: &mut R,
        out: &mut String,
    ) -> Result<(), ExpansionError> {
        let Some(templates) = self.rules.get(symbol) else {
            out.push_str(symbol);
            return Ok(());
        };
        ctx.consume()?;
        if depth > ctx.max_depth + MAX_OVERRUN_LEVELS {
            return Err(ExpansionError::DepthExceeded { depth });
        }

        let template = if depth >= ctx.max_depth {
            let self_reference = format!("{{{}}}", symbol);
            let terminating: Vec<&String> = templates
                .iter()
                .filter(|t| !t.contains(&self_reference))
                .collect();
            match terminating.choose(rng) {
                Some(template) => *template,
                None => templates.choose(rng).ok_or(ExpansionError::EmptyGrammar)?,
            }
        } else {
            templates.choose(rng).ok_or(ExpansionError::EmptyGrammar)?
        };

        for segment in parse_template(template) {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => self.expand_symbol(name, depth + 1, ctx, rng, out)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_parse_template_segments() {
        let segments = parse_template("a{B}c{D}");
        assert_eq!(
            segments,
            vec![
                Segment::Literal("a"),
                Segment::Placeholder("B"),
                Segment::Literal("c"),
                Segment::Placeholder("D"),
            ]
        );
    }

    #[test]
    fn test_parse_template_ignores_empty_and_nested_braces() {
        assert_eq!(parse_template("{}"), vec![Segment::Literal("{}")]);
        assert_eq!(
            parse_template("{{x}}"),
            vec![
                Segment::Literal("{"),
                Segment::Placeholder("x"),
                Segment::Literal("}"),
            ]
        );
    }

    #[test]
    fn test_absent_symbol_is_literal() {
        let grammar = Grammar::from_rules([("S", "{Missing}!")]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(grammar.generate_parameter(None, &mut rng).unwrap(), "Missing!");
        assert_eq!(grammar.expand("Other", &mut rng).unwrap(), "Other");
    }

    #[test]
    fn test_repeated_placeholders_expand_independently() {
        let grammar = Grammar::from_rules([("S", "{D}{D}{D}{D}{D}{D}{D}{D}"), ("D", "0"), ("D", "1")]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut saw_mixed = false;
        for _ in 0..20 {
            let value = grammar.generate_parameter(Some("S"), &mut rng).unwrap();
            assert_eq!(value.len(), 8);
            if value.contains('0') && value.contains('1') {
                saw_mixed = true;
            }
        }
        assert!(saw_mixed);
    }

    #[test]
    fn test_recursive_grammar_terminates_at_depth() {
        let grammar = Grammar::from_rules([("S", "a{S}"), ("S", "b")]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..50 {
            let mut ctx = ExpansionContext::new(5, DEFAULT_EXPANSION_BUDGET);
            let value = grammar.expand_with("S", &mut ctx, &mut rng).unwrap();
            assert!(value.ends_with('b'));
            // depth 0..=5 can emit at most 5 'a' before the filter forces 'b'
            assert!(value.len() <= 6);
        }
    }

    #[test]
    fn test_only_recursive_templates_overrun_then_exhaust_budget() {
        let grammar = Grammar::from_rules([("S", "x{S}")]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut ctx = ExpansionContext::new(3, 100);
        let result = grammar.expand_with("S", &mut ctx, &mut rng);
        assert_eq!(result, Err(ExpansionError::BudgetExhausted { budget: 100 }));
    }

    #[test]
    fn test_overrun_depth_is_capped() {
        let grammar = Grammar::from_rules([("S", "x{S}")]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut ctx = ExpansionContext::new(3, DEFAULT_EXPANSION_BUDGET);
        let result = grammar.expand_with("S", &mut ctx, &mut rng);
        assert_eq!(result, Err(ExpansionError::DepthExceeded { depth: 3 + MAX_OVERRUN_LEVELS + 1 }));
    }

    #[test]
    fn test_brace_escapes_restored_after_expansion() {
        let grammar = Grammar::from_rules([
            ("S", "<<<LEFT_BRACE>>>{K}<<<RIGHT_BRACE>>>"),
            ("K", "k: 1"),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(grammar.generate_parameter(None, &mut rng).unwrap(), "{k: 1}");
    }

    #[test]
    fn test_empty_grammar_reports_error() {
        let grammar = Grammar::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            grammar.generate_parameter(None, &mut rng),
            Err(ExpansionError::EmptyGrammar)
        );
    }

    #[test]
    fn test_unknown_start_falls_back_to_default() {
        let grammar = Grammar::from_rules([("First", "1"), ("Second", "2")]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(grammar.generate_parameter(Some("Nope"), &mut rng).unwrap(), "1");
        assert_eq!(grammar.generate_parameter(Some("Second"), &mut rng).unwrap(), "2");
    }

    #[test]
    fn test_from_dir_merges_files_and_skips_bad_rules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"[["Start", "{Num}"], ["Num", "4"], ["bad"]]"#).unwrap();
        fs::write(dir.path().join("b.json"), r#"[["Num", "2"], [1, 2]]"#).unwrap();
        fs::write(dir.path().join("c.json"), "not json").unwrap();
        fs::write(dir.path().join("notes.txt"), r#"[["X", "y"]]"#).unwrap();

        let grammar = Grammar::from_dir(dir.path()).unwrap();
        assert_eq!(grammar.start_symbol(), Some("Start"));
        assert_eq!(grammar.templates("Num").unwrap().len(), 2);
        assert!(!grammar.contains("X"));
    }
}
