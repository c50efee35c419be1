//! Constraint solving for symbolic API relations.
//!
//! A symbolic relation ties one parameter of an API to one parameter of
//! another through a small s-expression constraint, e.g.
//! `(and (>= x 0) (< x y))`. Given the value already generated for one side,
//! [`solve`] finds a value for the other side.
//!
//! Constraints are lowered into a typed [`Expr`], then into Z3 terms (see
//! [`smt`]). Every call builds its own Z3 context and is bounded by a
//! [`SolverBudget`].

pub mod sexp;
pub mod smt;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use log::debug;

use self::sexp::Sexp;

/// Z3 resource limit per solve; 0 leaves only the timeout.
pub const DEFAULT_RESOURCE_LIMIT: u32 = 0;

/// Wall-clock limit per solve.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolverError {
    #[error("malformed constraint: {0}")]
    Parse(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("known symbol '{0}' does not occur in the constraint")]
    KnownSymbolMissing(String),

    #[error("cannot read '{value}' as {kind}")]
    InvalidKnownValue { value: String, kind: ConstraintKind },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("constraint has no solution")]
    NoSolution,

    #[error("solver gave up: {reason}")]
    BudgetExhausted { reason: String },

    #[error("solver backend: {0}")]
    Backend(String),
}

pub type SolverResult<T> = Result<T, SolverError>;

/// Limits applied to one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverBudget {
    /// Z3 `rlimit`
    pub resource_limit: u32,
    /// Z3 `timeout`, rounded to milliseconds
    pub timeout: Duration,
}

impl Default for SolverBudget {
    fn default() -> Self {
        Self {
            resource_limit: DEFAULT_RESOURCE_LIMIT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Sort of every variable in a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Number,
    Boolean,
    /// Finite set of integers
    Array,
    String,
}

impl ConstraintKind {
    /// Unrecognized kinds are treated as strings.
    pub fn parse(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "number" => ConstraintKind::Number,
            "boolean" => ConstraintKind::Boolean,
            "array" => ConstraintKind::Array,
            _ => ConstraintKind::String,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::Number => "number",
            ConstraintKind::Boolean => "boolean",
            ConstraintKind::Array => "array",
            ConstraintKind::String => "string",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Set(BTreeSet<i64>),
    Str(String),
}

impl Value {
    /// Raw parameter text for this value.
    pub fn render(&self) -> String {
        match self {
            Value::Number(n) => render_number(*n),
            Value::Bool(b) => b.to_string(),
            Value::Set(set) => {
                let items: Vec<String> = set.iter().map(|i| i.to_string()).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Str(s) => render_string(s),
        }
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Quote `s`, escaping quotes and backslashes; non-printable characters
/// become `\u{X}` escapes.
fn render_string(s: &str) -> String {
    let mut out = String::from('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Typed constraint tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Const(Value),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Subset(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Contains(Box<Expr>, Box<Expr>),
}

const OPERATORS: &[&str] = &[
    "and", "or", "not", "assert", "=", "!=", ">", ">=", "<", "<=", "subset", "=>", "contains",
];

fn is_numeric_literal(atom: &str) -> bool {
    atom.parse::<f64>().map(|n| n.is_finite()).unwrap_or(false)
}

fn is_quoted(atom: &str) -> bool {
    atom.len() >= 2 && atom.starts_with('"') && atom.ends_with('"')
}

fn is_variable(atom: &str) -> bool {
    !OPERATORS.contains(&atom)
        && !atom.eq_ignore_ascii_case("true")
        && !atom.eq_ignore_ascii_case("false")
        && !atom.eq_ignore_ascii_case("empty")
        && !is_numeric_literal(atom)
        && !is_quoted(atom)
}

/// Every atom of `sexp` that names a variable.
pub fn free_variables(sexp: &Sexp) -> BTreeSet<String> {
    let mut vars = BTreeSet::new();
    collect_variables(sexp, &mut vars);
    vars
}

fn collect_variables(sexp: &Sexp, vars: &mut BTreeSet<String>) {
    match sexp {
        Sexp::Atom(atom) => {
            if is_variable(atom) {
                vars.insert(atom.clone());
            }
        }
        Sexp::List(items) => {
            for item in items {
                collect_variables(item, vars);
            }
        }
    }
}

fn lower_constant(atom: &str, kind: ConstraintKind) -> SolverResult<Value> {
    if atom.eq_ignore_ascii_case("true") || atom.eq_ignore_ascii_case("false") {
        return Ok(Value::Bool(atom.eq_ignore_ascii_case("true")));
    }
    if atom.eq_ignore_ascii_case("empty") {
        return Ok(Value::Set(BTreeSet::new()));
    }
    if is_quoted(atom) {
        return Ok(Value::Str(unescape(&atom[1..atom.len() - 1])));
    }
    match atom.parse::<f64>() {
        Ok(_) if kind == ConstraintKind::String => Ok(Value::Str(atom.to_string())),
        Ok(n) => Ok(Value::Number(n)),
        Err(_) => Err(SolverError::Parse(format!("unexpected constant '{}'", atom))),
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Lower a parsed constraint into an [`Expr`]. `assert` wrappers are dropped.
pub fn lower(sexp: &Sexp, kind: ConstraintKind) -> SolverResult<Expr> {
    let items = match sexp {
        Sexp::Atom(atom) if is_variable(atom) => return Ok(Expr::Var(atom.clone())),
        Sexp::Atom(atom) => return lower_constant(atom, kind).map(Expr::Const),
        Sexp::List(items) => items,
    };
    let op = items[0]
        .as_atom()
        .ok_or_else(|| SolverError::Parse("operator position holds a list".to_string()))?;
    let args = &items[1..];

    let binary = |args: &[Sexp]| -> SolverResult<(Box<Expr>, Box<Expr>)> {
        match args {
            [left, right] => Ok((Box::new(lower(left, kind)?), Box::new(lower(right, kind)?))),
            _ => Err(SolverError::Parse(format!("'{}' takes two operands, got {}", op, args.len()))),
        }
    };

    match op {
        "assert" | "not" if args.len() != 1 => {
            Err(SolverError::Parse(format!("'{}' takes one operand, got {}", op, args.len())))
        }
        "assert" => lower(&args[0], kind),
        "not" => Ok(Expr::Not(Box::new(lower(&args[0], kind)?))),
        "and" => Ok(Expr::And(args.iter().map(|a| lower(a, kind)).collect::<SolverResult<_>>()?)),
        "or" => Ok(Expr::Or(args.iter().map(|a| lower(a, kind)).collect::<SolverResult<_>>()?)),
        "subset" => binary(args).map(|(l, r)| Expr::Subset(l, r)),
        "=>" => binary(args).map(|(l, r)| Expr::Implies(l, r)),
        "contains" => binary(args).map(|(l, r)| Expr::Contains(l, r)),
        _ => {
            let cmp = match op {
                "=" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                ">" => CmpOp::Gt,
                ">=" => CmpOp::Ge,
                "<" => CmpOp::Lt,
                "<=" => CmpOp::Le,
                other => return Err(SolverError::UnknownOperator(other.to_string())),
            };
            binary(args).map(|(l, r)| Expr::Cmp(cmp, l, r))
        }
    }
}

fn as_member(n: f64) -> Option<i64> {
    if n.fract() == 0.0 {
        Some(n as i64)
    } else {
        None
    }
}

fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Coerce the known parameter text to a value of `kind`.
pub fn parse_known_value(text: &str, kind: ConstraintKind) -> SolverResult<Value> {
    let invalid = || SolverError::InvalidKnownValue {
        value: text.to_string(),
        kind,
    };
    let raw = strip_quotes(text);
    match kind {
        ConstraintKind::Number => {
            if let Ok(n) = raw.parse::<f64>() {
                return if n.is_finite() { Ok(Value::Number(n)) } else { Err(invalid()) };
            }
            let (sign, digits) = match raw.strip_prefix('-') {
                Some(rest) => (-1.0, rest),
                None => (1.0, raw),
            };
            digits
                .strip_prefix("0x")
                .or_else(|| digits.strip_prefix("0X"))
                .and_then(|hex| i64::from_str_radix(hex, 16).ok())
                .map(|n| Value::Number(sign * n as f64))
                .ok_or_else(invalid)
        }
        ConstraintKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        ConstraintKind::Array => {
            let inner = raw.trim();
            let inner = inner
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .or_else(|| inner.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
                .unwrap_or(inner);
            let mut set = BTreeSet::new();
            for item in inner.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let n = strip_quotes(item).parse::<f64>().map_err(|_| invalid())?;
                set.insert(as_member(n).ok_or_else(invalid)?);
            }
            Ok(Value::Set(set))
        }
        ConstraintKind::String => Ok(Value::Str(raw.to_string())),
    }
}

/// Result of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub enum Solution {
    /// The constraint had exactly one unknown.
    Single(Value),
    /// Zero or several unknowns, by name.
    Multiple(BTreeMap<String, Value>),
}

impl Solution {
    /// Text for the single unknown, if there was exactly one.
    pub fn render_single(&self) -> Option<String> {
        match self {
            Solution::Single(value) => Some(value.render()),
            Solution::Multiple(_) => None,
        }
    }
}

/// Solve `constraint` for every variable except `known_symbol`, which is
/// fixed to `known_value`.
pub fn solve(
    constraint: &str,
    kind: ConstraintKind,
    known_symbol: &str,
    known_value: &str,
    budget: &SolverBudget,
) -> SolverResult<Solution> {
    let sexp = sexp::parse(constraint)?;
    let vars = free_variables(&sexp);
    if !vars.contains(known_symbol) {
        return Err(SolverError::KnownSymbolMissing(known_symbol.to_string()));
    }
    let expr = lower(&sexp, kind)?;
    let known = parse_known_value(known_value, kind)?;

    let unknowns: Vec<String> = vars.iter().filter(|v| *v != known_symbol).cloned().collect();
    let non_empty = if kind == ConstraintKind::Array {
        smt::subset_operands(&expr, known_symbol)
    } else {
        BTreeSet::new()
    };

    let problem = smt::Problem {
        expr: &expr,
        kind,
        known_symbol,
        known: &known,
        unknowns: &unknowns,
        non_empty: &non_empty,
    };
    let mut witness = smt::find_witness(&problem, budget)?;
    debug!("solved {} with {} unknown(s)", constraint, unknowns.len());

    if unknowns.len() == 1 {
        let value = witness.remove(&unknowns[0]).ok_or(SolverError::NoSolution)?;
        Ok(Solution::Single(value))
    } else {
        Ok(Solution::Multiple(witness))
    }
}
