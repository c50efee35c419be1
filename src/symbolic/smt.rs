//! Lowering constraint trees to Z3 and reading witnesses back.
//!
//! Variables take the sort of the constraint kind: reals for `number`,
//! booleans, sets of integers for `array`, and sequences of characters for
//! strings. Unknown sets are bounded by the integers the constraint mentions
//! (plus the known value and one fresh element) so a model can be read back
//! as a finite set.

use std::collections::{BTreeMap, BTreeSet};

use z3::ast::{self, Ast, Dynamic};
use z3::{Config, Context, Model, Params, SatResult, Solver, Sort};

use super::{CmpOp, ConstraintKind, Expr, SolverBudget, SolverError, SolverResult, Value};

/// One solve, borrowed from the caller.
#[derive(Debug)]
pub struct Problem<'a> {
    pub expr: &'a Expr,
    pub kind: ConstraintKind,
    pub known_symbol: &'a str,
    pub known: &'a Value,
    pub unknowns: &'a [String],
    /// Unknowns that must not be the empty set
    pub non_empty: &'a BTreeSet<String>,
}

/// Unknown variables appearing directly as an operand of `subset`.
pub fn subset_operands(expr: &Expr, known_symbol: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    walk(expr, &mut |e| {
        if let Expr::Subset(l, r) = e {
            for side in [l, r] {
                if let Expr::Var(name) = side.as_ref() {
                    if name != known_symbol {
                        out.insert(name.clone());
                    }
                }
            }
        }
    });
    out
}

fn walk<F: FnMut(&Expr)>(expr: &Expr, f: &mut F) {
    f(expr);
    match expr {
        Expr::Var(_) | Expr::Const(_) => {}
        Expr::Not(inner) => walk(inner, f),
        Expr::And(items) | Expr::Or(items) => {
            for item in items {
                walk(item, f);
            }
        }
        Expr::Cmp(_, l, r) | Expr::Subset(l, r) | Expr::Implies(l, r) | Expr::Contains(l, r) => {
            walk(l, f);
            walk(r, f);
        }
    }
}

/// Integers an unknown set may draw its members from.
pub fn integer_universe(expr: &Expr, known: &Value) -> BTreeSet<i64> {
    let mut universe = BTreeSet::new();
    let mut absorb = |value: &Value| match value {
        Value::Set(set) => universe.extend(set.iter().copied()),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => {
            universe.insert(*n as i64);
        }
        _ => {}
    };
    absorb(known);
    walk(expr, &mut |e| {
        if let Expr::Const(value) = e {
            absorb(value);
        }
    });
    let fresh = universe.iter().next_back().map_or(0, |max| max.saturating_add(1));
    universe.insert(fresh);
    universe
}

/// A lowered operand tagged with its sort.
#[derive(Debug, Clone)]
enum Term<'ctx> {
    Real(ast::Real<'ctx>),
    Int(ast::Int<'ctx>),
    Bool(ast::Bool<'ctx>),
    Set(ast::Set<'ctx>),
    Str(ast::String<'ctx>),
}

impl<'ctx> Term<'ctx> {
    fn sort_name(&self) -> &'static str {
        match self {
            Term::Real(_) => "number",
            Term::Int(_) => "integer",
            Term::Bool(_) => "boolean",
            Term::Set(_) => "set",
            Term::Str(_) => "string",
        }
    }
}

fn mismatch(op: &str, left: &Term<'_>, right: &Term<'_>) -> SolverError {
    SolverError::TypeMismatch(format!("'{}' on {} and {}", op, left.sort_name(), right.sort_name()))
}

/// Exact rational encoding of a finite float.
fn real_literal<'ctx>(ctx: &'ctx Context, n: f64) -> SolverResult<ast::Real<'ctx>> {
    if !n.is_finite() {
        return Err(SolverError::TypeMismatch(format!("non-finite number {}", n)));
    }
    // f64 Display never uses exponent notation.
    let text = format!("{}", n.abs());
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let digits = format!("{}{}", whole, fraction);
    let digits = match digits.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let numerator = if n < 0.0 {
        format!("-{}", digits)
    } else {
        digits.to_string()
    };
    let denominator = format!("1{}", "0".repeat(fraction.len()));
    ast::Real::from_real_str(ctx, &numerator, &denominator)
        .ok_or_else(|| SolverError::Backend(format!("cannot encode {} as a real", n)))
}

fn set_literal<'ctx>(ctx: &'ctx Context, members: &BTreeSet<i64>) -> ast::Set<'ctx> {
    members
        .iter()
        .fold(ast::Set::empty(ctx, &Sort::int(ctx)), |set, member| {
            set.add(&Dynamic::from_ast(&ast::Int::from_i64(ctx, *member)))
        })
}

fn string_literal<'ctx>(ctx: &'ctx Context, s: &str) -> SolverResult<ast::String<'ctx>> {
    ast::String::from_str(ctx, s).map_err(|_| SolverError::Parse(format!("string literal {:?} holds NUL", s)))
}

struct Lowering<'ctx, 'a> {
    ctx: &'ctx Context,
    kind: ConstraintKind,
    vars: &'a BTreeMap<String, Term<'ctx>>,
}

macro_rules! ordered {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            CmpOp::Eq => $a._eq(&$b),
            CmpOp::Ne => $a._eq(&$b).not(),
            CmpOp::Gt => $a.gt(&$b),
            CmpOp::Ge => $a.ge(&$b),
            CmpOp::Lt => $a.lt(&$b),
            CmpOp::Le => $a.le(&$b),
        }
    };
}

impl<'ctx, 'a> Lowering<'ctx, 'a> {
    fn constant(&self, value: &Value) -> SolverResult<Term<'ctx>> {
        Ok(match value {
            Value::Number(n) if self.kind == ConstraintKind::Array && n.fract() == 0.0 => {
                Term::Int(ast::Int::from_i64(self.ctx, *n as i64))
            }
            Value::Number(n) => Term::Real(real_literal(self.ctx, *n)?),
            Value::Bool(b) => Term::Bool(ast::Bool::from_bool(self.ctx, *b)),
            Value::Set(members) => Term::Set(set_literal(self.ctx, members)),
            Value::Str(s) => Term::Str(string_literal(self.ctx, s)?),
        })
    }

    fn formula(&self, expr: &Expr) -> SolverResult<ast::Bool<'ctx>> {
        match self.term(expr)? {
            Term::Bool(b) => Ok(b),
            other => Err(SolverError::TypeMismatch(format!(
                "expected boolean, got {}",
                other.sort_name()
            ))),
        }
    }

    fn formulas(&self, items: &[Expr]) -> SolverResult<Vec<ast::Bool<'ctx>>> {
        items.iter().map(|item| self.formula(item)).collect()
    }

    fn term(&self, expr: &Expr) -> SolverResult<Term<'ctx>> {
        Ok(match expr {
            Expr::Var(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| SolverError::Parse(format!("unbound variable '{}'", name)))?,
            Expr::Const(value) => self.constant(value)?,
            Expr::Not(inner) => Term::Bool(self.formula(inner)?.not()),
            Expr::And(items) => {
                let parts = self.formulas(items)?;
                let refs: Vec<&ast::Bool<'ctx>> = parts.iter().collect();
                Term::Bool(ast::Bool::and(self.ctx, &refs))
            }
            Expr::Or(items) => {
                let parts = self.formulas(items)?;
                let refs: Vec<&ast::Bool<'ctx>> = parts.iter().collect();
                Term::Bool(ast::Bool::or(self.ctx, &refs))
            }
            Expr::Implies(l, r) => Term::Bool(self.formula(l)?.implies(&self.formula(r)?)),
            Expr::Subset(l, r) => match (self.term(l)?, self.term(r)?) {
                (Term::Set(a), Term::Set(b)) => Term::Bool(a.set_subset(&b)),
                (a, b) => return Err(mismatch("subset", &a, &b)),
            },
            Expr::Contains(l, r) => match (self.term(l)?, self.term(r)?) {
                (Term::Set(set), Term::Int(member)) | (Term::Int(member), Term::Set(set)) => {
                    Term::Bool(set.member(&Dynamic::from_ast(&member)))
                }
                (Term::Set(a), Term::Set(b)) => Term::Bool(b.set_subset(&a)),
                (Term::Str(a), Term::Str(b)) => Term::Bool(a.contains(&b)),
                (a, b) => return Err(mismatch("contains", &a, &b)),
            },
            Expr::Cmp(op, l, r) => Term::Bool(self.compare(*op, self.term(l)?, self.term(r)?)?),
        })
    }

    fn compare(&self, op: CmpOp, left: Term<'ctx>, right: Term<'ctx>) -> SolverResult<ast::Bool<'ctx>> {
        Ok(match (left, right) {
            (Term::Real(a), Term::Real(b)) => ordered!(op, a, b),
            (Term::Int(a), Term::Int(b)) => ordered!(op, a, b),
            (Term::Bool(a), Term::Bool(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => {
                equality(op, a._eq(&b))
            }
            (Term::Str(a), Term::Str(b)) if matches!(op, CmpOp::Eq | CmpOp::Ne) => {
                equality(op, a._eq(&b))
            }
            (Term::Set(a), Term::Set(b)) => match op {
                CmpOp::Eq => a._eq(&b),
                CmpOp::Ne => a._eq(&b).not(),
                CmpOp::Le => a.set_subset(&b),
                CmpOp::Ge => b.set_subset(&a),
                CmpOp::Lt => ast::Bool::and(self.ctx, &[&a.set_subset(&b), &a._eq(&b).not()]),
                CmpOp::Gt => ast::Bool::and(self.ctx, &[&b.set_subset(&a), &a._eq(&b).not()]),
            },
            (a, b) => return Err(mismatch("comparison", &a, &b)),
        })
    }
}

fn equality<'ctx>(op: CmpOp, eq: ast::Bool<'ctx>) -> ast::Bool<'ctx> {
    if op == CmpOp::Ne {
        eq.not()
    } else {
        eq
    }
}

fn declare<'ctx>(ctx: &'ctx Context, kind: ConstraintKind, name: &str) -> Term<'ctx> {
    match kind {
        ConstraintKind::Number => Term::Real(ast::Real::new_const(ctx, name)),
        ConstraintKind::Boolean => Term::Bool(ast::Bool::new_const(ctx, name)),
        ConstraintKind::Array => Term::Set(ast::Set::new_const(ctx, name, &Sort::int(ctx))),
        ConstraintKind::String => Term::Str(ast::String::new_const(ctx, name)),
    }
}

/// Parse the textual forms Z3 prints for rationals: `6.0`, `(- 3.0)`,
/// `(/ 7.0 2.0)`.
fn parse_real_text(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("(-").and_then(|s| s.strip_suffix(')')) {
        return parse_real_text(inner).map(|n| -n);
    }
    if let Some(inner) = text.strip_prefix("(/").and_then(|s| s.strip_suffix(')')) {
        let mut parts = inner.split_whitespace();
        let numerator = parts.next()?.parse::<f64>().ok()?;
        let denominator = parts.next()?.parse::<f64>().ok()?;
        return Some(numerator / denominator);
    }
    text.parse::<f64>().ok()
}

/// Undo Z3's `\u{X}` escapes in model strings.
fn decode_model_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("\\u{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 3..];
        let decoded = tail.find('}').and_then(|end| {
            u32::from_str_radix(&tail[..end], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str("\\u{");
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn read_back<'ctx>(
    model: &Model<'ctx>,
    name: &str,
    term: &Term<'ctx>,
    universe: &BTreeSet<i64>,
) -> SolverResult<Value> {
    let missing = || SolverError::Backend(format!("model has no value for '{}'", name));
    match term {
        Term::Real(r) => {
            let value = model.eval(r, true).ok_or_else(missing)?;
            value
                .as_real()
                .map(|(num, den)| num as f64 / den as f64)
                .or_else(|| parse_real_text(&value.to_string()))
                .map(Value::Number)
                .ok_or_else(missing)
        }
        Term::Bool(b) => model
            .eval(b, true)
            .and_then(|v| v.as_bool())
            .map(Value::Bool)
            .ok_or_else(missing),
        Term::Str(s) => model
            .eval(s, true)
            .and_then(|v| v.as_string())
            .map(|s| Value::Str(decode_model_string(&s)))
            .ok_or_else(missing),
        Term::Set(set) => {
            let ctx = set.get_ctx();
            let mut members = BTreeSet::new();
            for candidate in universe {
                let member = set.member(&Dynamic::from_ast(&ast::Int::from_i64(ctx, *candidate)));
                if model.eval(&member, true).and_then(|v| v.as_bool()).ok_or_else(missing)? {
                    members.insert(*candidate);
                }
            }
            Ok(Value::Set(members))
        }
        Term::Int(_) => Err(missing()),
    }
}

/// Check `problem` with Z3 and return a value for every unknown.
pub fn find_witness(problem: &Problem<'_>, budget: &SolverBudget) -> SolverResult<BTreeMap<String, Value>> {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let solver = Solver::new(&ctx);

    let mut params = Params::new(&ctx);
    let timeout_ms = u32::try_from(budget.timeout.as_millis()).unwrap_or(u32::MAX);
    params.set_u32("timeout", timeout_ms);
    if budget.resource_limit > 0 {
        params.set_u32("rlimit", budget.resource_limit);
    }
    solver.set_params(&params);

    let mut vars = BTreeMap::new();
    vars.insert(
        problem.known_symbol.to_string(),
        declare(&ctx, problem.kind, problem.known_symbol),
    );
    for name in problem.unknowns {
        vars.insert(name.clone(), declare(&ctx, problem.kind, name));
    }
    let lowering = Lowering {
        ctx: &ctx,
        kind: problem.kind,
        vars: &vars,
    };

    let known_var = lowering.term(&Expr::Var(problem.known_symbol.to_string()))?;
    solver.assert(&lowering.compare(CmpOp::Eq, known_var, lowering.constant(problem.known)?)?);
    solver.assert(&lowering.formula(problem.expr)?);

    let universe = integer_universe(problem.expr, problem.known);
    if problem.kind == ConstraintKind::Array {
        let bound = set_literal(&ctx, &universe);
        let empty = ast::Set::empty(&ctx, &Sort::int(&ctx));
        for name in problem.unknowns {
            if let Some(Term::Set(set)) = vars.get(name) {
                solver.assert(&set.set_subset(&bound));
                if problem.non_empty.contains(name) {
                    solver.assert(&set._eq(&empty).not());
                }
            }
        }
    }

    match solver.check() {
        SatResult::Sat => {}
        SatResult::Unsat => return Err(SolverError::NoSolution),
        SatResult::Unknown => {
            return Err(SolverError::BudgetExhausted {
                reason: format!("no answer within {:?}", budget.timeout),
            })
        }
    }
    let model = solver
        .get_model()
        .ok_or_else(|| SolverError::Backend("satisfiable but no model".to_string()))?;

    let mut witness = BTreeMap::new();
    for name in problem.unknowns {
        if let Some(term) = vars.get(name) {
            witness.insert(name.clone(), read_back(&model, name, term, &universe)?);
        }
    }
    Ok(witness)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_real_text() {
        assert_eq!(parse_real_text("6.0"), Some(6.0));
        assert_eq!(parse_real_text("(- 3.0)"), Some(-3.0));
        assert_eq!(parse_real_text("(/ 7.0 2.0)"), Some(3.5));
        assert_eq!(parse_real_text("(- (/ 1.0 4.0))"), Some(-0.25));
        assert_eq!(parse_real_text("root-obj"), None);
    }

    #[test]
    fn test_decode_model_string() {
        assert_eq!(decode_model_string("ab\\u{41}c"), "abAc");
        assert_eq!(decode_model_string("\\u{zz}"), "\\u{zz}");
        assert_eq!(decode_model_string("plain"), "plain");
    }

    #[test]
    fn test_integer_universe_adds_fresh_member() {
        let expr = Expr::Contains(
            Box::new(Expr::Var("y".to_string())),
            Box::new(Expr::Const(Value::Number(7.0))),
        );
        let known = Value::Set([1, 2].into_iter().collect());
        let universe: Vec<i64> = integer_universe(&expr, &known).into_iter().collect();
        assert_eq!(universe, vec![1, 2, 7, 8]);
    }

    #[test]
    fn test_real_literal_is_exact() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let half = real_literal(&ctx, -2.5).unwrap();
        assert_eq!(half.as_real().map(|(n, d)| n as f64 / d as f64), Some(-2.5));
        assert!(real_literal(&ctx, f64::NAN).is_err());
    }
}
