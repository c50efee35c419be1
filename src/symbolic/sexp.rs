//! Minimal s-expression reader for relation constraints.

use super::SolverError;

/// Parsed s-expression. Quoted strings keep their quotes in the atom text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(atom) => Some(atom),
            Sexp::List(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Atom(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, SolverError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' => {
                let mut atom = String::from('"');
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    atom.push(c);
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                atom.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(SolverError::Parse(format!("unterminated string in {}", input)));
                }
                tokens.push(Token::Atom(atom));
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '(' || c == ')' || c.is_whitespace() {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                }
                tokens.push(Token::Atom(atom));
            }
        }
    }
    Ok(tokens)
}

/// Parse one expression. A list holding a single element collapses to that
/// element, so `(x)` reads as `x`.
pub fn parse(input: &str) -> Result<Sexp, SolverError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(SolverError::Parse("empty constraint".to_string()));
    }
    let mut pos = 0;
    let sexp = parse_at(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(SolverError::Parse(format!("trailing input in {}", input)));
    }
    Ok(sexp)
}

fn parse_at(tokens: &[Token], pos: &mut usize) -> Result<Sexp, SolverError> {
    match tokens.get(*pos) {
        Some(Token::Atom(atom)) => {
            *pos += 1;
            Ok(Sexp::Atom(atom.clone()))
        }
        Some(Token::Open) => {
            *pos += 1;
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    Some(Token::Close) => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => items.push(parse_at(tokens, pos)?),
                    None => return Err(SolverError::Parse("missing closing parenthesis".to_string())),
                }
            }
            match items.len() {
                0 => Err(SolverError::Parse("empty list".to_string())),
                1 => Ok(items.remove(0)),
                _ => Ok(Sexp::List(items)),
            }
        }
        Some(Token::Close) => Err(SolverError::Parse("unexpected closing parenthesis".to_string())),
        None => Err(SolverError::Parse("unexpected end of input".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> Sexp {
        Sexp::Atom(s.to_string())
    }

    #[test]
    fn test_parse_nested() {
        assert_eq!(
            parse("(and (>= x 0) (< x y))").unwrap(),
            Sexp::List(vec![
                atom("and"),
                Sexp::List(vec![atom(">="), atom("x"), atom("0")]),
                Sexp::List(vec![atom("<"), atom("x"), atom("y")]),
            ])
        );
    }

    #[test]
    fn test_single_element_list_collapses() {
        assert_eq!(parse("((x))").unwrap(), atom("x"));
        assert_eq!(parse("  y ").unwrap(), atom("y"));
    }

    #[test]
    fn test_quoted_strings_keep_spaces() {
        assert_eq!(
            parse("(= s \"a b)\")").unwrap(),
            Sexp::List(vec![atom("="), atom("s"), atom("\"a b)\"")])
        );
    }

    #[test]
    fn test_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("(and x").is_err());
        assert!(parse("x)").is_err());
        assert!(parse("()").is_err());
        assert!(parse("(= s \"open)").is_err());
    }
}
