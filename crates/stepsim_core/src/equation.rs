use crate::error::SimError;
use crate::expr::is_reserved;
use std::fmt;

/// One normalized `variable = expression` statement.
///
/// Normalization applies two textual rewrites to the left-hand side:
/// - A leading `D` marks a first-order differential equation: `DX = f`
///   becomes the forward-Euler update `X = X + dt*(f)`.
/// - A trailing `[t]` or `[0]` index is dropped, so `X[t] = ...` and
///   `X[0] = ...` both declare `X`.
///
/// The `D` convention applies to every name starting with `D`; a variable
/// literally called `Demand` is read as the derivative of `emand`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    text: String,
    lhs: String,
    rhs: String,
    differential: bool,
}

impl Equation {
    pub fn parse(statement: &str) -> Result<Self, SimError> {
        let text: String = statement.chars().filter(|c| !c.is_whitespace()).collect();
        let malformed = |reason: &str| SimError::MalformedEquation {
            statement: text.clone(),
            reason: reason.to_string(),
        };

        let (raw_lhs, raw_rhs) = text
            .split_once('=')
            .ok_or_else(|| malformed("missing '='"))?;
        if raw_rhs.is_empty() {
            return Err(malformed("empty right-hand side"));
        }

        let (mut lhs, differential) = match raw_lhs.strip_prefix('D') {
            Some(stripped) => (stripped, true),
            None => (raw_lhs, false),
        };
        if lhs.len() > 3 && (lhs.ends_with("[t]") || lhs.ends_with("[0]")) {
            lhs = &lhs[..lhs.len() - 3];
        }

        if lhs.is_empty() {
            return Err(malformed("empty left-hand side"));
        }
        if !is_identifier(lhs) {
            return Err(malformed("left-hand side is not a variable name"));
        }
        if is_reserved(lhs) {
            return Err(SimError::ReservedName {
                name: lhs.to_string(),
            });
        }

        let rhs = if differential {
            // Uses the stripped name, so `DX[t] = f` reads `X` rather than the indexed `X[t]`.
            format!("{} + dt*({})", lhs, raw_rhs)
        } else {
            raw_rhs.to_string()
        };

        Ok(Self {
            lhs: lhs.to_string(),
            rhs,
            differential,
            text,
        })
    }

    /// The statement as written, with whitespace removed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lhs(&self) -> &str {
        &self.lhs
    }

    pub fn rhs(&self) -> &str {
        &self.rhs
    }

    /// True when the statement was written as a `D`-prefixed derivative.
    pub fn is_differential(&self) -> bool {
        self.differential
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_malformed(statement: &str, needle: &str) {
        let err = Equation::parse(statement).expect_err("expected malformed equation");
        assert!(
            matches!(err, SimError::MalformedEquation { .. }),
            "expected MalformedEquation, got {err:?}"
        );
        let message = err.to_string();
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn plain_statement_keeps_name_and_expression() {
        let eq = Equation::parse("X = X + 1").expect("parse");
        assert_eq!(eq.lhs(), "X");
        assert_eq!(eq.rhs(), "X+1");
        assert_eq!(eq.text(), "X=X+1");
        assert!(!eq.is_differential());
    }

    #[test]
    fn derivative_prefix_becomes_forward_euler_update() {
        let eq = Equation::parse("DX = -0.5 * X").expect("parse");
        assert_eq!(eq.lhs(), "X");
        assert_eq!(eq.rhs(), "X + dt*(-0.5*X)");
        assert!(eq.is_differential());
        // The normalized statement is kept, not the rewrite.
        assert_eq!(eq.to_string(), "DX=-0.5*X");
    }

    #[test]
    fn time_index_suffixes_are_stripped() {
        for statement in ["Xt[t] = 1", "Xt[0] = 1", "Xt = 1"] {
            let eq = Equation::parse(statement).expect("parse");
            assert_eq!(eq.lhs(), "Xt", "statement {statement}");
        }
        let eq = Equation::parse("X[t] = X[i-1] + 1").expect("parse");
        assert_eq!(eq.lhs(), "X");
        assert_eq!(eq.rhs(), "X[i-1]+1");
    }

    #[test]
    fn derivative_with_time_index_uses_bare_name() {
        let eq = Equation::parse("DX[t] = 2").expect("parse");
        assert_eq!(eq.lhs(), "X");
        assert_eq!(eq.rhs(), "X + dt*(2)");
    }

    #[test]
    fn split_happens_on_first_equals_sign() {
        let eq = Equation::parse("A==B").expect("degenerate split still parses");
        assert_eq!(eq.lhs(), "A");
        assert_eq!(eq.rhs(), "=B");
    }

    #[test]
    fn rejects_missing_or_empty_sides() {
        assert_malformed("X + 1", "missing '='");
        assert_malformed("X =", "empty right-hand side");
        assert_malformed("= 3", "empty left-hand side");
        assert_malformed("D = 3", "empty left-hand side");
        assert_malformed("DX =", "empty right-hand side");
    }

    #[test]
    fn rejects_non_identifier_left_hand_sides() {
        assert_malformed("X[i] = 1", "not a variable name");
        assert_malformed("2X = 1", "not a variable name");
        assert_malformed("X+Y = 1", "not a variable name");
    }

    #[test]
    fn rejects_reserved_names() {
        let err = Equation::parse("dt = 1").expect_err("reserved");
        assert!(matches!(err, SimError::ReservedName { ref name } if name == "dt"));
        let err = Equation::parse("pi = 3").expect_err("reserved");
        assert!(matches!(err, SimError::ReservedName { .. }));
    }
}
