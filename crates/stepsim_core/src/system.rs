use crate::equation::Equation;
use crate::error::SimError;
use std::collections::HashMap;
use std::fmt;

/// An ordered, named collection of equations sharing one declaration scope.
///
/// Statements are separated by `;` if the text contains one, otherwise by
/// newlines if it contains one, otherwise by commas. Only one delimiter class
/// is honored per block. Commas nested inside parentheses or brackets never
/// split a statement, so `X = max(a, b)` survives as one statement.
#[derive(Debug, Clone, Default)]
pub struct EquationSystem {
    vars: Vec<String>,
    equations: HashMap<String, Equation>,
}

impl EquationSystem {
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let mut system = Self::default();
        for segment in split_statements(text) {
            if segment.trim().is_empty() {
                continue;
            }
            let equation = Equation::parse(segment)?;
            let name = equation.lhs().to_string();
            if system.equations.contains_key(&name) {
                return Err(SimError::DuplicateVariable { name });
            }
            system.vars.push(name.clone());
            system.equations.insert(name, equation);
        }
        Ok(system)
    }

    /// Variable names in declaration order.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub fn equation(&self, name: &str) -> Option<&Equation> {
        self.equations.get(name)
    }

    /// The normalized right-hand side declared for `name`.
    pub fn rhs(&self, name: &str) -> Option<&str> {
        self.equations.get(name).map(Equation::rhs)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Equations in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Equation> {
        self.vars.iter().filter_map(|name| self.equations.get(name))
    }
}

impl fmt::Display for EquationSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, equation) in self.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{equation}")?;
        }
        Ok(())
    }
}

fn split_statements(text: &str) -> Vec<&str> {
    if text.contains(';') {
        text.split(';').collect()
    } else if text.contains('\n') {
        text.split('\n').collect()
    } else {
        split_top_level_commas(text)
    }
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (pos, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                segments.push(&text[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    segments.push(&text[start..]);
    segments
}
