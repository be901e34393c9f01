//! Formula parsing for model specification.

use crate::error::{Result, TidyError};
use serde::{Deserialize, Serialize};

/// A term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Intercept term (constant).
    Intercept,
    /// Main effect of a variable.
    Main(String),
    /// Interaction between two variables.
    Interaction(String, String),
}

impl Term {
    /// Get the variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Intercept => vec![],
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(v1, v2) => vec![v1.as_str(), v2.as_str()],
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Intercept => write!(f, "1"),
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(v1, v2) => write!(f, "{}:{}", v1, v2),
        }
    }
}

/// A parsed formula specifying a linear model.
///
/// Supports R-style formula syntax:
/// - `y ~ x` - response y, intercept + x
/// - `y ~ x + z` - intercept + x + z
/// - `y ~ x * z` - intercept + x + z + x:z
/// - `y ~ 0 + x` - no intercept, x
/// - `y ~ 1` - intercept only
/// - `~ x` - right-hand side only (no response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Response variable, if the formula has a left-hand side.
    pub response: Option<String>,
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in the formula (excluding intercept).
    pub terms: Vec<Term>,
    /// Original formula string.
    pub formula_str: String,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use tidy_lmm::data::Formula;
    /// let f = Formula::parse("body_mass_g ~ flipper_length_mm + sex").unwrap();
    /// assert_eq!(f.response.as_deref(), Some("body_mass_g"));
    /// assert!(f.intercept);
    /// assert_eq!(f.terms.len(), 2);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let (response, rhs) = split_response(formula)?;

        let mut intercept = true;
        let mut terms: Vec<Term> = Vec::new();
        for token in rhs.split('+').map(str::trim).filter(|t| !t.is_empty()) {
            match token {
                "1" => {}
                "0" | "-1" => intercept = false,
                _ if token.contains('*') => {
                    let (a, b) = split_pair(token, '*')?;
                    push_unique(&mut terms, Term::Main(a.clone()));
                    push_unique(&mut terms, Term::Main(b.clone()));
                    push_unique(&mut terms, Term::Interaction(a, b));
                }
                _ if token.contains(':') => {
                    let (a, b) = split_pair(token, ':')?;
                    push_unique(&mut terms, Term::Interaction(a, b));
                }
                _ => {
                    validate_name(token)?;
                    push_unique(&mut terms, Term::Main(token.to_string()));
                }
            }
        }

        if terms.is_empty() && !intercept {
            return Err(TidyError::FormulaParse(format!(
                "Formula '{}' removes the intercept and has no other terms",
                formula.trim()
            )));
        }

        Ok(Self {
            response,
            intercept,
            terms,
            formula_str,
        })
    }

    /// The response variable, or an error for one-sided formulas.
    pub fn require_response(&self) -> Result<&str> {
        self.response.as_deref().ok_or_else(|| {
            TidyError::FormulaParse(format!(
                "Formula '{}' has no response variable",
                self.formula_str
            ))
        })
    }

    /// Get all predictor variable names used in the formula.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        vars.sort();
        vars.dedup();
        vars
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(response) = &self.response {
            write!(f, "{} ", response)?;
        }
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        if self.terms.is_empty() {
            return write!(f, "1");
        }
        let term_strs: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", term_strs.join(" + "))
    }
}

/// Split `lhs ~ rhs` into an optional response and a non-empty right-hand side.
pub(crate) fn split_response(formula: &str) -> Result<(Option<String>, &str)> {
    let formula = formula.trim();
    let tilde = formula.find('~').ok_or_else(|| {
        TidyError::FormulaParse("Formula must contain '~'".to_string())
    })?;

    let lhs = formula[..tilde].trim();
    let rhs = formula[tilde + 1..].trim();

    if rhs.contains('~') {
        return Err(TidyError::FormulaParse(
            "Formula must contain exactly one '~'".to_string(),
        ));
    }
    if rhs.is_empty() {
        return Err(TidyError::FormulaParse(
            "Formula right-hand side is empty".to_string(),
        ));
    }

    let response = if lhs.is_empty() {
        None
    } else {
        validate_name(lhs)?;
        Some(lhs.to_string())
    };
    Ok((response, rhs))
}

fn push_unique(terms: &mut Vec<Term>, term: Term) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

fn split_pair(term_str: &str, sep: char) -> Result<(String, String)> {
    match term_str.split_once(sep) {
        Some((a, b)) if !b.contains(sep) => {
            let (a, b) = (a.trim(), b.trim());
            validate_name(a)?;
            validate_name(b)?;
            Ok((a.to_string(), b.to_string()))
        }
        _ => Err(TidyError::FormulaParse(format!(
            "Interaction '{}' must join exactly two variables",
            term_str
        ))),
    }
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(TidyError::FormulaParse(format!(
            "Invalid variable name '{}'",
            name
        )))
    }
}
