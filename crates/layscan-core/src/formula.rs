//! Derived-value evaluation.
//!
//! Some raw values are formulas over sibling fields in the same
//! record, marked with a leading `!`. The marker is stripped and the
//! rest is evaluated as a small fixed-grammar arithmetic expression
//! (literals, identifiers, `+ - * /`, parentheses) over a typed
//! environment built from the record's coerced values. Degenerate
//! arithmetic (a zero divisor, an overflow) is expected data
//! degeneracy and degrades to an empty result; referencing an unknown
//! or non-numeric operand arithmetically is fatal for the record.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::trace;

use crate::error::{FormulaError, SchemaError};

/// Marker prefix identifying a derived-value expression.
pub const FORMULA_MARKER: char = '!';

/// Significant digits kept by decimal arithmetic.
const PRECISION: u32 = 4;

/// Whether a raw value is a derived-value formula.
pub fn is_derived(value: &str) -> bool {
    value.starts_with(FORMULA_MARKER)
}

/// Normalize a field name into an identifier-safe operand token.
///
/// Lowercases, collapses every run of non-alphanumeric characters to a
/// single underscore, and trims leading and trailing underscores.
/// Deterministic; collisions across a record's fields are rejected
/// when the environment is built.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// A coerced operand value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// All-digit raw value.
    Int(i64),
    /// Percent raw value, already divided by 100 and rounded to
    /// [`PRECISION`] significant digits.
    Number(Decimal),
    /// Anything else; usable only as a non-arithmetic operand.
    Text(String),
}

/// Coerce a raw field value into its typed form.
pub fn coerce(raw: &str) -> Value {
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::Int(n);
        }
    }
    if raw.contains('%') {
        let stripped = raw.replace('%', "");
        if let Ok(d) = stripped.trim().parse::<Decimal>() {
            return Value::Number(round_sig(d / Decimal::ONE_HUNDRED, PRECISION));
        }
    }
    Value::Text(raw.to_string())
}

/// Round to `sig` significant digits.
fn round_sig(d: Decimal, sig: u32) -> Decimal {
    if d.is_zero() {
        return Decimal::ZERO;
    }
    let digits = d.mantissa().unsigned_abs().to_string().len() as i64;
    let drop = digits - sig as i64;
    if drop <= 0 {
        return d.normalize();
    }
    let target = d.scale() as i64 - drop;
    if target >= 0 {
        d.round_dp(target as u32).normalize()
    } else {
        // Rounding left of the decimal point: scale down, round, scale
        // back up.
        let factor = Decimal::from_i128_with_scale(10i128.pow((-target) as u32), 0);
        ((d / factor).round_dp(0) * factor).normalize()
    }
}

/// A typed substitution environment built from one record's fields.
#[derive(Debug, Clone)]
pub struct Environment {
    values: HashMap<String, Value>,
}

impl Environment {
    /// Build an environment from `(field name, raw value)` pairs.
    ///
    /// Two field names normalizing to the same operand token is a
    /// schema-validation error, never a silent overwrite.
    pub fn from_fields<'a, I>(fields: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut values = HashMap::new();
        let mut originals: HashMap<String, String> = HashMap::new();
        for (name, raw) in fields {
            let normalized = normalize_name(name);
            if let Some(first) = originals.get(&normalized) {
                if first != name {
                    return Err(SchemaError::NameCollision {
                        first: first.clone(),
                        second: name.to_string(),
                        normalized,
                    });
                }
            }
            originals.insert(normalized.clone(), name.to_string());
            values.insert(normalized, coerce(raw));
        }
        Ok(Self { values })
    }

    fn get(&self, token: &str) -> Option<&Value> {
        self.values.get(token)
    }
}

/// Evaluate a marked derived-value expression against its record's
/// environment.
///
/// Returns the formatted result, or an empty string for degenerate
/// arithmetic. Unknown operands, non-numeric operands in arithmetic,
/// and malformed formulas propagate as [`FormulaError`].
pub fn evaluate(raw: &str, env: &Environment) -> Result<String, FormulaError> {
    let formula = raw
        .strip_prefix(FORMULA_MARKER)
        .unwrap_or(raw)
        .trim_start_matches(' ');
    trace!(formula, "evaluating derived value");

    let tokens = tokenize(formula).map_err(|reason| FormulaError::Parse {
        formula: formula.to_string(),
        reason,
    })?;
    let mut parser = Parser { tokens, pos: 0, env };

    let result = match parser.expression() {
        Ok(value) => value,
        Err(EvalError::Degenerate) => return Ok(String::new()),
        Err(EvalError::Fatal(e)) => return Err(e),
    };
    if parser.pos != parser.tokens.len() {
        return Err(FormulaError::Parse {
            formula: formula.to_string(),
            reason: "trailing tokens".to_string(),
        });
    }

    Ok(match result {
        Value::Int(n) => n.to_string(),
        Value::Number(d) => d.normalize().to_string(),
        Value::Text(s) => s,
    })
}

/// Evaluate every marked value in a record in place.
///
/// The environment is built from the record's raw values, so an
/// unevaluated formula referenced by another is seen as opaque text.
pub fn resolve_derived(fields: &mut [(String, String)]) -> Result<(), crate::error::LayscanError> {
    if !fields.iter().any(|(_, value)| is_derived(value)) {
        return Ok(());
    }
    let env = Environment::from_fields(fields.iter().map(|(n, v)| (n.as_str(), v.as_str())))?;
    for (_, value) in fields.iter_mut() {
        if is_derived(value) {
            *value = evaluate(value, &env)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(formula: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = formula.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: Decimal = literal
                    .parse()
                    .map_err(|_| format!("bad numeric literal {literal:?}"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }

    Ok(tokens)
}

enum EvalError {
    /// Expected data degeneracy; degrades to an empty result.
    Degenerate,
    /// Propagates as fatal for the record.
    Fatal(FormulaError),
}

/// An operand with its identifier origin, for error reporting.
struct Operand {
    value: Value,
    origin: Option<String>,
}

impl Operand {
    fn numeric(&self) -> Result<Decimal, EvalError> {
        match &self.value {
            Value::Int(n) => Ok(Decimal::from(*n)),
            Value::Number(d) => Ok(*d),
            Value::Text(s) => Err(EvalError::Fatal(FormulaError::NonNumericOperand {
                name: self.origin.clone().unwrap_or_else(|| "<literal>".to_string()),
                value: s.clone(),
            })),
        }
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    env: &'a Environment,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<Value, EvalError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek().filter(|t| matches!(t, Token::Plus | Token::Minus)) {
            let op = op.clone();
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Operand { value: apply(&op, lhs, rhs)?, origin: None };
        }
        Ok(lhs.value)
    }

    fn term(&mut self) -> Result<Operand, EvalError> {
        let mut lhs = self.factor()?;
        while let Some(op) = self.peek().filter(|t| matches!(t, Token::Star | Token::Slash)) {
            let op = op.clone();
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Operand { value: apply(&op, lhs, rhs)?, origin: None };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Operand, EvalError> {
        match self.next() {
            Some(Token::Number(d)) => Ok(Operand {
                value: if d.scale() == 0 && d.mantissa().abs() <= i64::MAX as i128 {
                    Value::Int(d.mantissa() as i64)
                } else {
                    Value::Number(d)
                },
                origin: None,
            }),
            Some(Token::Ident(name)) => {
                let token = normalize_name(&name);
                let value = self
                    .env
                    .get(&token)
                    .cloned()
                    .ok_or(EvalError::Fatal(FormulaError::UnknownOperand(name.clone())))?;
                Ok(Operand { value, origin: Some(name) })
            }
            Some(Token::Minus) => {
                let operand = self.factor()?;
                let negated = match operand.value {
                    Value::Int(n) => Value::Int(-n),
                    Value::Number(d) => Value::Number(-d),
                    Value::Text(_) => return Err(EvalError::Fatal(operand_error(&operand))),
                };
                Ok(Operand { value: negated, origin: operand.origin })
            }
            Some(Token::LParen) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(Operand { value, origin: None }),
                    _ => Err(EvalError::Fatal(FormulaError::Parse {
                        formula: String::new(),
                        reason: "unbalanced parentheses".to_string(),
                    })),
                }
            }
            other => Err(EvalError::Fatal(FormulaError::Parse {
                formula: String::new(),
                reason: format!("unexpected token {other:?}"),
            })),
        }
    }
}

fn operand_error(operand: &Operand) -> FormulaError {
    match &operand.value {
        Value::Text(s) => FormulaError::NonNumericOperand {
            name: operand.origin.clone().unwrap_or_else(|| "<literal>".to_string()),
            value: s.clone(),
        },
        _ => FormulaError::Parse {
            formula: String::new(),
            reason: "invalid operand".to_string(),
        },
    }
}

/// Apply one binary operator.
///
/// Integer addition, subtraction, and multiplication stay exact;
/// anything involving a decimal, including every division, runs at
/// [`PRECISION`] significant digits. A zero divisor or an overflow is
/// degenerate, not fatal.
fn apply(op: &Token, lhs: Operand, rhs: Operand) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (&lhs.value, &rhs.value) {
        match op {
            Token::Plus => return a.checked_add(*b).map(Value::Int).ok_or(EvalError::Degenerate),
            Token::Minus => return a.checked_sub(*b).map(Value::Int).ok_or(EvalError::Degenerate),
            Token::Star => return a.checked_mul(*b).map(Value::Int).ok_or(EvalError::Degenerate),
            _ => {}
        }
    }

    let a = lhs.numeric()?;
    let b = rhs.numeric()?;
    let result = match op {
        Token::Plus => a.checked_add(b),
        Token::Minus => a.checked_sub(b),
        Token::Star => a.checked_mul(b),
        Token::Slash => {
            if b.is_zero() {
                return Err(EvalError::Degenerate);
            }
            a.checked_div(b)
        }
        _ => unreachable!("apply only sees binary operators"),
    };
    match result {
        Some(value) => Ok(Value::Number(round_sig(value, PRECISION))),
        None => Err(EvalError::Degenerate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(fields: &[(&str, &str)]) -> Environment {
        Environment::from_fields(fields.iter().copied()).unwrap()
    }

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_name("Academic Growth/Math/Count"), "academic_growth_math_count");
        assert_eq!(normalize_name("Other Factors/LEP (>24pt gain)"), "other_factors_lep_24pt_gain");
        assert_eq!(normalize_name("Pct. Proficient"), "pct_proficient");
        assert_eq!(normalize_name("__already__"), "already");
        assert_eq!(normalize_name("IEP"), "iep");
    }

    #[test]
    fn coerces_raw_values() {
        assert_eq!(coerce("200"), Value::Int(200));
        assert_eq!(coerce("0"), Value::Int(0));
        assert_eq!(coerce("50%"), Value::Number(Decimal::new(5, 1)));
        assert_eq!(coerce("71.82%"), Value::Number("0.7182".parse().unwrap()));
        assert_eq!(coerce("No"), Value::Text("No".to_string()));
        assert_eq!(coerce("12.9"), Value::Text("12.9".to_string()));
        assert_eq!(coerce(""), Value::Text(String::new()));
    }

    #[test]
    fn percent_coercion_rounds_to_four_significant_digits() {
        assert_eq!(coerce("33.333%"), Value::Number("0.3333".parse().unwrap()));
        assert_eq!(coerce("66.667%"), Value::Number("0.6667".parse().unwrap()));
    }

    #[test]
    fn collision_is_schema_error() {
        let result = Environment::from_fields(vec![("Total Score", "1"), ("Total/Score", "2")]);
        assert!(matches!(result, Err(SchemaError::NameCollision { .. })));
    }

    #[test]
    fn percent_over_count() {
        let e = env(&[("A Pct", "50%"), ("B Count", "200")]);
        assert_eq!(evaluate("!a_pct / b_count", &e).unwrap(), "0.0025");
    }

    #[test]
    fn zero_divisor_degrades_to_empty() {
        let e = env(&[("num", "10"), ("den", "0")]);
        assert_eq!(evaluate("! num / den", &e).unwrap(), "");
    }

    #[test]
    fn unknown_operand_is_fatal() {
        let e = env(&[("a", "1")]);
        assert!(matches!(
            evaluate("!a + missing", &e),
            Err(FormulaError::UnknownOperand(name)) if name == "missing"
        ));
    }

    #[test]
    fn text_operand_in_arithmetic_is_fatal() {
        let e = env(&[("ayp", "No"), ("count", "3")]);
        assert!(matches!(
            evaluate("!ayp * count", &e),
            Err(FormulaError::NonNumericOperand { .. })
        ));
    }

    #[test]
    fn bare_text_reference_passes_through() {
        let e = env(&[("AYP", "Watch")]);
        assert_eq!(evaluate("!ayp", &e).unwrap(), "Watch");
    }

    #[test]
    fn integer_arithmetic_stays_exact() {
        let e = env(&[("a", "7"), ("b", "6")]);
        assert_eq!(evaluate("!a * b + 2", &e).unwrap(), "44");
        assert_eq!(evaluate("!a - b", &e).unwrap(), "1");
    }

    #[test]
    fn precedence_and_parentheses() {
        let e = env(&[("a", "2"), ("b", "3"), ("c", "4")]);
        assert_eq!(evaluate("!a + b * c", &e).unwrap(), "14");
        assert_eq!(evaluate("!(a + b) * c", &e).unwrap(), "20");
        assert_eq!(evaluate("!-a + c", &e).unwrap(), "2");
    }

    #[test]
    fn malformed_formula_is_a_parse_error() {
        let e = env(&[("a", "1")]);
        assert!(matches!(evaluate("!a +", &e), Err(FormulaError::Parse { .. })));
        assert!(matches!(evaluate("!(a", &e), Err(FormulaError::Parse { .. })));
        assert!(matches!(evaluate("!a $ 2", &e), Err(FormulaError::Parse { .. })));
    }

    #[test]
    fn resolve_derived_in_place() {
        let mut fields = vec![
            ("Eligible".to_string(), "22".to_string()),
            ("Earned".to_string(), "11".to_string()),
            ("Share".to_string(), "!earned / eligible".to_string()),
        ];
        resolve_derived(&mut fields).unwrap();
        assert_eq!(fields[2].1, "0.5");
    }

    #[test]
    fn round_sig_behavior() {
        assert_eq!(round_sig("0.00254321".parse().unwrap(), 4), "0.002543".parse().unwrap());
        assert_eq!(round_sig("123456".parse().unwrap(), 4), "123500".parse().unwrap());
        assert_eq!(round_sig("1.5".parse().unwrap(), 4), "1.5".parse().unwrap());
        assert_eq!(round_sig(Decimal::ZERO, 4), Decimal::ZERO);
    }
}
