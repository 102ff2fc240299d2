//! Contract guard: precondition/postcondition checks over call arguments.
//!
//! Conditions are compiled into a small typed expression AST at
//! registration time and evaluated against a bound-variable map, never as
//! arbitrary source code. Evaluation failures (unknown identifiers, type
//! mismatches) count as violations, not crashes.

use arbiter_core::{Arguments, GuardResult, ToolError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::chain::Guard;

/// Error compiling a contract condition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// Unexpected character in the condition source
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar {
        /// Offending character
        found: char,
        /// Byte offset
        offset: usize,
    },
    /// Unexpected token
    #[error("unexpected token {found} in condition")]
    UnexpectedToken {
        /// Token description
        found: String,
    },
    /// Condition ended prematurely
    #[error("condition ended unexpectedly")]
    UnexpectedEnd,
}

impl From<ContractError> for ToolError {
    fn from(err: ContractError) -> Self {
        Self::Validation {
            tool: "contract".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        };
        write!(f, "{s}")
    }
}

/// Typed condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal JSON scalar
    Literal(Value),
    /// Bound variable reference, possibly a dotted path
    Ident(String),
    /// `len(expr)` - length of a string, array, or object
    Len(Box<Expr>),
    /// `exists(name)` - whether a binding is present
    Exists(String),
    /// Binary comparison
    Compare {
        /// Operator
        op: CmpOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Logical conjunction
    And(Box<Expr>, Box<Expr>),
    /// Logical disjunction
    Or(Box<Expr>, Box<Expr>),
    /// Logical negation
    Not(Box<Expr>),
}

impl Expr {
    /// Parse a condition source string
    ///
    /// # Errors
    ///
    /// Returns error if the source is not a valid condition
    pub fn parse(source: &str) -> Result<Self, ContractError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(ContractError::UnexpectedToken {
                found: format!("{:?}", parser.tokens[parser.pos]),
            });
        }
        Ok(expr)
    }

    /// Collect every identifier referenced by the expression
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Ident(name) | Self::Exists(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Len(inner) | Self::Not(inner) => inner.collect_identifiers(out),
            Self::Compare { lhs, rhs, .. } | Self::And(lhs, rhs) | Self::Or(lhs, rhs) => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Self::Literal(_) => {}
        }
    }

    /// Evaluate against a binding map.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure (unknown identifier, type
    /// mismatch, non-boolean result position).
    pub fn evaluate(&self, bindings: &HashMap<String, Value>) -> Result<Value, String> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Ident(name) => resolve(name, bindings),
            Self::Exists(name) => Ok(Value::Bool(resolve(name, bindings).is_ok())),
            Self::Len(inner) => {
                let value = inner.evaluate(bindings)?;
                let len = match &value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    other => return Err(format!("len() not defined for {}", type_name(other))),
                };
                Ok(Value::from(len))
            }
            Self::Compare { op, lhs, rhs } => {
                let l = lhs.evaluate(bindings)?;
                let r = rhs.evaluate(bindings)?;
                compare(*op, &l, &r).map(Value::Bool)
            }
            Self::And(lhs, rhs) => {
                if as_bool(&lhs.evaluate(bindings)?)? {
                    Ok(Value::Bool(as_bool(&rhs.evaluate(bindings)?)?))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Self::Or(lhs, rhs) => {
                if as_bool(&lhs.evaluate(bindings)?)? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(as_bool(&rhs.evaluate(bindings)?)?))
                }
            }
            Self::Not(inner) => Ok(Value::Bool(!as_bool(&inner.evaluate(bindings)?)?)),
        }
    }

    /// Evaluate as a pass/fail condition
    ///
    /// # Errors
    ///
    /// Returns error if evaluation fails or the result is not boolean
    pub fn holds(&self, bindings: &HashMap<String, Value>) -> Result<bool, String> {
        as_bool(&self.evaluate(bindings)?)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn resolve(path: &str, bindings: &HashMap<String, Value>) -> Result<Value, String> {
    let mut segments = path.split('.');
    let root = segments.next().unwrap_or_default();
    let mut current = bindings
        .get(root)
        .ok_or_else(|| format!("unknown identifier {root}"))?;
    for segment in segments {
        current = current
            .get(segment)
            .ok_or_else(|| format!("no field {segment} on {path}"))?;
    }
    Ok(current.clone())
}

fn as_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(format!("expected boolean, got {}", type_name(other))),
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, String> {
    use std::cmp::Ordering;

    // Equality is defined for every type pair; ordering only for numbers
    // and strings.
    match op {
        CmpOp::Eq => return Ok(values_equal(l, r)),
        CmpOp::Ne => return Ok(!values_equal(l, r)),
        _ => {}
    }

    let ordering = match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b)
                .ok_or_else(|| "cannot order non-finite numbers".to_string())?
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            return Err(format!(
                "cannot order {} against {}",
                type_name(l),
                type_name(r)
            ));
        }
    };

    Ok(match op {
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Eq | CmpOp::Ne => unreachable!(),
    })
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
        }
        _ => l == r,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Int(i64),
    Str(String),
    True,
    False,
    Null,
    Cmp(CmpOp),
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ContractError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Lt));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(ContractError::UnexpectedChar { found: c, offset: i });
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(ContractError::UnexpectedChar { found: c, offset: i });
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(ContractError::UnexpectedChar { found: c, offset: i });
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(ContractError::UnexpectedEnd),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' | '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| ContractError::UnexpectedToken { found: text })?;
                    tokens.push(Token::Number(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| ContractError::UnexpectedToken { found: text })?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ContractError::UnexpectedChar { found: other, offset: i }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ContractError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ContractError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ContractError> {
        let token = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(ContractError::UnexpectedToken {
                found: format!("{token:?}"),
            })
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ContractError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ContractError> {
        let mut expr = self.parse_unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ContractError> {
        if self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ContractError> {
        let lhs = self.parse_term()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_term()?;
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ContractError> {
        match self.next()? {
            Token::Int(value) => Ok(Expr::Literal(Value::from(value))),
            Token::Number(value) => Ok(Expr::Literal(
                serde_json::Number::from_f64(value)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) if name == "len" && self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Len(Box::new(inner)))
            }
            Token::Ident(name) if name == "exists" && self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let ident = match self.next()? {
                    Token::Ident(id) => id,
                    other => {
                        return Err(ContractError::UnexpectedToken {
                            found: format!("{other:?}"),
                        });
                    }
                };
                self.expect(&Token::RParen)?;
                Ok(Expr::Exists(ident))
            }
            Token::Ident(name) => Ok(Expr::Ident(name)),
            other => Err(ContractError::UnexpectedToken {
                found: format!("{other:?}"),
            }),
        }
    }
}

/// A compiled condition paired with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Original source, kept for reporting
    pub source: String,
    /// Compiled expression
    pub expr: Expr,
}

impl Condition {
    /// Compile a condition from source
    ///
    /// # Errors
    ///
    /// Returns error if the source is not a valid condition
    pub fn compile(source: impl Into<String>) -> Result<Self, ContractError> {
        let source = source.into();
        let expr = Expr::parse(&source)?;
        Ok(Self { source, expr })
    }
}

/// Pre/postconditions for one tool
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolContract {
    /// Preconditions over argument names
    pub requires: Vec<Condition>,
    /// Postconditions; `result` binds the call result
    pub ensures: Vec<Condition>,
    /// Whether violations block (true) or warn (false)
    pub strict: bool,
}

impl ToolContract {
    /// Create an empty, non-strict contract
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a precondition
    ///
    /// # Errors
    ///
    /// Returns error if the condition does not compile
    pub fn with_require(mut self, source: impl Into<String>) -> Result<Self, ContractError> {
        self.requires.push(Condition::compile(source)?);
        Ok(self)
    }

    /// Add a postcondition
    ///
    /// # Errors
    ///
    /// Returns error if the condition does not compile
    pub fn with_ensure(mut self, source: impl Into<String>) -> Result<Self, ContractError> {
        self.ensures.push(Condition::compile(source)?);
        Ok(self)
    }

    /// Set strictness
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Guard enforcing tool contracts
#[derive(Default)]
pub struct ContractGuard {
    contracts: HashMap<String, ToolContract>,
}

impl ContractGuard {
    /// Create an empty guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract under a tool name (exact or namespaced)
    #[must_use]
    pub fn with_contract(mut self, tool_name: impl Into<String>, contract: ToolContract) -> Self {
        self.contracts.insert(tool_name.into(), contract);
        self
    }

    /// Register a contract in place
    pub fn register(&mut self, tool_name: impl Into<String>, contract: ToolContract) {
        self.contracts.insert(tool_name.into(), contract);
    }

    /// Look up a contract by exact name, then by the bare name with any
    /// namespace prefix stripped.
    #[must_use]
    fn lookup(&self, tool_name: &str) -> Option<&ToolContract> {
        if let Some(contract) = self.contracts.get(tool_name) {
            return Some(contract);
        }
        let bare = tool_name
            .rsplit_once("::")
            .map(|(_, tail)| tail)
            .or_else(|| tool_name.rsplit_once('.').map(|(_, tail)| tail))?;
        self.contracts.get(bare)
    }

    fn evaluate_conditions(
        conditions: &[Condition],
        bindings: &HashMap<String, Value>,
        strict: bool,
        kind: &str,
    ) -> GuardResult {
        let mut failures = Vec::new();

        for condition in conditions {
            let failed = match condition.expr.holds(bindings) {
                Ok(true) => None,
                Ok(false) => Some(None),
                Err(err) => Some(Some(err)),
            };

            if let Some(eval_error) = failed {
                let mut line = format!("{kind} '{}' failed", condition.source);
                if let Some(err) = eval_error {
                    line.push_str(&format!(" ({err})"));
                } else if strict {
                    // Strict reports carry the offending actual values.
                    let actuals: Vec<String> = condition
                        .expr
                        .identifiers()
                        .iter()
                        .map(|name| match resolve(name, bindings) {
                            Ok(value) => format!("{name} = {value}"),
                            Err(_) => format!("{name} is unbound"),
                        })
                        .collect();
                    if !actuals.is_empty() {
                        line.push_str(&format!(" ({})", actuals.join(", ")));
                    }
                }
                failures.push(line);
            }
        }

        if failures.is_empty() {
            return GuardResult::allow();
        }

        let summary = failures.join("; ");
        if strict {
            GuardResult::block(summary)
        } else {
            GuardResult::warn(summary)
        }
    }
}

#[async_trait]
impl Guard for ContractGuard {
    fn name(&self) -> &str {
        "contract"
    }

    async fn check(&self, tool_name: &str, args: &Arguments) -> GuardResult {
        let Some(contract) = self.lookup(tool_name) else {
            return GuardResult::allow();
        };

        let bindings: HashMap<String, Value> =
            args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Self::evaluate_conditions(&contract.requires, &bindings, contract.strict, "requires")
    }

    async fn check_output(&self, tool_name: &str, args: &Arguments, result: &Value) -> GuardResult {
        let Some(contract) = self.lookup(tool_name) else {
            return GuardResult::allow();
        };

        let mut bindings: HashMap<String, Value> =
            args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        bindings.insert("result".to_string(), result.clone());
        Self::evaluate_conditions(&contract.ensures, &bindings, contract.strict, "ensures")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::GuardVerdict;
    use serde_json::json;

    fn args_from(value: Value) -> Arguments {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_parse_simple_comparison() {
        let expr = Expr::parse("n > 0").unwrap();
        assert!(matches!(expr, Expr::Compare { op: CmpOp::Gt, .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Expr::parse("n >").is_err());
        assert!(Expr::parse("@bad").is_err());
        assert!(Expr::parse("n > 0 extra").is_err());
    }

    #[test]
    fn test_evaluate_numeric_and_string() {
        let mut bindings = HashMap::new();
        bindings.insert("n".to_string(), json!(5));
        bindings.insert("name".to_string(), json!("alpha"));

        assert!(Expr::parse("n > 0").unwrap().holds(&bindings).unwrap());
        assert!(!Expr::parse("n >= 10").unwrap().holds(&bindings).unwrap());
        assert!(Expr::parse("name == 'alpha'").unwrap().holds(&bindings).unwrap());
        assert!(Expr::parse("name != 'beta'").unwrap().holds(&bindings).unwrap());
    }

    #[test]
    fn test_evaluate_logical_operators() {
        let mut bindings = HashMap::new();
        bindings.insert("n".to_string(), json!(5));

        assert!(Expr::parse("n > 0 && n < 10").unwrap().holds(&bindings).unwrap());
        assert!(Expr::parse("n < 0 || n == 5").unwrap().holds(&bindings).unwrap());
        assert!(Expr::parse("!(n > 10)").unwrap().holds(&bindings).unwrap());
    }

    #[test]
    fn test_evaluate_len_and_exists() {
        let mut bindings = HashMap::new();
        bindings.insert("items".to_string(), json!([1, 2, 3]));

        assert!(Expr::parse("len(items) <= 10").unwrap().holds(&bindings).unwrap());
        assert!(Expr::parse("exists(items)").unwrap().holds(&bindings).unwrap());
        assert!(!Expr::parse("exists(missing)").unwrap().holds(&bindings).unwrap());
    }

    #[test]
    fn test_evaluate_dotted_path() {
        let mut bindings = HashMap::new();
        bindings.insert("user".to_string(), json!({"age": 30}));
        assert!(Expr::parse("user.age >= 18").unwrap().holds(&bindings).unwrap());
    }

    #[test]
    fn test_unknown_identifier_is_violation_not_panic() {
        let bindings = HashMap::new();
        let err = Expr::parse("n > 0").unwrap().holds(&bindings).unwrap_err();
        assert!(err.contains("unknown identifier"));
    }

    #[test]
    fn test_type_mismatch_is_violation() {
        let mut bindings = HashMap::new();
        bindings.insert("n".to_string(), json!("five"));
        let err = Expr::parse("n > 0").unwrap().holds(&bindings).unwrap_err();
        assert!(err.contains("cannot order"));
    }

    #[tokio::test]
    async fn test_strict_violation_blocks_with_actual_value() {
        let guard = ContractGuard::new().with_contract(
            "calc",
            ToolContract::new()
                .with_require("n > 0")
                .unwrap()
                .with_strict(true),
        );

        let result = guard.check("calc", &args_from(json!({"n": -5}))).await;
        assert_eq!(result.verdict, GuardVerdict::Block);
        let reason = result.reason.unwrap();
        assert!(reason.contains("n > 0"));
        assert!(reason.contains("-5"));
    }

    #[tokio::test]
    async fn test_non_strict_violation_warns() {
        let guard = ContractGuard::new().with_contract(
            "calc",
            ToolContract::new().with_require("n > 0").unwrap(),
        );

        let result = guard.check("calc", &args_from(json!({"n": -5}))).await;
        assert_eq!(result.verdict, GuardVerdict::Warn);
    }

    #[tokio::test]
    async fn test_passing_precondition_allows_in_both_modes() {
        for strict in [true, false] {
            let guard = ContractGuard::new().with_contract(
                "calc",
                ToolContract::new()
                    .with_require("n > 0")
                    .unwrap()
                    .with_strict(strict),
            );
            let result = guard.check("calc", &args_from(json!({"n": 5}))).await;
            assert_eq!(result.verdict, GuardVerdict::Allow);
        }
    }

    #[tokio::test]
    async fn test_postcondition_binds_result() {
        let guard = ContractGuard::new().with_contract(
            "calc",
            ToolContract::new()
                .with_ensure("result >= n")
                .unwrap()
                .with_strict(true),
        );

        let args = args_from(json!({"n": 5}));
        let ok = guard.check_output("calc", &args, &json!(10)).await;
        assert_eq!(ok.verdict, GuardVerdict::Allow);

        let bad = guard.check_output("calc", &args, &json!(1)).await;
        assert_eq!(bad.verdict, GuardVerdict::Block);
    }

    #[tokio::test]
    async fn test_all_failing_conditions_reported() {
        let guard = ContractGuard::new().with_contract(
            "calc",
            ToolContract::new()
                .with_require("n > 0")
                .unwrap()
                .with_require("n < 100")
                .unwrap(),
        );

        let result = guard.check("calc", &args_from(json!({"n": 500}))).await;
        // only the second fails
        assert_eq!(result.verdict, GuardVerdict::Warn);
        assert!(result.reason.unwrap().contains("n < 100"));

        let result = guard.check("calc", &args_from(json!({"m": 1}))).await;
        // both fail to evaluate
        let reason = result.reason.unwrap();
        assert!(reason.contains("n > 0"));
        assert!(reason.contains("n < 100"));
    }

    #[tokio::test]
    async fn test_namespaced_lookup() {
        let guard = ContractGuard::new().with_contract(
            "calc",
            ToolContract::new()
                .with_require("n > 0")
                .unwrap()
                .with_strict(true),
        );

        let result = guard.check("math::calc", &args_from(json!({"n": -1}))).await;
        assert_eq!(result.verdict, GuardVerdict::Block);

        let result = guard.check("math.calc", &args_from(json!({"n": -1}))).await;
        assert_eq!(result.verdict, GuardVerdict::Block);
    }

    #[tokio::test]
    async fn test_unknown_tool_allows() {
        let guard = ContractGuard::new();
        let result = guard.check("anything", &Arguments::new()).await;
        assert_eq!(result.verdict, GuardVerdict::Allow);
    }
}
