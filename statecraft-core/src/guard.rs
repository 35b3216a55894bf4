//! Guard evaluation.
//!
//! A guard reference names a property on the [`Target`]. The reference is
//! parsed at compile time and may be a small boolean expression over target
//! properties:
//!
//! - `ready` - property is truthy (a predicate property is invoked)
//! - `order.paid` - nested field of a JSON property
//! - `count == value` / `count != value` - equality (strings, numbers, booleans, null)
//! - `count > 3`, `>=`, `<`, `<=` - numeric comparison
//! - `!expr` - logical NOT
//! - `expr && expr` - logical AND (higher precedence than OR)
//! - `expr || expr` - logical OR
//! - `(expr)` - grouping
//!
//! Every top-level property an expression reads must be defined on the
//! target; reading an undefined one is [`FsmError::UndefinedGuard`].

use crate::definition::TransitionRule;
use crate::error::FsmError;
use crate::target::{GuardContext, Property, Target};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    /// Property is truthy.
    Truthy(String),
    /// Equality comparison.
    Eq(String, Value),
    /// Inequality comparison.
    Ne(String, Value),
    /// Greater than.
    Gt(String, f64),
    /// Greater or equal.
    Ge(String, f64),
    /// Less than.
    Lt(String, f64),
    /// Less or equal.
    Le(String, f64),
    /// Logical AND.
    And(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical OR.
    Or(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical NOT.
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, FsmError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FsmError::InvalidGuard {
                reason: "empty guard expression".to_string(),
            });
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < s.len() {
            return Err(FsmError::InvalidGuard {
                reason: format!("unexpected input '{}'", &s[parser.pos..]),
            });
        }

        Ok(expr)
    }

    /// Evaluates the expression against the target.
    pub fn evaluate(&self, target: &dyn Target, ctx: &GuardContext) -> Result<bool, FsmError> {
        Ok(match self {
            GuardExpr::Truthy(field) => is_truthy(&resolve(field, target, ctx)?),
            GuardExpr::Eq(field, expected) => values_equal(&resolve(field, target, ctx)?, expected),
            GuardExpr::Ne(field, expected) => {
                !values_equal(&resolve(field, target, ctx)?, expected)
            }
            GuardExpr::Gt(field, expected) => compare(field, target, ctx, |v| v > *expected)?,
            GuardExpr::Ge(field, expected) => compare(field, target, ctx, |v| v >= *expected)?,
            GuardExpr::Lt(field, expected) => compare(field, target, ctx, |v| v < *expected)?,
            GuardExpr::Le(field, expected) => compare(field, target, ctx, |v| v <= *expected)?,
            GuardExpr::And(left, right) => {
                left.evaluate(target, ctx)? && right.evaluate(target, ctx)?
            }
            GuardExpr::Or(left, right) => {
                left.evaluate(target, ctx)? || right.evaluate(target, ctx)?
            }
            GuardExpr::Not(inner) => !inner.evaluate(target, ctx)?,
        })
    }
}

static NULL: Value = Value::Null;

/// Reads `field` off the target. The first dotted segment names the property.
fn resolve(field: &str, target: &dyn Target, ctx: &GuardContext) -> Result<Value, FsmError> {
    let mut parts = field.split('.');
    let name = parts.next().unwrap_or(field);

    let root = match target.property(name) {
        None => {
            return Err(FsmError::UndefinedGuard {
                property: name.to_string(),
            })
        }
        Some(Property::Value(value)) => value,
        Some(Property::Predicate(predicate)) => Value::Bool(predicate.check(ctx)),
    };

    let mut current = &root;
    for part in parts {
        match current {
            Value::Object(map) => {
                current = map.get(part).unwrap_or(&NULL);
            }
            _ => return Ok(Value::Null),
        }
    }

    Ok(current.clone())
}

fn compare(
    field: &str,
    target: &dyn Target,
    ctx: &GuardContext,
    op: impl Fn(f64) -> bool,
) -> Result<bool, FsmError> {
    let value = resolve(field, target, ctx)?;
    Ok(as_f64(&value).map(op).unwrap_or(false))
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Simple recursive descent parser for guard expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<GuardExpr, FsmError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<GuardExpr, FsmError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, FsmError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, FsmError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            self.skip_whitespace();
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<GuardExpr, FsmError> {
        self.skip_whitespace();

        if self.peek_char() == Some('(') {
            self.pos += 1;
            let expr = self.parse_expr()?;
            self.skip_whitespace();
            if self.peek_char() != Some(')') {
                return Err(FsmError::InvalidGuard {
                    reason: "expected ')'".to_string(),
                });
            }
            self.pos += 1;
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, FsmError> {
        self.skip_whitespace();
        let field = self.parse_field()?;
        self.skip_whitespace();

        if self.peek_str("==") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Eq(field, value));
        }

        if self.peek_str("!=") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Ne(field, value));
        }

        if self.peek_str(">=") {
            self.pos += 2;
            return Ok(GuardExpr::Ge(field, self.parse_number()?));
        }

        if self.peek_str("<=") {
            self.pos += 2;
            return Ok(GuardExpr::Le(field, self.parse_number()?));
        }

        if self.peek_char() == Some('>') {
            self.pos += 1;
            return Ok(GuardExpr::Gt(field, self.parse_number()?));
        }

        if self.peek_char() == Some('<') {
            self.pos += 1;
            return Ok(GuardExpr::Lt(field, self.parse_number()?));
        }

        Ok(GuardExpr::Truthy(field))
    }

    fn parse_field(&mut self) -> Result<String, FsmError> {
        let start = self.pos;

        match self.peek_char() {
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => self.pos += c.len_utf8(),
            _ => {
                return Err(FsmError::InvalidGuard {
                    reason: format!("expected property name at '{}'", &self.input[start..]),
                })
            }
        }

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '$' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let field = &self.input[start..self.pos];
        if field.ends_with('.') || field.contains("..") {
            return Err(FsmError::InvalidGuard {
                reason: format!("empty segment in property path '{}'", field),
            });
        }

        Ok(field.to_string())
    }

    fn parse_value(&mut self) -> Result<Value, FsmError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];

        if rest.starts_with("true") {
            self.pos += 4;
            return Ok(Value::Bool(true));
        }
        if rest.starts_with("false") {
            self.pos += 5;
            return Ok(Value::Bool(false));
        }
        if rest.starts_with("null") {
            self.pos += 4;
            return Ok(Value::Null);
        }
        if rest.starts_with('"') {
            return self.parse_string_value();
        }

        let num = self.parse_number()?;
        serde_json::Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| FsmError::InvalidGuard {
                reason: format!("number out of range: {}", num),
            })
    }

    fn parse_string_value(&mut self) -> Result<Value, FsmError> {
        self.pos += 1;

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c == '"' {
                let s = &self.input[start..self.pos];
                self.pos += 1;
                return Ok(Value::String(s.to_string()));
            }
            if c == '\\' {
                self.pos += 1;
                if let Some(escaped) = self.peek_char() {
                    self.pos += escaped.len_utf8();
                }
            } else {
                self.pos += c.len_utf8();
            }
        }

        Err(FsmError::InvalidGuard {
            reason: "unterminated string".to_string(),
        })
    }

    fn parse_number(&mut self) -> Result<f64, FsmError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.peek_char() == Some('.') {
            self.pos += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| FsmError::InvalidGuard {
            reason: format!("invalid number: '{}'", num_str),
        })
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

/// A compiled guard: the parsed expression plus its polarity.
#[derive(Debug, Clone)]
pub struct Guard {
    source: String,
    expr: GuardExpr,
    invert: bool,
}

impl Guard {
    /// A `doIf` guard.
    pub fn when(source: &str) -> Result<Self, FsmError> {
        Self::parse(source, false)
    }

    /// A `doUnless` guard.
    pub fn unless(source: &str) -> Result<Self, FsmError> {
        Self::parse(source, true)
    }

    fn parse(source: &str, invert: bool) -> Result<Self, FsmError> {
        Ok(Self {
            source: source.to_string(),
            expr: GuardExpr::parse(source)?,
            invert,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &GuardExpr {
        &self.expr
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    /// Evaluates the guard, applying the inversion last.
    pub fn evaluate(&self, target: &dyn Target, ctx: &GuardContext) -> Result<bool, FsmError> {
        let result = self.expr.evaluate(target, ctx)?;
        Ok(result != self.invert)
    }
}

impl Serialize for Guard {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rendered = if self.invert {
            format!("unless {}", self.source)
        } else {
            format!("if {}", self.source)
        };
        serializer.serialize_str(&rendered)
    }
}

/// Guard evaluation and transition selection.
pub struct GuardEvaluator;

impl GuardEvaluator {
    /// Evaluates a guard against the target.
    pub fn evaluate(
        guard: &Guard,
        target: &dyn Target,
        ctx: &GuardContext,
    ) -> Result<bool, FsmError> {
        guard.evaluate(target, ctx)
    }

    /// Evaluates an optional guard (None = always true).
    pub fn evaluate_opt(
        guard: Option<&Guard>,
        target: &dyn Target,
        ctx: &GuardContext,
    ) -> Result<bool, FsmError> {
        guard.map(|g| g.evaluate(target, ctx)).unwrap_or(Ok(true))
    }

    /// Picks the transition to run among candidates for one (event, state).
    ///
    /// Guarded candidates are tried in declaration order and the first one
    /// whose guard passes wins; otherwise the first unguarded candidate is the
    /// fallback. `Ok(None)` means every guard rejected and there is no
    /// fallback.
    pub fn select<'a, I>(
        candidates: I,
        target: &dyn Target,
        args: &[Value],
    ) -> Result<Option<&'a TransitionRule>, FsmError>
    where
        I: IntoIterator<Item = &'a TransitionRule>,
    {
        let mut fallback = None;

        for candidate in candidates {
            match candidate.guard() {
                None => {
                    if fallback.is_none() {
                        fallback = Some(candidate);
                    }
                }
                Some(guard) => {
                    let ctx = candidate.guard_context(args);
                    if guard.evaluate(target, &ctx)? {
                        return Ok(Some(candidate));
                    }
                }
            }
        }

        Ok(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MapTarget;
    use serde_json::json;

    fn ctx() -> GuardContext {
        GuardContext {
            event: "go".into(),
            from_state: "a".into(),
            to_state: "b".into(),
            args: vec![],
        }
    }

    fn eval(expr: &str, props: Value) -> bool {
        let mut target = MapTarget::new();
        if let Value::Object(map) = props {
            for (k, v) in map {
                target = target.with_property(k, v);
            }
        }
        GuardExpr::parse(expr)
            .unwrap()
            .evaluate(&target, &ctx())
            .unwrap()
    }

    #[test]
    fn test_truthy_check() {
        assert!(eval("enabled", json!({"enabled": true})));
        assert!(!eval("enabled", json!({"enabled": false})));
        assert!(!eval("enabled", json!({"enabled": null})));
    }

    #[test]
    fn test_undefined_property_is_error() {
        let target = MapTarget::new();
        let result = GuardExpr::parse("missing")
            .unwrap()
            .evaluate(&target, &ctx());
        assert!(
            matches!(result, Err(FsmError::UndefinedGuard { property }) if property == "missing")
        );
    }

    #[test]
    fn test_equality() {
        assert!(eval("status == \"active\"", json!({"status": "active"})));
        assert!(!eval("status == \"active\"", json!({"status": "inactive"})));
        assert!(eval("status != \"inactive\"", json!({"status": "active"})));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(eval("amount > 100", json!({"amount": 150})));
        assert!(!eval("amount > 100", json!({"amount": 100})));
        assert!(eval("amount >= 100", json!({"amount": 100})));
        assert!(eval("count < 10", json!({"count": 5})));
        assert!(eval("count <= 10", json!({"count": 10})));
        assert!(eval("temp > -10", json!({"temp": 0})));
        assert!(eval("rate >= 0.5", json!({"rate": 0.5})));
        assert!(!eval("value > 10", json!({"value": "not a number"})));
    }

    #[test]
    fn test_logical_operators() {
        let props = json!({"a": true, "b": false, "c": true});
        assert!(!eval("a && b", props.clone()));
        assert!(eval("a || b", props.clone()));
        assert!(eval("(a || b) && c", props.clone()));
        assert!(eval("!(a && b)", props.clone()));
        assert!(eval("!!a", props));
    }

    #[test]
    fn test_short_circuit_skips_undefined() {
        // `b` is never read because `a` already decides the result.
        assert!(eval("a || b", json!({"a": true})));
        assert!(!eval("x && y", json!({"x": false})));
    }

    #[test]
    fn test_nested_field() {
        assert!(eval("order.paid", json!({"order": {"paid": true}})));
        assert!(!eval("order.paid", json!({"order": {}})));
        assert!(!eval("order.customer.verified", json!({"order": 1})));
    }

    #[test]
    fn test_predicate_property_is_invoked() {
        let target = MapTarget::new().with_predicate("toB", |ctx| ctx.to_state == "b");
        let guard = Guard::when("toB").unwrap();
        assert!(guard.evaluate(&target, &ctx()).unwrap());

        let guard = Guard::unless("toB").unwrap();
        assert!(!guard.evaluate(&target, &ctx()).unwrap());
    }

    #[test]
    fn test_truthy_values() {
        for v in [json!(true), json!(1), json!("x"), json!([1]), json!({"k": 1})] {
            assert!(eval("value", json!({ "value": v })));
        }
        for v in [json!(false), json!(0), json!(""), json!([]), json!({}), json!(null)] {
            assert!(!eval("value", json!({ "value": v })));
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(GuardExpr::parse("").is_err());
        assert!(GuardExpr::parse("   ").is_err());
        assert!(GuardExpr::parse("> 3").is_err());
        assert!(GuardExpr::parse("a.").is_err());
        assert!(GuardExpr::parse("(a && b").is_err());
        assert!(GuardExpr::parse("name == \"unclosed").is_err());
        assert!(GuardExpr::parse("value > abc").is_err());
        assert!(GuardExpr::parse("a b").is_err());
    }

    #[test]
    fn test_evaluate_opt() {
        let target = MapTarget::new().with_property("ok", json!(true));
        let guard = Guard::when("ok").unwrap();

        assert!(GuardEvaluator::evaluate(&guard, &target, &ctx()).unwrap());
        assert!(GuardEvaluator::evaluate_opt(Some(&guard), &target, &ctx()).unwrap());
        assert!(GuardEvaluator::evaluate_opt(None, &target, &ctx()).unwrap());
    }

    #[test]
    fn test_select_prefers_passing_guard_over_fallback() {
        let def = crate::definition::Definition::from_json(&json!({
            "states": { "initialState": "a" },
            "events": { "go": { "transitions": [
                { "a": "plain" },
                { "from": "a", "to": "fast", "if": "speed > 10" },
                { "from": "a", "to": "slow", "unless": "speed > 10" }
            ] } }
        }))
        .unwrap();
        let candidates = def.transitions_for("go", Some("a"));

        let target = MapTarget::new().with_property("speed", json!(20));
        let chosen = GuardEvaluator::select(candidates.clone(), &target, &[]).unwrap();
        assert_eq!(chosen.unwrap().to_state, "fast");

        target.set_property("speed", json!(5));
        let chosen = GuardEvaluator::select(candidates.clone(), &target, &[]).unwrap();
        assert_eq!(chosen.unwrap().to_state, "slow");

        let unguarded: Vec<_> = candidates.into_iter().filter(|t| !t.is_guarded()).collect();
        let chosen = GuardEvaluator::select(unguarded, &MapTarget::new(), &[]).unwrap();
        assert_eq!(chosen.unwrap().to_state, "plain");
    }

    #[test]
    fn test_guard_serializes_with_polarity() {
        let guard = Guard::unless("busy").unwrap();
        assert_eq!(serde_json::to_value(&guard).unwrap(), json!("unless busy"));
    }
}
