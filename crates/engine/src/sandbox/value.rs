//! Runtime values and the coercions the interpreter applies to them.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use super::ast::ArrowDef;
use super::builtins::Builtin;
use super::interpreter::Scope;

#[derive(Debug, Clone)]
pub enum Val {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Rec(IndexMap<String, Val>),
    Func(Rc<Func>),
    Builtin(Builtin),
    /// `JSON`, `Math`, `Object`, `Array`: only usable as a member-access target.
    Namespace(&'static str),
}

/// String bytes that count as one step when a value is copied.
const STRING_CHUNK: usize = 1024;

/// Arrow function with the scopes visible where it was created.
#[derive(Debug)]
pub struct Func {
    pub def: Rc<ArrowDef>,
    pub env: Vec<Scope>,
    /// Copy cost of `env`, charged on every call.
    pub weight: u64,
}

impl Val {
    /// Rough count of the nodes a deep copy of this value touches. Scalars weigh 1.
    pub fn weight(&self) -> u64 {
        match self {
            Val::Str(s) => 1 + (s.len() / STRING_CHUNK) as u64,
            Val::List(items) => items.iter().fold(1, |acc, item| acc.saturating_add(item.weight())),
            Val::Rec(map) => map.values().fold(1, |acc, item| acc.saturating_add(item.weight())),
            _ => 1,
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Val::Null,
            Value::Bool(b) => Val::Bool(*b),
            Value::Number(n) => Val::Num(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Val::Str(s.clone()),
            Value::Array(items) => Val::List(items.iter().map(Val::from_json).collect()),
            Value::Object(map) => Val::Rec(map.iter().map(|(k, v)| (k.clone(), Val::from_json(v))).collect()),
        }
    }

    /// JSON view of the value. `undefined` and functions become `null`, matching `JSON.stringify`
    /// inside arrays; object members holding them are dropped.
    pub fn to_json(&self) -> Value {
        match self {
            Val::Undefined | Val::Func(_) | Val::Builtin(_) | Val::Namespace(_) | Val::Null => Value::Null,
            Val::Bool(b) => Value::Bool(*b),
            Val::Num(n) => number_to_json(*n),
            Val::Str(s) => Value::String(s.clone()),
            Val::List(items) => Value::Array(items.iter().map(Val::to_json).collect()),
            Val::Rec(map) => {
                let mut out = Map::new();
                for (key, value) in map {
                    if !value.is_absent_in_json() {
                        out.insert(key.clone(), value.to_json());
                    }
                }
                Value::Object(out)
            }
        }
    }

    fn is_absent_in_json(&self) -> bool {
        matches!(self, Val::Undefined | Val::Func(_) | Val::Builtin(_) | Val::Namespace(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Val::Undefined | Val::Null => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Val::Undefined | Val::Null)
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Val::Undefined => "undefined",
            Val::Bool(_) => "boolean",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::Func(_) | Val::Builtin(_) => "function",
            Val::Null | Val::List(_) | Val::Rec(_) | Val::Namespace(_) => "object",
        }
    }

    /// `String(value)` conversion.
    pub fn to_display(&self) -> String {
        match self {
            Val::Undefined => "undefined".to_string(),
            Val::Null => "null".to_string(),
            Val::Bool(b) => b.to_string(),
            Val::Num(n) => format_number(*n),
            Val::Str(s) => s.clone(),
            Val::List(items) => items
                .iter()
                .map(|item| if item.is_nullish() { String::new() } else { item.to_display() })
                .collect::<Vec<_>>()
                .join(","),
            Val::Rec(_) => "[object Object]".to_string(),
            Val::Func(_) | Val::Builtin(_) => "function".to_string(),
            Val::Namespace(name) => format!("[object {name}]"),
        }
    }

    /// `Number(value)` conversion.
    pub fn to_number(&self) -> f64 {
        match self {
            Val::Null => 0.0,
            Val::Bool(b) => f64::from(u8::from(*b)),
            Val::Num(n) => *n,
            Val::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Val::List(items) if items.is_empty() => 0.0,
            Val::List(items) if items.len() == 1 => items[0].to_number(),
            _ => f64::NAN,
        }
    }

    fn is_primitive(&self) -> bool {
        matches!(self, Val::Undefined | Val::Null | Val::Bool(_) | Val::Num(_) | Val::Str(_))
    }
}

/// `===`: structural for lists and records, otherwise same type and value.
pub fn strict_equals(left: &Val, right: &Val) -> bool {
    match (left, right) {
        (Val::Undefined, Val::Undefined) | (Val::Null, Val::Null) => true,
        (Val::Bool(a), Val::Bool(b)) => a == b,
        (Val::Num(a), Val::Num(b)) => a == b,
        (Val::Str(a), Val::Str(b)) => a == b,
        (Val::List(a), Val::List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| strict_equals(x, y)),
        (Val::Rec(a), Val::Rec(b)) => a.len() == b.len() && a.iter().all(|(key, x)| b.get(key).is_some_and(|y| strict_equals(x, y))),
        (Val::Func(a), Val::Func(b)) => Rc::ptr_eq(a, b),
        (Val::Builtin(a), Val::Builtin(b)) => a == b,
        (Val::Namespace(a), Val::Namespace(b)) => a == b,
        _ => false,
    }
}

/// `==`: nullish values equal each other, mixed primitives compare numerically.
pub fn loose_equals(left: &Val, right: &Val) -> bool {
    if left.is_nullish() || right.is_nullish() {
        return left.is_nullish() && right.is_nullish();
    }
    match (left, right) {
        (Val::Str(a), Val::Str(b)) => a == b,
        _ if left.is_primitive() && right.is_primitive() => left.to_number() == right.to_number(),
        (Val::Str(s), other) | (other, Val::Str(s)) if !other.is_primitive() => *s == other.to_display(),
        _ => strict_equals(left, right),
    }
}

/// Number formatting that prints integral values without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{n:.0}");
    }
    n.to_string()
}

/// JSON number for `n`: integral values become integers, non-finite values become `null`.
pub fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_992.0 {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_keeps_integers_integral() {
        let value = Val::from_json(&json!({"count": 3, "ratio": 0.5, "tags": ["a", null]}));
        assert_eq!(value.to_json(), json!({"count": 3, "ratio": 0.5, "tags": ["a", null]}));
        assert_eq!(Val::Num(f64::NAN).to_json(), Value::Null);
    }

    #[test]
    fn undefined_members_are_dropped_from_json() {
        let mut record = IndexMap::new();
        record.insert("kept".to_string(), Val::Num(1.0));
        record.insert("gone".to_string(), Val::Undefined);
        assert_eq!(Val::Rec(record).to_json(), json!({"kept": 1}));
    }

    #[test]
    fn weight_follows_copy_size() {
        assert_eq!(Val::Num(1.0).weight(), 1);
        assert_eq!(Val::Str("x".repeat(4096)).weight(), 5);
        let nested = Val::from_json(&json!({"a": [1, 2, 3], "b": "x"}));
        assert_eq!(nested.weight(), 6);
    }

    #[test]
    fn display_forms() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(Val::List(vec![Val::Num(1.0), Val::Null, Val::Str("x".into())]).to_display(), "1,,x");
        assert_eq!(Val::Rec(IndexMap::new()).to_display(), "[object Object]");
    }

    #[test]
    fn loose_and_strict_equality() {
        assert!(loose_equals(&Val::Null, &Val::Undefined));
        assert!(!strict_equals(&Val::Null, &Val::Undefined));
        assert!(loose_equals(&Val::Str("1".into()), &Val::Num(1.0)));
        assert!(!strict_equals(&Val::Str("1".into()), &Val::Num(1.0)));
        assert!(!loose_equals(&Val::Num(0.0), &Val::Null));
    }

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!Val::Str(String::new()).truthy());
        assert!(!Val::Num(f64::NAN).truthy());
        assert!(Val::List(vec![]).truthy());
    }
}
