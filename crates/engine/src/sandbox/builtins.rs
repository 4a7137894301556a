//! Ambient globals and the primitive methods available to transform bodies.
//!
//! Nothing here touches the host: no clock, no randomness, no I/O. The only outbound
//! capability (`execute`) is dispatched by the interpreter through its host handle.

use serde_json::Value;

use super::EvalError;
use super::value::{Val, format_number, strict_equals};

/// Largest string a single `repeat`/`padStart`/`padEnd` call may produce.
const MAX_GENERATED_LEN: usize = 1 << 20;
/// Longest string the evaluator will build.
pub(crate) const MAX_STRING_LEN: usize = 1 << 24;
/// Most elements one array may hold.
pub(crate) const MAX_LIST_LEN: usize = 1 << 20;

pub(crate) fn check_string_len(len: usize) -> Result<(), EvalError> {
    if len > MAX_STRING_LEN {
        return Err(EvalError::Runtime(format!("string length {len} exceeds the {MAX_STRING_LEN} byte limit")));
    }
    Ok(())
}

pub(crate) fn check_list_len(len: usize) -> Result<(), EvalError> {
    if len > MAX_LIST_LEN {
        return Err(EvalError::Runtime(format!("array length {len} exceeds the {MAX_LIST_LEN} element limit")));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    String,
    Number,
    Boolean,
    ParseInt,
    ParseFloat,
    Execute,
    JsonStringify,
    JsonParse,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    MathMin,
    MathMax,
    MathPow,
    MathSqrt,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ArrayIsArray,
}

/// Resolves a global name, if it is one.
pub fn global(name: &str) -> Option<Val> {
    let builtin = match name {
        "JSON" | "Math" | "Object" | "Array" => return namespace(name),
        "String" => Builtin::String,
        "Number" => Builtin::Number,
        "Boolean" => Builtin::Boolean,
        "parseInt" => Builtin::ParseInt,
        "parseFloat" => Builtin::ParseFloat,
        "execute" => Builtin::Execute,
        "NaN" => return Some(Val::Num(f64::NAN)),
        "Infinity" => return Some(Val::Num(f64::INFINITY)),
        _ => return None,
    };
    Some(Val::Builtin(builtin))
}

fn namespace(name: &str) -> Option<Val> {
    match name {
        "JSON" => Some(Val::Namespace("JSON")),
        "Math" => Some(Val::Namespace("Math")),
        "Object" => Some(Val::Namespace("Object")),
        "Array" => Some(Val::Namespace("Array")),
        _ => None,
    }
}

/// Member of `JSON`, `Math`, `Object`, or `Array`.
pub fn namespace_member(namespace: &str, member: &str) -> Val {
    let builtin = match (namespace, member) {
        ("JSON", "stringify") => Builtin::JsonStringify,
        ("JSON", "parse") => Builtin::JsonParse,
        ("Math", "floor") => Builtin::MathFloor,
        ("Math", "ceil") => Builtin::MathCeil,
        ("Math", "round") => Builtin::MathRound,
        ("Math", "abs") => Builtin::MathAbs,
        ("Math", "min") => Builtin::MathMin,
        ("Math", "max") => Builtin::MathMax,
        ("Math", "pow") => Builtin::MathPow,
        ("Math", "sqrt") => Builtin::MathSqrt,
        ("Math", "PI") => return Val::Num(std::f64::consts::PI),
        ("Object", "keys") => Builtin::ObjectKeys,
        ("Object", "values") => Builtin::ObjectValues,
        ("Object", "entries") => Builtin::ObjectEntries,
        ("Array", "isArray") => Builtin::ArrayIsArray,
        _ => return Val::Undefined,
    };
    Val::Builtin(builtin)
}

pub(crate) fn arg(args: &[Val], index: usize) -> Val {
    args.get(index).cloned().unwrap_or(Val::Undefined)
}

fn num_arg(args: &[Val], index: usize) -> Option<f64> {
    match args.get(index) {
        None | Some(Val::Undefined) => None,
        Some(value) => Some(value.to_number()),
    }
}

/// Calls every builtin except `execute`, which needs the host.
pub fn call_builtin(builtin: Builtin, args: &[Val]) -> Result<Val, EvalError> {
    let first = arg(args, 0);
    Ok(match builtin {
        Builtin::String => Val::Str(if args.is_empty() { String::new() } else { first.to_display() }),
        Builtin::Number => Val::Num(if args.is_empty() { 0.0 } else { first.to_number() }),
        Builtin::Boolean => Val::Bool(first.truthy()),
        Builtin::ParseInt => Val::Num(parse_int(&first.to_display(), num_arg(args, 1))),
        Builtin::ParseFloat => Val::Num(parse_float(&first.to_display())),
        Builtin::Execute => return Err(EvalError::Runtime("execute is not available here".to_string())),
        Builtin::JsonStringify => json_stringify(&first, args.get(2))?,
        Builtin::JsonParse => {
            let text = first.to_display();
            let parsed: Value =
                serde_json::from_str(&text).map_err(|error| EvalError::Runtime(format!("JSON.parse: {error}")))?;
            Val::from_json(&parsed)
        }
        Builtin::MathFloor => Val::Num(first.to_number().floor()),
        Builtin::MathCeil => Val::Num(first.to_number().ceil()),
        Builtin::MathRound => Val::Num((first.to_number() + 0.5).floor()),
        Builtin::MathAbs => Val::Num(first.to_number().abs()),
        Builtin::MathMin => Val::Num(fold_numbers(args, f64::INFINITY, f64::min)),
        Builtin::MathMax => Val::Num(fold_numbers(args, f64::NEG_INFINITY, f64::max)),
        Builtin::MathPow => Val::Num(first.to_number().powf(arg(args, 1).to_number())),
        Builtin::MathSqrt => Val::Num(first.to_number().sqrt()),
        Builtin::ObjectKeys => Val::List(object_entries(&first, "keys")?.into_iter().map(|(key, _)| Val::Str(key)).collect()),
        Builtin::ObjectValues => Val::List(object_entries(&first, "values")?.into_iter().map(|(_, value)| value).collect()),
        Builtin::ObjectEntries => Val::List(
            object_entries(&first, "entries")?
                .into_iter()
                .map(|(key, value)| Val::List(vec![Val::Str(key), value]))
                .collect(),
        ),
        Builtin::ArrayIsArray => Val::Bool(matches!(first, Val::List(_))),
    })
}

fn fold_numbers(args: &[Val], start: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut acc = start;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = pick(acc, n);
    }
    acc
}

fn json_stringify(value: &Val, indent: Option<&Val>) -> Result<Val, EvalError> {
    if matches!(value, Val::Undefined | Val::Func(_) | Val::Builtin(_)) {
        return Ok(Val::Undefined);
    }
    let json = value.to_json();
    let pretty = indent.is_some_and(|indent| indent.truthy());
    let text = if pretty { serde_json::to_string_pretty(&json) } else { serde_json::to_string(&json) };
    let text = text.map_err(|error| EvalError::Runtime(format!("JSON.stringify: {error}")))?;
    check_string_len(text.len())?;
    Ok(Val::Str(text))
}

fn object_entries(value: &Val, method: &str) -> Result<Vec<(String, Val)>, EvalError> {
    Ok(match value {
        Val::Rec(map) => map.iter().map(|(key, value)| (key.clone(), value.clone())).collect(),
        Val::List(items) => items.iter().enumerate().map(|(index, value)| (index.to_string(), value.clone())).collect(),
        Val::Str(text) => {
            check_list_len(text.chars().count())?;
            text.chars().enumerate().map(|(index, ch)| (index.to_string(), Val::Str(ch.to_string()))).collect()
        }
        Val::Undefined | Val::Null => {
            return Err(EvalError::Type(format!("Object.{method} called on {}", value.to_display())));
        }
        _ => Vec::new(),
    })
}

fn parse_int(text: &str, radix: Option<f64>) -> f64 {
    let mut rest = text.trim_start();
    let mut sign = 1.0;
    if let Some(stripped) = rest.strip_prefix('-') {
        sign = -1.0;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    }

    let explicit = radix.map(|r| r as u32).filter(|r| *r != 0);
    let mut radix = explicit.unwrap_or(10);
    if matches!(explicit, None | Some(16))
        && let Some(stripped) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))
    {
        radix = 16;
        rest = stripped;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let digits: String = rest.chars().take_while(|ch| ch.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut value = 0.0;
    for ch in digits.chars() {
        value = value * f64::from(radix) + f64::from(ch.to_digit(radix).unwrap_or(0));
    }
    sign * value
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    if trimmed.starts_with("Infinity") || trimmed.starts_with("+Infinity") {
        return f64::INFINITY;
    }
    if trimmed.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    // Longest prefix that parses, e.g. "3.5px" -> 3.5.
    let candidate: String = trimmed
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// JS-style relative slice bounds over a sequence of `len` items.
fn slice_bounds(len: usize, start: Option<f64>, end: Option<f64>) -> (usize, usize) {
    let resolve = |index: f64| -> usize {
        if index.is_nan() {
            return 0;
        }
        if index < 0.0 {
            (len as f64 + index.trunc()).max(0.0) as usize
        } else {
            (index.trunc() as usize).min(len)
        }
    };
    let start = start.map(resolve).unwrap_or(0);
    let end = end.map(resolve).unwrap_or(len);
    (start, end.max(start))
}

fn not_a_function(receiver: &str, name: &str) -> EvalError {
    EvalError::Type(format!("{receiver}.{name} is not a function"))
}

fn char_index_of(haystack: &str, needle: &str, from_char: usize) -> Option<usize> {
    let from_byte = haystack.char_indices().nth(from_char).map(|(byte, _)| byte).unwrap_or(haystack.len());
    haystack[from_byte..].find(needle).map(|byte| haystack[..from_byte + byte].chars().count())
}

fn pad(text: &str, args: &[Val], at_start: bool) -> Result<Val, EvalError> {
    let target = num_arg(args, 0).unwrap_or(0.0).max(0.0) as usize;
    let fill = match args.get(1) {
        None | Some(Val::Undefined) => " ".to_string(),
        Some(value) => value.to_display(),
    };
    let current = text.chars().count();
    if target <= current || fill.is_empty() {
        return Ok(Val::Str(text.to_string()));
    }
    if target > MAX_GENERATED_LEN {
        return Err(EvalError::Runtime(format!("pad length {target} is too large")));
    }
    let padding: String = fill.chars().cycle().take(target - current).collect();
    Ok(Val::Str(if at_start { format!("{padding}{text}") } else { format!("{text}{padding}") }))
}

/// Methods callable on string receivers.
pub fn string_method(text: &str, name: &str, args: &[Val]) -> Result<Val, EvalError> {
    let chars: Vec<char> = text.chars().collect();
    let str_arg = |index: usize| arg(args, index).to_display();
    Ok(match name {
        "toUpperCase" => Val::Str(text.to_uppercase()),
        "toLowerCase" => Val::Str(text.to_lowercase()),
        "trim" => Val::Str(text.trim().to_string()),
        "trimStart" => Val::Str(text.trim_start().to_string()),
        "trimEnd" => Val::Str(text.trim_end().to_string()),
        "toString" => Val::Str(text.to_string()),
        "split" => {
            let parts: Vec<Val> = match args.first() {
                None | Some(Val::Undefined) => vec![Val::Str(text.to_string())],
                Some(separator) => {
                    let separator = separator.to_display();
                    if separator.is_empty() {
                        chars.iter().map(|ch| Val::Str(ch.to_string())).collect()
                    } else {
                        text.split(separator.as_str()).map(|part| Val::Str(part.to_string())).collect()
                    }
                }
            };
            check_list_len(parts.len())?;
            match num_arg(args, 1) {
                Some(limit) if limit >= 0.0 => Val::List(parts.into_iter().take(limit as usize).collect()),
                _ => Val::List(parts),
            }
        }
        "includes" => {
            let from = num_arg(args, 1).unwrap_or(0.0).max(0.0) as usize;
            Val::Bool(char_index_of(text, &str_arg(0), from).is_some())
        }
        "startsWith" => Val::Bool(text.starts_with(&str_arg(0))),
        "endsWith" => Val::Bool(text.ends_with(&str_arg(0))),
        "indexOf" => {
            let from = num_arg(args, 1).unwrap_or(0.0).max(0.0) as usize;
            Val::Num(char_index_of(text, &str_arg(0), from).map(|index| index as f64).unwrap_or(-1.0))
        }
        "replace" => Val::Str(text.replacen(&str_arg(0), &str_arg(1), 1)),
        "replaceAll" => {
            let pattern = str_arg(0);
            if pattern.is_empty() {
                return Err(EvalError::Runtime("replaceAll requires a non-empty pattern".to_string()));
            }
            Val::Str(text.replace(&pattern, &str_arg(1)))
        }
        "slice" => {
            let (start, end) = slice_bounds(chars.len(), num_arg(args, 0), num_arg(args, 1));
            Val::Str(chars[start..end].iter().collect())
        }
        "substring" => {
            let clamp = |n: f64| if n.is_nan() { 0 } else { n.max(0.0).min(chars.len() as f64) as usize };
            let start = num_arg(args, 0).map(clamp).unwrap_or(0);
            let end = num_arg(args, 1).map(clamp).unwrap_or(chars.len());
            let (low, high) = if start <= end { (start, end) } else { (end, start) };
            Val::Str(chars[low..high].iter().collect())
        }
        "charAt" => {
            let index = num_arg(args, 0).unwrap_or(0.0);
            let ch = if index >= 0.0 { chars.get(index as usize) } else { None };
            Val::Str(ch.map(|ch| ch.to_string()).unwrap_or_default())
        }
        "repeat" => {
            let count = num_arg(args, 0).unwrap_or(0.0);
            if count < 0.0 || count.is_infinite() {
                return Err(EvalError::Runtime(format!("invalid repeat count {}", format_number(count))));
            }
            let count = count as usize;
            if text.len().saturating_mul(count) > MAX_GENERATED_LEN {
                return Err(EvalError::Runtime(format!("repeat count {count} is too large")));
            }
            Val::Str(text.repeat(count))
        }
        "padStart" => pad(text, args, true)?,
        "padEnd" => pad(text, args, false)?,
        "concat" => {
            let mut out = text.to_string();
            for value in args {
                out.push_str(&value.to_display());
                check_string_len(out.len())?;
            }
            Val::Str(out)
        }
        _ => return Err(not_a_function("string", name)),
    })
}

/// Methods callable on number receivers.
pub fn number_method(n: f64, name: &str, args: &[Val]) -> Result<Val, EvalError> {
    match name {
        "toFixed" => {
            let digits = num_arg(args, 0).unwrap_or(0.0);
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::Runtime(format!("toFixed() digits argument {} is out of range", format_number(digits))));
            }
            if !n.is_finite() {
                return Ok(Val::Str(format_number(n)));
            }
            Ok(Val::Str(format!("{:.*}", digits as usize, n)))
        }
        "toString" => match num_arg(args, 0).map(|radix| radix as u32) {
            None | Some(10) => Ok(Val::Str(format_number(n))),
            Some(radix) if (2..=36).contains(&radix) && n.fract() == 0.0 && n.is_finite() => Ok(Val::Str(integer_in_radix(n, radix))),
            Some(radix) => Err(EvalError::Runtime(format!("toString() radix {radix} is not supported for {}", format_number(n)))),
        },
        _ => Err(not_a_function("number", name)),
    }
}

fn integer_in_radix(n: f64, radix: u32) -> String {
    let negative = n < 0.0;
    let mut value = n.abs() as u64;
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % u64::from(radix)) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        value /= u64::from(radix);
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Array methods that take no callbacks; `None` means the interpreter must handle `name`.
pub fn list_method(items: &[Val], name: &str, args: &[Val]) -> Result<Option<Val>, EvalError> {
    let same_value = |a: &Val, b: &Val| strict_equals(a, b) || matches!((a, b), (Val::Num(x), Val::Num(y)) if x.is_nan() && y.is_nan());
    Ok(Some(match name {
        "join" => {
            let separator = match args.first() {
                None | Some(Val::Undefined) => ",".to_string(),
                Some(separator) => separator.to_display(),
            };
            let mut out = String::new();
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(&separator);
                }
                if !item.is_nullish() {
                    out.push_str(&item.to_display());
                }
                check_string_len(out.len())?;
            }
            Val::Str(out)
        }
        "includes" => {
            let needle = arg(args, 0);
            Val::Bool(items.iter().any(|item| same_value(item, &needle)))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            Val::Num(items.iter().position(|item| strict_equals(item, &needle)).map(|index| index as f64).unwrap_or(-1.0))
        }
        "slice" => {
            let (start, end) = slice_bounds(items.len(), num_arg(args, 0), num_arg(args, 1));
            Val::List(items[start..end].to_vec())
        }
        "concat" => {
            let added: usize = args
                .iter()
                .map(|value| match value {
                    Val::List(more) => more.len(),
                    _ => 1,
                })
                .sum();
            check_list_len(items.len() + added)?;
            let mut out = items.to_vec();
            for value in args {
                match value {
                    Val::List(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Val::List(out)
        }
        "reverse" => Val::List(items.iter().rev().cloned().collect()),
        "toString" => Val::Str(Val::List(items.to_vec()).to_display()),
        _ => return Ok(None),
    }))
}

/// Property read on a record, list, or string receiver (not method calls).
pub fn read_property(receiver: &Val, key: &str) -> Val {
    match receiver {
        Val::Rec(map) => map.get(key).cloned().unwrap_or(Val::Undefined),
        Val::List(items) => match key {
            "length" => Val::Num(items.len() as f64),
            _ => key.parse::<usize>().ok().and_then(|index| items.get(index).cloned()).unwrap_or(Val::Undefined),
        },
        Val::Str(text) => match key {
            "length" => Val::Num(text.chars().count() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|index| text.chars().nth(index))
                .map(|ch| Val::Str(ch.to_string()))
                .unwrap_or(Val::Undefined),
        },
        Val::Namespace(namespace) => namespace_member(namespace, key),
        _ => Val::Undefined,
    }
}

/// Property key for a computed member access (`a[i]`).
pub fn property_key(value: &Val) -> String {
    match value {
        Val::Num(n) => format_number(*n),
        other => other.to_display(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn s(text: &str) -> Val {
        Val::Str(text.to_string())
    }

    #[test]
    fn string_methods() {
        assert_eq!(string_method("hello world", "toUpperCase", &[]).unwrap().to_display(), "HELLO WORLD");
        assert_eq!(string_method("a,b,c", "split", &[s(",")]).unwrap().to_json(), serde_json::json!(["a", "b", "c"]));
        assert_eq!(string_method("hello", "slice", &[Val::Num(-3.0)]).unwrap().to_display(), "llo");
        assert_eq!(string_method("hello", "substring", &[Val::Num(3.0), Val::Num(1.0)]).unwrap().to_display(), "el");
        assert_eq!(string_method("7", "padStart", &[Val::Num(3.0), s("0")]).unwrap().to_display(), "007");
        assert_eq!(string_method("a-b-c", "replace", &[s("-"), s("+")]).unwrap().to_display(), "a+b-c");
        assert_eq!(string_method("a-b-c", "replaceAll", &[s("-"), s("+")]).unwrap().to_display(), "a+b+c");
        assert_eq!(string_method("héllo", "indexOf", &[s("l")]).unwrap().to_number(), 2.0);
    }

    #[test]
    fn unknown_method_is_a_type_error() {
        let error = string_method("x", "explode", &[]).unwrap_err();
        assert_eq!(error, EvalError::Type("string.explode is not a function".into()));
    }

    #[test]
    fn repeat_is_bounded() {
        assert!(string_method("ab", "repeat", &[Val::Num(1e9)]).is_err());
        assert_eq!(string_method("ab", "repeat", &[Val::Num(2.0)]).unwrap().to_display(), "abab");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(number_method(3.14159, "toFixed", &[Val::Num(2.0)]).unwrap().to_display(), "3.14");
        assert_eq!(number_method(255.0, "toString", &[Val::Num(16.0)]).unwrap().to_display(), "ff");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_int("  42px", None), 42.0);
        assert_eq!(parse_int("-0x1A", None), -26.0);
        assert!(parse_int("abc", None).is_nan());
        assert_eq!(parse_float("3.5em"), 3.5);
        assert!(parse_float("em").is_nan());
    }

    #[test]
    fn math_and_json_builtins() {
        assert_eq!(call_builtin(Builtin::MathMax, &[Val::Num(1.0), Val::Num(5.0)]).unwrap().to_number(), 5.0);
        assert_eq!(call_builtin(Builtin::MathRound, &[Val::Num(2.5)]).unwrap().to_number(), 3.0);
        let parsed = call_builtin(Builtin::JsonParse, &[s(r#"{"a": [1, 2]}"#)]).unwrap();
        assert_eq!(call_builtin(Builtin::JsonStringify, &[parsed]).unwrap().to_display(), r#"{"a":[1,2]}"#);
        assert!(call_builtin(Builtin::JsonParse, &[s("{oops")]).is_err());
    }

    #[test]
    fn list_methods_without_callbacks() {
        let items = vec![Val::Num(1.0), Val::Num(2.0), Val::Num(3.0)];
        assert_eq!(list_method(&items, "join", &[s("-")]).unwrap().unwrap().to_display(), "1-2-3");
        assert!(list_method(&items, "includes", &[Val::Num(2.0)]).unwrap().unwrap().truthy());
        assert_eq!(list_method(&items, "slice", &[Val::Num(1.0)]).unwrap().unwrap().to_json(), serde_json::json!([2, 3]));
        assert!(list_method(&items, "map", &[]).unwrap().is_none());
    }

    #[test]
    fn collection_growth_is_capped() {
        let half = vec![Val::Null; MAX_LIST_LEN / 2 + 1];
        assert!(list_method(&half, "concat", &[Val::List(half.clone())]).is_err());
        assert!(list_method(&half[..4], "concat", &[Val::List(half[..4].to_vec())]).is_ok());

        let wide = vec![s(&"x".repeat(1 << 20)); 17];
        let error = list_method(&wide, "join", &[]).unwrap_err();
        assert!(error.to_string().contains("byte limit"));
    }

    #[test]
    fn object_helpers_reject_nullish() {
        assert!(call_builtin(Builtin::ObjectKeys, &[Val::Undefined]).is_err());
        assert_eq!(call_builtin(Builtin::ObjectKeys, &[Val::Rec(IndexMap::new())]).unwrap().to_json(), serde_json::json!([]));
    }
}
