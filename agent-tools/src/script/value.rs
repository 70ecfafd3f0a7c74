//! Runtime values of the tool-script interpreter.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{Map, Number, Value as Json};

use super::ScriptError;
use super::ast::FunctionDef;

/// Built-in modules importable from tool scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Module {
    Math,
    Time,
    Json,
}

impl Module {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "math" => Some(Self::Math),
            "time" => Some(Self::Time),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Time => "time",
            Self::Json => "json",
        }
    }
}

/// A `def` bound at runtime together with its evaluated defaults.
#[derive(Debug)]
pub(crate) struct Closure {
    pub(crate) def: Arc<FunctionDef>,
    pub(crate) defaults: Vec<Option<Value>>,
    /// Snapshot of the enclosing function's locals for nested definitions.
    pub(crate) captured: Option<Arc<HashMap<String, Value>>>,
}

/// Raised exception carried as a value (`except E as err`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExceptionValue {
    pub(crate) kind: String,
    pub(crate) message: String,
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Function(Arc<Closure>),
    Builtin(&'static str),
    Module(Module),
    Exception(Arc<ExceptionValue>),
}

impl Value {
    pub(crate) fn str(text: impl Into<String>) -> Self {
        Self::Str(text.into())
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Module(_) => "module",
            Self::Exception(_) => "Exception",
        }
    }

    pub(crate) fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Dict(entries) => !entries.is_empty(),
            Self::Function(_) | Self::Builtin(_) | Self::Module(_) | Self::Exception(_) => true,
        }
    }

    pub(crate) fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Builtin(_))
    }

    /// Numeric view used by arithmetic; booleans count as integers.
    pub(crate) fn as_number(&self) -> Option<Numeric> {
        match self {
            Self::Bool(b) => Some(Numeric::Int(i64::from(*b))),
            Self::Int(i) => Some(Numeric::Int(*i)),
            Self::Float(f) => Some(Numeric::Float(*f)),
            _ => None,
        }
    }

    pub(crate) fn as_float(&self) -> Option<f64> {
        self.as_number().map(Numeric::to_f64)
    }

    /// Elements produced by iterating the value.
    pub(crate) fn iterate(&self) -> Result<Vec<Value>, ScriptError> {
        match self {
            Self::List(items) | Self::Tuple(items) => Ok(items.clone()),
            Self::Str(s) => Ok(s.chars().map(|c| Self::Str(c.to_string())).collect()),
            Self::Dict(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// `str(value)`.
    pub(crate) fn to_str(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Exception(exc) => exc.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub(crate) fn repr(&self) -> String {
        match self {
            Self::None => "None".to_owned(),
            Self::Bool(true) => "True".to_owned(),
            Self::Bool(false) => "False".to_owned(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => float_repr(*f),
            Self::Str(s) => quote(s),
            Self::List(items) => format!("[{}]", join_repr(items)),
            Self::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Self::Tuple(items) => format!("({})", join_repr(items)),
            Self::Dict(entries) => {
                let body: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", body.join(", "))
            }
            Self::Function(closure) => format!("<function {}>", closure.def.name),
            Self::Builtin(name) => format!("<built-in function {name}>"),
            Self::Module(module) => format!("<module '{}'>", module.name()),
            Self::Exception(exc) => format!("{}({})", exc.kind, quote(&exc.message)),
        }
    }

    pub(crate) fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::None,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::None),
            Json::String(s) => Self::Str(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Json::Object(map) => Self::Dict(
                map.iter()
                    .map(|(k, v)| (Self::Str(k.clone()), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub(crate) fn to_json(&self) -> Json {
        match self {
            Self::None => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::Number((*i).into()),
            Self::Float(f) => Number::from_f64(*f).map_or_else(|| Json::String(float_repr(*f)), Json::Number),
            Self::Str(s) => Json::String(s.clone()),
            Self::List(items) | Self::Tuple(items) => {
                Json::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Dict(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(json_key(key), value.to_json());
                }
                Json::Object(map)
            }
            other => Json::String(other.repr()),
        }
    }
}

/// Python-style `json.dumps` output (`", "` and `": "` separators).
pub(crate) fn dumps(value: &Value) -> Result<String, ScriptError> {
    let mut out = String::new();
    write_json(value, &mut out)?;
    Ok(out)
}

fn write_json(value: &Value, out: &mut String) -> Result<(), ScriptError> {
    match value {
        Value::None => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) if f.is_nan() => out.push_str("NaN"),
        Value::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" });
        }
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => out.push_str(&Json::String(s.clone()).to_string()),
        Value::List(items) | Value::Tuple(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                write_json(item, out)?;
            }
            out.push(']');
        }
        Value::Dict(entries) => {
            out.push('{');
            for (index, (key, item)) in entries.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Json::String(json_key(key)).to_string());
                out.push_str(": ");
                write_json(item, out)?;
            }
            out.push('}');
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )));
        }
    }
    Ok(())
}

fn json_key(key: &Value) -> String {
    match key {
        Value::None => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        other => other.to_str(),
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

fn quote(text: &str) -> String {
    let delimiter = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

/// Formats a float the way Python's `repr` does.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return python_exponent(&format!("{value:e}"));
    }
    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// Rewrites Rust exponent notation (`1.5e-5`) into Python's (`1.5e-05`).
fn python_exponent(rust: &str) -> String {
    let Some((mantissa, exponent)) = rust.split_once('e') else {
        return rust.to_owned();
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Numeric operand.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    pub(crate) fn to_f64(self) -> f64 {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// Python `==`.
pub(crate) fn py_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return match (a, b) {
            (Numeric::Int(a), Numeric::Int(b)) => a == b,
            (a, b) => a.to_f64() == b.to_f64(),
        };
    }
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    dict_get(b, key).is_some_and(|other| py_eq(value, other))
                })
        }
        (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => a == b,
        (Value::Exception(a), Value::Exception(b)) => a == b,
        _ => false,
    }
}

/// Python ordering for `<`, `<=`, `>`, `>=`, `sorted`, `min`, and `max`.
pub(crate) fn py_cmp(left: &Value, right: &Value) -> Result<Ordering, ScriptError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(match (a, b) {
            (Numeric::Int(a), Numeric::Int(b)) => a.cmp(&b),
            (a, b) => a
                .to_f64()
                .partial_cmp(&b.to_f64())
                .unwrap_or(Ordering::Equal),
        });
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !py_eq(x, y) {
                    return py_cmp(x, y);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

pub(crate) fn dict_get<'a>(entries: &'a [(Value, Value)], key: &Value) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(candidate, _)| py_eq(candidate, key))
        .map(|(_, value)| value)
}

pub(crate) fn dict_set(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    if let Some(slot) = entries.iter_mut().find(|(candidate, _)| py_eq(candidate, &key)) {
        slot.1 = value;
    } else {
        entries.push((key, value));
    }
}

pub(crate) fn check_hashable(key: &Value) -> Result<(), ScriptError> {
    match key {
        Value::List(_) | Value::Dict(_) => Err(ScriptError::type_error(format!(
            "unhashable type: '{}'",
            key.type_name()
        ))),
        Value::Tuple(items) => items.iter().try_for_each(check_hashable),
        _ => Ok(()),
    }
}

/// Applies a format specification (`.2f`, `>8`, `,d`, ...) to a value.
pub(crate) fn format_spec(value: &Value, spec: &str) -> Result<String, ScriptError> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let parsed = FormatSpec::parse(spec)?;
    let body = match parsed.kind {
        Some('f' | 'F') => {
            let number = numeric(value, spec)?;
            format!("{:.*}", parsed.precision.unwrap_or(6), number)
        }
        Some('%') => {
            let number = numeric(value, spec)? * 100.0;
            format!("{:.*}%", parsed.precision.unwrap_or(6), number)
        }
        Some('e' | 'E') => {
            let number = numeric(value, spec)?;
            let text = python_exponent(&format!("{:.*e}", parsed.precision.unwrap_or(6), number));
            if parsed.kind == Some('E') {
                text.to_uppercase()
            } else {
                text
            }
        }
        Some('d') => match value {
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => i64::from(*b).to_string(),
            other => {
                return Err(ScriptError::value_error(format!(
                    "Unknown format code 'd' for object of type '{}'",
                    other.type_name()
                )));
            }
        },
        Some('g') | None if parsed.precision.is_some() && matches!(value, Value::Float(_) | Value::Int(_)) => {
            general(numeric(value, spec)?, parsed.precision.unwrap_or(6))
        }
        Some('s') | None => {
            let text = value.to_str();
            match (parsed.precision, value) {
                (Some(precision), Value::Str(_)) => text.chars().take(precision).collect(),
                _ => text,
            }
        }
        Some(other) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{other}' for object of type '{}'",
                value.type_name()
            )));
        }
    };

    let is_number = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let mut body = if parsed.grouping && is_number {
        group_thousands(&body)
    } else {
        body
    };
    if is_number && parsed.sign == Some('+') && !body.starts_with('-') {
        body.insert(0, '+');
    } else if is_number && parsed.sign == Some(' ') && !body.starts_with('-') {
        body.insert(0, ' ');
    }

    let width = parsed.width.unwrap_or(0);
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let fill = parsed.fill.to_string();
    let align = parsed.align.unwrap_or(if is_number { '>' } else { '<' });
    Ok(match align {
        '<' => format!("{body}{}", fill.repeat(pad)),
        '^' => format!(
            "{}{body}{}",
            fill.repeat(pad / 2),
            fill.repeat(pad - pad / 2)
        ),
        '=' if body.starts_with(['-', '+', ' ']) => {
            let (sign, digits) = body.split_at(1);
            format!("{sign}{}{digits}", fill.repeat(pad))
        }
        _ => format!("{}{body}", fill.repeat(pad)),
    })
}

fn numeric(value: &Value, spec: &str) -> Result<f64, ScriptError> {
    value.as_float().ok_or_else(|| {
        ScriptError::value_error(format!(
            "Unknown format code '{spec}' for object of type '{}'",
            value.type_name()
        ))
    })
}

fn general(number: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if number == 0.0 {
        return "0".to_owned();
    }
    #[allow(clippy::cast_possible_truncation)]
    let exponent = number.abs().log10().floor() as i64;
    let limit = i64::try_from(precision).unwrap_or(i64::MAX);
    if exponent < -4 || exponent >= limit {
        let text = format!("{:.*e}", precision - 1, number);
        let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let mantissa = trim_fraction(mantissa);
        return python_exponent(&format!("{mantissa}e{exp}"));
    }
    let decimals = usize::try_from(limit - 1 - exponent).unwrap_or(0);
    trim_fraction(&format!("{number:.decimals$}")).to_owned()
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn group_thousands(text: &str) -> String {
    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let (digits, tail) = rest.split_at(split);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, c) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}{tail}")
}

struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: Option<char>,
    width: Option<usize>,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Result<Self, ScriptError> {
        let chars: Vec<char> = spec.chars().collect();
        let mut index = 0;
        let mut parsed = Self {
            fill: ' ',
            align: None,
            sign: None,
            width: None,
            grouping: false,
            precision: None,
            kind: None,
        };

        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            index = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = chars.first().copied();
            index = 1;
        }
        if let Some(&c @ ('+' | '-' | ' ')) = chars.get(index) {
            parsed.sign = Some(c);
            index += 1;
        }
        if chars.get(index) == Some(&'0') {
            parsed.fill = '0';
            if parsed.align.is_none() {
                parsed.align = Some('=');
            }
            index += 1;
        }
        let digits = |from: usize| -> (Option<usize>, usize) {
            let end = chars[from..]
                .iter()
                .position(|c| !c.is_ascii_digit())
                .map_or(chars.len(), |offset| from + offset);
            let text: String = chars[from..end].iter().collect();
            (text.parse().ok(), end)
        };
        let (width, next) = digits(index);
        parsed.width = width;
        index = next;
        if matches!(chars.get(index), Some(',' | '_')) {
            parsed.grouping = true;
            index += 1;
        }
        if chars.get(index) == Some(&'.') {
            let (precision, next) = digits(index + 1);
            parsed.precision = precision;
            index = next;
        }
        match &chars[index.min(chars.len())..] {
            [] => {}
            [kind] => parsed.kind = Some(*kind),
            _ => {
                return Err(ScriptError::value_error(format!(
                    "Invalid format specifier '{spec}'"
                )));
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_render_like_python() {
        assert_eq!(float_repr(12.0), "12.0");
        assert_eq!(float_repr(2.5), "2.5");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
    }

    #[test]
    fn containers_repr() {
        let value = Value::Dict(vec![(
            Value::str("k"),
            Value::List(vec![Value::Int(1), Value::None, Value::str("it's")]),
        )]);
        assert_eq!(value.repr(), "{'k': [1, None, \"it's\"]}");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
    }

    #[test]
    fn format_specs() {
        assert_eq!(format_spec(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_spec(&Value::Int(1_234_567), ",").unwrap(), "1,234,567");
        assert_eq!(format_spec(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_spec(&Value::str("ab"), ">4").unwrap(), "  ab");
        assert_eq!(format_spec(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert!(format_spec(&Value::Float(1.5), "d").is_err());
    }

    #[test]
    fn equality_crosses_numeric_types() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::str("1"), &Value::Int(1)));
        assert!(py_cmp(&Value::str("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn dumps_uses_python_separators() {
        let value = Value::Dict(vec![(Value::str("a"), Value::List(vec![Value::Int(1), Value::Float(2.0)]))]);
        assert_eq!(dumps(&value).unwrap(), "{\"a\": [1, 2.0]}");
    }
}
