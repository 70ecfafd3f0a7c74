//! Built-in functions, methods, and modules available to tool scripts.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::ScriptError;
use super::interp::{Interpreter, MAX_SEQUENCE_LEN, binary, exception_matches};
use super::ast::BinOp;
use super::value::{
    ExceptionValue, Module, Value, check_hashable, dict_get, dict_set, dumps, format_spec,
    py_cmp, py_eq,
};

const FUNCTIONS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "float", "int", "isinstance", "len",
    "list", "max", "min", "print", "range", "repr", "reversed", "round", "sorted", "str", "sum",
    "tuple", "zip",
];

const EXCEPTION_TYPES: &[&str] = &[
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "MemoryError",
    "ModuleNotFoundError",
    "NameError",
    "NotImplementedError",
    "OverflowError",
    "RuntimeError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

const MODULE_FUNCTIONS: &[&str] = &[
    "math.sqrt",
    "math.pow",
    "math.floor",
    "math.ceil",
    "math.trunc",
    "math.fabs",
    "math.log",
    "math.log10",
    "math.log2",
    "math.exp",
    "math.sin",
    "math.cos",
    "math.tan",
    "math.factorial",
    "math.isclose",
    "time.sleep",
    "time.time",
    "json.dumps",
    "json.loads",
];

/// Resolves a builtin name to its callable value.
pub(crate) fn lookup(name: &str) -> Option<Value> {
    FUNCTIONS
        .iter()
        .chain(EXCEPTION_TYPES)
        .find(|candidate| **candidate == name)
        .map(|found| Value::Builtin(*found))
}

pub(crate) fn is_exception_type(name: &str) -> bool {
    EXCEPTION_TYPES.contains(&name)
}

pub(crate) fn import(module: &str) -> Result<Value, ScriptError> {
    Module::from_name(module).map(Value::Module).ok_or_else(|| {
        ScriptError::raise("ModuleNotFoundError", format!("No module named '{module}'"))
    })
}

pub(crate) fn module_attr(module: Module, attr: &str) -> Option<Value> {
    if module == Module::Math {
        let constant = match attr {
            "pi" => Some(std::f64::consts::PI),
            "e" => Some(std::f64::consts::E),
            "tau" => Some(std::f64::consts::TAU),
            "inf" => Some(f64::INFINITY),
            "nan" => Some(f64::NAN),
            _ => None,
        };
        if let Some(value) = constant {
            return Some(Value::Float(value));
        }
    }
    let qualified = format!("{}.{attr}", module.name());
    MODULE_FUNCTIONS
        .iter()
        .find(|candidate| **candidate == qualified)
        .map(|found| Value::Builtin(*found))
}

fn int_value(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ScriptError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {min}")
    } else if max == usize::MAX {
        format!("at least {min}")
    } else {
        format!("from {min} to {max}")
    };
    Err(ScriptError::type_error(format!(
        "{name}() takes {expected} arguments ({} given)",
        args.len()
    )))
}

fn take_kwarg(kwargs: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
    kwargs
        .iter()
        .position(|(name, _)| name == key)
        .map(|index| kwargs.remove(index).1)
}

fn reject_kwargs(name: &str, kwargs: &[(String, Value)]) -> Result<(), ScriptError> {
    match kwargs.first() {
        Some((key, _)) => Err(ScriptError::type_error(format!(
            "{name}() got an unexpected keyword argument '{key}'"
        ))),
        None => Ok(()),
    }
}

/// Positional argument `index`, falling back to the keyword `key`.
fn argument(
    args: &[Value],
    kwargs: &mut Vec<(String, Value)>,
    index: usize,
    key: &str,
) -> Option<Value> {
    args.get(index).cloned().or_else(|| take_kwarg(kwargs, key))
}

fn as_int(value: &Value) -> Result<i64, ScriptError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(ScriptError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

fn as_float(value: &Value) -> Result<f64, ScriptError> {
    value.as_float().ok_or_else(|| {
        ScriptError::type_error(format!("must be real number, not {}", value.type_name()))
    })
}

fn as_str<'v>(value: &'v Value, context: &str) -> Result<&'v str, ScriptError> {
    match value {
        Value::Str(text) => Ok(text),
        other => Err(ScriptError::type_error(format!(
            "{context} must be str, not {}",
            other.type_name()
        ))),
    }
}

/// Converts an integral float to `int`, keeping out-of-range magnitudes as floats.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(value: f64) -> Result<Value, ScriptError> {
    if value.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    if value.is_infinite() {
        return Err(ScriptError::raise(
            "OverflowError",
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = value.trunc();
    if truncated.abs() < i64::MAX as f64 {
        Ok(Value::Int(truncated as i64))
    } else {
        Ok(Value::Float(truncated))
    }
}

fn exception(kind: &str, args: &[Value]) -> Value {
    let message = match args {
        [] => String::new(),
        [single] => single.to_str(),
        many => Value::Tuple(many.to_vec()).repr(),
    };
    Value::Exception(Arc::new(ExceptionValue {
        kind: kind.to_owned(),
        message,
    }))
}

fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Result<Vec<Value>, ScriptError> {
    interp.charge(u64::try_from(items.len()).unwrap_or(u64::MAX))?;
    let keys = match key {
        None | Some(Value::None) => items.clone(),
        Some(func) => items
            .iter()
            .map(|item| interp.call_value(&func, vec![item.clone()], Vec::new()))
            .collect::<Result<Vec<_>, _>>()?,
    };

    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        let ordering = py_cmp(&keys[a], &keys[b]).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        });
        if reverse { ordering.reverse() } else { ordering }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(order.into_iter().map(|index| items[index].clone()).collect())
}

fn extreme(
    interp: &mut Interpreter<'_>,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
    wanted: Ordering,
) -> Result<Value, ScriptError> {
    let key = take_kwarg(&mut kwargs, "key");
    let default = take_kwarg(&mut kwargs, "default");
    reject_kwargs(name, &kwargs)?;
    expect_args(name, &args, 1, usize::MAX)?;

    let items = if args.len() == 1 {
        args[0].iterate()?
    } else {
        args
    };
    let mut items = items.into_iter();
    let Some(mut best) = items.next() else {
        return default.ok_or_else(|| {
            ScriptError::value_error(format!("{name}() arg is an empty sequence"))
        });
    };

    let mut best_key = keyed(interp, key.as_ref(), &best)?;
    for item in items {
        let item_key = keyed(interp, key.as_ref(), &item)?;
        if py_cmp(&item_key, &best_key)? == wanted {
            best = item;
            best_key = item_key;
        }
    }
    Ok(best)
}

fn keyed(
    interp: &mut Interpreter<'_>,
    key: Option<&Value>,
    value: &Value,
) -> Result<Value, ScriptError> {
    match key {
        None | Some(Value::None) => Ok(value.clone()),
        Some(func) => interp.call_value(func, vec![value.clone()], Vec::new()),
    }
}

fn merge_into(entries: &mut Vec<(Value, Value)>, source: &Value) -> Result<(), ScriptError> {
    if let Value::Dict(other) = source {
        for (key, value) in other {
            dict_set(entries, key.clone(), value.clone());
        }
        return Ok(());
    }
    for pair in source.iterate()? {
        let parts = pair.iterate()?;
        let [key, value] = <[Value; 2]>::try_from(parts).map_err(|parts| {
            ScriptError::value_error(format!(
                "dictionary update sequence element has length {}; 2 is required",
                parts.len()
            ))
        })?;
        check_hashable(&key)?;
        dict_set(entries, key, value);
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
pub(crate) fn call_builtin(
    interp: &mut Interpreter<'_>,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value, ScriptError> {
    if let Some((module, func)) = name.split_once('.') {
        let module = Module::from_name(module)
            .ok_or_else(|| ScriptError::raise("NameError", format!("name '{name}' is not defined")))?;
        return call_module(interp, module, func, args, kwargs);
    }
    if is_exception_type(name) {
        reject_kwargs(name, &kwargs)?;
        return Ok(exception(name, &args));
    }

    match name {
        "len" => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            match &args[0] {
                Value::Str(text) => Ok(int_value(text.chars().count())),
                Value::List(items) | Value::Tuple(items) => Ok(int_value(items.len())),
                Value::Dict(entries) => Ok(int_value(entries.len())),
                other => Err(ScriptError::type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
            }
        }
        "str" => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 0, 1)?;
            Ok(Value::Str(args.first().map(Value::to_str).unwrap_or_default()))
        }
        "repr" => {
            expect_args(name, &args, 1, 1)?;
            Ok(Value::Str(args[0].repr()))
        }
        "int" => {
            let base = take_kwarg(&mut kwargs, "base");
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 0, 2)?;
            let base = args.get(1).cloned().or(base);
            match (args.first(), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(text)), base) => {
                    let radix = match base {
                        Some(value) => u32::try_from(as_int(&value)?)
                            .ok()
                            .filter(|radix| (2..=36).contains(radix))
                            .ok_or_else(|| {
                                ScriptError::value_error("int() base must be >= 2 and <= 36")
                            })?,
                        None => 10,
                    };
                    let cleaned = text.trim().replace('_', "");
                    i64::from_str_radix(&cleaned, radix).map(Value::Int).map_err(|_| {
                        ScriptError::value_error(format!(
                            "invalid literal for int() with base {radix}: {}",
                            Value::Str(text.clone()).repr()
                        ))
                    })
                }
                (Some(_), Some(_)) => Err(ScriptError::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                (Some(Value::Int(i)), None) => Ok(Value::Int(*i)),
                (Some(Value::Bool(b)), None) => Ok(Value::Int(i64::from(*b))),
                (Some(Value::Float(f)), None) => float_to_int(*f),
                (Some(other), None) => Err(ScriptError::type_error(format!(
                    "int() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))),
            }
        }
        "float" => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(text)) => text
                    .trim()
                    .replace('_', "")
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| {
                        ScriptError::value_error(format!(
                            "could not convert string to float: {}",
                            Value::Str(text.clone()).repr()
                        ))
                    }),
                Some(other) => Ok(Value::Float(as_float(other)?)),
            }
        }
        "bool" => {
            expect_args(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        "abs" => {
            expect_args(name, &args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(i
                    .checked_abs()
                    .map_or_else(|| Value::Float(as_float(&args[0]).unwrap_or_default().abs()), Value::Int)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                other => Ok(Value::Float(as_float(other)?.abs())),
            }
        }
        "round" => {
            let digits = argument(&args, &mut kwargs, 1, "ndigits");
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 2)?;
            round(&args[0], digits.as_ref())
        }
        "min" => extreme(interp, name, args, kwargs, Ordering::Less),
        "max" => extreme(interp, name, args, kwargs, Ordering::Greater),
        "sum" => {
            let start = argument(&args, &mut kwargs, 1, "start").unwrap_or(Value::Int(0));
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 2)?;
            if matches!(start, Value::Str(_)) {
                return Err(ScriptError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            args[0]
                .iterate()?
                .iter()
                .try_fold(start, |total, item| binary(BinOp::Add, &total, item))
        }
        "range" => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 3)?;
            let bounds = args.iter().map(as_int).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(ScriptError::type_error("range expected at most 3 arguments")),
            };
            range(interp, start, stop, step)
        }
        "list" | "tuple" => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 0, 1)?;
            let items = match args.first() {
                Some(source) => source.iterate()?,
                None => Vec::new(),
            };
            Ok(if name == "list" {
                Value::List(items)
            } else {
                Value::Tuple(items)
            })
        }
        "sorted" => {
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|flag| flag.truthy());
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            let items = args[0].iterate()?;
            Ok(Value::List(sort_values(interp, items, key, reverse)?))
        }
        "reversed" => {
            expect_args(name, &args, 1, 1)?;
            let mut items = args[0].iterate()?;
            items.reverse();
            Ok(Value::List(items))
        }
        "enumerate" => {
            let start = argument(&args, &mut kwargs, 1, "start")
                .map_or(Ok(0), |value| as_int(&value))?;
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 2)?;
            Ok(Value::List(
                args[0]
                    .iterate()?
                    .into_iter()
                    .zip(start..)
                    .map(|(item, index)| Value::Tuple(vec![Value::Int(index), item]))
                    .collect(),
            ))
        }
        "zip" => {
            reject_kwargs(name, &kwargs)?;
            let columns = args
                .iter()
                .map(Value::iterate)
                .collect::<Result<Vec<_>, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::List(
                (0..len)
                    .map(|row| Value::Tuple(columns.iter().map(|column| column[row].clone()).collect()))
                    .collect(),
            ))
        }
        "dict" => {
            expect_args(name, &args, 0, 1)?;
            let mut entries = Vec::new();
            if let Some(source) = args.first() {
                merge_into(&mut entries, source)?;
            }
            for (key, value) in kwargs {
                dict_set(&mut entries, Value::Str(key), value);
            }
            Ok(Value::Dict(entries))
        }
        "any" | "all" => {
            expect_args(name, &args, 1, 1)?;
            let items = args[0].iterate()?;
            Ok(Value::Bool(if name == "any" {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            }))
        }
        "isinstance" => {
            expect_args(name, &args, 2, 2)?;
            let classes = match &args[1] {
                Value::Tuple(items) => items.clone(),
                single => vec![single.clone()],
            };
            let type_name = args[0].type_name();
            Ok(Value::Bool(classes.iter().any(|class| match class {
                Value::Builtin("int") => matches!(args[0], Value::Int(_) | Value::Bool(_)),
                Value::Builtin(class) if is_exception_type(class) => match &args[0] {
                    Value::Exception(exc) => exception_matches(&exc.kind, class),
                    _ => false,
                },
                Value::Builtin(class) => *class == type_name,
                _ => false,
            })))
        }
        "print" => {
            let sep = take_kwarg(&mut kwargs, "sep").map_or_else(|| " ".to_owned(), |v| v.to_str());
            take_kwarg(&mut kwargs, "end");
            reject_kwargs(name, &kwargs)?;
            let line = args.iter().map(Value::to_str).collect::<Vec<_>>().join(&sep);
            debug!(output = %line, "tool script print");
            Ok(Value::None)
        }
        other => Err(ScriptError::raise(
            "NameError",
            format!("name '{other}' is not defined"),
        )),
    }
}

fn range(interp: &mut Interpreter<'_>, start: i64, stop: i64, step: i64) -> Result<Value, ScriptError> {
    if step == 0 {
        return Err(ScriptError::value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 {
        i128::from(stop) - i128::from(start)
    } else {
        i128::from(start) - i128::from(stop)
    };
    let step_size = i128::from(step).abs();
    let len = if span <= 0 {
        0
    } else {
        (span + step_size - 1) / step_size
    };
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    if len > MAX_SEQUENCE_LEN {
        return Err(ScriptError::raise("MemoryError", "range is too large"));
    }
    interp.charge(u64::try_from(len).unwrap_or(u64::MAX))?;
    let mut items = Vec::with_capacity(len);
    let mut current = start;
    for _ in 0..len {
        items.push(Value::Int(current));
        current = current.saturating_add(step);
    }
    Ok(Value::List(items))
}

#[allow(clippy::cast_possible_truncation)]
fn round(value: &Value, digits: Option<&Value>) -> Result<Value, ScriptError> {
    let digits = match digits {
        None | Some(Value::None) => None,
        Some(digits) => Some(as_int(digits)?),
    };
    match (value, digits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(as_int(value)?)),
        (Value::Int(_) | Value::Bool(_), Some(digits)) if digits >= 0 => Ok(Value::Int(as_int(value)?)),
        (_, None) => float_to_int(as_float(value)?.round_ties_even()),
        (_, Some(digits)) => {
            let factor = 10f64.powi(digits.clamp(-308, 308) as i32);
            let rounded = (as_float(value)? * factor).round_ties_even() / factor;
            match value {
                Value::Int(_) | Value::Bool(_) => float_to_int(rounded),
                _ => Ok(Value::Float(rounded)),
            }
        }
    }
}

#[allow(clippy::too_many_lines)]
pub(crate) fn call_module(
    interp: &mut Interpreter<'_>,
    module: Module,
    func: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value, ScriptError> {
    let qualified = format!("{}.{func}", module.name());
    let name = qualified.as_str();
    let domain_error = || ScriptError::value_error("math domain error");

    match (module, func) {
        (Module::Math, "isclose") => {
            let rel_tol = take_kwarg(&mut kwargs, "rel_tol").map_or(Ok(1e-9), |v| as_float(&v))?;
            let abs_tol = take_kwarg(&mut kwargs, "abs_tol").map_or(Ok(0.0), |v| as_float(&v))?;
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 2, 2)?;
            let (a, b) = (as_float(&args[0])?, as_float(&args[1])?);
            Ok(Value::Bool(
                (a - b).abs() <= (rel_tol * a.abs().max(b.abs())).max(abs_tol),
            ))
        }
        (Module::Math, "log") => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 2)?;
            let x = as_float(&args[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.get(1) {
                Some(base) => {
                    let base = as_float(base)?;
                    if base <= 0.0 || (base - 1.0).abs() < f64::EPSILON {
                        return Err(domain_error());
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
                None => Ok(Value::Float(x.ln())),
            }
        }
        (Module::Math, "pow") => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 2, 2)?;
            Ok(Value::Float(as_float(&args[0])?.powf(as_float(&args[1])?)))
        }
        (Module::Math, "factorial") => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            let n = as_int(&args[0])?;
            if n < 0 {
                return Err(ScriptError::value_error(
                    "factorial() not defined for negative values",
                ));
            }
            (1..=n)
                .try_fold(1_i64, i64::checked_mul)
                .map(Value::Int)
                .ok_or_else(|| ScriptError::raise("OverflowError", "factorial result too large"))
        }
        (Module::Math, "floor" | "ceil" | "trunc") => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            if let Value::Int(_) | Value::Bool(_) = &args[0] {
                return Ok(Value::Int(as_int(&args[0])?));
            }
            let x = as_float(&args[0])?;
            float_to_int(match func {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            })
        }
        (Module::Math, unary) => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            let x = as_float(&args[0])?;
            let result = match unary {
                "sqrt" if x < 0.0 => return Err(domain_error()),
                "sqrt" => x.sqrt(),
                "fabs" => x.abs(),
                "log10" | "log2" if x <= 0.0 => return Err(domain_error()),
                "log10" => x.log10(),
                "log2" => x.log2(),
                "exp" => x.exp(),
                "sin" => x.sin(),
                "cos" => x.cos(),
                "tan" => x.tan(),
                other => {
                    return Err(ScriptError::raise(
                        "AttributeError",
                        format!("module 'math' has no attribute '{other}'"),
                    ));
                }
            };
            if result.is_infinite() && x.is_finite() {
                return Err(ScriptError::raise("OverflowError", "math range error"));
            }
            Ok(Value::Float(result))
        }
        (Module::Time, "sleep") => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            let seconds = as_float(&args[0])?;
            if seconds < 0.0 {
                return Err(ScriptError::value_error("sleep length must be non-negative"));
            }
            let cap = interp.limits().max_sleep;
            let requested = Duration::try_from_secs_f64(seconds).unwrap_or(cap);
            if requested > cap {
                debug!(
                    requested_ms = requested.as_millis(),
                    cap_ms = cap.as_millis(),
                    "capping tool script sleep"
                );
            }
            std::thread::sleep(requested.min(cap));
            Ok(Value::None)
        }
        (Module::Time, "time") => {
            expect_args(name, &args, 0, 0)?;
            #[allow(clippy::cast_precision_loss)]
            let now = chrono::Utc::now().timestamp_micros() as f64 / 1e6;
            Ok(Value::Float(now))
        }
        (Module::Json, "dumps") => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            dumps(&args[0]).map(Value::Str)
        }
        (Module::Json, "loads") => {
            reject_kwargs(name, &kwargs)?;
            expect_args(name, &args, 1, 1)?;
            let text = as_str(&args[0], "the JSON object")?;
            serde_json::from_str::<serde_json::Value>(text)
                .map(|json| Value::from_json(&json))
                .map_err(|err| ScriptError::value_error(err.to_string()))
        }
        (module, other) => Err(ScriptError::raise(
            "AttributeError",
            format!("module '{}' has no attribute '{other}'", module.name()),
        )),
    }
}

pub(crate) fn is_mutating_method(receiver: &Value, attr: &str) -> bool {
    match receiver {
        Value::List(_) => matches!(
            attr,
            "append" | "extend" | "insert" | "pop" | "remove" | "clear" | "sort" | "reverse"
        ),
        Value::Dict(_) => matches!(attr, "pop" | "update" | "clear" | "setdefault"),
        _ => false,
    }
}

fn no_attribute(receiver: &Value, attr: &str) -> ScriptError {
    ScriptError::raise(
        "AttributeError",
        format!("'{}' object has no attribute '{attr}'", receiver.type_name()),
    )
}

#[allow(clippy::too_many_lines)]
pub(crate) fn call_mutating(
    interp: &mut Interpreter<'_>,
    target: &mut Value,
    attr: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value, ScriptError> {
    let name = format!("{}.{attr}", target.type_name());
    if let Value::List(items) = target {
        if attr == "sort" {
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|flag| flag.truthy());
            reject_kwargs(&name, &kwargs)?;
            expect_args(&name, &args, 0, 0)?;
            *items = sort_values(interp, std::mem::take(items), key, reverse)?;
            return Ok(Value::None);
        }
    }
    reject_kwargs(&name, &kwargs)?;

    match target {
        Value::List(items) => match attr {
            "append" => {
                expect_args(&name, &args, 1, 1)?;
                items.extend(args);
                Ok(Value::None)
            }
            "extend" => {
                expect_args(&name, &args, 1, 1)?;
                items.extend(args[0].iterate()?);
                Ok(Value::None)
            }
            "insert" => {
                expect_args(&name, &args, 2, 2)?;
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let index = as_int(&args[0])?;
                let index = if index < 0 { index + len } else { index }.clamp(0, len);
                let index = usize::try_from(index).unwrap_or_default();
                items.insert(index, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                expect_args(&name, &args, 0, 1)?;
                if items.is_empty() {
                    return Err(ScriptError::raise("IndexError", "pop from empty list"));
                }
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let index = args.first().map_or(Ok(-1), as_int)?;
                let resolved = if index < 0 { index + len } else { index };
                let index = usize::try_from(resolved)
                    .ok()
                    .filter(|i| *i < items.len())
                    .ok_or_else(|| ScriptError::raise("IndexError", "pop index out of range"))?;
                Ok(items.remove(index))
            }
            "remove" => {
                expect_args(&name, &args, 1, 1)?;
                let index = items
                    .iter()
                    .position(|item| py_eq(item, &args[0]))
                    .ok_or_else(|| ScriptError::value_error("list.remove(x): x not in list"))?;
                items.remove(index);
                Ok(Value::None)
            }
            "clear" => {
                items.clear();
                Ok(Value::None)
            }
            "reverse" => {
                items.reverse();
                Ok(Value::None)
            }
            _ => Err(no_attribute(&Value::List(Vec::new()), attr)),
        },
        Value::Dict(entries) => match attr {
            "pop" => {
                expect_args(&name, &args, 1, 2)?;
                match entries.iter().position(|(key, _)| py_eq(key, &args[0])) {
                    Some(index) => Ok(entries.remove(index).1),
                    None => args
                        .get(1)
                        .cloned()
                        .ok_or_else(|| ScriptError::raise("KeyError", args[0].repr())),
                }
            }
            "update" => {
                expect_args(&name, &args, 0, 1)?;
                if let Some(source) = args.first() {
                    merge_into(entries, source)?;
                }
                Ok(Value::None)
            }
            "clear" => {
                entries.clear();
                Ok(Value::None)
            }
            "setdefault" => {
                expect_args(&name, &args, 1, 2)?;
                if let Some(existing) = dict_get(entries, &args[0]) {
                    return Ok(existing.clone());
                }
                check_hashable(&args[0])?;
                let value = args.get(1).cloned().unwrap_or(Value::None);
                dict_set(entries, args[0].clone(), value.clone());
                Ok(value)
            }
            _ => Err(no_attribute(&Value::Dict(Vec::new()), attr)),
        },
        other => Err(no_attribute(other, attr)),
    }
}

pub(crate) fn call_method(
    _interp: &mut Interpreter<'_>,
    receiver: &Value,
    attr: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, ScriptError> {
    let name = format!("{}.{attr}", receiver.type_name());
    if let Value::Str(text) = receiver {
        if attr == "format" {
            return format_template(text, &args, &kwargs).map(Value::Str);
        }
        return str_method(&name, text, attr, args, kwargs);
    }
    reject_kwargs(&name, &kwargs)?;

    match (receiver, attr) {
        (Value::List(items) | Value::Tuple(items), "index") => {
            expect_args(&name, &args, 1, 1)?;
            items
                .iter()
                .position(|item| py_eq(item, &args[0]))
                .map(int_value)
                .ok_or_else(|| {
                    ScriptError::value_error(format!("{} is not in list", args[0].repr()))
                })
        }
        (Value::List(items) | Value::Tuple(items), "count") => {
            expect_args(&name, &args, 1, 1)?;
            Ok(int_value(items.iter().filter(|item| py_eq(item, &args[0])).count()))
        }
        (Value::List(_) | Value::Dict(_), "copy") => {
            expect_args(&name, &args, 0, 0)?;
            Ok(receiver.clone())
        }
        (Value::Dict(entries), "get") => {
            expect_args(&name, &args, 1, 2)?;
            Ok(dict_get(entries, &args[0])
                .cloned()
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::None))
        }
        (Value::Dict(entries), "keys") => {
            expect_args(&name, &args, 0, 0)?;
            Ok(Value::List(entries.iter().map(|(key, _)| key.clone()).collect()))
        }
        (Value::Dict(entries), "values") => {
            expect_args(&name, &args, 0, 0)?;
            Ok(Value::List(entries.iter().map(|(_, value)| value.clone()).collect()))
        }
        (Value::Dict(entries), "items") => {
            expect_args(&name, &args, 0, 0)?;
            Ok(Value::List(
                entries
                    .iter()
                    .map(|(key, value)| Value::Tuple(vec![key.clone(), value.clone()]))
                    .collect(),
            ))
        }
        (Value::Exception(_), "with_traceback") => Ok(receiver.clone()),
        _ => Err(no_attribute(receiver, attr)),
    }
}

fn strip_set(args: &[Value]) -> Result<Option<Vec<char>>, ScriptError> {
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(chars) => Ok(Some(as_str(chars, "strip arg")?.chars().collect())),
    }
}

fn affixes(value: &Value) -> Result<Vec<String>, ScriptError> {
    match value {
        Value::Str(text) => Ok(vec![text.clone()]),
        Value::Tuple(items) => items
            .iter()
            .map(|item| as_str(item, "tuple item").map(str::to_owned))
            .collect(),
        other => Err(ScriptError::type_error(format!(
            "startswith first arg must be str or a tuple of str, not {}",
            other.type_name()
        ))),
    }
}

fn split_whitespace(text: &str, maxsplit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|max| parts.len() == max) {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for c in text.chars() {
        if previous_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_alpha = c.is_alphabetic();
    }
    out
}

#[allow(clippy::too_many_lines)]
fn str_method(
    name: &str,
    text: &str,
    attr: &str,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Result<Value, ScriptError> {
    if attr == "split" {
        let sep = argument(&args, &mut kwargs, 0, "sep");
        let maxsplit = argument(&args, &mut kwargs, 1, "maxsplit")
            .map_or(Ok(-1), |value| as_int(&value))?;
        reject_kwargs(name, &kwargs)?;
        let maxsplit = usize::try_from(maxsplit).ok();
        return match sep {
            None | Some(Value::None) => Ok(Value::List(split_whitespace(text, maxsplit))),
            Some(sep) => {
                let sep = as_str(&sep, "separator")?;
                if sep.is_empty() {
                    return Err(ScriptError::value_error("empty separator"));
                }
                let parts: Vec<Value> = match maxsplit {
                    Some(max) => text.splitn(max + 1, sep).map(Value::str).collect(),
                    None => text.split(sep).map(Value::str).collect(),
                };
                Ok(Value::List(parts))
            }
        };
    }
    reject_kwargs(name, &kwargs)?;

    match attr {
        "upper" => Ok(Value::str(text.to_uppercase())),
        "lower" => Ok(Value::str(text.to_lowercase())),
        "title" => Ok(Value::str(title_case(text))),
        "capitalize" => {
            let mut chars = text.chars();
            Ok(Value::str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            }))
        }
        "strip" | "lstrip" | "rstrip" => {
            expect_args(name, &args, 0, 1)?;
            let set = strip_set(&args)?;
            let matcher = |c: char| match &set {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Ok(Value::str(match attr {
                "strip" => text.trim_matches(matcher),
                "lstrip" => text.trim_start_matches(matcher),
                _ => text.trim_end_matches(matcher),
            }))
        }
        "join" => {
            expect_args(name, &args, 1, 1)?;
            let parts = args[0]
                .iterate()?
                .iter()
                .map(|item| match item {
                    Value::Str(part) => Ok(part.clone()),
                    other => Err(ScriptError::type_error(format!(
                        "sequence item: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::str(parts.join(text)))
        }
        "replace" => {
            expect_args(name, &args, 2, 3)?;
            let old = as_str(&args[0], "replace() argument 1")?;
            let new = as_str(&args[1], "replace() argument 2")?;
            match args.get(2).map(as_int).transpose()? {
                Some(count) if count >= 0 => Ok(Value::str(text.replacen(
                    old,
                    new,
                    usize::try_from(count).unwrap_or(usize::MAX),
                ))),
                _ => Ok(Value::str(text.replace(old, new))),
            }
        }
        "startswith" | "endswith" => {
            expect_args(name, &args, 1, 1)?;
            let candidates = affixes(&args[0])?;
            Ok(Value::Bool(candidates.iter().any(|affix| {
                if attr == "startswith" {
                    text.starts_with(affix.as_str())
                } else {
                    text.ends_with(affix.as_str())
                }
            })))
        }
        "find" | "index" => {
            expect_args(name, &args, 1, 1)?;
            let needle = as_str(&args[0], "substring")?;
            match text.find(needle) {
                Some(byte) => Ok(int_value(text[..byte].chars().count())),
                None if attr == "find" => Ok(Value::Int(-1)),
                None => Err(ScriptError::value_error("substring not found")),
            }
        }
        "count" => {
            expect_args(name, &args, 1, 1)?;
            let needle = as_str(&args[0], "substring")?;
            if needle.is_empty() {
                return Ok(int_value(text.chars().count() + 1));
            }
            Ok(int_value(text.matches(needle).count()))
        }
        "isdigit" => Ok(Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))),
        "isalnum" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric))),
        "isspace" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace))),
        "splitlines" => Ok(Value::List(text.lines().map(Value::str).collect())),
        "zfill" => {
            expect_args(name, &args, 1, 1)?;
            let width = usize::try_from(as_int(&args[0])?).unwrap_or(0);
            let count = text.chars().count();
            if count >= width {
                return Ok(Value::str(text));
            }
            let (sign, digits) = match text.strip_prefix(['-', '+']) {
                Some(rest) => (&text[..1], rest),
                None => ("", text),
            };
            Ok(Value::str(format!("{sign}{}{digits}", "0".repeat(width - count))))
        }
        _ => Err(no_attribute(&Value::str(text), attr)),
    }
}

/// `str.format` over positional and keyword arguments.
fn format_template(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(ScriptError::value_error(
                                "expected '}' before end of string",
                            ));
                        }
                    }
                }
                let (head, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (key, conversion) = match head.split_once('!') {
                    Some((key, conversion)) => (key, Some(conversion)),
                    None => (head, None),
                };
                let value = if key.is_empty() {
                    let value = args.get(auto_index).ok_or_else(|| {
                        ScriptError::raise(
                            "IndexError",
                            format!("Replacement index {auto_index} out of range for positional args tuple"),
                        )
                    })?;
                    auto_index += 1;
                    value
                } else if let Ok(index) = key.parse::<usize>() {
                    args.get(index).ok_or_else(|| {
                        ScriptError::raise(
                            "IndexError",
                            format!("Replacement index {index} out of range for positional args tuple"),
                        )
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(name, _)| name == key)
                        .map(|(_, value)| value)
                        .ok_or_else(|| ScriptError::raise("KeyError", Value::str(key).repr()))?
                };
                let converted = match conversion {
                    Some("r") => Value::Str(value.repr()),
                    _ => value.clone(),
                };
                out.push_str(&format_spec(&converted, spec)?);
            }
            '}' => {
                return Err(ScriptError::value_error(
                    "Single '}' encountered in format string",
                ));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_template_supports_fields() {
        let out = format_template(
            "{} + {name} = {0:.2f} {{ok}}",
            &[Value::Float(1.5)],
            &[("name".to_owned(), Value::str("x"))],
        )
        .unwrap();
        assert_eq!(out, "1.5 + x = 1.50 {ok}");
    }

    #[test]
    fn whitespace_split_honours_maxsplit() {
        let parts = split_whitespace("  a b   c ", Some(1));
        let parts: Vec<String> = parts.iter().map(Value::to_str).collect();
        assert_eq!(parts, vec!["a", "b   c "]);
    }

    #[test]
    fn rounding_is_bankers() {
        assert!(matches!(round(&Value::Float(2.5), None), Ok(Value::Int(2))));
        assert!(matches!(round(&Value::Float(3.5), None), Ok(Value::Int(4))));
        assert!(matches!(round(&Value::Float(2.675), Some(&Value::Int(1))), Ok(Value::Float(f)) if (f - 2.7).abs() < 1e-9));
    }

    #[test]
    fn title_case_matches_python() {
        assert_eq!(title_case("hello wORLD-x"), "Hello World-X");
    }

    #[test]
    fn module_attributes_resolve() {
        assert!(matches!(module_attr(Module::Math, "sqrt"), Some(Value::Builtin("math.sqrt"))));
        assert!(matches!(module_attr(Module::Math, "pi"), Some(Value::Float(_))));
        assert!(module_attr(Module::Json, "nope").is_none());
    }
}
