//! Tree-walking evaluator for compiled tool scripts.
//!
//! Values have copy semantics: assigning a list binds a snapshot, and in-place
//! mutation (`items.append(x)`, `table[k] = v`) only reaches variables local to
//! the running frame.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::ScriptError;
use super::ScriptLimits;
use super::ast::{BinOp, CmpOp, Comprehension, Expr, FStringPart, Handler, Stmt, Target, UnaryOp};
use super::builtins;
use super::value::{
    Closure, Numeric, Value, check_hashable, dict_get, dict_set, format_spec, py_cmp, py_eq,
};

/// Longest list or string a single repetition or range may produce.
pub(crate) const MAX_SEQUENCE_LEN: usize = 1_000_000;

/// Control-flow outcome of a statement.
pub(crate) enum Signal {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Names bound by evaluating a script's top level.
#[derive(Debug, Default)]
pub(crate) struct Namespace {
    pub(crate) values: HashMap<String, Value>,
    /// First-binding order of module-level names.
    pub(crate) order: Vec<String>,
}

pub(crate) struct Frame {
    locals: HashMap<String, Value>,
    captured: Option<Arc<HashMap<String, Value>>>,
    order: Option<Vec<String>>,
}

impl Frame {
    fn module() -> Self {
        Self {
            locals: HashMap::new(),
            captured: None,
            order: Some(Vec::new()),
        }
    }

    fn is_module(&self) -> bool {
        self.order.is_some()
    }

    fn bind(&mut self, name: &str, value: Value) {
        if let Some(order) = &mut self.order {
            if !self.locals.contains_key(name) {
                order.push(name.to_owned());
            }
        }
        self.locals.insert(name.to_owned(), value);
    }
}

/// Evaluates the top level of a script statement by statement.
///
/// Functions called while the module runs see the names bound by earlier
/// statements.
pub(crate) fn run_module(body: &[Stmt], limits: &ScriptLimits) -> Result<Namespace, ScriptError> {
    let mut frame = Frame::module();
    let mut steps = 0;
    for stmt in body {
        let snapshot = frame.locals.clone();
        let mut interp = Interpreter::new(&snapshot, limits);
        interp.steps = steps;
        match interp.exec(stmt, &mut frame)? {
            Signal::Normal => {}
            Signal::Return(_) => return Err(ScriptError::syntax("'return' outside function")),
            Signal::Break | Signal::Continue => {
                return Err(ScriptError::syntax("loop control outside loop"));
            }
        }
        steps = interp.steps;
    }
    Ok(Namespace {
        values: frame.locals,
        order: frame.order.unwrap_or_default(),
    })
}

/// Calls `callee` with a fresh budget against a finished module namespace.
pub(crate) fn call_in(
    namespace: &Namespace,
    limits: &ScriptLimits,
    callee: &Value,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, ScriptError> {
    Interpreter::new(&namespace.values, limits).call_value(callee, args, kwargs)
}

pub(crate) struct Interpreter<'g> {
    globals: &'g HashMap<String, Value>,
    limits: &'g ScriptLimits,
    steps: u64,
    depth: usize,
    handling: Vec<ScriptError>,
}

impl<'g> Interpreter<'g> {
    fn new(globals: &'g HashMap<String, Value>, limits: &'g ScriptLimits) -> Self {
        Self {
            globals,
            limits,
            steps: 0,
            depth: 0,
            handling: Vec::new(),
        }
    }

    pub(crate) fn limits(&self) -> &ScriptLimits {
        self.limits
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.charge(1)
    }

    /// Consumes `cost` steps of the budget.
    pub(crate) fn charge(&mut self, cost: u64) -> Result<(), ScriptError> {
        self.steps = self.steps.saturating_add(cost);
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::step_limit(self.limits.max_steps));
        }
        Ok(())
    }

    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, args, kwargs),
            Value::Builtin(name) => builtins::call_builtin(self, name, args, kwargs),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Arc<Closure>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, ScriptError> {
        if self.depth >= self.limits.max_call_depth {
            return Err(ScriptError::depth_limit(self.limits.max_call_depth));
        }
        let locals = bind_arguments(closure, args, kwargs)?;
        let mut frame = Frame {
            locals,
            captured: closure.captured.clone(),
            order: None,
        };

        self.depth += 1;
        let outcome = self.exec_block(&closure.def.body, &mut frame);
        self.depth -= 1;

        match outcome? {
            Signal::Return(value) => Ok(value),
            Signal::Normal | Signal::Break | Signal::Continue => Ok(Value::None),
        }
    }

    fn exec_block(&mut self, body: &[Stmt], frame: &mut Frame) -> Result<Signal, ScriptError> {
        for stmt in body {
            match self.exec(stmt, frame)? {
                Signal::Normal => {}
                signal => return Ok(signal),
            }
        }
        Ok(Signal::Normal)
    }

    #[allow(clippy::too_many_lines)]
    fn exec(&mut self, stmt: &Stmt, frame: &mut Frame) -> Result<Signal, ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, frame)?;
            }
            Stmt::Assign { targets, value } => {
                let value = self.eval(value, frame)?;
                for target in targets {
                    self.assign(target, value.clone(), frame)?;
                }
            }
            Stmt::AugAssign { target, op, value } => match target {
                Target::Name(name) => {
                    let current = self.lookup(name, frame)?;
                    let rhs = self.eval(value, frame)?;
                    frame.bind(name, binary(*op, &current, &rhs)?);
                }
                Target::Subscript {
                    value: container,
                    index,
                } => {
                    let key = self.eval(index, frame)?;
                    let current = subscript(&self.eval(container, frame)?, &key)?;
                    let rhs = self.eval(value, frame)?;
                    let updated = binary(*op, &current, &rhs)?;
                    self.store_item(container, key, updated, frame)?;
                }
                Target::Unpack(_) => {
                    return Err(ScriptError::syntax(
                        "illegal expression for augmented assignment",
                    ));
                }
            },
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::None,
                };
                return Ok(Signal::Return(value));
            }
            Stmt::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test, frame)?.truthy() {
                        return self.exec_block(body, frame);
                    }
                }
                return self.exec_block(orelse, frame);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                for item in self.eval(iter, frame)?.iterate()? {
                    self.assign(target, item, frame)?;
                    match self.exec_block(body, frame)? {
                        Signal::Break => return Ok(Signal::Normal),
                        Signal::Return(value) => return Ok(Signal::Return(value)),
                        Signal::Normal | Signal::Continue => {}
                    }
                }
                return self.exec_block(orelse, frame);
            }
            Stmt::While { test, body, orelse } => {
                while self.eval(test, frame)?.truthy() {
                    match self.exec_block(body, frame)? {
                        Signal::Break => return Ok(Signal::Normal),
                        Signal::Return(value) => return Ok(Signal::Return(value)),
                        Signal::Normal | Signal::Continue => {}
                    }
                }
                return self.exec_block(orelse, frame);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finally,
            } => return self.exec_try(body, handlers, orelse, finally, frame),
            Stmt::Raise(None) => {
                return Err(self.handling.last().cloned().unwrap_or_else(|| {
                    ScriptError::raise("RuntimeError", "No active exception to reraise")
                }));
            }
            Stmt::Raise(Some(expr)) => {
                return Err(match self.eval(expr, frame)? {
                    Value::Exception(exc) => ScriptError::raise(exc.kind.clone(), exc.message.clone()),
                    Value::Builtin(name) if builtins::is_exception_type(name) => {
                        ScriptError::raise(name, "")
                    }
                    _ => ScriptError::type_error("exceptions must derive from BaseException"),
                });
            }
            Stmt::Assert { test, message } => {
                if !self.eval(test, frame)?.truthy() {
                    let message = match message {
                        Some(expr) => self.eval(expr, frame)?.to_str(),
                        None => String::new(),
                    };
                    return Err(ScriptError::raise("AssertionError", message));
                }
            }
            Stmt::Import(bindings) => {
                for (module, binding) in bindings {
                    let module = builtins::import(module)?;
                    frame.bind(binding, module);
                }
            }
            Stmt::ImportFrom { module, names } => {
                let Value::Module(resolved) = builtins::import(module)? else {
                    return Err(ScriptError::raise(
                        "ImportError",
                        format!("cannot import from '{module}'"),
                    ));
                };
                for (attr, binding) in names {
                    let value = builtins::module_attr(resolved, attr).ok_or_else(|| {
                        ScriptError::raise(
                            "ImportError",
                            format!("cannot import name '{attr}' from '{module}'"),
                        )
                    })?;
                    frame.bind(binding, value);
                }
            }
            Stmt::Def(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for param in &def.params {
                    defaults.push(match &param.default {
                        Some(expr) => Some(self.eval(expr, frame)?),
                        None => None,
                    });
                }
                let captured = if frame.is_module() {
                    None
                } else {
                    let mut scope = frame.captured.as_deref().cloned().unwrap_or_default();
                    scope.extend(frame.locals.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Some(Arc::new(scope))
                };
                let closure = Closure {
                    def: Arc::clone(def),
                    defaults,
                    captured,
                };
                frame.bind(&def.name, Value::Function(Arc::new(closure)));
            }
            Stmt::Break => return Ok(Signal::Break),
            Stmt::Continue => return Ok(Signal::Continue),
            Stmt::Pass => {}
        }
        Ok(Signal::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finally: &[Stmt],
        frame: &mut Frame,
    ) -> Result<Signal, ScriptError> {
        let outcome = match self.exec_block(body, frame) {
            Ok(Signal::Normal) => self.exec_block(orelse, frame),
            Err(err) if err.is_catchable() => {
                let kind = err.kind().unwrap_or_default().to_owned();
                let handler = handlers.iter().find(|handler| {
                    handler.kinds.is_empty()
                        || handler.kinds.iter().any(|filter| exception_matches(&kind, filter))
                });
                match handler {
                    Some(handler) => {
                        if let Some(binding) = &handler.binding {
                            frame.bind(binding, err.to_value());
                        }
                        self.handling.push(err);
                        let handled = self.exec_block(&handler.body, frame);
                        self.handling.pop();
                        handled
                    }
                    None => Err(err),
                }
            }
            other => other,
        };

        if finally.is_empty() || outcome.as_ref().is_err_and(|err| !err.is_catchable()) {
            return outcome;
        }
        match self.exec_block(finally, frame)? {
            Signal::Normal => outcome,
            signal => Ok(signal),
        }
    }

    fn lookup(&self, name: &str, frame: &Frame) -> Result<Value, ScriptError> {
        if let Some(value) = frame.locals.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = frame.captured.as_ref().and_then(|scope| scope.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name).ok_or_else(|| {
            ScriptError::raise("NameError", format!("name '{name}' is not defined"))
        })
    }

    fn assign(&mut self, target: &Target, value: Value, frame: &mut Frame) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                frame.bind(name, value);
                Ok(())
            }
            Target::Unpack(targets) => {
                let items = value.iterate()?;
                match items.len().cmp(&targets.len()) {
                    Ordering::Less => {
                        return Err(ScriptError::value_error(format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )));
                    }
                    Ordering::Greater => {
                        return Err(ScriptError::value_error(format!(
                            "too many values to unpack (expected {})",
                            targets.len()
                        )));
                    }
                    Ordering::Equal => {}
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, frame)?;
                }
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let key = self.eval(index, frame)?;
                self.store_item(container, key, value, frame)
            }
        }
    }

    fn store_item(
        &mut self,
        container: &Expr,
        key: Value,
        value: Value,
        frame: &mut Frame,
    ) -> Result<(), ScriptError> {
        let Some((root, path)) = self.place(container, frame)? else {
            let mut temporary = self.eval(container, frame)?;
            return set_item(&mut temporary, key, value);
        };
        let target = self.place_mut(frame, &root, &path)?;
        set_item(target, key, value)
    }

    /// Resolves `expr` to a local variable plus an index path, when it names one.
    fn place(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Option<(String, Vec<Value>)>, ScriptError> {
        match expr {
            Expr::Name(name) => Ok(Some((name.clone(), Vec::new()))),
            Expr::Subscript { value, index } if !matches!(index.as_ref(), Expr::Slice { .. }) => {
                match self.place(value, frame)? {
                    Some((root, mut path)) => {
                        path.push(self.eval(index, frame)?);
                        Ok(Some((root, path)))
                    }
                    None => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn place_mut<'f>(
        &self,
        frame: &'f mut Frame,
        root: &str,
        path: &[Value],
    ) -> Result<&'f mut Value, ScriptError> {
        if !frame.locals.contains_key(root) {
            return Err(match self.lookup(root, frame) {
                Ok(_) => ScriptError::type_error(format!(
                    "cannot modify '{root}' in place: it is not a local variable"
                )),
                Err(err) => err,
            });
        }
        let mut current = frame
            .locals
            .get_mut(root)
            .ok_or_else(|| ScriptError::raise("NameError", format!("name '{root}' is not defined")))?;
        for key in path {
            current = item_mut(current, key)?;
        }
        Ok(current)
    }

    fn eval_all(&mut self, exprs: &[Expr], frame: &mut Frame) -> Result<Vec<Value>, ScriptError> {
        exprs.iter().map(|expr| self.eval(expr, frame)).collect()
    }

    #[allow(clippy::too_many_lines)]
    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Value, ScriptError> {
        self.tick()?;
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field { expr, spec } => {
                            let value = self.eval(expr, frame)?;
                            match spec {
                                Some(spec) => out.push_str(&format_spec(&value, spec)?),
                                None => out.push_str(&value.to_str()),
                            }
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Name(name) => self.lookup(name, frame),
            Expr::List(items) => Ok(Value::List(self.eval_all(items, frame)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, frame)?)),
            Expr::Dict(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.eval(key, frame)?;
                    check_hashable(&key)?;
                    let value = self.eval(value, frame)?;
                    dict_set(&mut entries, key, value);
                }
                Ok(Value::Dict(entries))
            }
            Expr::Attribute { value, attr } => match self.eval(value, frame)? {
                Value::Module(module) => builtins::module_attr(module, attr).ok_or_else(|| {
                    ScriptError::raise(
                        "AttributeError",
                        format!("module '{}' has no attribute '{attr}'", module.name()),
                    )
                }),
                Value::Exception(exc) if attr == "args" => {
                    Ok(Value::Tuple(vec![Value::Str(exc.message.clone())]))
                }
                other => Err(ScriptError::raise(
                    "AttributeError",
                    format!(
                        "'{}' object attribute '{attr}' can only be used in a call",
                        other.type_name()
                    ),
                )),
            },
            Expr::Subscript { value, index } => {
                let target = self.eval(value, frame)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let lower = self.slice_bound(lower.as_deref(), frame)?;
                    let upper = self.slice_bound(upper.as_deref(), frame)?;
                    let step = self.slice_bound(step.as_deref(), frame)?;
                    return slice(&target, lower, upper, step);
                }
                let key = self.eval(index, frame)?;
                subscript(&target, &key)
            }
            Expr::Slice { .. } => Err(ScriptError::syntax("slice outside of a subscript")),
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs, frame),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, frame)?;
                let right = self.eval(right, frame)?;
                binary(*op, &left, &right)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, frame)?;
                unary(*op, &value)
            }
            Expr::BoolOp { and, left, right } => {
                let left = self.eval(left, frame)?;
                if left.truthy() == *and {
                    self.eval(right, frame)
                } else {
                    Ok(left)
                }
            }
            Expr::Compare { left, rest } => {
                let mut current = self.eval(left, frame)?;
                for (op, right) in rest {
                    let right = self.eval(right, frame)?;
                    if !compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test, frame)?.truthy() {
                    self.eval(body, frame)
                } else {
                    self.eval(orelse, frame)
                }
            }
            Expr::ListComp { element, clauses } => {
                let mut names = Vec::new();
                for clause in clauses {
                    if let Comprehension::For { target, .. } = clause {
                        target_names(target, &mut names);
                    }
                }
                let saved: Vec<(String, Option<Value>)> = names
                    .into_iter()
                    .map(|name| {
                        let previous = frame.locals.get(&name).cloned();
                        (name, previous)
                    })
                    .collect();

                let mut out = Vec::new();
                let outcome = self.comprehend(element, clauses, frame, &mut out);

                for (name, previous) in saved {
                    match previous {
                        Some(value) => {
                            frame.locals.insert(name, value);
                        }
                        None => {
                            frame.locals.remove(&name);
                        }
                    }
                }
                outcome.map(|()| Value::List(out))
            }
        }
    }

    fn comprehend(
        &mut self,
        element: &Expr,
        clauses: &[Comprehension],
        frame: &mut Frame,
        out: &mut Vec<Value>,
    ) -> Result<(), ScriptError> {
        match clauses.split_first() {
            None => {
                out.push(self.eval(element, frame)?);
                Ok(())
            }
            Some((Comprehension::For { target, iter }, rest)) => {
                for item in self.eval(iter, frame)?.iterate()? {
                    self.tick()?;
                    self.assign(target, item, frame)?;
                    self.comprehend(element, rest, frame, out)?;
                }
                Ok(())
            }
            Some((Comprehension::If(test), rest)) => {
                if self.eval(test, frame)?.truthy() {
                    self.comprehend(element, rest, frame, out)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        frame: &mut Frame,
    ) -> Result<Value, ScriptError> {
        if let Expr::Attribute { value, attr } = func {
            let receiver = self.eval(value, frame)?;
            let (args, kwargs) = self.eval_arguments(args, kwargs, frame)?;
            return match receiver {
                Value::Module(module) => builtins::call_module(self, module, attr, args, kwargs),
                receiver if builtins::is_mutating_method(&receiver, attr) => {
                    if let Some((root, path)) = self.place(value, frame)? {
                        let target = self.place_mut(frame, &root, &path)?;
                        builtins::call_mutating(self, target, attr, args, kwargs)
                    } else {
                        let mut temporary = receiver;
                        builtins::call_mutating(self, &mut temporary, attr, args, kwargs)
                    }
                }
                receiver => builtins::call_method(self, &receiver, attr, args, kwargs),
            };
        }
        let callee = self.eval(func, frame)?;
        let (args, kwargs) = self.eval_arguments(args, kwargs, frame)?;
        self.call_value(&callee, args, kwargs)
    }

    fn eval_arguments(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        frame: &mut Frame,
    ) -> Result<(Vec<Value>, Vec<(String, Value)>), ScriptError> {
        let args = self.eval_all(args, frame)?;
        let mut evaluated = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            evaluated.push((name.clone(), self.eval(expr, frame)?));
        }
        Ok((args, evaluated))
    }

    fn slice_bound(&mut self, expr: Option<&Expr>, frame: &mut Frame) -> Result<Option<i64>, ScriptError> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr, frame)? {
            Value::None => Ok(None),
            Value::Int(i) => Ok(Some(i)),
            Value::Bool(b) => Ok(Some(i64::from(b))),
            _ => Err(ScriptError::type_error(
                "slice indices must be integers or None",
            )),
        }
    }
}

fn bind_arguments(
    closure: &Closure,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<HashMap<String, Value>, ScriptError> {
    let def = &closure.def;
    let name = &def.name;
    if args.len() > def.positional_limit {
        return Err(ScriptError::type_error(format!(
            "{name}() takes {} positional arguments but {} were given",
            def.positional_limit,
            args.len()
        )));
    }

    let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
    for (slot, arg) in slots.iter_mut().zip(args) {
        *slot = Some(arg);
    }
    for (keyword, value) in kwargs {
        let index = def
            .params
            .iter()
            .position(|param| param.name == keyword)
            .ok_or_else(|| {
                ScriptError::type_error(format!(
                    "{name}() got an unexpected keyword argument '{keyword}'"
                ))
            })?;
        if slots[index].is_some() {
            return Err(ScriptError::type_error(format!(
                "{name}() got multiple values for argument '{keyword}'"
            )));
        }
        slots[index] = Some(value);
    }

    let mut locals = HashMap::with_capacity(def.params.len());
    let mut missing = Vec::new();
    for ((param, slot), default) in def.params.iter().zip(slots).zip(&closure.defaults) {
        match slot.or_else(|| default.clone()) {
            Some(value) => {
                locals.insert(param.name.clone(), value);
            }
            None => missing.push(format!("'{}'", param.name)),
        }
    }
    if !missing.is_empty() {
        return Err(ScriptError::type_error(format!(
            "{name}() missing required argument(s): {}",
            missing.join(", ")
        )));
    }
    Ok(locals)
}

fn target_names(target: &Target, names: &mut Vec<String>) {
    match target {
        Target::Name(name) => names.push(name.clone()),
        Target::Unpack(targets) => {
            for target in targets {
                target_names(target, names);
            }
        }
        Target::Subscript { .. } => {}
    }
}

/// Whether an exception of type `kind` is caught by `except filter`.
pub(crate) fn exception_matches(kind: &str, filter: &str) -> bool {
    kind == filter
        || matches!(filter, "Exception" | "BaseException")
        || (filter == "ArithmeticError" && matches!(kind, "ZeroDivisionError" | "OverflowError"))
        || (filter == "LookupError" && matches!(kind, "KeyError" | "IndexError"))
        || (filter == "ImportError" && kind == "ModuleNotFoundError")
        || (filter == "RuntimeError" && kind == "NotImplementedError")
}

fn key_error(key: &Value) -> ScriptError {
    ScriptError::raise("KeyError", key.repr())
}

fn normalize_index(key: &Value, len: usize, what: &str) -> Result<usize, ScriptError> {
    let index = match key {
        Value::Int(i) => *i,
        Value::Bool(b) => i64::from(*b),
        other => {
            return Err(ScriptError::type_error(format!(
                "{what} indices must be integers, not {}",
                other.type_name()
            )));
        }
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { index + len_i } else { index };
    usize::try_from(resolved)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| ScriptError::raise("IndexError", format!("{what} index out of range")))
}

pub(crate) fn subscript(target: &Value, key: &Value) -> Result<Value, ScriptError> {
    match target {
        Value::List(items) => Ok(items[normalize_index(key, items.len(), "list")?].clone()),
        Value::Tuple(items) => Ok(items[normalize_index(key, items.len(), "tuple")?].clone()),
        Value::Str(text) => {
            let count = text.chars().count();
            let index = normalize_index(key, count, "string")?;
            Ok(text
                .chars()
                .nth(index)
                .map_or(Value::None, |c| Value::Str(c.to_string())))
        }
        Value::Dict(entries) => dict_get(entries, key).cloned().ok_or_else(|| key_error(key)),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn item_mut<'v>(container: &'v mut Value, key: &Value) -> Result<&'v mut Value, ScriptError> {
    match container {
        Value::List(items) => {
            let index = normalize_index(key, items.len(), "list")?;
            Ok(&mut items[index])
        }
        Value::Dict(entries) => entries
            .iter_mut()
            .find(|(candidate, _)| py_eq(candidate, key))
            .map(|(_, value)| value)
            .ok_or_else(|| key_error(key)),
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn set_item(container: &mut Value, key: Value, value: Value) -> Result<(), ScriptError> {
    match container {
        Value::List(items) => {
            let index = normalize_index(&key, items.len(), "list assignment")?;
            items[index] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            check_hashable(&key)?;
            dict_set(entries, key, value);
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Indices selected by `[lower:upper:step]` over a sequence of length `len`.
fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, ScriptError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ScriptError::value_error("slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };

    let mut indices = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| clamp(b, 0, len));
        let stop = upper.map_or(len, |b| clamp(b, 0, len));
        let mut i = start;
        while i < stop {
            indices.push(i);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| clamp(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            indices.push(i);
            i += step;
        }
    }
    Ok(indices
        .into_iter()
        .filter_map(|i| usize::try_from(i).ok())
        .collect())
}

fn slice(
    target: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Value, ScriptError> {
    match target {
        Value::List(items) => Ok(Value::List(
            slice_indices(items.len(), lower, upper, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Tuple(items) => Ok(Value::Tuple(
            slice_indices(items.len(), lower, upper, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            Ok(Value::Str(
                slice_indices(chars.len(), lower, upper, step)?
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, ScriptError> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!value.truthy()));
    }
    let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
    match (op, value.as_number()) {
        (UnaryOp::Neg, Some(Numeric::Int(i))) => Ok(i.checked_neg().map_or_else(
            || Value::Float(-Numeric::Int(i).to_f64()),
            Value::Int,
        )),
        (UnaryOp::Neg, Some(Numeric::Float(f))) => Ok(Value::Float(-f)),
        (_, Some(Numeric::Int(i))) => Ok(Value::Int(i)),
        (_, Some(Numeric::Float(f))) => Ok(Value::Float(f)),
        (_, None) => Err(ScriptError::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            value.type_name()
        ))),
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>, ScriptError> {
    let times = usize::try_from(times).unwrap_or(0);
    if items.len().saturating_mul(times) > MAX_SEQUENCE_LEN {
        return Err(ScriptError::raise("MemoryError", "repeated sequence is too large"));
    }
    Ok((0..times).flat_map(|_| items.iter().cloned()).collect())
}

/// Applies an arithmetic operator with Python semantics.
pub(crate) fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return match (a, b) {
            (Numeric::Int(a), Numeric::Int(b)) => int_op(op, a, b),
            (a, b) => float_op(op, a.to_f64(), b.to_f64()),
        };
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => Ok(Value::List([a.as_slice(), b.as_slice()].concat())),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::Tuple([a.as_slice(), b.as_slice()].concat()))
        }
        (BinOp::Mul, Value::Str(text), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(text)) => {
            let chars: Vec<char> = text.chars().collect();
            Ok(Value::Str(repeat(&chars, *n)?.into_iter().collect()))
        }
        (BinOp::Mul, Value::List(items), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
            Ok(Value::List(repeat(items, *n)?))
        }
        (BinOp::Mul, Value::Tuple(items), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Tuple(items)) => {
            Ok(Value::Tuple(repeat(items, *n)?))
        }
        _ => Err(ScriptError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn zero_division(message: &str) -> ScriptError {
    ScriptError::raise("ZeroDivisionError", message)
}

#[allow(clippy::cast_precision_loss)]
fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, ScriptError> {
    let promote = |checked: Option<i64>, fallback: f64| checked.map_or(Value::Float(fallback), Value::Int);
    let (fa, fb) = (a as f64, b as f64);
    match op {
        BinOp::Add => Ok(promote(a.checked_add(b), fa + fb)),
        BinOp::Sub => Ok(promote(a.checked_sub(b), fa - fb)),
        BinOp::Mul => Ok(promote(a.checked_mul(b), fa * fb)),
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(fa / fb))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            Ok(match a.checked_div(b) {
                Some(q) if a % b != 0 && ((a < 0) != (b < 0)) => Value::Int(q - 1),
                Some(q) => Value::Int(q),
                None => Value::Float((fa / fb).floor()),
            })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            let r = a.checked_rem(b).unwrap_or(0);
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float(fa.powf(fb)));
            }
            Ok(promote(
                u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)),
                fa.powf(fb),
            ))
        }
    }
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, ScriptError> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(value))
}

fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => a == b,
        _ => false,
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|x| py_eq(x, item))),
        Value::Dict(entries) => Ok(dict_get(entries, item).is_some()),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
    Ok(match op {
        CmpOp::Eq => py_eq(left, right),
        CmpOp::NotEq => !py_eq(left, right),
        CmpOp::Lt => py_cmp(left, right)? == Ordering::Less,
        CmpOp::LtE => py_cmp(left, right)? != Ordering::Greater,
        CmpOp::Gt => py_cmp(left, right)? == Ordering::Greater,
        CmpOp::GtE => py_cmp(left, right)? != Ordering::Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_and_modulo_follow_python_signs() {
        assert!(matches!(int_op(BinOp::FloorDiv, -7, 2), Ok(Value::Int(-4))));
        assert!(matches!(int_op(BinOp::Mod, -7, 2), Ok(Value::Int(1))));
        assert!(matches!(int_op(BinOp::Mod, 7, -2), Ok(Value::Int(-1))));
        assert!(matches!(int_op(BinOp::Div, 7, 2), Ok(Value::Float(f)) if (f - 3.5).abs() < f64::EPSILON));
    }

    #[test]
    fn integer_overflow_promotes_to_float() {
        assert!(matches!(int_op(BinOp::Mul, i64::MAX, 2), Ok(Value::Float(_))));
        assert!(matches!(int_op(BinOp::Pow, 2, 10), Ok(Value::Int(1024))));
    }

    #[test]
    fn division_by_zero_raises() {
        let err = int_op(BinOp::Div, 1, 0).unwrap_err();
        assert_eq!(err.kind(), Some("ZeroDivisionError"));
    }

    #[test]
    fn slices_match_python() {
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, Some(1), Some(100), Some(2)).unwrap(), vec![1, 3]);
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn lookup_errors_are_catchable_by_base_class() {
        assert!(exception_matches("KeyError", "LookupError"));
        assert!(exception_matches("ZeroDivisionError", "Exception"));
        assert!(!exception_matches("ValueError", "TypeError"));
    }
}
