//! Tree-walking evaluator for parsed transform bodies.

use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::ast::{ArrowBody, AssignOp, BinaryOp, Expr, LogicalOp, Property, Stmt, TemplatePart, UnaryOp};
use super::builtins::{
    self, Builtin, arg, call_builtin, check_list_len, check_string_len, list_method, number_method, property_key, read_property,
    string_method,
};
use super::value::{Func, Val, loose_equals, strict_equals};
use super::{EvalError, HostCalls, StepMeter};

/// Deepest arrow-function call nesting.
const MAX_CLOSURE_DEPTH: usize = 64;
/// Furthest past the end of an array an index assignment may reach.
const MAX_SPARSE_GAP: usize = 10_000;

pub type Scope = HashMap<String, Binding>;

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Val,
    pub mutable: bool,
}

enum Flow {
    Normal,
    Return(Val),
}

pub struct Interpreter<'h> {
    scopes: Vec<Scope>,
    /// Top-level context keys, readable as bare names.
    aliases: IndexMap<String, Val>,
    host: &'h mut dyn HostCalls,
    meter: &'h StepMeter,
    /// Steps spent by this evaluation alone; the meter also counts reentrant calls.
    steps: u64,
    closure_depth: usize,
    completion: Val,
}

impl<'h> Interpreter<'h> {
    pub fn new(context: &Map<String, Value>, host: &'h mut dyn HostCalls, meter: &'h StepMeter) -> Result<Self, EvalError> {
        let aliases: IndexMap<String, Val> = context.iter().map(|(key, value)| (key.clone(), Val::from_json(value))).collect();
        let context = Val::Rec(aliases.clone());
        meter.charge(context.weight())?;
        let mut root = Scope::new();
        root.insert(
            "context".to_string(),
            Binding {
                value: context,
                mutable: true,
            },
        );
        Ok(Self {
            scopes: vec![root],
            aliases,
            host,
            meter,
            steps: 0,
            closure_depth: 0,
            completion: Val::Undefined,
        })
    }

    /// Runs the program and returns the first `return` value, else the last expression value.
    pub fn run(&mut self, program: &[Stmt]) -> Result<Value, EvalError> {
        match self.exec_stmts(program)? {
            Flow::Return(value) => Ok(value.to_json()),
            Flow::Normal => Ok(mem::replace(&mut self.completion, Val::Undefined).to_json()),
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.charge(1)
    }

    fn charge(&mut self, steps: u64) -> Result<(), EvalError> {
        self.steps = self.steps.saturating_add(steps);
        self.meter.charge(steps)
    }

    /// Charges for the deep copy behind `value` beyond the step already ticked for it.
    fn charged(&mut self, value: Val) -> Result<Val, EvalError> {
        let extra = value.weight().saturating_sub(1);
        if extra > 0 {
            self.charge(extra)?;
        }
        Ok(value)
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow, EvalError> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: Scope) -> Result<Flow, EvalError> {
        self.scopes.push(scope);
        let flow = self.exec_stmts(stmts);
        self.scopes.pop();
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, EvalError> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, mutable, value } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Val::Undefined,
                };
                let scope = self.scopes.last_mut().ok_or_else(|| EvalError::Runtime("no active scope".to_string()))?;
                if scope.contains_key(name) {
                    return Err(EvalError::Runtime(format!("identifier '{name}' has already been declared")));
                }
                scope.insert(name.clone(), Binding { value, mutable: *mutable });
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                let value = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => binary_op(BinaryOp::Add, &self.eval(target)?, &rhs)?,
                    AssignOp::Sub => binary_op(BinaryOp::Sub, &self.eval(target)?, &rhs)?,
                    AssignOp::Mul => binary_op(BinaryOp::Mul, &self.eval(target)?, &rhs)?,
                };
                self.assign(target, value)?;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition)?.truthy() {
                    return self.exec_block(then_branch, Scope::new());
                }
                if let Some(else_branch) = else_branch {
                    return self.exec_block(else_branch, Scope::new());
                }
            }
            Stmt::ForOf { binding, iterable, body } => {
                let items = match self.eval(iterable)? {
                    Val::List(items) => items,
                    Val::Str(text) => {
                        check_list_len(text.chars().count())?;
                        text.chars().map(|ch| Val::Str(ch.to_string())).collect()
                    }
                    other => return Err(EvalError::Type(format!("{} is not iterable", other.type_of()))),
                };
                for item in items {
                    let mut scope = Scope::new();
                    scope.insert(
                        binding.clone(),
                        Binding {
                            value: item,
                            mutable: false,
                        },
                    );
                    if let Flow::Return(value) = self.exec_block(body, scope)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Val::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Block(stmts) => return self.exec_block(stmts, Scope::new()),
            Stmt::Expr(expr) => {
                self.completion = self.eval(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn lookup(&self, name: &str) -> Result<Val, EvalError> {
        if let Some(binding) = self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            return Ok(binding.value.clone());
        }
        if let Some(global) = builtins::global(name) {
            return Ok(global);
        }
        self.aliases.get(name).cloned().ok_or_else(|| EvalError::Reference(name.to_string()))
    }

    fn binding_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name))
    }

    fn assign(&mut self, target: &Expr, value: Val) -> Result<(), EvalError> {
        let (root, path) = self.member_path(target)?;
        let is_alias = self.aliases.contains_key(&root);
        let Some(binding) = self.binding_mut(&root) else {
            if is_alias {
                return Err(EvalError::Type(format!("'{root}' is read-only; assign through context.{root} instead")));
            }
            return Err(EvalError::Reference(root));
        };

        let Some((last, parents)) = path.split_last() else {
            if !binding.mutable {
                return Err(EvalError::Type(format!("assignment to constant variable '{root}'")));
            }
            binding.value = value;
            return Ok(());
        };

        let mut current = &mut binding.value;
        for key in parents {
            current = match current {
                Val::Rec(map) => map.get_mut(key),
                Val::List(items) => key.parse::<usize>().ok().and_then(|index| items.get_mut(index)),
                _ => None,
            }
            .ok_or_else(|| EvalError::Type(format!("cannot set properties of undefined (setting '{last}')")))?;
        }
        match current {
            Val::Rec(map) => {
                map.insert(last.clone(), value);
            }
            Val::List(items) => {
                let index = last
                    .parse::<usize>()
                    .map_err(|_| EvalError::Type(format!("invalid array index '{last}'")))?;
                if index > items.len() + MAX_SPARSE_GAP {
                    return Err(EvalError::Runtime(format!("array index {index} is too far past the end")));
                }
                if index >= items.len() {
                    check_list_len(index + 1)?;
                    items.resize(index + 1, Val::Undefined);
                }
                items[index] = value;
            }
            other => {
                return Err(EvalError::Type(format!("cannot set property '{last}' of {}", other.type_of())));
            }
        }
        Ok(())
    }

    /// Splits `a.b[c]` into the root name and evaluated keys.
    fn member_path(&mut self, expr: &Expr) -> Result<(String, Vec<String>), EvalError> {
        match expr {
            Expr::Ident(name) => Ok((name.clone(), Vec::new())),
            Expr::Member { object, property, .. } => {
                let (root, mut path) = self.member_path(object)?;
                path.push(self.property(property)?);
                Ok((root, path))
            }
            _ => Err(EvalError::Type("invalid assignment target".to_string())),
        }
    }

    fn property(&mut self, property: &Property) -> Result<String, EvalError> {
        match property {
            Property::Named(name) => Ok(name.clone()),
            Property::Computed(expr) => Ok(property_key(&self.eval(expr)?)),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Val, EvalError> {
        self.tick()?;
        Ok(match expr {
            Expr::Num(n) => Val::Num(*n),
            Expr::Str(s) => Val::Str(s.clone()),
            Expr::Bool(b) => Val::Bool(*b),
            Expr::Null => Val::Null,
            Expr::Undefined => Val::Undefined,
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => out.push_str(&self.eval(expr)?.to_display()),
                    }
                    check_string_len(out.len())?;
                }
                Val::Str(out)
            }
            Expr::Ident(name) => {
                let value = self.lookup(name)?;
                self.charged(value)?
            }
            Expr::Array(items) => {
                check_list_len(items.len())?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Val::List(out)
            }
            Expr::Object(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    out.insert(key.clone(), value);
                }
                Val::Rec(out)
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let receiver = self.eval(object)?;
                let key = self.property(property)?;
                if receiver.is_nullish() {
                    if *optional {
                        return Ok(Val::Undefined);
                    }
                    return Err(read_of_nullish(&receiver, &key));
                }
                read_property(&receiver, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args)?,
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => Val::Bool(!self.eval(operand)?.truthy()),
                UnaryOp::Neg => Val::Num(-self.eval(operand)?.to_number()),
                UnaryOp::Plus => Val::Num(self.eval(operand)?.to_number()),
                UnaryOp::TypeOf => match self.eval(operand) {
                    Ok(value) => Val::Str(value.type_of().to_string()),
                    Err(EvalError::Reference(_)) if matches!(operand.as_ref(), Expr::Ident(_)) => Val::Str("undefined".to_string()),
                    Err(error) => return Err(error),
                },
            },
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right)?
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit { left } else { self.eval(right)? }
            }
            Expr::Conditional { condition, then, otherwise } => {
                if self.eval(condition)?.truthy() {
                    self.eval(then)?
                } else {
                    self.eval(otherwise)?
                }
            }
            Expr::Arrow(def) => {
                let weight = scopes_weight(&self.scopes);
                self.charge(weight)?;
                Val::Func(Rc::new(Func {
                    def: Rc::clone(def),
                    env: self.scopes.clone(),
                    weight,
                }))
            }
        })
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Val>, EvalError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(arg)?);
        }
        Ok(out)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Val, EvalError> {
        let Expr::Member {
            object,
            property,
            optional,
        } = callee
        else {
            let function = self.eval(callee)?;
            let args = self.eval_args(args)?;
            return self.call_value(&function, args);
        };

        let name = self.property(property)?;
        if name == "push"
            && let Expr::Ident(root) = object.as_ref()
            && matches!(self.binding_mut(root), Some(Binding { value: Val::List(_), .. }))
        {
            let args = self.eval_args(args)?;
            let Some(Binding {
                value: Val::List(items), ..
            }) = self.binding_mut(root)
            else {
                return Err(EvalError::Type(format!("{root}.push is not a function")));
            };
            check_list_len(items.len() + args.len())?;
            items.extend(args);
            return Ok(Val::Num(items.len() as f64));
        }

        let receiver = self.eval(object)?;
        if receiver.is_nullish() {
            if *optional {
                return Ok(Val::Undefined);
            }
            return Err(read_of_nullish(&receiver, &name));
        }
        let args = self.eval_args(args)?;
        self.call_method(receiver, &name, args)
    }

    fn call_method(&mut self, receiver: Val, name: &str, args: Vec<Val>) -> Result<Val, EvalError> {
        match receiver {
            Val::Namespace(_) => {
                let function = read_property(&receiver, name);
                if matches!(function, Val::Undefined) {
                    return Err(EvalError::Type(format!("{}.{name} is not a function", receiver.to_display())));
                }
                self.call_value(&function, args)
            }
            Val::Str(text) => {
                let value = string_method(&text, name, &args)?;
                self.charged(value)
            }
            Val::Num(n) => number_method(n, name, &args),
            Val::Bool(b) if name == "toString" => Ok(Val::Str(b.to_string())),
            Val::List(items) => match list_method(&items, name, &args)? {
                Some(value) => self.charged(value),
                None => self.list_callback_method(items, name, args),
            },
            Val::Rec(map) => match map.get(name) {
                Some(function @ (Val::Func(_) | Val::Builtin(_))) => {
                    let function = function.clone();
                    self.call_value(&function, args)
                }
                _ => Err(EvalError::Type(format!("object.{name} is not a function"))),
            },
            other => Err(EvalError::Type(format!("{}.{name} is not a function", other.type_of()))),
        }
    }

    fn list_callback_method(&mut self, items: Vec<Val>, name: &str, args: Vec<Val>) -> Result<Val, EvalError> {
        let callback = arg(&args, 0);
        if !matches!(callback, Val::Func(_) | Val::Builtin(_)) {
            if name == "push" {
                return Err(EvalError::Type("push is only supported on arrays held in local variables".to_string()));
            }
            if matches!(name, "map" | "filter" | "find" | "findIndex" | "some" | "every" | "forEach" | "reduce") {
                return Err(EvalError::Type(format!("{} is not a function", callback.to_display())));
            }
            return Err(EvalError::Type(format!("array.{name} is not a function")));
        }

        let call = |this: &mut Self, item: &Val, index: usize| this.call_value(&callback, vec![item.clone(), Val::Num(index as f64)]);
        Ok(match name {
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    out.push(call(self, item, index)?);
                }
                Val::List(out)
            }
            "filter" => {
                let mut out = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    if call(self, item, index)?.truthy() {
                        out.push(item.clone());
                    }
                }
                Val::List(out)
            }
            "find" => {
                for (index, item) in items.iter().enumerate() {
                    if call(self, item, index)?.truthy() {
                        return Ok(item.clone());
                    }
                }
                Val::Undefined
            }
            "findIndex" => {
                for (index, item) in items.iter().enumerate() {
                    if call(self, item, index)?.truthy() {
                        return Ok(Val::Num(index as f64));
                    }
                }
                Val::Num(-1.0)
            }
            "some" => {
                for (index, item) in items.iter().enumerate() {
                    if call(self, item, index)?.truthy() {
                        return Ok(Val::Bool(true));
                    }
                }
                Val::Bool(false)
            }
            "every" => {
                for (index, item) in items.iter().enumerate() {
                    if !call(self, item, index)?.truthy() {
                        return Ok(Val::Bool(false));
                    }
                }
                Val::Bool(true)
            }
            "forEach" => {
                for (index, item) in items.iter().enumerate() {
                    call(self, item, index)?;
                }
                Val::Undefined
            }
            "reduce" => {
                let mut entries = items.iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match entries.next() {
                        Some((_, first)) => first.clone(),
                        None => return Err(EvalError::Type("reduce of empty array with no initial value".to_string())),
                    },
                };
                for (index, item) in entries {
                    acc = self.call_value(&callback, vec![acc, item.clone(), Val::Num(index as f64)])?;
                }
                acc
            }
            _ => return Err(EvalError::Type(format!("array.{name} is not a function"))),
        })
    }

    fn call_value(&mut self, function: &Val, args: Vec<Val>) -> Result<Val, EvalError> {
        match function {
            Val::Func(func) => self.call_closure(func, args),
            Val::Builtin(Builtin::Execute) => {
                let name = arg(&args, 0).to_display();
                let context = match arg(&args, 1) {
                    Val::Undefined | Val::Null => Map::new(),
                    Val::Rec(_) => match arg(&args, 1).to_json() {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    },
                    other => return Err(EvalError::Type(format!("execute context must be an object, found {}", other.type_of()))),
                };
                let result = self.host.execute(&name, context)?;
                if self.meter.is_exhausted() {
                    return Err(EvalError::StepBudget(self.meter.limit()));
                }
                self.charged(Val::from_json(&result))
            }
            Val::Builtin(builtin) => {
                let value = call_builtin(*builtin, &args)?;
                self.charged(value)
            }
            other => Err(EvalError::Type(format!("{} is not a function", other.type_of()))),
        }
    }

    fn call_closure(&mut self, func: &Rc<Func>, args: Vec<Val>) -> Result<Val, EvalError> {
        if self.closure_depth >= MAX_CLOSURE_DEPTH {
            return Err(EvalError::Runtime("maximum call stack size exceeded".to_string()));
        }
        self.charge(func.weight)?;
        let mut scope = Scope::new();
        let mut args = args.into_iter();
        for param in &func.def.params {
            scope.insert(
                param.clone(),
                Binding {
                    value: args.next().unwrap_or(Val::Undefined),
                    mutable: true,
                },
            );
        }

        let saved = mem::replace(&mut self.scopes, func.env.clone());
        self.scopes.push(scope);
        self.closure_depth += 1;
        let result = match &func.def.body {
            ArrowBody::Expr(expr) => self.eval(expr),
            ArrowBody::Block(stmts) => self.exec_stmts(stmts).map(|flow| match flow {
                Flow::Return(value) => value,
                Flow::Normal => Val::Undefined,
            }),
        };
        self.closure_depth -= 1;
        self.scopes = saved;
        result
    }
}

fn read_of_nullish(receiver: &Val, key: &str) -> EvalError {
    EvalError::Type(format!("cannot read properties of {} (reading '{key}')", receiver.to_display()))
}

fn scopes_weight(scopes: &[Scope]) -> u64 {
    scopes
        .iter()
        .flat_map(|scope| scope.values())
        .fold(1, |acc, binding| acc.saturating_add(binding.value.weight()))
}

fn binary_op(op: BinaryOp, left: &Val, right: &Val) -> Result<Val, EvalError> {
    let numeric = |f: fn(f64, f64) -> f64| Val::Num(f(left.to_number(), right.to_number()));
    Ok(match op {
        BinaryOp::Add => {
            let concat = matches!(left, Val::Str(_) | Val::List(_) | Val::Rec(_)) || matches!(right, Val::Str(_) | Val::List(_) | Val::Rec(_));
            if concat {
                let mut out = left.to_display();
                out.push_str(&right.to_display());
                check_string_len(out.len())?;
                Val::Str(out)
            } else {
                numeric(|a, b| a + b)
            }
        }
        BinaryOp::Sub => numeric(|a, b| a - b),
        BinaryOp::Mul => numeric(|a, b| a * b),
        BinaryOp::Div => numeric(|a, b| a / b),
        BinaryOp::Rem => numeric(|a, b| a % b),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Ok(Val::Bool(false));
            };
            Val::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::LooseEq => Val::Bool(loose_equals(left, right)),
        BinaryOp::LooseNe => Val::Bool(!loose_equals(left, right)),
        BinaryOp::StrictEq => Val::Bool(strict_equals(left, right)),
        BinaryOp::StrictNe => Val::Bool(!strict_equals(left, right)),
    })
}
