//! Tree-walking evaluator for Flow programs
//!
//! Name resolution walks the block scopes innermost first and then falls back
//! to the engine's global namespace. `let` declares in the innermost scope;
//! assigning a name that is not bound anywhere creates a global, so state a
//! script keeps between runs lives in the globals.

use std::collections::HashMap;

use super::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use super::errors::{self, ErrorInfo, ScriptError};
use super::stdlib::call_stdlib_func;
use super::values::Val;

/* ===================== Control Flow ===================== */

/// Outcome of executing one statement
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Normal,
    Break,
    Continue,
    Return(Val),
}

/// Non-local exit that unwinds through statements
#[derive(Debug, Clone)]
enum Unwind {
    Throw(Val),
    Limit(u64),
}

impl From<ErrorInfo> for Unwind {
    fn from(info: ErrorInfo) -> Self {
        Unwind::Throw(Val::Error(info))
    }
}

type Eval<T> = Result<T, Unwind>;

fn raise<T>(code: &str, message: impl Into<String>) -> Eval<T> {
    Err(ErrorInfo::new(code, message).into())
}

/* ===================== Public API ===================== */

/// Run a program against a global namespace
///
/// Returns the value of the last expression statement, or the value passed
/// to a top-level `return`.
pub fn evaluate(
    program: &Program,
    globals: &mut HashMap<String, Val>,
    max_operations: Option<u64>,
) -> Result<Val, ScriptError> {
    let mut interp = Interpreter {
        globals,
        scopes: Vec::new(),
        operations: 0,
        max_operations,
        last: Val::Null,
    };

    let outcome = interp.exec_body(&program.body);
    match outcome {
        Ok(Control::Normal) => Ok(interp.last),
        Ok(Control::Return(v)) => Ok(v),
        Ok(Control::Break) | Ok(Control::Continue) => Err(ScriptError::Raised(ErrorInfo::new(
            errors::TYPE_ERROR,
            "'break' or 'continue' outside of a loop",
        ))),
        Err(Unwind::Throw(v)) => Err(ScriptError::Raised(thrown_to_info(v))),
        Err(Unwind::Limit(n)) => Err(ScriptError::OperationLimit(n)),
    }
}

fn thrown_to_info(value: Val) -> ErrorInfo {
    match value {
        Val::Error(info) => info,
        other => ErrorInfo::new(errors::THROWN, other.to_display_string()),
    }
}

/* ===================== Interpreter ===================== */

struct Interpreter<'g> {
    globals: &'g mut HashMap<String, Val>,
    scopes: Vec<HashMap<String, Val>>,
    operations: u64,
    max_operations: Option<u64>,
    last: Val,
}

impl Interpreter<'_> {
    fn tick(&mut self) -> Eval<()> {
        self.operations += 1;
        match self.max_operations {
            Some(max) if self.operations > max => Err(Unwind::Limit(max)),
            _ => Ok(()),
        }
    }

    /* ---------- scopes ---------- */

    fn lookup(&self, name: &str) -> Eval<Val> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Ok(v.clone());
            }
        }
        match self.globals.get(name) {
            Some(v) => Ok(v.clone()),
            None => raise(
                errors::UNDEFINED_VARIABLE,
                format!("'{}' is not defined", name),
            ),
        }
    }

    fn declare(&mut self, name: &str, value: Val) {
        match self.scopes.last_mut() {
            Some(scope) => scope.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    fn assign(&mut self, name: &str, value: Val) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.globals.insert(name.to_string(), value);
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Eval<T>) -> Eval<T> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    /* ---------- statements ---------- */

    fn exec_body(&mut self, body: &[Stmt]) -> Eval<Control> {
        for stmt in body {
            match self.exec(stmt)? {
                Control::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Control::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Eval<Control> {
        self.tick()?;
        match stmt {
            Stmt::Block { body } => self.scoped(|this| this.exec_body(body)),
            Stmt::Let { name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Val::Null,
                };
                self.declare(name, value);
                Ok(Control::Normal)
            }
            Stmt::Assign { name, expr } => {
                let value = self.eval(expr)?;
                self.assign(name, value);
                Ok(Control::Normal)
            }
            Stmt::Expr { expr } => {
                self.last = self.eval(expr)?;
                Ok(Control::Normal)
            }
            Stmt::If {
                test,
                then_s,
                else_s,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.exec(then_s)
                } else if let Some(else_s) = else_s {
                    self.exec(else_s)
                } else {
                    Ok(Control::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test)?.is_truthy() {
                    match self.exec(body)? {
                        Control::Break => break,
                        Control::Return(v) => return Ok(Control::Return(v)),
                        Control::Normal | Control::Continue => {}
                    }
                }
                Ok(Control::Normal)
            }
            Stmt::For {
                iterator,
                iterable,
                body,
            } => {
                let collection = self.eval(iterable)?;
                let items = iteration_items(collection)?;
                for item in items {
                    let control = self.scoped(|this| {
                        this.declare(iterator, item);
                        this.exec(body)
                    })?;
                    match control {
                        Control::Break => break,
                        Control::Return(v) => return Ok(Control::Return(v)),
                        Control::Normal | Control::Continue => {}
                    }
                }
                Ok(Control::Normal)
            }
            Stmt::Try {
                body,
                catch_var,
                catch_body,
            } => match self.exec(body) {
                Err(Unwind::Throw(thrown)) => self.scoped(|this| {
                    this.declare(catch_var, thrown);
                    this.exec(catch_body)
                }),
                other => other,
            },
            Stmt::Return { value } => {
                let v = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Val::Null,
                };
                Ok(Control::Return(v))
            }
            Stmt::Throw { value } => {
                let v = self.eval(value)?;
                Err(Unwind::Throw(v))
            }
            Stmt::Break => Ok(Control::Break),
            Stmt::Continue => Ok(Control::Continue),
        }
    }

    /* ---------- expressions ---------- */

    fn eval(&mut self, expr: &Expr) -> Eval<Val> {
        match expr {
            Expr::LitNull => Ok(Val::Null),
            Expr::LitBool { v } => Ok(Val::Bool(*v)),
            Expr::LitNum { v } => Ok(Val::Num(*v)),
            Expr::LitStr { v } => Ok(Val::Str(v.clone())),
            Expr::LitList { items } => Ok(Val::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Eval<Vec<_>>>()?,
            )),
            Expr::LitObj { entries } => {
                let mut map = HashMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let v = self.eval(value)?;
                    map.insert(key.clone(), v);
                }
                Ok(Val::Obj(map))
            }
            Expr::Ident { name } => self.lookup(name),
            Expr::Member { object, property } => {
                let target = self.eval(object)?;
                self.member(target, property)
            }
            Expr::Index { object, index } => {
                let target = self.eval(object)?;
                let key = self.eval(index)?;
                index_value(target, key)
            }
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match (op, v) {
                    (UnaryOp::Not, v) => Ok(Val::Bool(!v.is_truthy())),
                    (UnaryOp::Neg, Val::Num(n)) => Ok(Val::Num(-n)),
                    (UnaryOp::Neg, other) => raise(
                        errors::TYPE_ERROR,
                        format!("cannot negate {}", other.type_name()),
                    ),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                // Short-circuit operators yield an operand, not a bool
                match op {
                    BinaryOp::And if !l.is_truthy() => return Ok(l),
                    BinaryOp::Or if l.is_truthy() => return Ok(l),
                    BinaryOp::And | BinaryOp::Or => return self.eval(right),
                    _ => {}
                }
                let r = self.eval(right)?;
                binary(*op, l, r)
            }
        }
    }

    fn member(&self, target: Val, property: &str) -> Eval<Val> {
        match target {
            Val::Host(host) => host.get(property).ok_or_else(|| {
                ErrorInfo::new(
                    errors::PROPERTY_NOT_FOUND,
                    format!("{} has no property '{}'", host.type_name(), property),
                )
                .into()
            }),
            Val::Obj(mut map) => Ok(map.remove(property).unwrap_or(Val::Null)),
            Val::Error(info) => match property {
                "code" => Ok(Val::Str(info.code)),
                "message" => Ok(Val::Str(info.message)),
                _ => Ok(Val::Null),
            },
            other => raise(
                errors::PROPERTY_NOT_FOUND,
                format!("{} has no property '{}'", other.type_name(), property),
            ),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Eval<Val> {
        self.tick()?;

        // Method call on a host object dispatches by name
        let function = if let Expr::Member { object, property } = callee {
            let target = self.eval(object)?;
            if let Val::Host(host) = target {
                let args = self.eval_args(args)?;
                return Ok(host.call(property, args)?);
            }
            self.member(target, property)?
        } else {
            self.eval(callee)?
        };

        match function {
            Val::NativeFunc(func) => {
                let args = self.eval_args(args)?;
                Ok(call_stdlib_func(func, args)?)
            }
            other => raise(
                errors::NOT_A_FUNCTION,
                format!("{} is not callable", other.type_name()),
            ),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Eval<Vec<Val>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }
}

/* ===================== Operators ===================== */

fn iteration_items(value: Val) -> Eval<Vec<Val>> {
    match value {
        Val::List(items) => Ok(items),
        Val::Obj(map) => {
            let mut keys: Vec<String> = map.into_keys().collect();
            keys.sort();
            Ok(keys.into_iter().map(Val::Str).collect())
        }
        Val::Str(s) => Ok(s.chars().map(|c| Val::Str(c.to_string())).collect()),
        Val::Bytes(b) => Ok(b.into_iter().map(|byte| Val::Num(byte as f64)).collect()),
        other => raise(
            errors::TYPE_ERROR,
            format!("cannot iterate over {}", other.type_name()),
        ),
    }
}

fn index_value(target: Val, key: Val) -> Eval<Val> {
    match (target, key) {
        (Val::List(mut items), Val::Num(n)) => {
            let i = checked_index(n, items.len())?;
            Ok(items.swap_remove(i))
        }
        (Val::Str(s), Val::Num(n)) => {
            let chars: Vec<char> = s.chars().collect();
            let i = checked_index(n, chars.len())?;
            Ok(Val::Str(chars[i].to_string()))
        }
        (Val::Bytes(b), Val::Num(n)) => {
            let i = checked_index(n, b.len())?;
            Ok(Val::Num(b[i] as f64))
        }
        (Val::Obj(mut map), Val::Str(key)) => Ok(map.remove(&key).unwrap_or(Val::Null)),
        (target, key) => raise(
            errors::TYPE_ERROR,
            format!(
                "cannot index {} with {}",
                target.type_name(),
                key.type_name()
            ),
        ),
    }
}

fn checked_index(n: f64, len: usize) -> Eval<usize> {
    if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
        return raise(
            errors::INDEX_OUT_OF_BOUNDS,
            format!("index {} out of bounds for length {}", n, len),
        );
    }
    Ok(n as usize)
}

fn binary(op: BinaryOp, l: Val, r: Val) -> Eval<Val> {
    match op {
        BinaryOp::Eq => Ok(Val::Bool(l == r)),
        BinaryOp::Ne => Ok(Val::Bool(l != r)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&l, &r) {
                (Val::Num(a), Val::Num(b)) => a.partial_cmp(b),
                (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return raise(
                    errors::TYPE_ERROR,
                    format!("cannot compare {} with {}", l.type_name(), r.type_name()),
                );
            };
            Ok(Val::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add => match (l, r) {
            (Val::Num(a), Val::Num(b)) => Ok(Val::Num(a + b)),
            (Val::List(mut a), Val::List(b)) => {
                a.extend(b);
                Ok(Val::List(a))
            }
            (Val::Bytes(mut a), Val::Bytes(b)) => {
                a.extend(b);
                Ok(Val::Bytes(a))
            }
            (Val::Str(a), b) => Ok(Val::Str(a + &b.to_display_string())),
            (a, Val::Str(b)) => Ok(Val::Str(a.to_display_string() + &b)),
            (a, b) => raise(
                errors::TYPE_ERROR,
                format!("cannot add {} and {}", a.type_name(), b.type_name()),
            ),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Val::Num(a), Val::Num(b)) = (&l, &r) else {
                return raise(
                    errors::TYPE_ERROR,
                    format!(
                        "arithmetic on {} and {}",
                        l.type_name(),
                        r.type_name()
                    ),
                );
            };
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Sub => Ok(Val::Num(a - b)),
                BinaryOp::Mul => Ok(Val::Num(a * b)),
                _ if b == 0.0 => raise(errors::DIVISION_BY_ZERO, "division by zero"),
                BinaryOp::Div => Ok(Val::Num(a / b)),
                _ => Ok(Val::Num(a % b)),
            }
        }
        // Handled with short-circuiting in the evaluator
        BinaryOp::And | BinaryOp::Or => Ok(r),
    }
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod tests;
