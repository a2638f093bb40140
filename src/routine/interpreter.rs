//! Tree-walking interpreter for compiled routines
//!
//! Each invocation builds a fresh scope stack and drops it on return, so no
//! state survives from one trial to the next.

use std::fmt;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::ast::{BinaryOp, Expr, FunctionDecl, Stmt, StmtKind, UnaryOp};
use super::value::{as_number, compare, number, truthy, type_name, values_equal};

/// One line of a routine failure trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// 1-based source line
    pub line: usize,
    /// What was executing on that line
    pub context: String,
}

/// Error raised by a routine while it runs (the routine's own exception).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RoutineError {
    message: String,
    /// Innermost frame first.
    trace: Vec<TraceFrame>,
}

impl RoutineError {
    pub(crate) fn raised(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    fn unwound(mut self, line: usize, context: impl Into<String>) -> Self {
        self.trace.push(TraceFrame {
            line,
            context: context.into(),
        });
        self
    }

    /// The raised message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Frames the error unwound through, innermost first.
    #[must_use]
    pub fn trace(&self) -> &[TraceFrame] {
        &self.trace
    }

    /// Full failure trace, outermost frame first, ending with the message.
    #[must_use]
    pub fn format_trace(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.trace.iter().rev() {
            out.push_str(&format!("  {frame}\n"));
        }
        out.push_str(&format!("RoutineError: {}", self.message));
        out
    }
}

/// Control flow out of a statement.
enum Flow {
    Next,
    Return(Value),
}

type Eval<T> = Result<T, RoutineError>;

/// Invoke `decl` with its single argument.
pub(crate) fn invoke(decl: &FunctionDecl, display_name: &str, argument: Value) -> Eval<Value> {
    let mut interpreter = Interpreter {
        scopes: Vec::new(),
        started: Instant::now(),
    };

    let mut frame = FxHashMap::default();
    if let Some(param) = decl.params.first() {
        frame.insert(param.clone(), argument);
    }
    interpreter.scopes.push(frame);

    let flow = interpreter
        .statements(&decl.body)
        .map_err(|e| e.unwound(decl.line, format!("fn {display_name}")))?;

    Ok(match flow {
        Flow::Return(value) => value,
        Flow::Next => Value::Null,
    })
}

struct Interpreter {
    scopes: Vec<FxHashMap<String, Value>>,
    started: Instant,
}

impl Interpreter {
    fn block(&mut self, stmts: &[Stmt]) -> Eval<Flow> {
        self.scopes.push(FxHashMap::default());
        let flow = self.statements(stmts);
        self.scopes.pop();
        flow
    }

    fn statements(&mut self, stmts: &[Stmt]) -> Eval<Flow> {
        for stmt in stmts {
            let flow = self
                .statement(stmt)
                .map_err(|e| e.unwound(stmt.line, stmt.kind.label()))?;
            if let Flow::Return(_) = flow {
                return Ok(flow);
            }
        }
        Ok(Flow::Next)
    }

    fn statement(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                let value = self.eval(expr)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
            }
            StmtKind::Assign(name, expr) => {
                let value = self.eval(expr)?;
                let slot = self
                    .scopes
                    .iter_mut()
                    .rev()
                    .find_map(|scope| scope.get_mut(name))
                    .ok_or_else(|| {
                        RoutineError::raised(format!("assignment to undeclared variable `{name}`"))
                    })?;
                *slot = value;
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let branch = if truthy(&self.eval(cond)?) {
                    then_branch
                } else {
                    else_branch
                };
                return self.block(branch);
            }
            StmtKind::While(cond, body) => {
                while truthy(&self.eval(cond)?) {
                    if let Flow::Return(value) = self.block(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            StmtKind::For(name, iterable, body) => {
                for item in iteration_items(self.eval(iterable)?)? {
                    let mut scope = FxHashMap::default();
                    scope.insert(name.clone(), item);
                    self.scopes.push(scope);
                    let flow = self.statements(body);
                    self.scopes.pop();
                    if let Flow::Return(value) = flow? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(Flow::Next)
    }

    fn lookup(&self, name: &str) -> Eval<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
            .ok_or_else(|| RoutineError::raised(format!("undefined variable `{name}`")))
    }

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Eval<Vec<_>>>()
                .map(Value::Array),
            Expr::Object(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Field(target, field) => match self.eval(target)? {
                Value::Object(mut map) => map
                    .remove(field)
                    .ok_or_else(|| RoutineError::raised(format!("no field `{field}` on object"))),
                other => Err(RoutineError::raised(format!(
                    "cannot read field `{field}` of {}",
                    type_name(&other)
                ))),
            },
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(target, &index).map_err(RoutineError::raised)
            }
            Expr::Call(name, _) => Err(RoutineError::raised(format!(
                "call to unresolved function `{name}`"
            ))),
            Expr::Builtin(builtin, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Eval<Vec<_>>>()?;
                builtin.call(args, self.started).map_err(|message| {
                    RoutineError::raised(message).unwound(0, format!("builtin {}", builtin.name()))
                })
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => as_number(&value, "unary -")
                        .and_then(|x| number(-x))
                        .map_err(RoutineError::raised),
                }
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                let result = truthy(&self.eval(lhs)?) && truthy(&self.eval(rhs)?);
                Ok(Value::Bool(result))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                let result = truthy(&self.eval(lhs)?) || truthy(&self.eval(rhs)?);
                Ok(Value::Bool(result))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs).map_err(RoutineError::raised)
            }
        }
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "in {}", self.context)
        } else {
            write!(f, "line {}, in {}", self.line, self.context)
        }
    }
}

fn iteration_items(value: Value) -> Eval<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(k, _)| Value::String(k)).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(RoutineError::raised(format!(
            "cannot iterate over {}",
            type_name(&other)
        ))),
    }
}

fn index_value(target: Value, index: &Value) -> Result<Value, String> {
    match (target, index) {
        (Value::Array(mut items), Value::Number(_)) => {
            let i = list_index(index, items.len())?;
            Ok(items.swap_remove(i))
        }
        (Value::String(s), Value::Number(_)) => {
            let i = list_index(index, s.chars().count())?;
            Ok(s.chars()
                .nth(i)
                .map_or(Value::Null, |c| Value::String(c.to_string())))
        }
        (Value::Object(mut map), Value::String(key)) => map
            .remove(key)
            .ok_or_else(|| format!("no key {key:?} in object")),
        (target, index) => Err(format!(
            "cannot index {} with {}",
            type_name(&target),
            type_name(index)
        )),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn list_index(index: &Value, len: usize) -> Result<usize, String> {
    let i = as_number(index, "index")?;
    if i.fract() != 0.0 || i < 0.0 {
        return Err(format!("invalid index {i}"));
    }
    let i = i as usize;
    if i >= len {
        return Err(format!("index {i} out of range for length {len}"));
    }
    Ok(i)
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    let mismatch = |lhs: &Value, rhs: &Value| {
        format!(
            "unsupported operand types for {}: {} and {}",
            op.symbol(),
            type_name(lhs),
            type_name(rhs)
        )
    };

    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs).ok_or_else(|| mismatch(&lhs, &rhs))?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (op, lhs, rhs) {
        (BinaryOp::Add, Value::String(mut a), b) => {
            match b {
                Value::String(b) => a.push_str(&b),
                other => a.push_str(&other.to_string()),
            }
            Ok(Value::String(a))
        }
        (BinaryOp::Add, a, Value::String(b)) => {
            Ok(Value::String(format!("{a}{b}")))
        }
        (BinaryOp::Add, Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (op, Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
                    return Err("division by zero".to_string())
                }
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                _ => return Err(format!("unsupported operator {}", op.symbol())),
            };
            number(result)
        }
        (_, lhs, rhs) => Err(mismatch(&lhs, &rhs)),
    }
}
