//! Routine loading and invocation
//!
//! A routine is the experiment-supplied function that performs the actual
//! trial work. Its source is untrusted text fetched from the store, written
//! in a small embedded scripting language rather than host-language code:
//!
//! ```text
//! # Comments start with '#' or '//'
//! fn run_trial(trial) {
//!     let cells = trial.task.n_samples * trial.task.n_features;
//!     if cells > 1000000 {
//!         fail("task too large for " + trial.method);
//!     }
//!     sleep(0.01);
//!     return {cells: cells, method: trial.method};
//! }
//! ```
//!
//! ## Loading
//!
//! 1. Tokenize (Logos) and parse into a syntax tree
//! 2. Validate shape: exactly one top-level function with one parameter
//! 3. Rebind the function to [`ENTRY_POINT`], whatever its author named it
//! 4. Resolve every call against the builtin table (unknown names and wrong
//!    arity are load failures)
//!
//! Any failure is [`Error::Configuration`], fatal to the worker before it
//! claims a trial. Failures raised while the routine runs are
//! [`RoutineError`]s instead.
//!
//! ## Example
//!
//! ```rust
//! use trueno_trials::routine::{RoutineLoader, RoutineSource, ENTRY_POINT};
//!
//! let source = RoutineSource::new("fn score(t) { return t.x * 2; }");
//! let routine = RoutineLoader::new().load(&source)?;
//! assert_eq!(routine.name(), ENTRY_POINT);
//! assert_eq!(routine.original_name(), "score");
//!
//! let result = routine.invoke(serde_json::json!({"x": 21}))?;
//! assert_eq!(result, serde_json::json!(42));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod ast;
mod builtins;
mod interpreter;
mod lexer;
mod parser;
mod value;

pub use builtins::Builtin;
pub use interpreter::{RoutineError, TraceFrame};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::trial::Trial;
use crate::{Error, Result};
use ast::{Expr, FunctionDecl, Item, Stmt, StmtKind};

/// Reserved name every loaded routine is bound under.
pub const ENTRY_POINT: &str = "__trial_entry__";

/// Raw routine source text as stored for an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutineSource(String);

impl RoutineSource {
    /// Wrap source text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Get the source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the source text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for RoutineSource {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for RoutineSource {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Turns routine source into a [`CompiledRoutine`].
///
/// Loading performs no I/O and never invokes the routine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutineLoader {
    _private: (),
}

impl RoutineLoader {
    /// Create a new loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Parse, validate, bind and resolve `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] ("serialized code not valid") if the
    /// source does not parse, is not exactly one top-level function taking
    /// one parameter, or calls an unknown builtin.
    pub fn load(&self, source: &RoutineSource) -> Result<CompiledRoutine> {
        let program = parser::parse(source.as_str()).map_err(|e| invalid(e.to_string()))?;

        let mut items = program.items.into_iter();
        let mut decl = match items.next() {
            Some(Item::Function(decl)) => decl,
            Some(Item::Statement(stmt)) => {
                return Err(invalid(format!(
                    "top level must be a function definition, found {} statement on line {}",
                    stmt.kind.label(),
                    stmt.line
                )))
            }
            None => return Err(invalid("source is empty")),
        };

        let extra = items.count();
        if extra > 0 {
            return Err(invalid(format!(
                "expected a single top-level function definition, found {} items",
                extra + 1
            )));
        }

        if decl.params.len() != 1 {
            return Err(invalid(format!(
                "function `{}` on line {} must take exactly one parameter (the trial), found {}",
                decl.name,
                decl.line,
                decl.params.len()
            )));
        }

        let original_name = std::mem::replace(&mut decl.name, ENTRY_POINT.to_string());
        resolve_block(&mut decl.body)?;

        tracing::debug!(
            routine = %original_name,
            entry = ENTRY_POINT,
            statements = decl.body.len(),
            "Routine loaded"
        );

        Ok(CompiledRoutine {
            entry: Arc::new(decl),
            original_name,
        })
    }
}

/// Loaded, callable routine bound under [`ENTRY_POINT`].
///
/// Cheap to clone; clones share the same syntax tree. Invocations share no
/// mutable state.
#[derive(Clone)]
pub struct CompiledRoutine {
    entry: Arc<FunctionDecl>,
    original_name: String,
}

impl CompiledRoutine {
    /// Bound entry name (always [`ENTRY_POINT`]).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Name the routine's author gave the function.
    #[must_use]
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Invoke the routine with an arbitrary argument value.
    ///
    /// # Errors
    ///
    /// Returns the [`RoutineError`] the routine raised.
    pub fn invoke(
        &self,
        argument: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, RoutineError> {
        interpreter::invoke(&self.entry, &self.original_name, argument)
    }

    /// Invoke the routine on a trial's JSON view.
    ///
    /// # Errors
    ///
    /// Returns the [`RoutineError`] the routine raised.
    pub fn invoke_trial(
        &self,
        trial: &Trial,
    ) -> std::result::Result<serde_json::Value, RoutineError> {
        self.invoke(trial.to_value())
    }
}

impl fmt::Debug for CompiledRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoutine")
            .field("name", &self.entry.name)
            .field("original_name", &self.original_name)
            .field("line", &self.entry.line)
            .finish_non_exhaustive()
    }
}

fn invalid(reason: impl fmt::Display) -> Error {
    Error::Configuration(format!("serialized code not valid: {reason}"))
}

fn resolve_block(stmts: &mut [Stmt]) -> Result<()> {
    for stmt in stmts {
        let line = stmt.line;
        match &mut stmt.kind {
            StmtKind::Let(_, expr) | StmtKind::Assign(_, expr) | StmtKind::Expr(expr) => {
                resolve_expr(expr, line)?;
            }
            StmtKind::Return(expr) => {
                if let Some(expr) = expr {
                    resolve_expr(expr, line)?;
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                resolve_expr(cond, line)?;
                resolve_block(then_branch)?;
                resolve_block(else_branch)?;
            }
            StmtKind::While(cond, body) | StmtKind::For(_, cond, body) => {
                resolve_expr(cond, line)?;
                resolve_block(body)?;
            }
        }
    }
    Ok(())
}

fn resolve_expr(expr: &mut Expr, line: usize) -> Result<()> {
    match expr {
        Expr::Literal(_) | Expr::Var(_) => Ok(()),
        Expr::List(items) | Expr::Builtin(_, items) => {
            items.iter_mut().try_for_each(|item| resolve_expr(item, line))
        }
        Expr::Object(entries) => entries
            .iter_mut()
            .try_for_each(|(_, value)| resolve_expr(value, line)),
        Expr::Field(target, _) | Expr::Unary(_, target) => resolve_expr(target, line),
        Expr::Index(lhs, rhs) | Expr::Binary(_, lhs, rhs) => {
            resolve_expr(lhs, line)?;
            resolve_expr(rhs, line)
        }
        Expr::Call(name, args) => {
            let builtin = Builtin::lookup(name)
                .ok_or_else(|| invalid(format!("unknown function `{name}` on line {line}")))?;
            let (min, max) = builtin.arity();
            if args.len() < min || args.len() > max {
                return Err(invalid(format!(
                    "`{name}` on line {line} takes {} argument(s), found {}",
                    if min == max {
                        min.to_string()
                    } else {
                        format!("{min}-{max}")
                    },
                    args.len()
                )));
            }
            let mut args = std::mem::take(args);
            args.iter_mut().try_for_each(|arg| resolve_expr(arg, line))?;
            *expr = Expr::Builtin(builtin, args);
            Ok(())
        }
    }
}
