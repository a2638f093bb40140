//! Routine script syntax tree

use super::builtins::Builtin;

/// Parsed routine program: the top-level items in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level items
    pub items: Vec<Item>,
}

/// Top-level item.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// `fn name(param) { ... }`
    Function(FunctionDecl),
    /// Any statement outside a function body
    Statement(Stmt),
}

/// Function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Bound name (rewritten by the loader to the reserved entry name)
    pub name: String,
    /// Parameter names
    pub params: Vec<String>,
    /// Body statements
    pub body: Vec<Stmt>,
    /// Line of the `fn` keyword
    pub line: usize,
}

/// Statement with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Statement kind
    pub kind: StmtKind,
    /// 1-based line
    pub line: usize,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let name = expr;`
    Let(String, Expr),
    /// `name = expr;`
    Assign(String, Expr),
    /// `if cond { } else { }`
    If {
        /// Condition
        cond: Expr,
        /// Taken branch
        then_branch: Vec<Stmt>,
        /// `else` branch (an `else if` is a nested single `If`)
        else_branch: Vec<Stmt>,
    },
    /// `while cond { }`
    While(Expr, Vec<Stmt>),
    /// `for name in expr { }`
    For(String, Expr, Vec<Stmt>),
    /// `return expr?;`
    Return(Option<Expr>),
    /// `expr;`
    Expr(Expr),
}

impl StmtKind {
    /// Keyword naming the statement in failure traces.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Let(..) => "let",
            Self::Assign(..) => "assignment",
            Self::If { .. } => "if",
            Self::While(..) => "while",
            Self::For(..) => "for",
            Self::Return(_) => "return",
            Self::Expr(_) => "expression",
        }
    }
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Literal(serde_json::Value),
    /// Variable reference
    Var(String),
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// `{key: value, "other": value}`
    Object(Vec<(String, Expr)>),
    /// `target.field`
    Field(Box<Expr>, String),
    /// `target[index]`
    Index(Box<Expr>, Box<Expr>),
    /// Unresolved call by name (replaced during compilation)
    Call(String, Vec<Expr>),
    /// Call resolved to a builtin
    Builtin(Builtin, Vec<Expr>),
    /// Unary operation
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}
