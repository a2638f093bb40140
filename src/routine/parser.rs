//! Recursive-descent parser for routine scripts
//!
//! Produces a [`Program`] from the token stream. Shape validation (exactly
//! one function) is the loader's job; the parser accepts any sequence of
//! top-level items so that a misplaced statement gets a precise message.

use std::fmt;

use super::ast::{BinaryOp, Expr, FunctionDecl, Item, Program, Stmt, StmtKind, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::value::number;

/// Nesting limit for blocks and expressions.
pub const MAX_NESTING: usize = 128;

/// Syntax error with the line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line (0 when the input ended unexpectedly)
    pub line: usize,
    /// Description
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{} at end of input", self.message)
        } else {
            write!(f, "{} on line {}", self.message, self.line)
        }
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = Result<T, ParseError>;

/// Parse routine source text into a program.
///
/// # Errors
///
/// Returns a [`ParseError`] for unlexable input, syntax errors, or nesting
/// deeper than [`MAX_NESTING`].
pub fn parse(source: &str) -> ParseResult<Program> {
    let tokens = tokenize(source).map_err(|(line, text)| ParseError {
        line,
        message: format!("unrecognized input `{text}`"),
    })?;
    Parser::new(tokens).program()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    const fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |s| s.line)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> ParseResult<T> {
        Err(ParseError {
            line: self.line(),
            message: message.into(),
        })
    }

    fn unexpected<T>(&self, wanted: &str) -> ParseResult<T> {
        match self.peek() {
            Some(token) => self.error(format!("expected {wanted}, found {}", token.describe())),
            None => self.error(format!("expected {wanted}")),
        }
    }

    fn expect(&mut self, expected: &Token) -> ParseResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            self.unexpected(&expected.describe())
        }
    }

    fn ident(&mut self) -> ParseResult<String> {
        if let Some(Token::Ident(name)) = self.peek() {
            let name = name.clone();
            self.pos += 1;
            Ok(name)
        } else {
            self.unexpected("identifier")
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return self.error(format!("nesting deeper than {MAX_NESTING} levels"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // =========================================================================
    // Items and statements
    // =========================================================================

    fn program(mut self) -> ParseResult<Program> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            if self.check(&Token::Fn) {
                items.push(Item::Function(self.function()?));
            } else {
                items.push(Item::Statement(self.statement()?));
            }
        }
        Ok(Program { items })
    }

    fn function(&mut self) -> ParseResult<FunctionDecl> {
        let line = self.line();
        self.expect(&Token::Fn)?;
        let name = self.ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            params.push(self.ident()?);
            while self.eat(&Token::Comma) {
                params.push(self.ident()?);
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            line,
        })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.enter()?;
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.peek().is_none() {
                return self.unexpected("`}`");
            }
            if self.check(&Token::Fn) {
                return self.error("nested functions are not supported");
            }
            stmts.push(self.statement()?);
        }
        self.expect(&Token::RBrace)?;
        self.leave();
        Ok(stmts)
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            Some(Token::Let) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Token::Assign)?;
                let value = self.expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::Let(name, value)
            }
            Some(Token::If) => self.if_statement()?,
            Some(Token::While) => {
                self.pos += 1;
                let cond = self.expr()?;
                StmtKind::While(cond, self.block()?)
            }
            Some(Token::For) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Token::In)?;
                let iterable = self.expr()?;
                StmtKind::For(name, iterable, self.block()?)
            }
            Some(Token::Return) => {
                self.pos += 1;
                let value = if self.check(&Token::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&Token::Semi)?;
                StmtKind::Return(value)
            }
            Some(Token::Ident(_))
                if self.tokens.get(self.pos + 1).map(|s| &s.token) == Some(&Token::Assign) =>
            {
                let name = self.ident()?;
                self.expect(&Token::Assign)?;
                let value = self.expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::Assign(name, value)
            }
            _ => {
                let value = self.expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::Expr(value)
            }
        };
        Ok(Stmt { kind, line })
    }

    fn if_statement(&mut self) -> ParseResult<StmtKind> {
        self.expect(&Token::If)?;
        let cond = self.expr()?;
        let then_branch = self.block()?;
        let else_branch = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                let line = self.line();
                self.enter()?;
                let nested = self.if_statement()?;
                self.leave();
                vec![Stmt { kind: nested, line }]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    // =========================================================================
    // Expressions (lowest to highest precedence)
    // =========================================================================

    fn expr(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.or_expr();
        self.leave();
        expr
    }

    fn binary_level(
        &mut self,
        ops: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut lhs = next(self)?;
        let mut chained = 0;
        while let Some(op) = ops.iter().find(|(t, _)| self.check(t)).map(|(_, op)| *op) {
            self.pos += 1;
            // Each link deepens the left spine of the tree.
            self.enter()?;
            chained += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= chained;
        Ok(lhs)
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[(Token::OrOr, BinaryOp::Or)], Self::and_expr)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[(Token::AndAnd, BinaryOp::And)], Self::equality)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (Token::LtEq, BinaryOp::Le),
                (Token::GtEq, BinaryOp::Ge),
                (Token::Lt, BinaryOp::Lt),
                (Token::Gt, BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else if self.eat(&Token::Bang) {
            UnaryOp::Not
        } else {
            return self.postfix();
        };
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        let mut chained = 0;
        loop {
            if matches!(
                self.peek(),
                Some(Token::Dot | Token::LBracket | Token::LParen)
            ) {
                self.enter()?;
                chained += 1;
            }
            if self.eat(&Token::Dot) {
                let field = self.ident()?;
                expr = Expr::Field(Box::new(expr), field);
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.check(&Token::LParen) {
                let Expr::Var(name) = expr else {
                    return self.error("only named functions can be called");
                };
                self.pos += 1;
                let args = self.comma_list(&Token::RParen)?;
                expr = Expr::Call(name, args);
            } else {
                self.depth -= chained;
                return Ok(expr);
            }
        }
    }

    fn comma_list(&mut self, close: &Token) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        if !self.eat(close) {
            loop {
                items.push(self.expr()?);
                if self.eat(close) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let Some(token) = self.advance() else {
            return self.unexpected("expression");
        };
        match token {
            Token::Number(n) => number(n)
                .map(Expr::Literal)
                .map_err(|message| ParseError { line, message }),
            Token::Str(s) => Ok(Expr::Literal(serde_json::Value::String(s))),
            Token::True => Ok(Expr::Literal(serde_json::Value::Bool(true))),
            Token::False => Ok(Expr::Literal(serde_json::Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(serde_json::Value::Null)),
            Token::Ident(name) => Ok(Expr::Var(name)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.enter()?;
                let items = self.comma_list(&Token::RBracket)?;
                self.leave();
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                self.enter()?;
                let entries = self.object_entries()?;
                self.leave();
                Ok(Expr::Object(entries))
            }
            other => Err(ParseError {
                line,
                message: format!("expected expression, found {}", other.describe()),
            }),
        }
    }

    fn object_entries(&mut self) -> ParseResult<Vec<(String, Expr)>> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(entries);
        }
        loop {
            let key = match self.peek() {
                Some(Token::Ident(key) | Token::Str(key)) => key.clone(),
                _ => return self.unexpected("object key"),
            };
            self.pos += 1;
            self.expect(&Token::Colon)?;
            entries.push((key, self.expr()?));
            if self.eat(&Token::RBrace) {
                return Ok(entries);
            }
            self.expect(&Token::Comma)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single_fn(source: &str) -> FunctionDecl {
        let program = parse(source).unwrap();
        match program.items.into_iter().next() {
            Some(Item::Function(decl)) => decl,
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn test_function_shape() {
        let decl = single_fn("fn run_trial(trial) { return 1; }");
        assert_eq!(decl.name, "run_trial");
        assert_eq!(decl.params, vec!["trial".to_string()]);
        assert_eq!(decl.body.len(), 1);
        assert_eq!(decl.line, 1);
    }

    #[test]
    fn test_precedence() {
        let decl = single_fn("fn f(t) { return 1 + 2 * 3 == 7 && !false; }");
        let StmtKind::Return(Some(Expr::Binary(BinaryOp::And, lhs, _))) = &decl.body[0].kind
        else {
            panic!("expected && at the root");
        };
        let Expr::Binary(BinaryOp::Eq, sum, _) = lhs.as_ref() else {
            panic!("expected == under &&");
        };
        assert!(matches!(sum.as_ref(), Expr::Binary(BinaryOp::Add, _, _)));
    }

    #[test]
    fn test_postfix_chain() {
        let decl = single_fn("fn f(t) { let x = t.task.shape[0]; }");
        let StmtKind::Let(_, Expr::Index(target, _)) = &decl.body[0].kind else {
            panic!("expected index expression");
        };
        assert!(matches!(target.as_ref(), Expr::Field(_, f) if f == "shape"));
    }

    #[test]
    fn test_object_and_list_literals() {
        let decl = single_fn(r#"fn f(t) { return {score: 1, "tags": [1, "a"]}; }"#);
        let StmtKind::Return(Some(Expr::Object(entries))) = &decl.body[0].kind else {
            panic!("expected object literal");
        };
        assert_eq!(entries[0].0, "score");
        assert_eq!(entries[1].0, "tags");
        assert_eq!(entries[0].1, Expr::Literal(json!(1)));
    }

    #[test]
    fn test_else_if_chain_and_lines() {
        let decl = single_fn("fn f(t) {\n if t { } else if t { } else { return 2; }\n}");
        assert_eq!(decl.body[0].line, 2);
        let StmtKind::If { else_branch, .. } = &decl.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(else_branch[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_top_level_statements_are_items() {
        let program = parse("let x = 1; fn f(t) { }").unwrap();
        assert!(matches!(program.items[0], Item::Statement(_)));
        assert!(matches!(program.items[1], Item::Function(_)));
    }

    #[test]
    fn test_syntax_errors_carry_line() {
        let err = parse("fn f(t) {\n let = 3;\n}").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("expected identifier"));
    }

    #[test]
    fn test_unterminated_block() {
        let err = parse("fn f(t) { return 1;").unwrap_err();
        assert!(err.to_string().contains("end of input"));
    }

    #[test]
    fn test_nested_function_rejected() {
        let err = parse("fn f(t) { fn g(x) { } }").unwrap_err();
        assert!(err.message.contains("nested functions"));
    }

    #[test]
    fn test_long_chains_count_toward_nesting() {
        let terms = vec!["1"; 200_000].join(" + ");
        let err = parse(&format!("fn f(t) {{ return {terms}; }}")).unwrap_err();
        assert!(err.message.contains("nesting deeper"));

        let fields = format!("fn f(t) {{ return t{}; }}", ".a".repeat(10_000));
        assert!(parse(&fields).unwrap_err().message.contains("nesting deeper"));

        let indices = format!("fn f(t) {{ return t{}; }}", "[0]".repeat(10_000));
        assert!(parse(&indices).unwrap_err().message.contains("nesting deeper"));
    }

    #[test]
    fn test_moderate_chains_parse() {
        let terms = vec!["t"; 64].join(" * 2 + ");
        assert!(parse(&format!("fn f(t) {{ return {terms}; }}")).is_ok());
        assert!(parse("fn f(t) { return t.task.shape[0][1].name; }").is_ok());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("fn f(t) {{ return {}1{}; }}", "(".repeat(300), ")".repeat(300));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nesting deeper"));
    }
}
