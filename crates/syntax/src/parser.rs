//! Recursive-descent parser
//!
//! Statements are line-oriented (newline or ';' terminated); expressions
//! use a precedence ladder. Two non-obvious pieces:
//!
//! - Generic-call disambiguation: at `f<` the parser speculatively parses
//!   type arguments and requires the closing `>` to be followed by `(`.
//!   On failure it restores position and lets `<` mean less-than. The
//!   speculation window is one `<…>`, so there is no exponential retry.
//! - Static control checks: `break`/`continue` outside a loop, `return`
//!   outside a function, assignment in a condition, and `break`/
//!   `continue` directly inside a `finally` are all rejected here, not at
//!   runtime.

use crate::ast::{
    AssignTarget, BinaryOp, CompareOp, EnumDecl, Expr, FieldDecl, FunctionDecl, LogicalOp, Param,
    Program, Span, Stmt, StructDecl, UnaryOp, UsePath,
};
use crate::error::ParseError;
use crate::token::{Token, TokenKind};
use crate::types::{Type, TypeKind};
use naab_core::ErrorKind;

const TOP_LEVEL_HINT: &str =
    "only use, import, export, struct, enum, function, and main may appear at top level";

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    fn_depth: usize,
    loop_depth: usize,
    /// Stack of type-parameter scopes (function and struct declarations).
    type_param_scopes: Vec<Vec<String>>,
}

/// Parse a token stream into a [`Program`].
pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            fn_depth: 0,
            loop_depth: 0,
            type_param_scopes: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn span(&self) -> Span {
        let tok = self.current();
        Span::new(tok.line, tok.column)
    }

    fn at_end(&self) -> bool {
        matches!(self.kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if !self.at_end() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn check_keyword(&self, kw: &str) -> bool {
        self.current().is_keyword(kw)
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, kw: &str) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(
                ErrorKind::SyntaxError,
                format!("expected {} {} but found {}", kind, context, self.kind()),
            ))
        }
    }

    fn expect_keyword(&mut self, kw: &str, context: &str) -> Result<Token, ParseError> {
        if self.check_keyword(kw) {
            Ok(self.advance())
        } else {
            Err(self.error_here(
                ErrorKind::SyntaxError,
                format!("expected '{}' {} but found {}", kw, context, self.kind()),
            ))
        }
    }

    /// Consume an identifier. A reserved word here is its own error kind.
    fn expect_ident(&mut self, context: &str) -> Result<(String, Span), ParseError> {
        let span = self.span();
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, span))
            }
            TokenKind::Keyword(kw) => Err(ParseError::new(
                ErrorKind::ReservedKeywordAsIdentifier,
                format!("'{}' is a reserved keyword and cannot be used as {}", kw, context),
                span.line,
                span.column,
            )),
            other => Err(self.error_here(
                ErrorKind::SyntaxError,
                format!("expected an identifier {} but found {}", context, other),
            )),
        }
    }

    fn error_here(&self, kind: ErrorKind, message: impl Into<String>) -> ParseError {
        let span = self.span();
        ParseError::new(kind, message, span.line, span.column)
    }

    fn skip_separators(&mut self) {
        while matches!(self.kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    /// End-of-statement: newline, ';', '}', or EOF.
    fn expect_statement_end(&mut self) -> Result<(), ParseError> {
        match self.kind() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            other => Err(self.error_here(
                ErrorKind::SyntaxError,
                format!("expected end of statement but found {}", other),
            )),
        }
    }

    fn param_in_scope(&self, name: &str) -> bool {
        self.type_param_scopes
            .iter()
            .any(|scope| scope.iter().any(|p| p == name))
    }

    // ------------------------------------------------------------------
    // Program and top level
    // ------------------------------------------------------------------

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::new();
        loop {
            self.skip_separators();
            if self.at_end() {
                break;
            }
            program.statements.push(self.parse_top_level()?);
        }
        Ok(program)
    }

    fn parse_top_level(&mut self) -> Result<Stmt, ParseError> {
        if self.check_keyword("use") {
            return self.parse_use();
        }
        if self.check_keyword("import") {
            return self.parse_import();
        }
        if self.check_keyword("export") {
            return self.parse_export();
        }
        if self.check_keyword("struct") {
            return self.parse_struct_decl();
        }
        if self.check_keyword("enum") {
            return self.parse_enum_decl();
        }
        if self.check_keyword("function") {
            return self.parse_function_decl();
        }
        if self.check_keyword("main") {
            return self.parse_main();
        }

        let found = match self.kind() {
            TokenKind::Keyword(kw) => format!("'{}'", kw),
            other => other.to_string(),
        };
        Err(self
            .error_here(
                ErrorKind::MisplacedStatement,
                format!("{} is not allowed at top level", found),
            )
            .with_hint(TOP_LEVEL_HINT))
    }

    fn parse_use(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("use", "")?;

        let path = if let TokenKind::BlockId(id) = self.kind().clone() {
            self.advance();
            // Optional version range, kept as raw text: `>= 1.2, < 2.0`.
            let mut version = String::new();
            while !matches!(
                self.kind(),
                TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
            ) && !self.check_keyword("as")
            {
                let tok = self.advance();
                if !version.is_empty() && tok.kind != TokenKind::Comma {
                    version.push(' ');
                }
                version.push_str(&tok.lexeme);
            }
            UsePath::Block {
                id,
                version_req: if version.is_empty() { None } else { Some(version) },
            }
        } else {
            UsePath::Module(self.parse_dotted_path()?)
        };

        let alias = if self.match_keyword("as") {
            Some(self.expect_ident("a use alias")?.0)
        } else {
            None
        };
        self.expect_statement_end()?;
        Ok(Stmt::Use { path, alias, span })
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("import", "")?;
        let path = self.parse_dotted_path()?;
        let alias = if self.match_keyword("as") {
            Some(self.expect_ident("an import alias")?.0)
        } else {
            None
        };
        self.expect_statement_end()?;
        Ok(Stmt::Import { path, alias, span })
    }

    fn parse_dotted_path(&mut self) -> Result<Vec<String>, ParseError> {
        let mut segments = vec![self.expect_ident("a module path")?.0];
        while self.matches(&TokenKind::Dot) {
            segments.push(self.expect_ident("a module path segment")?.0);
        }
        Ok(segments)
    }

    fn parse_export(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("export", "")?;
        let inner = if self.check_keyword("function") {
            self.parse_function_decl()?
        } else if self.check_keyword("struct") {
            self.parse_struct_decl()?
        } else if self.check_keyword("enum") {
            self.parse_enum_decl()?
        } else if self.check_keyword("let") || self.check_keyword("const") {
            self.parse_let()?
        } else {
            return Err(self.error_here(
                ErrorKind::SyntaxError,
                "export must be followed by a function, struct, enum, let, or const declaration",
            ));
        };
        Ok(Stmt::Export {
            inner: Box::new(inner),
            span,
        })
    }

    fn parse_main(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("main", "")?;
        // `main` counts as a function context: `return` is legal inside.
        self.fn_depth += 1;
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_block("main")?;
        self.loop_depth = saved_loops;
        self.fn_depth -= 1;
        Ok(Stmt::Main { body, span })
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn parse_type_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if self.matches(&TokenKind::Lt) {
            loop {
                params.push(self.expect_ident("a type parameter")?.0);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Gt, "to close the type parameter list")?;
        }
        Ok(params)
    }

    fn parse_function_decl(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("function", "")?;
        let (name, _) = self.expect_ident("a function name")?;
        let type_params = self.parse_type_params()?;
        self.type_param_scopes.push(type_params.clone());

        self.expect(&TokenKind::LParen, "to open the parameter list")?;
        let params = self.parse_params()?;
        self.expect(&TokenKind::RParen, "to close the parameter list")?;

        let (return_type, explicit_return) = if self.matches(&TokenKind::Arrow) {
            (self.parse_type()?, true)
        } else {
            (Type::any(), false)
        };

        self.fn_depth += 1;
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = self.parse_block("function body")?;
        self.loop_depth = saved_loops;
        self.fn_depth -= 1;
        self.type_param_scopes.pop();

        Ok(Stmt::Function(FunctionDecl {
            name,
            type_params,
            params,
            return_type,
            explicit_return,
            body,
            span,
        }))
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let (name, span) = self.expect_ident("a parameter name")?;
            let ty = if self.matches(&TokenKind::Colon) {
                self.parse_type()?
            } else {
                Type::any()
            };
            params.push(Param { name, ty, span });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_struct_decl(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("struct", "")?;
        let (name, _) = self.expect_ident("a struct name")?;
        let type_params = self.parse_type_params()?;
        self.type_param_scopes.push(type_params.clone());

        self.expect(&TokenKind::LBrace, "to open the struct body")?;
        let mut fields = Vec::new();
        loop {
            self.skip_separators();
            if self.matches(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                return Err(self.error_here(
                    ErrorKind::SyntaxError,
                    format!("unexpected end of file in struct '{}'", name),
                ));
            }
            let weak = self.match_keyword("weak");
            let (field_name, field_span) = self.expect_ident("a field name")?;
            self.expect(&TokenKind::Colon, "after the field name")?;
            let ty = self.parse_type()?;
            fields.push(FieldDecl {
                name: field_name,
                ty,
                weak,
                span: field_span,
            });
            if !self.matches(&TokenKind::Comma) {
                // Newline-separated fields are also fine; the loop's
                // skip_separators handles them.
                if !matches!(
                    self.kind(),
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace
                ) {
                    return Err(self.error_here(
                        ErrorKind::SyntaxError,
                        "expected ',' or a newline between struct fields",
                    ));
                }
            }
        }
        self.type_param_scopes.pop();

        Ok(Stmt::Struct(StructDecl {
            name,
            type_params,
            fields,
            span,
        }))
    }

    fn parse_enum_decl(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("enum", "")?;
        let (name, _) = self.expect_ident("an enum name")?;
        self.expect(&TokenKind::LBrace, "to open the enum body")?;
        let mut variants = Vec::new();
        loop {
            self.skip_separators();
            if self.matches(&TokenKind::RBrace) {
                break;
            }
            variants.push(self.expect_ident("an enum variant")?.0);
            self.matches(&TokenKind::Comma);
        }
        if variants.is_empty() {
            return Err(ParseError::new(
                ErrorKind::SyntaxError,
                format!("enum '{}' must have at least one variant", name),
                span.line,
                span.column,
            ));
        }
        Ok(Stmt::Enum(EnumDecl {
            name,
            variants,
            span,
        }))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self, context: &str) -> Result<Vec<Stmt>, ParseError> {
        self.skip_newlines();
        self.expect(&TokenKind::LBrace, &format!("to open the {}", context))?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.matches(&TokenKind::RBrace) {
                break;
            }
            if self.at_end() {
                return Err(self.error_here(
                    ErrorKind::SyntaxError,
                    format!("unexpected end of file inside {}", context),
                ));
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.check_keyword("let") || self.check_keyword("const") {
            return self.parse_let();
        }
        if self.check_keyword("if") {
            return self.parse_if();
        }
        if self.check_keyword("while") {
            return self.parse_while();
        }
        if self.check_keyword("for") {
            return self.parse_for();
        }
        if self.check_keyword("break") {
            let span = self.span();
            self.advance();
            if self.loop_depth == 0 {
                return Err(ParseError::new(
                    ErrorKind::BreakOutsideLoop,
                    "'break' outside of a loop",
                    span.line,
                    span.column,
                ));
            }
            self.expect_statement_end()?;
            return Ok(Stmt::Break { span });
        }
        if self.check_keyword("continue") {
            let span = self.span();
            self.advance();
            if self.loop_depth == 0 {
                return Err(ParseError::new(
                    ErrorKind::ContinueOutsideLoop,
                    "'continue' outside of a loop",
                    span.line,
                    span.column,
                ));
            }
            self.expect_statement_end()?;
            return Ok(Stmt::Continue { span });
        }
        if self.check_keyword("return") {
            let span = self.span();
            self.advance();
            if self.fn_depth == 0 {
                return Err(ParseError::new(
                    ErrorKind::ReturnOutsideFunction,
                    "'return' outside of a function",
                    span.line,
                    span.column,
                ));
            }
            let value = if matches!(
                self.kind(),
                TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
            ) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect_statement_end()?;
            return Ok(Stmt::Return { value, span });
        }
        if self.check_keyword("try") {
            return self.parse_try();
        }
        if self.check_keyword("throw") {
            let span = self.span();
            self.advance();
            let value = self.parse_expr()?;
            self.expect_statement_end()?;
            return Ok(Stmt::Throw { value, span });
        }
        if self.check_keyword("function") {
            return self.parse_function_decl();
        }
        if self.check_keyword("struct") {
            return self.parse_struct_decl();
        }
        if self.check_keyword("enum") {
            return self.parse_enum_decl();
        }
        if self.check_keyword("use") {
            return self.parse_use();
        }
        if self.check_keyword("import") {
            return self.parse_import();
        }
        if self.check_keyword("main") {
            return Err(self.error_here(
                ErrorKind::MisplacedStatement,
                "'main' may only appear at top level",
            ));
        }
        if self.check(&TokenKind::LBrace) {
            let span = self.span();
            let statements = self.parse_block("block")?;
            return Ok(Stmt::Block { statements, span });
        }

        // Expression statement, possibly an assignment.
        let span = self.span();
        let expr = self.parse_expr()?;
        if self.matches(&TokenKind::Assign) {
            let target = self.to_assign_target(expr)?;
            let value = self.parse_expr()?;
            self.expect_statement_end()?;
            return Ok(Stmt::Assign {
                target,
                value,
                span,
            });
        }
        self.expect_statement_end()?;
        Ok(Stmt::Expr { expr, span })
    }

    fn to_assign_target(&self, expr: Expr) -> Result<AssignTarget, ParseError> {
        match expr {
            Expr::Ident { name, .. } => Ok(AssignTarget::Name(name)),
            Expr::Index { target, index, .. } => Ok(AssignTarget::Index {
                target: *target,
                index: *index,
            }),
            Expr::Member { target, field, .. } => Ok(AssignTarget::Member {
                target: *target,
                field,
            }),
            other => {
                let span = other.span();
                Err(ParseError::new(
                    ErrorKind::SyntaxError,
                    "invalid assignment target",
                    span.line,
                    span.column,
                ))
            }
        }
    }

    fn parse_let(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let is_const = self.check_keyword("const");
        self.advance(); // let / const
        let (name, _) = self.expect_ident("a variable name")?;
        let declared_type = if self.matches(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Assign, "in the variable declaration")?;
        let value = self.parse_expr()?;
        self.expect_statement_end()?;
        Ok(Stmt::Let {
            name,
            is_const,
            declared_type,
            value,
            span,
        })
    }

    /// Parse a condition expression, rejecting `=` where `==` was almost
    /// certainly intended.
    fn parse_condition(&mut self, context: &str) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        if self.check(&TokenKind::Assign) {
            let span = self.span();
            return Err(ParseError::new(
                ErrorKind::AccidentalAssignment,
                format!("assignment in {} condition", context),
                span.line,
                span.column,
            )
            .with_hint("use '==' to compare values"));
        }
        Ok(expr)
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("if", "")?;
        let cond = self.parse_condition("if")?;
        let then_block = self.parse_block("if body")?;
        // An uncuddled `else` on its own line is fine; stray newlines
        // here are separators either way.
        self.skip_newlines();
        let else_block = if self.match_keyword("else") {
            if self.check_keyword("if") {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block("else body")?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("while", "")?;
        let cond = self.parse_condition("while")?;
        self.loop_depth += 1;
        let body = self.parse_block("while body")?;
        self.loop_depth -= 1;
        Ok(Stmt::While { cond, body, span })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("for", "")?;
        let (var, _) = self.expect_ident("a loop variable")?;
        self.expect_keyword("in", "after the loop variable")?;
        let iterable = self.parse_expr()?;
        self.loop_depth += 1;
        let body = self.parse_block("for body")?;
        self.loop_depth -= 1;
        Ok(Stmt::For {
            var,
            iterable,
            body,
            span,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect_keyword("try", "")?;
        let try_block = self.parse_block("try body")?;
        self.skip_newlines();
        self.expect_keyword("catch", "after the try body")?;
        let catch_name = if let TokenKind::Ident(_) = self.kind() {
            Some(self.expect_ident("the catch binding")?.0)
        } else {
            None
        };
        let catch_block = self.parse_block("catch body")?;
        self.skip_newlines();
        let finally_block = if self.match_keyword("finally") {
            // break/continue may not cross a finally boundary.
            let saved_loops = std::mem::take(&mut self.loop_depth);
            let block = self.parse_block("finally body")?;
            self.loop_depth = saved_loops;
            Some(block)
        } else {
            None
        };
        Ok(Stmt::Try {
            try_block,
            catch_name,
            catch_block,
            finally_block,
            span,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_pipeline()
    }

    fn parse_pipeline(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_ternary()?;
        while self.check(&TokenKind::PipeGt) {
            let span = self.span();
            self.advance();
            let stage = self.parse_ternary()?;
            expr = Expr::Pipeline {
                value: Box::new(expr),
                stage: Box::new(stage),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if self.check(&TokenKind::Question) {
            let span = self.span();
            self.advance();
            let then_value = self.parse_ternary()?;
            self.expect(&TokenKind::Colon, "in the ternary expression")?;
            let else_value = self.parse_ternary()?;
            return Ok(Expr::IfExpr {
                cond: Box::new(cond),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
                span,
            });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_and()?;
        while self.check(&TokenKind::OrOr) {
            let span = self.span();
            self.advance();
            let right = self.parse_and()?;
            expr = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_equality()?;
        while self.check(&TokenKind::AndAnd) {
            let span = self.span();
            self.advance();
            let right = self.parse_equality()?;
            expr = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.kind() {
                TokenKind::Eq => CompareOp::Eq,
                TokenKind::NotEq => CompareOp::NotEq,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_comparison()?;
            expr = Expr::Compare {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.kind() {
                TokenKind::Lt => CompareOp::Lt,
                TokenKind::LtEq => CompareOp::LtEq,
                TokenKind::Gt => CompareOp::Gt,
                TokenKind::GtEq => CompareOp::GtEq,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_term()?;
            expr = Expr::Compare {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_factor()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_unary()?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        if self.matches(&TokenKind::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        if self.matches(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.kind() {
                TokenKind::LParen => {
                    let span = self.span();
                    self.advance();
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        type_args: Vec::new(),
                        args,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    let span = self.span();
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "to close the index")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                        span,
                    };
                }
                TokenKind::Dot => {
                    let span = self.span();
                    self.advance();
                    let (field, _) = self.expect_ident("a member name")?;
                    expr = Expr::Member {
                        target: Box::new(expr),
                        field,
                        span,
                    };
                }
                TokenKind::Lt if matches!(expr, Expr::Ident { .. }) => {
                    // Speculative `f<T, U>(…)`. Anything else means `<`
                    // was a comparison after all.
                    match self.try_parse_generic_call()? {
                        Some((type_args, args, span)) => {
                            expr = Expr::Call {
                                callee: Box::new(expr),
                                type_args,
                                args,
                                span,
                            };
                        }
                        None => break,
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Attempt `<type_args>(` at the current position (which is `<`).
    /// Returns the parsed call on success; restores position and returns
    /// None if the window does not parse as a generic call.
    fn try_parse_generic_call(
        &mut self,
    ) -> Result<Option<(Vec<Type>, Vec<Expr>, Span)>, ParseError> {
        let saved = self.pos;
        let span = self.span();
        self.advance(); // '<'

        let mut type_args = Vec::new();
        let parsed = (|| -> Result<Vec<Type>, ParseError> {
            loop {
                type_args.push(self.parse_type()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            Ok(std::mem::take(&mut type_args))
        })();

        match parsed {
            Ok(args) if self.matches(&TokenKind::Gt) && self.check(&TokenKind::LParen) => {
                self.advance(); // '('
                let call_args = self.parse_args()?;
                Ok(Some((args, call_args, span)))
            }
            _ => {
                self.pos = saved;
                Ok(None)
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.matches(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "to close the argument list")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.kind().clone() {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::IntLit { value, span })
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expr::FloatLit { value, span })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::StrLit { value, span })
            }
            TokenKind::Keyword(kw) if kw == "true" || kw == "false" => {
                self.advance();
                Ok(Expr::BoolLit {
                    value: kw == "true",
                    span,
                })
            }
            TokenKind::Keyword(kw) if kw == "null" => {
                self.advance();
                Ok(Expr::NullLit { span })
            }
            TokenKind::Keyword(kw) if kw == "new" => self.parse_struct_literal(),
            TokenKind::Keyword(kw) if kw == "fn" => self.parse_lambda(),
            TokenKind::Keyword(kw) if kw == "if" => self.parse_if_expr(),
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident { name, span })
            }
            TokenKind::BlockId(id) => {
                self.advance();
                Ok(Expr::BlockUse { id, span })
            }
            TokenKind::Polyglot(literal) => {
                self.advance();
                Ok(Expr::Polyglot { literal, span })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "to close the group")?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_dict_literal(),
            other => Err(self.error_here(
                ErrorKind::SyntaxError,
                format!("expected an expression but found {}", other),
            )),
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        self.expect(&TokenKind::LBracket, "")?;
        let mut elements = Vec::new();
        loop {
            if self.matches(&TokenKind::RBracket) {
                break;
            }
            elements.push(self.parse_expr()?);
            if !self.matches(&TokenKind::Comma) {
                self.expect(&TokenKind::RBracket, "to close the array literal")?;
                break;
            }
        }
        Ok(Expr::ArrayLit { elements, span })
    }

    fn parse_dict_literal(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        self.expect(&TokenKind::LBrace, "")?;
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.matches(&TokenKind::RBrace) {
                break;
            }
            let key = match self.kind().clone() {
                TokenKind::Str(s) => {
                    self.advance();
                    s
                }
                TokenKind::Ident(name) => {
                    self.advance();
                    name
                }
                other => {
                    return Err(self.error_here(
                        ErrorKind::SyntaxError,
                        format!("expected a dict key but found {}", other),
                    ));
                }
            };
            self.expect(&TokenKind::Colon, "after the dict key")?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.matches(&TokenKind::Comma) {
                self.skip_newlines();
                self.expect(&TokenKind::RBrace, "to close the dict literal")?;
                break;
            }
        }
        Ok(Expr::DictLit { entries, span })
    }

    fn parse_struct_literal(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        self.expect_keyword("new", "")?;
        let (name, _) = self.expect_ident("a struct name")?;
        let type_args = if self.check(&TokenKind::Lt) {
            self.advance();
            let mut args = Vec::new();
            loop {
                args.push(self.parse_type()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Gt, "to close the type argument list")?;
            args
        } else {
            Vec::new()
        };

        self.expect(&TokenKind::LBrace, "to open the struct literal")?;
        let mut fields = Vec::new();
        loop {
            self.skip_newlines();
            if self.matches(&TokenKind::RBrace) {
                break;
            }
            let (field, _) = self.expect_ident("a field name")?;
            self.expect(&TokenKind::Colon, "after the field name")?;
            let value = self.parse_expr()?;
            fields.push((field, value));
            self.skip_newlines();
            if !self.matches(&TokenKind::Comma) {
                self.skip_newlines();
                self.expect(&TokenKind::RBrace, "to close the struct literal")?;
                break;
            }
        }
        Ok(Expr::StructLit {
            name,
            type_args,
            fields,
            span,
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        self.expect_keyword("fn", "")?;
        self.expect(&TokenKind::LParen, "to open the lambda parameter list")?;
        let params = self.parse_params()?;
        self.expect(&TokenKind::RParen, "to close the lambda parameter list")?;
        let (return_type, explicit_return) = if self.matches(&TokenKind::Arrow) {
            (self.parse_type()?, true)
        } else {
            (Type::any(), false)
        };

        self.fn_depth += 1;
        let saved_loops = std::mem::take(&mut self.loop_depth);
        let body = if self.matches(&TokenKind::FatArrow) {
            let value = self.parse_expr()?;
            let value_span = value.span();
            vec![Stmt::Return {
                value: Some(value),
                span: value_span,
            }]
        } else {
            self.parse_block("lambda body")?
        };
        self.loop_depth = saved_loops;
        self.fn_depth -= 1;

        Ok(Expr::Lambda {
            decl: Box::new(FunctionDecl {
                name: String::new(),
                type_params: Vec::new(),
                params,
                return_type,
                explicit_return,
                body,
                span,
            }),
            span,
        })
    }

    fn parse_if_expr(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        self.expect_keyword("if", "")?;
        let cond = self.parse_condition("if")?;
        self.expect(&TokenKind::LBrace, "to open the if-expression value")?;
        self.skip_newlines();
        let then_value = self.parse_expr()?;
        self.skip_newlines();
        self.expect(&TokenKind::RBrace, "to close the if-expression value")?;
        self.skip_newlines();
        self.expect_keyword("else", "in the if-expression")?;
        self.expect(&TokenKind::LBrace, "to open the else value")?;
        self.skip_newlines();
        let else_value = self.parse_expr()?;
        self.skip_newlines();
        self.expect(&TokenKind::RBrace, "to close the else value")?;
        Ok(Expr::IfExpr {
            cond: Box::new(cond),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
            span,
        })
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn parse_type(&mut self) -> Result<Type, ParseError> {
        let mut members = vec![self.parse_single_type()?];
        while self.matches(&TokenKind::Pipe) {
            members.push(self.parse_single_type()?);
        }
        if members.len() == 1 {
            Ok(members.pop().expect("one member"))
        } else {
            let mut ty = Type::union(members);
            if self.matches(&TokenKind::Question) {
                ty.nullable = true;
            }
            Ok(ty)
        }
    }

    fn parse_single_type(&mut self) -> Result<Type, ParseError> {
        let span = self.span();
        let name = match self.kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            TokenKind::Keyword(kw) if kw == "function" => {
                self.advance();
                let mut ty = Type::new(TypeKind::Function);
                if self.matches(&TokenKind::Question) {
                    ty.nullable = true;
                }
                return Ok(ty);
            }
            other => {
                return Err(ParseError::new(
                    ErrorKind::SyntaxError,
                    format!("expected a type but found {}", other),
                    span.line,
                    span.column,
                ));
            }
        };

        let mut ty = match name.as_str() {
            "int" => Type::int(),
            "float" => Type::float(),
            "bool" => Type::bool(),
            "string" => Type::string(),
            "void" => Type::void(),
            "any" => Type::any(),
            "list" => {
                self.expect(&TokenKind::Lt, "after 'list'")?;
                let elem = self.parse_type()?;
                self.expect(&TokenKind::Gt, "to close 'list<…>'")?;
                Type::list(elem)
            }
            "dict" => {
                self.expect(&TokenKind::Lt, "after 'dict'")?;
                let key = self.parse_type()?;
                self.expect(&TokenKind::Comma, "between dict key and value types")?;
                let value = self.parse_type()?;
                self.expect(&TokenKind::Gt, "to close 'dict<…>'")?;
                Type::dict(key, value)
            }
            _ if self.param_in_scope(&name) => Type::param(name),
            _ => {
                let args = if self.check(&TokenKind::Lt) {
                    self.advance();
                    let mut args = Vec::new();
                    loop {
                        args.push(self.parse_type()?);
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::Gt, "to close the type argument list")?;
                    args
                } else {
                    Vec::new()
                };
                Type::new(TypeKind::Struct { name, args })
            }
        };

        if self.matches(&TokenKind::Question) {
            ty.nullable = true;
        }
        Ok(ty)
    }
}
