//! Recursive-descent parser producing [`Stmt`] lists from tokens.

use std::rc::Rc;

use super::EvalError;
use super::ast::{ArrowBody, ArrowDef, AssignOp, BinaryOp, Expr, LogicalOp, Property, Stmt, TemplatePart, UnaryOp};
use super::lexer::{Lex, TemplateChunk, Tok, Token};

/// Deepest expression/statement nesting accepted before parsing is refused.
const MAX_NESTING: usize = 64;

const RESERVED: &[&str] = &[
    "let", "const", "var", "if", "else", "for", "of", "return", "true", "false", "null", "undefined", "typeof", "function", "while", "class",
    "new",
];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

/// Parses a full program.
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, EvalError> {
    let mut parser = Parser::new(Lex::new(src, 1).tokenize()?);
    let mut program = Vec::new();
    while !parser.at_eof() {
        if parser.eat_sym(";") {
            continue;
        }
        program.push(parser.statement()?);
    }
    Ok(program)
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, depth: 0 }
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn bump(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn unexpected(&self) -> EvalError {
        self.error(format!("unexpected {}", self.peek().describe()))
    }

    fn is_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Tok::Sym(s) if *s == sym)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if name == keyword)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if self.is_sym(sym) {
            self.bump();
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.bump();
            return true;
        }
        false
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), EvalError> {
        if self.eat_sym(sym) {
            return Ok(());
        }
        Err(self.error(format!("expected '{sym}' but found {}", self.peek().describe())))
    }

    fn binding_name(&mut self) -> Result<String, EvalError> {
        match self.peek().clone() {
            Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.error(format!("expected a name but found {}", self.peek().describe()))),
        }
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        let stmt = stmt?;
        self.eat_sym(";");
        Ok(stmt)
    }

    fn statement_inner(&mut self) -> Result<Stmt, EvalError> {
        if self.is_sym("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if let Tok::Ident(keyword) = self.peek().clone() {
            match keyword.as_str() {
                "let" | "var" | "const" => {
                    self.bump();
                    let name = self.binding_name()?;
                    let value = if self.eat_sym("=") { Some(self.expression()?) } else { None };
                    if keyword == "const" && value.is_none() {
                        return Err(self.error(format!("missing initializer for const '{name}'")));
                    }
                    return Ok(Stmt::Let {
                        name,
                        mutable: keyword != "const",
                        value,
                    });
                }
                "if" => {
                    self.bump();
                    self.expect_sym("(")?;
                    let condition = self.expression()?;
                    self.expect_sym(")")?;
                    let then_branch = self.body()?;
                    let else_branch = if self.eat_keyword("else") { Some(self.body()?) } else { None };
                    return Ok(Stmt::If {
                        condition,
                        then_branch,
                        else_branch,
                    });
                }
                "for" => {
                    self.bump();
                    self.expect_sym("(")?;
                    if !(self.eat_keyword("const") || self.eat_keyword("let") || self.eat_keyword("var")) {
                        return Err(self.error("only 'for (const x of items)' loops are supported"));
                    }
                    let binding = self.binding_name()?;
                    if !self.eat_keyword("of") {
                        return Err(self.error("only 'for (const x of items)' loops are supported"));
                    }
                    let iterable = self.expression()?;
                    self.expect_sym(")")?;
                    let body = self.body()?;
                    return Ok(Stmt::ForOf { binding, iterable, body });
                }
                "return" => {
                    self.bump();
                    if self.is_sym(";") || self.is_sym("}") || self.at_eof() {
                        return Ok(Stmt::Return(None));
                    }
                    return Ok(Stmt::Return(Some(self.expression()?)));
                }
                "function" | "while" | "class" | "new" => {
                    return Err(self.error(format!("'{keyword}' is not supported")));
                }
                _ => {}
            }
        }

        let expr = self.expression()?;
        let op = match self.peek() {
            Tok::Sym("=") => Some(AssignOp::Set),
            Tok::Sym("+=") => Some(AssignOp::Add),
            Tok::Sym("-=") => Some(AssignOp::Sub),
            Tok::Sym("*=") => Some(AssignOp::Mul),
            _ => None,
        };
        if let Some(op) = op {
            if !expr.is_assignable() {
                return Err(self.error("invalid assignment target"));
            }
            self.bump();
            let value = self.expression()?;
            return Ok(Stmt::Assign { target: expr, op, value });
        }
        Ok(Stmt::Expr(expr))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, EvalError> {
        self.expect_sym("{")?;
        let mut stmts = Vec::new();
        while !self.is_sym("}") {
            if self.at_eof() {
                return Err(self.error("expected '}' before end of input"));
            }
            if self.eat_sym(";") {
                continue;
            }
            stmts.push(self.statement()?);
        }
        self.bump();
        Ok(stmts)
    }

    /// Block or single statement after `if`/`else`/`for`.
    fn body(&mut self) -> Result<Vec<Stmt>, EvalError> {
        if self.is_sym("{") {
            return self.block();
        }
        Ok(vec![self.statement()?])
    }

    pub fn expression(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let expr = self.conditional();
        self.leave();
        expr
    }

    fn conditional(&mut self) -> Result<Expr, EvalError> {
        if self.arrow_ahead() {
            return self.arrow();
        }
        let condition = self.nullish()?;
        if !self.eat_sym("?") {
            return Ok(condition);
        }
        let then = self.expression()?;
        self.expect_sym(":")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => matches!(self.peek_at(1), Tok::Sym("=>")),
            Tok::Sym("(") => {
                let mut offset = 1;
                loop {
                    match self.peek_at(offset) {
                        Tok::Sym(")") => return matches!(self.peek_at(offset + 1), Tok::Sym("=>")),
                        Tok::Ident(_) | Tok::Sym(",") => offset += 1,
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr, EvalError> {
        let mut params = Vec::new();
        if self.eat_sym("(") {
            while !self.eat_sym(")") {
                params.push(self.binding_name()?);
                if !self.is_sym(")") {
                    self.expect_sym(",")?;
                }
            }
        } else {
            params.push(self.binding_name()?);
        }
        self.expect_sym("=>")?;
        let body = if self.is_sym("{") {
            ArrowBody::Block(self.block()?)
        } else {
            ArrowBody::Expr(self.expression()?)
        };
        Ok(Expr::Arrow(Rc::new(ArrowDef { params, body })))
    }

    fn nullish(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.or()?;
        while self.eat_sym("??") {
            let right = self.or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and()?;
        while self.eat_sym("||") {
            let right = self.and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.equality()?;
        while self.eat_sym("&&") {
            let right = self.equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("===") => BinaryOp::StrictEq,
                Tok::Sym("!==") => BinaryOp::StrictNe,
                Tok::Sym("==") => BinaryOp::LooseEq,
                Tok::Sym("!=") => BinaryOp::LooseNe,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.relational()?;
            left = binary(op, left, right);
        }
    }

    fn relational(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("<") => BinaryOp::Lt,
                Tok::Sym("<=") => BinaryOp::Le,
                Tok::Sym(">") => BinaryOp::Gt,
                Tok::Sym(">=") => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.additive()?;
            left = binary(op, left, right);
        }
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("+") => BinaryOp::Add,
                Tok::Sym("-") => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("*") => BinaryOp::Mul,
                Tok::Sym("/") => BinaryOp::Div,
                Tok::Sym("%") => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Tok::Sym("!") => UnaryOp::Not,
            Tok::Sym("-") => UnaryOp::Neg,
            Tok::Sym("+") => UnaryOp::Plus,
            Tok::Ident(name) if name == "typeof" => UnaryOp::TypeOf,
            _ => return self.postfix(),
        };
        self.bump();
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_sym(".") {
                let name = self.property_name()?;
                expr = member(expr, Property::Named(name), false);
            } else if self.eat_sym("?.") {
                if self.eat_sym("[") {
                    let index = self.expression()?;
                    self.expect_sym("]")?;
                    expr = member(expr, Property::Computed(Box::new(index)), true);
                } else {
                    let name = self.property_name()?;
                    expr = member(expr, Property::Named(name), true);
                }
            } else if self.eat_sym("[") {
                let index = self.expression()?;
                self.expect_sym("]")?;
                expr = member(expr, Property::Computed(Box::new(index)), false);
            } else if self.eat_sym("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn property_name(&mut self) -> Result<String, EvalError> {
        match self.bump() {
            Tok::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected a property name but found {}", other.describe()))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        while !self.eat_sym(")") {
            args.push(self.expression()?);
            if !self.is_sym(")") {
                self.expect_sym(",")?;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Template(chunks) => self.template(chunks),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                _ if RESERVED.contains(&name.as_str()) => Err(self.error(format!("unexpected keyword '{name}'"))),
                _ => Ok(Expr::Ident(name)),
            },
            Tok::Sym("(") => {
                let expr = self.expression()?;
                self.expect_sym(")")?;
                Ok(expr)
            }
            Tok::Sym("[") => {
                let mut items = Vec::new();
                while !self.eat_sym("]") {
                    items.push(self.expression()?);
                    if !self.is_sym("]") {
                        self.expect_sym(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Sym("{") => self.object(),
            other => Err(self.error(format!("unexpected {}", other.describe()))),
        }
    }

    fn object(&mut self) -> Result<Expr, EvalError> {
        let mut entries = Vec::new();
        while !self.eat_sym("}") {
            let (key, shorthand) = match self.bump() {
                Tok::Ident(name) => (name, true),
                Tok::Str(text) => (text, false),
                Tok::Num(n) => (super::value::format_number(n), false),
                other => return Err(self.error(format!("expected an object key but found {}", other.describe()))),
            };
            let value = if self.eat_sym(":") {
                self.expression()?
            } else if shorthand {
                Expr::Ident(key.clone())
            } else {
                return Err(self.error(format!("expected ':' after key '{key}'")));
            };
            entries.push((key, value));
            if !self.is_sym("}") {
                self.expect_sym(",")?;
            }
        }
        Ok(Expr::Object(entries))
    }

    fn template(&mut self, chunks: Vec<TemplateChunk>) -> Result<Expr, EvalError> {
        let line = self.line();
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplateChunk::Code(code) => {
                    let mut inner = Parser::new(Lex::new(&code, line).tokenize()?);
                    inner.depth = self.depth;
                    let expr = inner.expression()?;
                    if !inner.at_eof() {
                        return Err(inner.unexpected());
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }
}

fn member(object: Expr, property: Property, optional: bool) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property,
        optional,
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_let_if_return() {
        let program = parse_program("const t = context.text; if (t) { return t.toUpperCase(); } else return ''").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(&program[0], Stmt::Let { name, mutable: false, .. } if name == "t"));
        assert!(matches!(&program[1], Stmt::If { else_branch: Some(_), .. }));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let program = parse_program("1 + 2 * 3").unwrap();
        let Stmt::Expr(Expr::Binary { op, right, .. }) = &program[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.as_ref(), Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn recognizes_arrow_functions() {
        let program = parse_program("items.map((x, i) => x * i)").unwrap();
        let Stmt::Expr(Expr::Call { args, .. }) = &program[0] else {
            panic!("expected call");
        };
        assert!(matches!(&args[0], Expr::Arrow(def) if def.params == vec!["x".to_string(), "i".to_string()]));
    }

    #[test]
    fn parenthesized_expression_is_not_an_arrow() {
        let program = parse_program("(a + b) * 2").unwrap();
        assert!(matches!(&program[0], Stmt::Expr(Expr::Binary { op: BinaryOp::Mul, .. })));
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        let error = parse_program("1 = 2").unwrap_err();
        assert!(error.to_string().contains("invalid assignment target"));
    }

    #[test]
    fn rejects_unsupported_constructs() {
        assert!(parse_program("while (true) {}").is_err());
        assert!(parse_program("function f() {}").is_err());
    }

    #[test]
    fn deep_nesting_is_refused() {
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let error = parse_program(&source).unwrap_err();
        assert!(error.to_string().contains("nesting"));
    }

    #[test]
    fn object_literal_supports_shorthand_and_quoted_keys() {
        let program = parse_program("({ text, 'two words': 2 })").unwrap();
        let Stmt::Expr(Expr::Object(entries)) = &program[0] else {
            panic!("expected object");
        };
        assert_eq!(entries[0], ("text".to_string(), Expr::Ident("text".into())));
        assert_eq!(entries[1].0, "two words");
    }
}
