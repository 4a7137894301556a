//! Tokenizer for template transform bodies.

use super::EvalError;

/// Punctuators, longest first so greedy matching picks `===` over `==` over `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+=", "-=", "*=", "(", ")", "[", "]", "{", "}", ",", ";", ":", ".",
    "?", "=", "<", ">", "+", "-", "*", "/", "%", "!",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    /// Backtick literal split into raw text and `${...}` source chunks.
    Template(Vec<TemplateChunk>),
    Ident(String),
    Sym(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    Code(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

impl Tok {
    pub fn describe(&self) -> String {
        match self {
            Tok::Num(n) => format!("number {n}"),
            Tok::Str(_) | Tok::Template(_) => "string literal".to_string(),
            Tok::Ident(name) => format!("'{name}'"),
            Tok::Sym(sym) => format!("'{sym}'"),
            Tok::Eof => "end of input".to_string(),
        }
    }
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub(crate) fn is_ident_cont(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub struct Lex {
    s: Vec<char>,
    i: usize,
    line: usize,
}

impl Lex {
    pub fn new(src: &str, first_line: usize) -> Self {
        Self {
            s: src.chars().collect(),
            i: 0,
            line: first_line,
        }
    }

    /// Tokenizes the whole source; the last token is always [`Tok::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Token>, EvalError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ws()?;
            let line = self.line;
            let tok = self.next_tok()?;
            let done = tok == Tok::Eof;
            tokens.push(Token { tok, line });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.s.get(self.i).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.s.get(self.i + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.i += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) -> Result<(), EvalError> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                while let Some(d) = self.bump() {
                    if d == '\n' {
                        break;
                    }
                }
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('*') {
                self.bump();
                self.bump();
                loop {
                    match self.bump() {
                        Some('*') if self.peek() == Some('/') => {
                            self.bump();
                            break;
                        }
                        Some(_) => {}
                        None => return Err(self.error("unterminated block comment")),
                    }
                }
                continue;
            }
            break;
        }
        Ok(())
    }

    fn next_tok(&mut self) -> Result<Tok, EvalError> {
        let Some(c) = self.peek() else {
            return Ok(Tok::Eof);
        };

        if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(d) = self.peek()
                && is_ident_cont(d)
            {
                ident.push(d);
                self.bump();
            }
            return Ok(Tok::Ident(ident));
        }

        if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            return self.number();
        }

        match c {
            '"' | '\'' => {
                self.bump();
                return self.string(c).map(Tok::Str);
            }
            '`' => {
                self.bump();
                return self.template();
            }
            _ => {}
        }

        for sym in PUNCTUATORS {
            if self.matches(sym) {
                // `a ?.5 : b` is a conditional, not optional chaining.
                if *sym == "?." && self.peek_at(2).is_some_and(|d| d.is_ascii_digit()) {
                    continue;
                }
                for _ in 0..sym.chars().count() {
                    self.bump();
                }
                return Ok(Tok::Sym(sym));
            }
        }

        Err(self.error(format!("unexpected character '{c}'")))
    }

    fn matches(&self, sym: &str) -> bool {
        sym.chars().enumerate().all(|(offset, expected)| self.peek_at(offset) == Some(expected))
    }

    fn number(&mut self) -> Result<Tok, EvalError> {
        let mut text = String::new();
        let mut seen_dot = false;
        while let Some(d) = self.peek() {
            if d == '.' && !seen_dot && self.peek_at(1).is_some_and(|next| next.is_ascii_digit()) {
                seen_dot = true;
            } else if !d.is_ascii_digit() && d != '_' {
                break;
            }
            if d != '_' {
                text.push(d);
            }
            self.bump();
        }
        if let Some(e) = self.peek()
            && (e == 'e' || e == 'E')
        {
            text.push(e);
            self.bump();
            if let Some(sign) = self.peek()
                && (sign == '+' || sign == '-')
            {
                text.push(sign);
                self.bump();
            }
            while let Some(d) = self.peek()
                && d.is_ascii_digit()
            {
                text.push(d);
                self.bump();
            }
        }
        text.parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.error(format!("invalid number literal '{text}'")))
    }

    fn escape(&mut self) -> Result<char, EvalError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape sequence"));
        };
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'u' => {
                let mut hex = String::new();
                for _ in 0..4 {
                    match self.bump() {
                        Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                        _ => return Err(self.error("invalid unicode escape")),
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(format!("invalid unicode escape '\\u{hex}'")))?
            }
            other => other,
        })
    }

    fn string(&mut self, quote: char) -> Result<String, EvalError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.escape()?),
                Some('\n') | None => return Err(self.error("unterminated string literal")),
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> Result<Tok, EvalError> {
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') => text.push(self.escape()?),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    chunks.push(TemplateChunk::Code(self.template_code()?));
                }
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated template literal")),
            }
        }
        if !text.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        Ok(Tok::Template(chunks))
    }

    fn template_code(&mut self) -> Result<String, EvalError> {
        let mut code = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated template substitution"));
            };
            if let Some(q) = quote {
                code.push(c);
                if c == '\\' {
                    if let Some(escaped) = self.bump() {
                        code.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' | '`' => {
                    quote = Some(c);
                    code.push(c);
                }
                '{' => {
                    depth += 1;
                    code.push(c);
                }
                '}' if depth == 0 => return Ok(code),
                '}' => {
                    depth -= 1;
                    code.push(c);
                }
                _ => code.push(c),
            }
        }
    }
}
