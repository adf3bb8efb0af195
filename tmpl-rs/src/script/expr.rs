//! Expression lexer, AST, parser, and evaluator.
//!
//! The language covers integer/float arithmetic, string comparison, a
//! ternary operator, assignment, glob (`=~`) and regex (`=/`) matching,
//! indexing and function calls.  A comma-separated list produces several
//! values, which is how `<l:set>` and `<l:for>` receive more than one.
//!
//! Operator precedence (lowest → highest):
//!   comma  →  assign  →  ternary  →  or  →  and  →  relational  →
//!   bitor  →  bitxor  →  bitand  →  shift  →  additive  →
//!   multiplicative  →  unary  →  postfix  →  primary

use std::borrow::Cow;

use super::value::Value;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Variable storage seen by the evaluator.
pub trait EvalContext {
    /// Look up a name; `None` evaluates to nil.
    fn get_var(&self, name: &str) -> Option<Value>;

    fn set_var(&mut self, name: &str, value: Value);
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,
    Ampersand,
    Pipe,
    Caret,
    ShiftLeft,
    ShiftRight,

    // Comparison
    Eq, // ==
    Ne, // !=
    Lt,
    Le,
    Gt,
    Ge,
    GlobMatch,     // =~
    RegexMatch,    // =/
    NotGlobMatch,  // !~
    NotRegexMatch, // !/

    // Logical
    And, // &&
    Or,  // ||

    // Assignment
    Assign,        // =
    PlusAssign,    // +=
    MinusAssign,   // -=
    StarAssign,    // *=
    SlashAssign,   // /=
    PercentAssign, // %=

    // Misc
    Question,
    Colon,
    Comma,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn skip_digits(&mut self) {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    fn text(&self, from: usize) -> Cow<'a, str> {
        String::from_utf8_lossy(&self.src[from..self.pos])
    }

    /// `start` is the index of the first digit, already consumed.
    fn read_number(&mut self, start: usize) -> Result<Token, String> {
        if self.src[start] == b'0' && matches!(self.peek(), Some(b'x' | b'X')) {
            self.pos += 1;
            let digits = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            return i64::from_str_radix(&self.text(digits), 16)
                .map(Token::Int)
                .map_err(|_| format!("malformed number near '{}'", self.text(start)));
        }

        let mut is_float = false;
        self.skip_digits();
        if self.peek() == Some(b'.') && matches!(self.peek2(), Some(b'0'..=b'9')) {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            self.skip_digits();
        }

        let text = self.text(start);
        let token = if is_float {
            text.parse().map(Token::Float).ok()
        } else {
            text.parse().map(Token::Int).ok()
        };
        token.ok_or_else(|| format!("malformed number near '{text}'"))
    }

    fn read_string(&mut self, quote: u8) -> Result<Token, String> {
        let mut buf = Vec::new();
        loop {
            match self.advance() {
                None => return Err("unfinished string".into()),
                Some(b'\\') => match self.advance() {
                    Some(b'n') => buf.push(b'\n'),
                    Some(b't') => buf.push(b'\t'),
                    Some(b'r') => buf.push(b'\r'),
                    Some(b'0') => buf.push(0),
                    Some(c) => buf.push(c),
                    None => return Err("unfinished string".into()),
                },
                Some(c) if c == quote => break,
                Some(c) => buf.push(c),
            }
        }
        Ok(Token::Str(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn read_ident(&mut self, start: usize) -> Token {
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        Token::Ident(self.text(start).into_owned())
    }

    /// `double` if the next byte is `second`, else `single`.
    fn pick(&mut self, second: u8, double: Token, single: Token) -> Token {
        if self.eat(second) {
            double
        } else {
            single
        }
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_ws();
        let start = self.pos;
        let Some(ch) = self.advance() else {
            return Ok(Token::Eof);
        };

        Ok(match ch {
            b'0'..=b'9' => return self.read_number(start),
            b'"' | b'\'' => return self.read_string(ch),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.read_ident(start),
            b'+' => self.pick(b'=', Token::PlusAssign, Token::Plus),
            b'-' => self.pick(b'=', Token::MinusAssign, Token::Minus),
            b'*' => self.pick(b'=', Token::StarAssign, Token::Star),
            b'/' => self.pick(b'=', Token::SlashAssign, Token::Slash),
            b'%' => self.pick(b'=', Token::PercentAssign, Token::Percent),
            b'!' => {
                if self.eat(b'=') {
                    Token::Ne
                } else if self.eat(b'~') {
                    Token::NotGlobMatch
                } else if self.eat(b'/') {
                    Token::NotRegexMatch
                } else {
                    Token::Bang
                }
            }
            b'~' => Token::Tilde,
            b'^' => Token::Caret,
            b'&' => self.pick(b'&', Token::And, Token::Ampersand),
            b'|' => self.pick(b'|', Token::Or, Token::Pipe),
            b'<' => {
                if self.eat(b'<') {
                    Token::ShiftLeft
                } else {
                    self.pick(b'=', Token::Le, Token::Lt)
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    Token::ShiftRight
                } else {
                    self.pick(b'=', Token::Ge, Token::Gt)
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    Token::Eq
                } else if self.eat(b'~') {
                    Token::GlobMatch
                } else {
                    self.pick(b'/', Token::RegexMatch, Token::Assign)
                }
            }
            b'?' => Token::Question,
            b':' => Token::Colon,
            b',' => Token::Comma,
            b'.' => Token::Dot,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            _ => {
                // Include UTF-8 continuation bytes in the message.
                while matches!(self.peek(), Some(b) if (b as i8) < -0x40) {
                    self.pos += 1;
                }
                return Err(format!("unexpected symbol near '{}'", self.text(start)));
            }
        })
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = t == Token::Eof;
            tokens.push(t);
            if done {
                return Ok(tokens);
            }
        }
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    GlobMatch,
    RegexMatch,
    NotGlobMatch,
    NotRegexMatch,
}

#[derive(Debug, Clone)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(String, AssignOp, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    /// `a, b, c`: one value per element, the last one expanded.
    List(Vec<Expr>),
    /// `=/` or `!/` against a literal pattern, compiled once at parse time.
    Matches {
        subject: Box<Expr>,
        regex: regex::Regex,
        negate: bool,
    },
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(format!("{what} expected near {}", describe(self.peek())))
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_comma()
    }

    fn parse_comma(&mut self) -> Result<Expr, String> {
        let first = self.parse_assign()?;
        if self.peek() == &Token::Comma {
            let mut exprs = vec![first];
            while self.eat(&Token::Comma) {
                exprs.push(self.parse_assign()?);
            }
            Ok(Expr::List(exprs))
        } else {
            Ok(first)
        }
    }

    fn parse_assign(&mut self) -> Result<Expr, String> {
        if let Token::Ident(name) = self.peek().clone() {
            let op = match self.tokens.get(self.pos + 1) {
                Some(Token::Assign) => Some(AssignOp::Set),
                Some(Token::PlusAssign) => Some(AssignOp::Add),
                Some(Token::MinusAssign) => Some(AssignOp::Sub),
                Some(Token::StarAssign) => Some(AssignOp::Mul),
                Some(Token::SlashAssign) => Some(AssignOp::Div),
                Some(Token::PercentAssign) => Some(AssignOp::Rem),
                _ => None,
            };
            if let Some(op) = op {
                self.pos += 2;
                let rhs = self.parse_assign()?;
                return Ok(Expr::Assign(name, op, Box::new(rhs)));
            }
        }
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, String> {
        let cond = self.parse_or()?;
        if self.eat(&Token::Question) {
            let then = self.parse_or()?;
            self.expect(&Token::Colon, "':'")?;
            let else_ = self.parse_ternary()?;
            Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(else_),
            ))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_relational()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_bitor()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                Token::GlobMatch => BinOp::GlobMatch,
                Token::RegexMatch => BinOp::RegexMatch,
                Token::NotGlobMatch => BinOp::NotGlobMatch,
                Token::NotRegexMatch => BinOp::NotRegexMatch,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_bitor()?;
            lhs = match (op, rhs) {
                (
                    op @ (BinOp::RegexMatch | BinOp::NotRegexMatch),
                    Expr::Literal(Value::Str(pattern)),
                ) => Expr::Matches {
                    subject: Box::new(lhs),
                    regex: compile_regex(&pattern)?,
                    negate: matches!(op, BinOp::NotRegexMatch),
                },
                (op, rhs) => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
            };
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_bitxor()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_bitand()?;
        while self.eat(&Token::Caret) {
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary(BinOp::BitXor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_shift()?;
        while self.eat(&Token::Ampersand) {
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::ShiftLeft => BinOp::Shl,
                Token::ShiftRight => BinOp::Shr,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if self.peek() != &Token::RParen {
                    args.push(self.parse_assign()?);
                    while self.eat(&Token::Comma) {
                        args.push(self.parse_assign()?);
                    }
                }
                self.expect(&Token::RParen, "')'")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat(&Token::LBracket) {
                let key = self.parse_ternary()?;
                self.expect(&Token::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else if self.eat(&Token::Dot) {
                match self.advance() {
                    Token::Ident(name) => expr = Expr::Field(Box::new(expr), name),
                    other => return Err(format!("name expected near {}", describe(&other))),
                }
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "nil" => Expr::Literal(Value::Nil),
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                _ => Expr::Var(name),
            }),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(format!("unexpected symbol near {}", describe(&other))),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Eof => "<eof>".to_owned(),
        Token::Int(n) => format!("'{n}'"),
        Token::Float(x) => format!("'{x}'"),
        Token::Str(s) => format!("'\"{s}\"'"),
        Token::Ident(name) => format!("'{name}'"),
        other => format!("{other:?}"),
    }
}

/// Parse an expression string into an AST.  Trailing input is an error.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.peek() != &Token::Eof {
        return Err(format!("unexpected symbol near {}", describe(parser.peek())));
    }
    Ok(expr)
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate to a single value: the first of several, nil for none.
pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Var(name) => Ok(ctx.get_var(name).unwrap_or_default()),

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            Ok(match op {
                UnaryOp::Neg => v.arith_neg(),
                UnaryOp::Not => Value::Bool(!v.as_bool()),
                UnaryOp::BitNot => Value::Int(!v.as_int()),
            })
        }

        Expr::Binary(op, lhs, rhs) => {
            // && and || short-circuit and yield the deciding operand.
            match op {
                BinOp::And => {
                    let l = eval_expr(lhs, ctx)?;
                    return if l.as_bool() { eval_expr(rhs, ctx) } else { Ok(l) };
                }
                BinOp::Or => {
                    let l = eval_expr(lhs, ctx)?;
                    return if l.as_bool() { Ok(l) } else { eval_expr(rhs, ctx) };
                }
                _ => {}
            }
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binop(op, l, r)
        }

        Expr::Ternary(cond, then, else_) => {
            if eval_expr(cond, ctx)?.as_bool() {
                eval_expr(then, ctx)
            } else {
                eval_expr(else_, ctx)
            }
        }

        Expr::Assign(name, op, rhs) => {
            let rval = eval_expr(rhs, ctx)?;
            let new_val = match op {
                AssignOp::Set => rval,
                _ => {
                    let cur = ctx.get_var(name).unwrap_or_default();
                    match op {
                        AssignOp::Add => cur.arith_add(&rval),
                        AssignOp::Sub => cur.arith_sub(&rval),
                        AssignOp::Mul => cur.arith_mul(&rval),
                        AssignOp::Div => cur.arith_div(&rval)?,
                        AssignOp::Rem => cur.arith_rem(&rval)?,
                        AssignOp::Set => unreachable!(),
                    }
                }
            };
            ctx.set_var(name, new_val.clone());
            Ok(new_val)
        }

        Expr::Index(base, key) => {
            let base = eval_expr(base, ctx)?;
            let key = eval_expr(key, ctx)?;
            Ok(base.index(&key))
        }

        Expr::Field(base, name) => Ok(eval_expr(base, ctx)?.index(&Value::Str(name.clone()))),

        Expr::Matches {
            subject,
            regex,
            negate,
        } => {
            let text = eval_expr(subject, ctx)?.to_string();
            Ok(Value::Bool(regex.is_match(&text) != *negate))
        }

        Expr::Call(..) | Expr::List(_) => {
            Ok(eval_multi(expr, ctx)?.into_iter().next().unwrap_or_default())
        }
    }
}

/// Evaluate to every value the expression produces.
pub fn eval_multi(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Vec<Value>, String> {
    match expr {
        Expr::Call(callee, arg_exprs) => {
            let func = eval_expr(callee, ctx)?;
            let args = eval_list(arg_exprs, ctx)?;
            match (&func, &**callee) {
                (Value::Nil, Expr::Var(name)) => {
                    Err(format!("attempt to call a nil value (variable '{name}')"))
                }
                _ => call_value(&func, &args),
            }
        }
        Expr::List(exprs) => eval_list(exprs, ctx),
        _ => Ok(vec![eval_expr(expr, ctx)?]),
    }
}

fn eval_list(exprs: &[Expr], ctx: &mut dyn EvalContext) -> Result<Vec<Value>, String> {
    let mut out = Vec::with_capacity(exprs.len());
    for (i, e) in exprs.iter().enumerate() {
        if i + 1 == exprs.len() {
            out.extend(eval_multi(e, ctx)?);
        } else {
            out.push(eval_expr(e, ctx)?);
        }
    }
    Ok(out)
}

/// Invoke a function value.
pub fn call_value(func: &Value, args: &[Value]) -> Result<Vec<Value>, String> {
    match func {
        Value::Func(f) => (f.f)(args).map_err(|e| format!("{}: {e}", f.name)),
        other => Err(format!("attempt to call a {} value", other.type_name())),
    }
}

fn eval_binop(op: &BinOp, l: Value, r: Value) -> Result<Value, String> {
    use std::cmp::Ordering;
    Ok(match op {
        BinOp::Add => l.arith_add(&r),
        BinOp::Sub => l.arith_sub(&r),
        BinOp::Mul => l.arith_mul(&r),
        BinOp::Div => l.arith_div(&r)?,
        BinOp::Rem => l.arith_rem(&r)?,

        BinOp::Eq => Value::Bool(l.loose_eq(&r)),
        BinOp::Ne => Value::Bool(!l.loose_eq(&r)),
        BinOp::Lt => Value::Bool(l.cmp_value(&r) == Ordering::Less),
        BinOp::Le => Value::Bool(l.cmp_value(&r) != Ordering::Greater),
        BinOp::Gt => Value::Bool(l.cmp_value(&r) == Ordering::Greater),
        BinOp::Ge => Value::Bool(l.cmp_value(&r) != Ordering::Less),

        BinOp::BitAnd => Value::Int(l.as_int() & r.as_int()),
        BinOp::BitOr => Value::Int(l.as_int() | r.as_int()),
        BinOp::BitXor => Value::Int(l.as_int() ^ r.as_int()),
        BinOp::Shl => Value::Int(l.as_int() << (r.as_int() & 63)),
        BinOp::Shr => Value::Int(l.as_int() >> (r.as_int() & 63)),

        BinOp::GlobMatch => Value::Bool(glob_match(&r.to_string(), &l.to_string())),
        BinOp::NotGlobMatch => Value::Bool(!glob_match(&r.to_string(), &l.to_string())),
        BinOp::RegexMatch => Value::Bool(regex_match(&r.to_string(), &l.to_string())?),
        BinOp::NotRegexMatch => Value::Bool(!regex_match(&r.to_string(), &l.to_string())?),

        BinOp::And | BinOp::Or => unreachable!("handled above"),
    })
}

// ── Matching ──────────────────────────────────────────────────────────────────

/// `*` matches any run, `?` any single character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(p: &[char], t: &[char]) -> bool {
    match (p.first(), t.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            let rest = p
                .iter()
                .position(|&c| c != '*')
                .map_or(&[][..], |i| &p[i..]);
            (0..=t.len()).any(|i| glob_match_inner(rest, &t[i..]))
        }
        (Some('?'), Some(_)) => glob_match_inner(&p[1..], &t[1..]),
        (Some(pc), Some(tc)) if pc == tc => glob_match_inner(&p[1..], &t[1..]),
        _ => false,
    }
}

fn compile_regex(pattern: &str) -> Result<regex::Regex, String> {
    regex::Regex::new(pattern).map_err(|e| format!("bad pattern: {e}"))
}

/// Pattern computed at run time; literal patterns never get here.
fn regex_match(pattern: &str, text: &str) -> Result<bool, String> {
    compile_regex(pattern).map(|re| re.is_match(text))
}

/// Parse and evaluate an expression string.
pub fn eval_str(src: &str, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    let expr = parse_expr(src)?;
    eval_expr(&expr, ctx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::builtins;
    use std::collections::HashMap;

    // ── Minimal EvalContext for tests ─────────────────────────────────────────

    struct TestCtx {
        vars: HashMap<String, Value>,
    }

    impl TestCtx {
        fn new() -> Self {
            TestCtx {
                vars: HashMap::new(),
            }
        }
        fn with(mut self, k: &str, v: Value) -> Self {
            self.vars.insert(k.into(), v);
            self
        }
    }

    impl EvalContext for TestCtx {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.vars
                .get(name)
                .cloned()
                .or_else(|| builtins::lookup(name))
        }
        fn set_var(&mut self, name: &str, value: Value) {
            self.vars.insert(name.into(), value);
        }
    }

    fn eval(src: &str) -> Value {
        eval_str(src, &mut TestCtx::new()).expect("eval failed")
    }

    fn eval_ctx(src: &str, ctx: &mut TestCtx) -> Value {
        eval_str(src, ctx).expect("eval failed")
    }

    fn multi(src: &str) -> Vec<Value> {
        eval_multi(&parse_expr(src).unwrap(), &mut TestCtx::new()).unwrap()
    }

    #[test]
    fn literals() {
        assert_eq!(eval("42"), Value::Int(42));
        assert_eq!(eval("2.5"), Value::Float(2.5));
        assert_eq!(eval("1e3"), Value::Float(1000.0));
        assert_eq!(eval("\"hello\""), Value::from("hello"));
        assert_eq!(eval("'it\\'s'"), Value::from("it's"));
        assert_eq!(eval("\"a\\tb\""), Value::from("a\tb"));
        assert_eq!(eval("\"h\u{e9}\""), Value::from("h\u{e9}"));
        assert_eq!(eval("nil"), Value::Nil);
        assert_eq!(eval("true"), Value::Bool(true));
        assert_eq!(eval("false"), Value::Bool(false));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("2 + 3"), Value::Int(5));
        assert_eq!(eval("10 - 4"), Value::Int(6));
        assert_eq!(eval("3 * 4"), Value::Int(12));
        assert_eq!(eval("10 / 3"), Value::Int(3));
        assert_eq!(eval("10 % 3"), Value::Int(1));
        assert_eq!(eval("-(3 + 2)"), Value::Int(-5));
    }

    #[test]
    fn comparison_yields_booleans() {
        assert_eq!(eval("3 == 3"), Value::Bool(true));
        assert_eq!(eval("3 != 4"), Value::Bool(true));
        assert_eq!(eval("2 < 3"), Value::Bool(true));
        assert_eq!(eval("3 >= 3"), Value::Bool(true));
        assert_eq!(eval("\"abc\" < \"abd\""), Value::Bool(true));
        assert_eq!(eval("!0"), Value::Bool(true));
        assert_eq!(eval("nil == nil"), Value::Bool(true));
    }

    #[test]
    fn ternary() {
        assert_eq!(eval("1 ? 10 : 20"), Value::Int(10));
        assert_eq!(eval("0 ? 10 : 20"), Value::Int(20));
    }

    #[test]
    fn logical_operators_yield_operands() {
        assert_eq!(eval("1 && \"x\""), Value::from("x"));
        assert_eq!(eval("0 && \"x\""), Value::Int(0));
        assert_eq!(eval("nil || \"anon\""), Value::from("anon"));
        assert_eq!(eval("\"me\" || \"anon\""), Value::from("me"));
    }

    #[test]
    fn variables_and_assignment() {
        let mut ctx = TestCtx::new().with("x", Value::Int(7));
        assert_eq!(eval_ctx("x + 1", &mut ctx), Value::Int(8));
        eval_ctx("y = 5", &mut ctx);
        assert_eq!(ctx.vars.get("y"), Some(&Value::Int(5)));
        eval_ctx("x += 5", &mut ctx);
        assert_eq!(ctx.vars.get("x"), Some(&Value::Int(12)));
        assert_eq!(eval_ctx("missing", &mut ctx), Value::Nil);
    }

    #[test]
    fn postfix_index_field_call() {
        let mut ctx = TestCtx::new()
            .with("xs", Value::from(vec![10i64, 20, 30]))
            .with(
                "user",
                Value::map([("name", Value::from("ann")), ("tags", Value::from(vec!["a", "b"]))]),
            );
        assert_eq!(eval_ctx("xs[2]", &mut ctx), Value::Int(20));
        assert_eq!(eval_ctx("user.name", &mut ctx), Value::from("ann"));
        assert_eq!(eval_ctx("user[\"name\"]", &mut ctx), Value::from("ann"));
        assert_eq!(eval_ctx("user.tags[1]", &mut ctx), Value::from("a"));
        assert_eq!(eval_ctx("upper(user.name)", &mut ctx), Value::from("ANN"));
        assert_eq!(eval_ctx("len(xs) * 2", &mut ctx), Value::Int(6));
        assert_eq!(eval_ctx("user.missing.deeper", &mut ctx), Value::Nil);
    }

    #[test]
    fn comma_lists_are_multiple_values() {
        assert_eq!(multi("1, \"two\", nil"), vec![Value::Int(1), Value::from("two"), Value::Nil]);
        assert_eq!(multi("7"), vec![Value::Int(7)]);
        // The last element expands, earlier ones are truncated to one value.
        assert_eq!(multi("0, ipairs(list())").len(), 4);
        assert_eq!(multi("ipairs(list()), 0").len(), 2);
        assert_eq!(eval("(1, 2)"), Value::Int(1));
    }

    #[test]
    fn calling_non_functions_fails() {
        let mut ctx = TestCtx::new().with("n", Value::Int(1));
        assert_eq!(
            eval_str("nope(1)", &mut ctx).unwrap_err(),
            "attempt to call a nil value (variable 'nope')"
        );
        assert_eq!(
            eval_str("n(1)", &mut ctx).unwrap_err(),
            "attempt to call a number value"
        );
    }

    #[test]
    fn glob_and_regex() {
        assert_eq!(eval("\"hello\" =~ \"hel*\""), Value::Bool(true));
        assert_eq!(eval("\"hello\" =~ \"h?llo\""), Value::Bool(true));
        assert_eq!(eval("\"hello\" !~ \"xyz*\""), Value::Bool(true));
        assert_eq!(eval("\"hello\" =/ \"^hel.o$\""), Value::Bool(true));
        assert_eq!(eval("\"hello\" =/ \"^hell$\""), Value::Bool(false));
        assert_eq!(eval("\"hello world\" !/ \"world\""), Value::Bool(false));
        assert!(eval_str("\"x\" =/ \"(\"", &mut TestCtx::new())
            .unwrap_err()
            .starts_with("bad pattern"));
    }

    #[test]
    fn literal_patterns_compile_once() {
        let expr = parse_expr("s !/ \"^a+$\"").unwrap();
        assert!(matches!(expr, Expr::Matches { negate: true, .. }));
        let mut ctx = TestCtx::new();
        ctx.set_var("s", Value::from("aaa"));
        assert_eq!(eval_expr(&expr, &mut ctx).unwrap(), Value::Bool(false));
        ctx.set_var("s", Value::from("ab"));
        assert_eq!(eval_expr(&expr, &mut ctx).unwrap(), Value::Bool(true));

        // A bad literal pattern is rejected before evaluation.
        assert!(parse_expr("s =/ \"[\"").unwrap_err().starts_with("bad pattern"));

        // Computed patterns still work.
        ctx.set_var("p", Value::from("b$"));
        assert_eq!(eval_str("s =/ p", &mut ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn hex_and_bitwise() {
        assert_eq!(eval("0xff"), Value::Int(255));
        assert_eq!(eval("5 & 3"), Value::Int(1));
        assert_eq!(eval("5 | 2"), Value::Int(7));
        assert_eq!(eval("5 ^ 3"), Value::Int(6));
        assert_eq!(eval("1 << 3"), Value::Int(8));
        assert_eq!(eval("~0"), Value::Int(-1));
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("2 + 3 * 4"), Value::Int(14));
        assert_eq!(eval("(2 + 3) * 4"), Value::Int(20));
        assert_eq!(eval("1 + 1 == 2 && 3 > 2"), Value::Bool(true));
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse_expr("").unwrap_err(), "unexpected symbol near <eof>");
        assert_eq!(parse_expr("a b").unwrap_err(), "unexpected symbol near 'b'");
        assert_eq!(parse_expr("(1").unwrap_err(), "')' expected near <eof>");
        assert_eq!(parse_expr("xs[1").unwrap_err(), "']' expected near <eof>");
        assert_eq!(parse_expr("\"open").unwrap_err(), "unfinished string");
        assert_eq!(parse_expr("a @ b").unwrap_err(), "unexpected symbol near '@'");
        assert_eq!(parse_expr("1 ? 2").unwrap_err(), "':' expected near <eof>");
        assert!(parse_expr("0x").is_err());
    }

    #[test]
    fn glob_star() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("foo*", "foobar"));
        assert!(!glob_match("foo*", "barfoo"));
        assert!(glob_match("*bar", "foobar"));
        assert!(glob_match("f*r", "foobar"));
    }
}
