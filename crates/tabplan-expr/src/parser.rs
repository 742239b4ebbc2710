use crate::error::{ExprError, ExprResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Null,
    Column(String),
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
}

/// Binding power of the operand of a prefix `not`: comparisons (and tighter) bind inside it.
pub(crate) const NOT_OPERAND_PREC: u8 = 3;
/// Binding power of the operand of a unary minus.
pub(crate) const NEGATE_OPERAND_PREC: u8 = 7;

impl BinaryOp {
    /// Operator precedence (higher binds tighter):
    ///   * / %  >  + -  >  comparisons  >  and  >  or
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Equals
            | BinaryOp::NotEquals
            | BinaryOp::Less
            | BinaryOp::LessEquals
            | BinaryOp::Greater
            | BinaryOp::GreaterEquals => 3,
            BinaryOp::Add | BinaryOp::Subtract => 5,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEquals => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEquals => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

impl Expr {
    /// Column names referenced by the expression, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::UnaryOp { expr, .. } => expr.collect_columns(out),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Int(_) | Expr::Float(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Null => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    BracketIdentifier(String),
    Int(i64),
    Float(f64),
    String(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::str::Chars<'a>,
    peeked: Option<char>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        let mut chars = input.chars();
        let peeked = chars.next();
        Self {
            input,
            chars,
            peeked,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let current = self.peeked.take();
        self.peeked = self.chars.next();
        current
    }

    fn peek(&self) -> Option<char> {
        self.peeked
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut buf = String::new();
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            buf.push(ch);
            self.bump();
        }
        buf
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(|c| c.is_whitespace());
    }

    /// Consume a single-character token, upgrading it when the next character is `second`.
    fn one_or_two(&mut self, second: char, single: Token, double: Token) -> Token {
        self.bump();
        if self.peek() == Some(second) {
            self.bump();
            double
        } else {
            single
        }
    }

    fn next_token(&mut self) -> ExprResult<Token> {
        self.skip_whitespace();
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };

        match ch {
            '(' => {
                self.bump();
                Ok(Token::LParen)
            }
            ')' => {
                self.bump();
                Ok(Token::RParen)
            }
            '+' => {
                self.bump();
                Ok(Token::Plus)
            }
            '-' => {
                self.bump();
                Ok(Token::Minus)
            }
            '*' => {
                self.bump();
                Ok(Token::Star)
            }
            '/' => {
                self.bump();
                Ok(Token::Slash)
            }
            '%' => {
                self.bump();
                Ok(Token::Percent)
            }
            // `=` and `==` are both equality.
            '=' => Ok(self.one_or_two('=', Token::Equals, Token::Equals)),
            '!' => Ok(self.one_or_two('=', Token::Not, Token::NotEquals)),
            '<' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        Ok(Token::LessEquals)
                    }
                    Some('>') => {
                        self.bump();
                        Ok(Token::NotEquals)
                    }
                    _ => Ok(Token::Less),
                }
            }
            '>' => Ok(self.one_or_two('=', Token::Greater, Token::GreaterEquals)),
            '&' => {
                self.bump();
                if self.peek() == Some('&') {
                    self.bump();
                    Ok(Token::And)
                } else {
                    Err(ExprError::Parse(format!(
                        "unexpected character '&' in {:?}",
                        self.input
                    )))
                }
            }
            '|' => {
                self.bump();
                if self.peek() == Some('|') {
                    self.bump();
                    Ok(Token::Or)
                } else {
                    Err(ExprError::Parse(format!(
                        "unexpected character '|' in {:?}",
                        self.input
                    )))
                }
            }
            '"' => {
                self.bump();
                let mut out = String::new();
                loop {
                    match self.peek() {
                        None => return Err(ExprError::Parse("unterminated string".into())),
                        Some('"') => {
                            self.bump();
                            if self.peek() == Some('"') {
                                self.bump();
                                out.push('"');
                                continue;
                            }
                            break;
                        }
                        Some(c) => {
                            out.push(c);
                            self.bump();
                        }
                    }
                }
                Ok(Token::String(out))
            }
            '[' => {
                self.bump();
                let mut out = String::new();
                loop {
                    match self.peek() {
                        None => {
                            return Err(ExprError::Parse(
                                "unterminated bracket identifier".into(),
                            ))
                        }
                        Some(']') => {
                            // `]]` is a literal `]` inside the identifier.
                            self.bump();
                            if self.peek() == Some(']') {
                                self.bump();
                                out.push(']');
                                continue;
                            }
                            break;
                        }
                        Some(c) => {
                            out.push(c);
                            self.bump();
                        }
                    }
                }
                if out.is_empty() {
                    return Err(ExprError::Parse("empty bracket identifier".into()));
                }
                Ok(Token::BracketIdentifier(out))
            }
            c if c.is_ascii_digit() || c == '.' => self.lex_number(),
            c if is_ident_start(c) => {
                let ident = self.consume_while(is_ident_part);
                Ok(keyword(&ident).unwrap_or(Token::Identifier(ident)))
            }
            other => Err(ExprError::Parse(format!(
                "unexpected character {other:?} in {:?}",
                self.input
            ))),
        }
    }

    fn lex_number(&mut self) -> ExprResult<Token> {
        let mut num_str = self.consume_while(|c| c.is_ascii_digit() || c == '.');
        let mut is_float = num_str.contains('.');
        // Support exponent notation like `1e3` / `1E-3`.
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            if let Some(exp) = self.bump() {
                num_str.push(exp);
            }
            if matches!(self.peek(), Some('+' | '-')) {
                if let Some(sign) = self.bump() {
                    num_str.push(sign);
                }
            }
            let exp_digits = self.consume_while(|c| c.is_ascii_digit());
            if exp_digits.is_empty() {
                return Err(ExprError::Parse(format!(
                    "invalid number {num_str:?} (expected exponent digits)"
                )));
            }
            num_str.push_str(&exp_digits);
        }

        if is_float {
            let num: f64 = num_str
                .parse()
                .map_err(|_| ExprError::Parse(format!("invalid number {num_str:?}")))?;
            // `inf` and `NaN` have no literal form to print back as.
            if !num.is_finite() {
                return Err(ExprError::Parse(format!(
                    "float literal out of range: {num_str}"
                )));
            }
            Ok(Token::Float(num))
        } else {
            let num: i64 = num_str
                .parse()
                .map_err(|_| ExprError::Parse(format!("integer literal out of range: {num_str}")))?;
            Ok(Token::Int(num))
        }
    }
}

fn keyword(ident: &str) -> Option<Token> {
    let token = match ident.to_ascii_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => return None,
    };
    Some(token)
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub(crate) fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `name` can be written as a bare identifier (otherwise it needs `[...]`).
pub(crate) fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    is_ident_start(first) && chars.all(is_ident_part) && keyword(name).is_none()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> ExprResult<Self> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn bump(&mut self) -> ExprResult<Token> {
        let current = std::mem::replace(&mut self.lookahead, Token::Eof);
        self.lookahead = self.lexer.next_token()?;
        Ok(current)
    }

    fn expect(&mut self, token: Token) -> ExprResult<()> {
        if self.lookahead == token {
            self.bump()?;
            Ok(())
        } else {
            Err(ExprError::Parse(format!(
                "expected {token:?}, found {:?}",
                self.lookahead
            )))
        }
    }

    fn parse(&mut self) -> ExprResult<Expr> {
        if self.lookahead == Token::Eof {
            return Err(ExprError::Parse("empty expression".into()));
        }
        let expr = self.parse_expr(0)?;
        if self.lookahead != Token::Eof {
            return Err(ExprError::Parse(format!(
                "unexpected token {:?}",
                self.lookahead
            )));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self, min_prec: u8) -> ExprResult<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some(op) = self.infix_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.bump()?;
            let right = self.parse_expr(prec + 1)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> ExprResult<Expr> {
        match self.bump()? {
            Token::Minus => {
                let expr = self.parse_expr(NEGATE_OPERAND_PREC)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Negate,
                    expr: Box::new(expr),
                })
            }
            Token::Not => {
                let expr = self.parse_expr(NOT_OPERAND_PREC)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Float(n) => Ok(Expr::Float(n)),
            Token::String(s) => Ok(Expr::Text(s)),
            Token::True => Ok(Expr::Boolean(true)),
            Token::False => Ok(Expr::Boolean(false)),
            Token::Null => Ok(Expr::Null),
            Token::Identifier(name) | Token::BracketIdentifier(name) => Ok(Expr::Column(name)),
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Eof => Err(ExprError::Parse("unexpected end of expression".into())),
            other => Err(ExprError::Parse(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }

    fn infix_op(&self) -> Option<BinaryOp> {
        let op = match self.lookahead {
            Token::Or => BinaryOp::Or,
            Token::And => BinaryOp::And,
            Token::Equals => BinaryOp::Equals,
            Token::NotEquals => BinaryOp::NotEquals,
            Token::Less => BinaryOp::Less,
            Token::LessEquals => BinaryOp::LessEquals,
            Token::Greater => BinaryOp::Greater,
            Token::GreaterEquals => BinaryOp::GreaterEquals,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Subtract,
            Token::Star => BinaryOp::Multiply,
            Token::Slash => BinaryOp::Divide,
            Token::Percent => BinaryOp::Remainder,
            _ => return None,
        };
        Some(op)
    }
}

pub fn parse(input: &str) -> ExprResult<Expr> {
    Parser::new(input)?.parse()
}
