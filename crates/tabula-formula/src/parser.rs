use crate::error::{FormulaError, FormulaResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    Null,
    /// A column identifier as written, bare (`price`) or bracketed (`[Net Income]`).
    Column(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
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

impl Expr {
    /// Every column identifier in the expression, in source order, without duplicates.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Column(name) => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::Call { args, .. } => stack.extend(args.iter().rev()),
                Expr::UnaryOp { expr, .. } => stack.push(expr),
                Expr::BinaryOp { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Null => {}
            }
        }
        out
    }
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
    Modulo,
    Power,
    Concat,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Equals => "=",
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

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    BracketIdentifier(String),
    Number(f64),
    String(String),
    True,
    False,
    Null,
    Not,
    And,
    Or,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Ampersand,
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

    /// Consume `second` if it is next, returning `double` in that case and `single` otherwise.
    fn one_or_two(&mut self, second: char, double: Token, single: Token) -> Token {
        if self.peek() == Some(second) {
            self.bump();
            double
        } else {
            single
        }
    }

    /// Read a quoted run up to `close`; a doubled `close` is an escaped literal.
    fn quoted(&mut self, close: char, what: &str) -> FormulaResult<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(FormulaError::Parse(format!("unterminated {what}"))),
                Some(c) if c == close => {
                    if self.peek() == Some(close) {
                        self.bump();
                        out.push(close);
                        continue;
                    }
                    return Ok(out);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn next_token(&mut self) -> FormulaResult<Token> {
        self.consume_while(char::is_whitespace);
        let Some(ch) = self.bump() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '=' => self.one_or_two('=', Token::Equals, Token::Equals),
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::NotEquals
                } else {
                    Token::Not
                }
            }
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    Token::LessEquals
                }
                Some('>') => {
                    self.bump();
                    Token::NotEquals
                }
                _ => Token::Less,
            },
            '>' => self.one_or_two('=', Token::GreaterEquals, Token::Greater),
            '&' => self.one_or_two('&', Token::And, Token::Ampersand),
            '|' => {
                if self.peek() == Some('|') {
                    self.bump();
                    Token::Or
                } else {
                    return Err(FormulaError::Parse(format!(
                        "unexpected character '|' in {:?}",
                        self.input
                    )));
                }
            }
            '"' => Token::String(self.quoted('"', "string")?),
            '\'' => Token::String(self.quoted('\'', "string")?),
            '[' => {
                let name = self.quoted(']', "bracket identifier")?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(FormulaError::Parse("empty bracket identifier".into()));
                }
                Token::BracketIdentifier(name.to_string())
            }
            c if c.is_ascii_digit() || c == '.' => self.number(c)?,
            c if is_ident_start(c) => {
                let mut ident = c.to_string();
                ident.push_str(&self.consume_while(is_ident_part));
                keyword(&ident).unwrap_or(Token::Identifier(ident))
            }
            other => {
                return Err(FormulaError::Parse(format!(
                    "unexpected character {other:?} in {:?}",
                    self.input
                )))
            }
        };
        Ok(token)
    }

    fn number(&mut self, first: char) -> FormulaResult<Token> {
        let mut num_str = first.to_string();
        num_str.push_str(&self.consume_while(|c| c.is_ascii_digit() || c == '.'));
        if let Some(exp @ ('e' | 'E')) = self.peek() {
            self.bump();
            num_str.push(exp);
            if let Some(sign @ ('+' | '-')) = self.peek() {
                self.bump();
                num_str.push(sign);
            }
            let exp_digits = self.consume_while(|c| c.is_ascii_digit());
            if exp_digits.is_empty() {
                return Err(FormulaError::Parse(format!(
                    "invalid number {num_str:?} (expected exponent digits)"
                )));
            }
            num_str.push_str(&exp_digits);
        }
        num_str
            .parse()
            .map(Token::Number)
            .map_err(|_| FormulaError::Parse(format!("invalid number {num_str:?}")))
    }
}

fn keyword(ident: &str) -> Option<Token> {
    let token = match ident.to_ascii_lowercase().as_str() {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "not" => Token::Not,
        "and" => Token::And,
        "or" => Token::Or,
        _ => return None,
    };
    Some(token)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> FormulaResult<Self> {
        let mut lexer = Lexer::new(input);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    fn bump(&mut self) -> FormulaResult<Token> {
        let current = std::mem::replace(&mut self.lookahead, Token::Eof);
        self.lookahead = self.lexer.next_token()?;
        Ok(current)
    }

    fn expect(&mut self, token: Token) -> FormulaResult<()> {
        if self.lookahead == token {
            self.bump()?;
            Ok(())
        } else {
            Err(FormulaError::Parse(format!(
                "expected {token:?}, found {:?}",
                self.lookahead
            )))
        }
    }

    fn parse(&mut self) -> FormulaResult<Expr> {
        if self.lookahead == Token::Eof {
            return Err(FormulaError::Parse("empty formula".into()));
        }
        let expr = self.parse_expr(0)?;
        if self.lookahead != Token::Eof {
            return Err(FormulaError::Parse(format!(
                "unexpected token {:?}",
                self.lookahead
            )));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self, min_prec: u8) -> FormulaResult<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some((op, prec)) = self.infix_binding_power() {
            if prec < min_prec {
                break;
            }
            self.bump()?;
            // `^` is right-associative.
            let next_min = if op == BinaryOp::Power { prec } else { prec + 1 };
            let right = self.parse_expr(next_min)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> FormulaResult<Expr> {
        match self.bump()? {
            Token::Minus => {
                let expr = self.parse_expr(7)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Negate,
                    expr: Box::new(expr),
                })
            }
            Token::Plus => self.parse_expr(7),
            Token::Not => {
                let expr = self.parse_expr(3)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::String(s) => Ok(Expr::Text(s)),
            Token::True => Ok(Expr::Boolean(true)),
            Token::False => Ok(Expr::Boolean(false)),
            Token::Null => Ok(Expr::Null),
            Token::BracketIdentifier(name) => Ok(Expr::Column(name)),
            Token::Identifier(name) => {
                if self.lookahead == Token::LParen {
                    self.bump()?;
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Column(name))
                }
            }
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(FormulaError::Parse(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }

    fn parse_args(&mut self) -> FormulaResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.lookahead != Token::RParen {
            loop {
                args.push(self.parse_expr(0)?);
                if self.lookahead == Token::Comma {
                    self.bump()?;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn infix_binding_power(&self) -> Option<(BinaryOp, u8)> {
        // Higher binds tighter: ^ > * / % > + - > & > comparisons > and > or
        match self.lookahead {
            Token::Or => Some((BinaryOp::Or, 1)),
            Token::And => Some((BinaryOp::And, 2)),
            Token::Equals => Some((BinaryOp::Equals, 3)),
            Token::NotEquals => Some((BinaryOp::NotEquals, 3)),
            Token::Less => Some((BinaryOp::Less, 3)),
            Token::LessEquals => Some((BinaryOp::LessEquals, 3)),
            Token::Greater => Some((BinaryOp::Greater, 3)),
            Token::GreaterEquals => Some((BinaryOp::GreaterEquals, 3)),
            Token::Ampersand => Some((BinaryOp::Concat, 4)),
            Token::Plus => Some((BinaryOp::Add, 5)),
            Token::Minus => Some((BinaryOp::Subtract, 5)),
            Token::Star => Some((BinaryOp::Multiply, 6)),
            Token::Slash => Some((BinaryOp::Divide, 6)),
            Token::Percent => Some((BinaryOp::Modulo, 6)),
            Token::Caret => Some((BinaryOp::Power, 8)),
            _ => None,
        }
    }
}

pub fn parse(input: &str) -> FormulaResult<Expr> {
    Parser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::Column(name.into()))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse("a + b * 2").unwrap(),
            Expr::BinaryOp {
                op: BinaryOp::Add,
                left: col("a"),
                right: Box::new(Expr::BinaryOp {
                    op: BinaryOp::Multiply,
                    left: col("b"),
                    right: Box::new(Expr::Number(2.0)),
                }),
            }
        );
    }

    #[test]
    fn power_is_right_associative_and_binds_over_negation() {
        let expr = parse("-2 ^ 3 ^ 2").unwrap();
        let Expr::UnaryOp { op: UnaryOp::Negate, expr } = expr else {
            panic!("expected negation");
        };
        assert_eq!(
            *expr,
            Expr::BinaryOp {
                op: BinaryOp::Power,
                left: Box::new(Expr::Number(2.0)),
                right: Box::new(Expr::BinaryOp {
                    op: BinaryOp::Power,
                    left: Box::new(Expr::Number(3.0)),
                    right: Box::new(Expr::Number(2.0)),
                }),
            }
        );
    }

    #[test]
    fn keywords_and_bracketed_identifiers() {
        let expr = parse("not [Net Income] > 0 AND flag or NULL").unwrap();
        assert_eq!(expr.identifiers(), vec!["Net Income", "flag"]);
        let Expr::BinaryOp { op, right, .. } = expr else {
            panic!("expected binary op");
        };
        assert_eq!(op, BinaryOp::Or);
        assert_eq!(*right, Expr::Null);
    }

    #[test]
    fn calls_and_quoted_text() {
        assert_eq!(
            parse("if(region == 'it''s', \"a\", sum(price))").unwrap(),
            Expr::Call {
                name: "if".into(),
                args: vec![
                    Expr::BinaryOp {
                        op: BinaryOp::Equals,
                        left: col("region"),
                        right: Box::new(Expr::Text("it's".into())),
                    },
                    Expr::Text("a".into()),
                    Expr::Call {
                        name: "sum".into(),
                        args: vec![Expr::Column("price".into())],
                    },
                ],
            }
        );
    }

    #[test]
    fn numbers_with_exponents() {
        assert_eq!(parse("1.5e3").unwrap(), Expr::Number(1500.0));
        assert!(parse("1e").is_err());
    }

    #[test]
    fn syntax_errors() {
        for bad in ["", "price *", "(price", "price price", "a | b", "[]", "'open"] {
            assert!(
                matches!(parse(bad), Err(FormulaError::Parse(_))),
                "{bad:?} should not parse"
            );
        }
    }
}
