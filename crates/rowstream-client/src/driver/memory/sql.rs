//! Tokenizer and parser for the statement shapes the engine emits.
//!
//! Grammar:
//!
//! ```text
//! stmt      := IF [NOT] EXISTS ( select ) stmt [ELSE stmt]
//!            | INSERT INTO name ( name {, name} ) VALUES ( operand {, operand} )
//!            | UPDATE name SET name = operand {, name = operand} [WHERE cond]
//!            | select
//! select    := SELECT item {, item} FROM name [WHERE cond]
//! item      := 1 | GET_FILESTREAM_TRANSACTION_CONTEXT ( ) | name . PathName ( ) | name
//! cond      := conj {OR conj}
//! conj      := atom {AND atom}
//! atom      := ( cond ) | operand = operand
//! operand   := @pN | 0x.. | integer | 'text' | N'text' | NULL | name
//! name      := part {. part}        part := ident | [quoted]
//! ```

use super::MemoryError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Param(usize),
    Hex(Vec<u8>),
    Number(i64),
    Text(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Eq,
    Semicolon,
}

fn syntax(message: impl Into<String>) -> MemoryError {
    MemoryError::Syntax {
        message: message.into(),
    }
}

fn tokenize(sql: &str) -> Result<Vec<Token>, MemoryError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '[' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| syntax("unterminated quoted identifier"))?;
                tokens.push(Token::Quoted(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '@' => {
                let start = i + 2;
                if chars.get(i + 1) != Some(&'p') {
                    return Err(syntax("only @pN placeholders are supported"));
                }
                let len = chars[start..].iter().take_while(|c| c.is_ascii_digit()).count();
                let digits: String = chars[start..start + len].iter().collect();
                let ordinal = digits
                    .parse()
                    .map_err(|_| syntax(format!("bad placeholder near @p{}", digits)))?;
                tokens.push(Token::Param(ordinal));
                i = start + len;
            }
            '\'' => {
                let (text, next) = quoted_text(&chars, i)?;
                tokens.push(Token::Text(text));
                i = next;
            }
            'N' | 'n' if chars.get(i + 1) == Some(&'\'') => {
                let (text, next) = quoted_text(&chars, i + 1)?;
                tokens.push(Token::Text(text));
                i = next;
            }
            '0' if matches!(chars.get(i + 1), Some('x') | Some('X')) => {
                let start = i + 2;
                let len = chars[start..].iter().take_while(|c| c.is_ascii_hexdigit()).count();
                let hex: String = chars[start..start + len].iter().collect();
                tokens.push(Token::Hex(decode_hex(&hex)?));
                i = start + len;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| syntax(format!("bad number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

/// Reads a `'...'` literal starting at the opening quote, `''` escaping `'`.
fn quoted_text(chars: &[char], open: usize) -> Result<(String, usize), MemoryError> {
    let mut text = String::new();
    let mut i = open + 1;
    loop {
        match chars.get(i) {
            Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                text.push('\'');
                i += 2;
            }
            Some('\'') => return Ok((text, i + 1)),
            Some(&c) => {
                text.push(c);
                i += 1;
            }
            None => return Err(syntax("unterminated string literal")),
        }
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, MemoryError> {
    if hex.len() % 2 != 0 {
        return Err(syntax("binary literal has an odd number of digits"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| syntax("bad binary literal")))
        .collect()
}

/// A value position in a statement.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Operand {
    Column(String),
    Param(usize),
    Binary(Vec<u8>),
    Integer(i64),
    Text(String),
    Null,
}

/// A WHERE condition.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Condition {
    Eq(Operand, Operand),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// A projected item.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum SelectItem {
    One,
    PathName(String),
    TransactionContext,
    Column(String),
}

/// A SELECT.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Select {
    pub items: Vec<SelectItem>,
    pub table: String,
    pub filter: Option<Condition>,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Statement {
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Operand>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Operand)>,
        filter: Option<Condition>,
    },
    Select(Select),
    Conditional {
        negated: bool,
        probe: Select,
        then: Box<Statement>,
        otherwise: Option<Box<Statement>>,
    },
}

/// Parses one statement.
pub(super) fn parse(sql: &str) -> Result<Statement, MemoryError> {
    let mut parser = Parser {
        tokens: tokenize(sql)?,
        pos: 0,
    };
    let statement = parser.statement()?;
    while parser.eat(&Token::Semicolon) {}
    match parser.peek() {
        None => Ok(statement),
        Some(token) => Err(syntax(format!("unexpected trailing {:?}", token))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), MemoryError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(syntax(format!("expected {:?}, found {:?}", token, self.peek())))
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), MemoryError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(format!("expected {}, found {:?}", keyword, self.peek())))
        }
    }

    fn statement(&mut self) -> Result<Statement, MemoryError> {
        if self.eat_keyword("IF") {
            let negated = self.eat_keyword("NOT");
            self.keyword("EXISTS")?;
            self.expect(Token::LParen)?;
            self.keyword("SELECT")?;
            let probe = self.select_body()?;
            self.expect(Token::RParen)?;
            let then = Box::new(self.statement()?);
            let otherwise = if self.eat_keyword("ELSE") {
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            return Ok(Statement::Conditional {
                negated,
                probe,
                then,
                otherwise,
            });
        }
        if self.eat_keyword("INSERT") {
            self.keyword("INTO")?;
            let table = self.name()?;
            self.expect(Token::LParen)?;
            let mut columns = vec![self.column()?];
            while self.eat(&Token::Comma) {
                columns.push(self.column()?);
            }
            self.expect(Token::RParen)?;
            self.keyword("VALUES")?;
            self.expect(Token::LParen)?;
            let mut values = vec![self.operand()?];
            while self.eat(&Token::Comma) {
                values.push(self.operand()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Statement::Insert {
                table,
                columns,
                values,
            });
        }
        if self.eat_keyword("UPDATE") {
            let table = self.name()?;
            self.keyword("SET")?;
            let mut assignments = Vec::new();
            loop {
                let column = self.column()?;
                self.expect(Token::Eq)?;
                assignments.push((column, self.operand()?));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            let filter = self.where_clause()?;
            return Ok(Statement::Update {
                table,
                assignments,
                filter,
            });
        }
        if self.eat_keyword("SELECT") {
            return Ok(Statement::Select(self.select_body()?));
        }
        Err(syntax(format!("unsupported statement at {:?}", self.peek())))
    }

    fn select_body(&mut self) -> Result<Select, MemoryError> {
        let mut items = vec![self.select_item()?];
        while self.eat(&Token::Comma) {
            items.push(self.select_item()?);
        }
        self.keyword("FROM")?;
        let table = self.name()?;
        let filter = self.where_clause()?;
        Ok(Select {
            items,
            table,
            filter,
        })
    }

    fn select_item(&mut self) -> Result<SelectItem, MemoryError> {
        if self.eat(&Token::Number(1)) {
            return Ok(SelectItem::One);
        }
        if self.eat_keyword("GET_FILESTREAM_TRANSACTION_CONTEXT") {
            self.expect(Token::LParen)?;
            self.expect(Token::RParen)?;
            return Ok(SelectItem::TransactionContext);
        }
        let mut parts = self.name_parts()?;
        let is_path = parts.len() > 1
            && parts.last().is_some_and(|p| p.eq_ignore_ascii_case("PathName"))
            && self.peek() == Some(&Token::LParen);
        if is_path {
            self.expect(Token::LParen)?;
            self.expect(Token::RParen)?;
            parts.pop();
            return Ok(SelectItem::PathName(parts.pop().unwrap_or_default()));
        }
        Ok(SelectItem::Column(parts.pop().unwrap_or_default()))
    }

    fn where_clause(&mut self) -> Result<Option<Condition>, MemoryError> {
        if self.eat_keyword("WHERE") {
            Ok(Some(self.disjunction()?))
        } else {
            Ok(None)
        }
    }

    fn disjunction(&mut self) -> Result<Condition, MemoryError> {
        let mut left = self.conjunction()?;
        while self.eat_keyword("OR") {
            let right = self.conjunction()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> Result<Condition, MemoryError> {
        let mut left = self.atom()?;
        while self.eat_keyword("AND") {
            let right = self.atom()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn atom(&mut self) -> Result<Condition, MemoryError> {
        if self.eat(&Token::LParen) {
            let inner = self.disjunction()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        let left = self.operand()?;
        self.expect(Token::Eq)?;
        let right = self.operand()?;
        Ok(Condition::Eq(left, right))
    }

    fn operand(&mut self) -> Result<Operand, MemoryError> {
        match self.peek().cloned() {
            Some(Token::Param(ordinal)) => {
                self.pos += 1;
                Ok(Operand::Param(ordinal))
            }
            Some(Token::Hex(bytes)) => {
                self.pos += 1;
                Ok(Operand::Binary(bytes))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Operand::Integer(n))
            }
            Some(Token::Text(text)) => {
                self.pos += 1;
                Ok(Operand::Text(text))
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("NULL") => {
                self.pos += 1;
                Ok(Operand::Null)
            }
            _ => Ok(Operand::Column(self.column()?)),
        }
    }

    /// A possibly qualified column; only the last part is kept.
    fn column(&mut self) -> Result<String, MemoryError> {
        let mut parts = self.name_parts()?;
        parts
            .pop()
            .ok_or_else(|| syntax("expected a column name"))
    }

    fn name(&mut self) -> Result<String, MemoryError> {
        Ok(self.name_parts()?.join("."))
    }

    fn name_parts(&mut self) -> Result<Vec<String>, MemoryError> {
        let mut parts = vec![self.part()?];
        while self.eat(&Token::Dot) {
            parts.push(self.part()?);
        }
        Ok(parts)
    }

    fn part(&mut self) -> Result<String, MemoryError> {
        match self.next() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => Ok(w),
            other => Err(syntax(format!("expected an identifier, found {:?}", other))),
        }
    }
}
