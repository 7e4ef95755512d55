//! Tokenizer and recursive-descent parser for statement snippets
//!
//! This is not a model-file grammar: declaration blocks arrive already built
//! from the external parser. The snippet parser materialises the statements
//! returned by the symbolic solver service and lets tests and tools write
//! bodies the way a model author would, e.g.
//!
//! ```
//! use modlgen::ast::parser::parse_statements;
//!
//! let body = parse_statements("~ A + B <-> C (kf, kb)\nCOMPARTMENT vol {C}").unwrap();
//! assert_eq!(body.statements.len(), 2);
//! ```

use std::fmt;

use crate::ast::*;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Ident(String),
    Verbatim(String),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Prime,
    Tilde,
    Assign,
    Op(char),
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    And,
    Or,
    Bang,
    ReactForward,
    ReactReversible,
    ReactSource,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    at: ModToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub pos: usize,
    pub found: Option<String>,
    pub expected: Vec<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.found {
            Some(found) if !self.expected.is_empty() => write!(
                f,
                "parse error at token {} found {} expected one of {:?}",
                self.pos, found, self.expected
            ),
            Some(found) => write!(f, "parse error at token {} found {}", self.pos, found),
            None => write!(
                f,
                "parse error at token {} found <end> expected one of {:?}",
                self.pos, self.expected
            ),
        }
    }
}

impl std::error::Error for ParseError {}

fn tokenize(src: &str) -> Vec<Spanned> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1u32;
    let mut line_start = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let at = ModToken::new(line, (i - line_start + 1) as u32);
        if c == '\n' {
            line += 1;
            i += 1;
            line_start = i;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // comments run to the end of the line
        if c == ':' || (c == '/' && chars.get(i + 1) == Some(&'/')) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // exponent only when digits follow, so `2E` stays a coefficient plus species
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            if let Ok(value) = text.parse::<f64>() {
                tokens.push(Spanned {
                    token: Token::Num(value),
                    at,
                });
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if ident == "VERBATIM" {
                let rest: String = chars[i..].iter().collect();
                let (text, consumed) = match rest.find("ENDVERBATIM") {
                    Some(end) => (rest[..end].to_string(), end + "ENDVERBATIM".len()),
                    None => (rest.clone(), rest.len()),
                };
                line += text.matches('\n').count() as u32;
                i += rest[..consumed].chars().count();
                tokens.push(Spanned {
                    token: Token::Verbatim(text.trim_matches('\n').to_string()),
                    at,
                });
                continue;
            }
            tokens.push(Spanned {
                token: Token::Ident(ident),
                at,
            });
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match c {
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            ';' => (Token::Semicolon, 1),
            '\'' => (Token::Prime, 1),
            '~' => (Token::Tilde, 1),
            '+' | '*' | '/' | '^' => (Token::Op(c), 1),
            '-' if next == Some('>') => (Token::ReactForward, 2),
            '-' => (Token::Op('-'), 1),
            '<' if next == Some('-') && chars.get(i + 2) == Some(&'>') => {
                (Token::ReactReversible, 3)
            }
            '<' if next == Some('<') => (Token::ReactSource, 2),
            '<' if next == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if next == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '=' if next == Some('=') => (Token::EqEq, 2),
            '=' => (Token::Assign, 1),
            '!' if next == Some('=') => (Token::Ne, 2),
            '!' => (Token::Bang, 1),
            '&' if next == Some('&') => (Token::And, 2),
            '|' if next == Some('|') => (Token::Or, 2),
            _ => {
                i += 1;
                continue;
            }
        };
        tokens.push(Spanned { token, at });
        i += width;
    }
    tokens
}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(src: &str) -> Self {
        Self {
            tokens: tokenize(src),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn location(&self) -> Option<ModToken> {
        self.tokens.get(self.pos).map(|s| s.at)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, expected: &[&str]) -> ParseError {
        ParseError {
            pos: self.pos,
            found: self.peek().map(|t| format!("{:?}", t)),
            expected: expected.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn expect(&mut self, token: Token, label: &str) -> Result<(), ParseError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&[label]))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(id)) if id == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<Name, ParseError> {
        let at = self.location();
        match self.peek().cloned() {
            Some(Token::Ident(id)) => {
                self.pos += 1;
                Ok(Name {
                    value: id,
                    token: at,
                })
            }
            _ => Err(self.error(&["identifier"])),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn skip_separators(&mut self) {
        while self.peek() == Some(&Token::Semicolon) {
            self.pos += 1;
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Statements
    // ───────────────────────────────────────────────────────────────────────

    /// Parse statements until the end of input or a closing brace
    pub fn parse_statement_list(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.at_end() || self.peek() == Some(&Token::RBrace) {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
        }
    }

    fn parse_braced_block(&mut self) -> Result<StatementBlock, ParseError> {
        self.expect(Token::LBrace, "{")?;
        let statements = self.parse_statement_list()?;
        self.expect(Token::RBrace, "}")?;
        Ok(StatementBlock::new(statements))
    }

    pub fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek().cloned() {
            Some(Token::Tilde) => {
                self.pos += 1;
                self.parse_reaction().map(Statement::Reaction)
            }
            Some(Token::LBrace) => self.parse_braced_block().map(Statement::Block),
            Some(Token::Verbatim(text)) => {
                self.pos += 1;
                Ok(Statement::Verbatim(text))
            }
            Some(Token::Ident(id)) => match id.as_str() {
                "LOCAL" => {
                    self.pos += 1;
                    let mut names = vec![self.ident()?];
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        names.push(self.ident()?);
                    }
                    Ok(Statement::LocalList(names))
                }
                "COMPARTMENT" => {
                    self.pos += 1;
                    self.parse_compartment().map(Statement::Compartment)
                }
                "CONSERVE" => {
                    self.pos += 1;
                    let token = self.location();
                    let react = self.parse_react_vars()?;
                    self.expect(Token::Assign, "=")?;
                    let expr = self.parse_expr()?;
                    Ok(Statement::Conserve(Conserve { react, expr, token }))
                }
                "IF" => {
                    self.pos += 1;
                    self.parse_if().map(Statement::If)
                }
                "SOLVE" => {
                    self.pos += 1;
                    let block_name = self.ident()?;
                    let method = if self.eat_keyword("METHOD") {
                        Some(self.ident()?)
                    } else {
                        None
                    };
                    Ok(Statement::Solve(SolveStatement { block_name, method }))
                }
                "TABLE" => {
                    self.pos += 1;
                    self.parse_table().map(Statement::Table)
                }
                _ => self.parse_expression_statement(),
            },
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, ParseError> {
        let lhs = self.parse_expr()?;
        if self.peek() == Some(&Token::Assign) {
            self.pos += 1;
            let rhs = self.parse_expr()?;
            return Ok(Statement::assign(lhs, rhs));
        }
        Ok(Statement::Expression(lhs))
    }

    fn parse_if(&mut self) -> Result<IfStatement, ParseError> {
        self.expect(Token::LParen, "(")?;
        let condition = self.parse_expr()?;
        self.expect(Token::RParen, ")")?;
        let then_block = self.parse_braced_block()?;
        let else_block = if self.eat_keyword("ELSE") {
            if self.eat_keyword("IF") {
                let nested = self.parse_if()?;
                Some(StatementBlock::new(vec![Statement::If(nested)]))
            } else {
                Some(self.parse_braced_block()?)
            }
        } else {
            None
        };
        Ok(IfStatement {
            condition,
            then_block,
            else_block,
        })
    }

    fn parse_table(&mut self) -> Result<TableStatement, ParseError> {
        let mut names = vec![self.ident()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            names.push(self.ident()?);
        }
        let mut depend = Vec::new();
        if self.eat_keyword("DEPEND") {
            depend.push(self.ident()?);
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                depend.push(self.ident()?);
            }
        }
        if !self.eat_keyword("FROM") {
            return Err(self.error(&["FROM"]));
        }
        let from = self.parse_expr()?;
        if !self.eat_keyword("TO") {
            return Err(self.error(&["TO"]));
        }
        let to = self.parse_expr()?;
        if !self.eat_keyword("WITH") {
            return Err(self.error(&["WITH"]));
        }
        let with = match self.advance() {
            Some(Token::Num(v)) if v >= 0.0 && v.fract() == 0.0 => v as u32,
            _ => return Err(self.error(&["integer"])),
        };
        Ok(TableStatement {
            names,
            depend,
            from,
            to,
            with,
        })
    }

    fn parse_compartment(&mut self) -> Result<Compartment, ParseError> {
        let token = self.location();
        // `COMPARTMENT i, expr {...}` has an index name before the first comma
        let index_name = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(_)), Some(Token::Comma)) => {
                let name = self.ident()?;
                self.pos += 1;
                Some(name)
            }
            _ => None,
        };
        let volume = self.parse_expr()?;
        self.expect(Token::LBrace, "{")?;
        let mut species = Vec::new();
        while let Some(Token::Ident(_)) = self.peek() {
            species.push(self.ident()?);
        }
        self.expect(Token::RBrace, "}")?;
        Ok(Compartment {
            index_name,
            volume,
            species,
            token,
        })
    }

    fn parse_react_var(&mut self) -> Result<ReactVar, ParseError> {
        let coefficient = match self.peek() {
            Some(Token::Num(v)) if *v >= 1.0 && v.fract() == 0.0 => {
                let c = *v as u32;
                self.pos += 1;
                c
            }
            _ => 1,
        };
        let name = self.ident()?;
        let index = if self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            let index = self.parse_expr()?;
            self.expect(Token::RBracket, "]")?;
            Some(Box::new(index))
        } else {
            None
        };
        Ok(ReactVar {
            coefficient,
            name,
            index,
        })
    }

    fn parse_react_vars(&mut self) -> Result<Vec<ReactVar>, ParseError> {
        let mut vars = vec![self.parse_react_var()?];
        while self.peek() == Some(&Token::Op('+')) {
            self.pos += 1;
            vars.push(self.parse_react_var()?);
        }
        Ok(vars)
    }

    fn parse_reaction(&mut self) -> Result<ReactionStatement, ParseError> {
        let token = self.location();
        let lhs = self.parse_react_vars()?;
        let op = match self.peek() {
            Some(Token::ReactForward) => ReactionOp::Forward,
            Some(Token::ReactReversible) => ReactionOp::Reversible,
            Some(Token::ReactSource) => ReactionOp::Source,
            _ => return Err(self.error(&["->", "<->", "<<"])),
        };
        self.pos += 1;
        if op == ReactionOp::Source {
            self.expect(Token::LParen, "(")?;
            let rate = self.parse_expr()?;
            self.expect(Token::RParen, ")")?;
            return Ok(ReactionStatement {
                lhs,
                op,
                rhs: Vec::new(),
                rate_forward: rate,
                rate_backward: None,
                token,
            });
        }
        let rhs = self.parse_react_vars()?;
        self.expect(Token::LParen, "(")?;
        let rate_forward = self.parse_expr()?;
        let rate_backward = if self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(Token::RParen, ")")?;
        Ok(ReactionStatement {
            lhs,
            op,
            rhs,
            rate_forward,
            rate_backward,
            token,
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────────

    pub fn parse_expr(&mut self) -> Result<Expression, ParseError> {
        self.parse_or()
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expression, ParseError>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expression, ParseError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.peek() == Some(token) {
                    self.pos += 1;
                    let rhs = next(self)?;
                    lhs = Expression::binary(lhs, *op, rhs);
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        self.parse_binary_level(Self::parse_and, &[(Token::Or, BinaryOp::Or)])
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        self.parse_binary_level(Self::parse_equality, &[(Token::And, BinaryOp::And)])
    }

    fn parse_equality(&mut self) -> Result<Expression, ParseError> {
        self.parse_binary_level(
            Self::parse_comparison,
            &[(Token::EqEq, BinaryOp::Eq), (Token::Ne, BinaryOp::Ne)],
        )
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        self.parse_binary_level(
            Self::parse_additive,
            &[
                (Token::Le, BinaryOp::Le),
                (Token::Ge, BinaryOp::Ge),
                (Token::Lt, BinaryOp::Lt),
                (Token::Gt, BinaryOp::Gt),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        self.parse_binary_level(
            Self::parse_multiplicative,
            &[
                (Token::Op('+'), BinaryOp::Add),
                (Token::Op('-'), BinaryOp::Sub),
            ],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ParseError> {
        self.parse_binary_level(
            Self::parse_unary,
            &[
                (Token::Op('*'), BinaryOp::Mul),
                (Token::Op('/'), BinaryOp::Div),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                let operand = self.parse_unary()?;
                Ok(Expression::neg(operand))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.parse_unary()
            }
            Some(Token::Bang) => {
                self.pos += 1;
                let operand = self.parse_unary()?;
                Ok(Expression::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expression, ParseError> {
        let base = self.parse_primary()?;
        if self.peek() == Some(&Token::Op('^')) {
            self.pos += 1;
            let exponent = self.parse_unary()?;
            return Ok(Expression::binary(base, BinaryOp::Pow, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        match self.peek().cloned() {
            Some(Token::Num(v)) => {
                self.pos += 1;
                Ok(Expression::Number(v))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, ")")?;
                Ok(Expression::paren(inner))
            }
            Some(Token::Ident(_)) => {
                let name = self.ident()?;
                match self.peek() {
                    Some(Token::LParen) => {
                        self.pos += 1;
                        let mut args = Vec::new();
                        if self.peek() != Some(&Token::RParen) {
                            args.push(self.parse_expr()?);
                            while self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                                args.push(self.parse_expr()?);
                            }
                        }
                        self.expect(Token::RParen, ")")?;
                        Ok(Expression::Call(FunctionCall { name, args }))
                    }
                    Some(Token::Prime) => {
                        let mut order = 0u8;
                        while self.peek() == Some(&Token::Prime) {
                            self.pos += 1;
                            order += 1;
                        }
                        let index = self.parse_optional_index()?;
                        Ok(Expression::PrimeName { name, order, index })
                    }
                    Some(Token::LBracket) => {
                        let index = self.parse_optional_index()?;
                        match index {
                            Some(index) => Ok(Expression::Indexed { name, index }),
                            None => Err(self.error(&["index"])),
                        }
                    }
                    _ => Ok(Expression::Name(name)),
                }
            }
            _ => Err(self.error(&["number", "identifier", "("])),
        }
    }

    fn parse_optional_index(&mut self) -> Result<Option<Box<Expression>>, ParseError> {
        if self.peek() != Some(&Token::LBracket) {
            return Ok(None);
        }
        self.pos += 1;
        let index = self.parse_expr()?;
        self.expect(Token::RBracket, "]")?;
        Ok(Some(Box::new(index)))
    }
}

/// Parse a sequence of statements into a block
pub fn parse_statements(src: &str) -> Result<StatementBlock, ParseError> {
    let mut parser = Parser::new(src);
    let statements = parser.parse_statement_list()?;
    if !parser.at_end() {
        return Err(parser.error(&["statement"]));
    }
    Ok(StatementBlock::new(statements))
}

/// Parse exactly one statement
pub fn parse_statement(src: &str) -> Result<Statement, ParseError> {
    let mut parser = Parser::new(src);
    parser.skip_separators();
    let statement = parser.parse_statement()?;
    parser.skip_separators();
    if !parser.at_end() {
        return Err(parser.error(&["end of statement"]));
    }
    Ok(statement)
}

/// Parse exactly one expression
pub fn parse_expression(src: &str) -> Result<Expression, ParseError> {
    let mut parser = Parser::new(src);
    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        return Err(parser.error(&["end of expression"]));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment_roundtrip() {
        let stmt = parse_statement("m = m + dt * (minf - m) / mtau").unwrap();
        assert_eq!(stmt.to_string(), "m = m + dt * (minf - m) / mtau");
    }

    #[test]
    fn test_parse_ode() {
        let stmt = parse_statement("m' = (minf - m) / mtau").unwrap();
        let (name, rhs) = stmt.as_ode().unwrap();
        assert_eq!(name.as_str(), "m");
        assert_eq!(rhs.to_string(), "(minf - m) / mtau");
    }

    #[test]
    fn test_parse_reactions() {
        let block = parse_statements(
            "~ 2A + B <-> C (kf, kb)\n~ C -> D (k)\n~ X << (rate * 2)\n~ ca[0] <-> ca[1] (a, b)",
        )
        .unwrap();
        assert_eq!(block.statements.len(), 4);
        match &block.statements[0] {
            Statement::Reaction(r) => {
                assert_eq!(r.op, ReactionOp::Reversible);
                assert_eq!(r.lhs[0].coefficient, 2);
                assert_eq!(r.lhs[0].name.as_str(), "A");
                assert_eq!(r.rate_backward.as_ref().unwrap().to_string(), "kb");
            }
            other => panic!("unexpected statement {:?}", other),
        }
        match &block.statements[2] {
            Statement::Reaction(r) => {
                assert_eq!(r.op, ReactionOp::Source);
                assert_eq!(r.rate_forward.to_string(), "rate * 2");
            }
            other => panic!("unexpected statement {:?}", other),
        }
        match &block.statements[3] {
            Statement::Reaction(r) => assert_eq!(r.rhs[0].key(), "ca[1]"),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_compartment_forms() {
        let block = parse_statements("COMPARTMENT vol {A B}\nCOMPARTMENT i, diam*vrat[i] {ca}").unwrap();
        match (&block.statements[0], &block.statements[1]) {
            (Statement::Compartment(plain), Statement::Compartment(indexed)) => {
                assert!(plain.index_name.is_none());
                assert_eq!(plain.species.len(), 2);
                assert_eq!(indexed.index_name.as_ref().unwrap().as_str(), "i");
                assert_eq!(indexed.volume.to_string(), "diam * vrat[i]");
            }
            other => panic!("unexpected statements {:?}", other),
        }
    }

    #[test]
    fn test_parse_if_else_if() {
        let stmt = parse_statement("IF (v < -50) { x = 1 } ELSE IF (v > 0) { x = 2 } ELSE { x = 3 }")
            .unwrap();
        match stmt {
            Statement::If(s) => {
                let nested = s.else_block.unwrap();
                assert!(matches!(nested.statements[0], Statement::If(_)));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_exponent_vs_species() {
        let expr = parse_expression("1e-3 * x").unwrap();
        assert_eq!(expr.to_string(), "0.001 * x");
        let block = parse_statements("~ 2E <-> F (a, b)").unwrap();
        match &block.statements[0] {
            Statement::Reaction(r) => {
                assert_eq!(r.lhs[0].coefficient, 2);
                assert_eq!(r.lhs[0].name.as_str(), "E");
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_power_is_right_associative_and_binds_tighter_than_negation() {
        let expr = parse_expression("-a^b^c").unwrap();
        assert_eq!(expr.to_string(), "-a ^ b ^ c");
        match expr {
            Expression::Unary { operand, .. } => match *operand {
                Expression::Binary { op, rhs, .. } => {
                    assert_eq!(op, BinaryOp::Pow);
                    assert!(matches!(*rhs, Expression::Binary { op: BinaryOp::Pow, .. }));
                }
                other => panic!("unexpected operand {:?}", other),
            },
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_verbatim_and_errors() {
        let block = parse_statements("VERBATIM\n  return 0;\nENDVERBATIM\nx = 1").unwrap();
        assert!(matches!(block.statements[0], Statement::Verbatim(_)));
        assert!(parse_statement("x = ").is_err());
        assert!(parse_statement("~ A (kf)").is_err());
    }

    #[test]
    fn test_tokens_carry_locations() {
        let stmt = parse_statement("\n  abc = 1").unwrap();
        let (lhs, _) = stmt.as_assignment().unwrap();
        assert_eq!(lhs.base_name().unwrap().token, Some(ModToken::new(2, 3)));
    }
}
