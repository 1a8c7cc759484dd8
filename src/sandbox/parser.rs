//! Recursive-descent parser for the safe expression grammar.
//!
//! ```text
//! program    := statement (NEWLINE statement)*
//! statement  := expr
//! expr       := comparison
//! comparison := bitor (cmp_op bitor)?
//! bitor      := bitand ('|' bitand)*
//! bitand     := additive ('&' additive)*
//! additive   := term (('+' | '-') term)*
//! term       := unary (('*' | '/') unary)*
//! unary      := '-' unary | postfix
//! postfix    := primary ('.' NAME | '(' args ')' | '[' subscript ']')*
//! primary    := NAME | NUMBER | STRING | '[' items ']' | '(' expr (',' expr)* ')'
//! ```

use crate::error::SandboxError;
use crate::sandbox::lexer::Token;

/// Deepest expression tree a snippet may build. Parenthesised groups,
/// unary minus, operator chains and postfix chains each add a level.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Number(f64),
    Str(String),
    Bool(bool),
    None,
    List(Vec<Expr>),
    Attr {
        target: Box<Expr>,
        name: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Subscript>,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    Expr(Expr),
    Slice {
        start: Option<Expr>,
        end: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Expr>,
}

impl Expr {
    pub fn attr(target: Expr, name: &str) -> Expr {
        Expr::Attr {
            target: Box::new(target),
            name: name.to_string(),
        }
    }

    pub fn method(target: Expr, name: &str, args: Vec<Arg>) -> Expr {
        Expr::Call {
            callee: Box::new(Expr::attr(target, name)),
            args,
        }
    }

    pub fn index(target: Expr, index: Expr) -> Expr {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(Subscript::Expr(index)),
        }
    }

    /// Every identifier the expression mentions: names, attributes and
    /// keyword-argument names.
    pub fn identifiers(&self, out: &mut Vec<String>) {
        match self {
            Expr::Name(name) => out.push(name.clone()),
            Expr::Number(_) | Expr::Str(_) => {}
            Expr::Bool(b) => out.push(if *b { "True" } else { "False" }.to_string()),
            Expr::None => out.push("None".to_string()),
            Expr::List(items) => items.iter().for_each(|e| e.identifiers(out)),
            Expr::Attr { target, name } => {
                target.identifiers(out);
                out.push(name.clone());
            }
            Expr::Call { callee, args } => {
                callee.identifiers(out);
                for arg in args {
                    if let Some(name) = &arg.name {
                        out.push(name.clone());
                    }
                    arg.value.identifiers(out);
                }
            }
            Expr::Index { target, index } => {
                target.identifiers(out);
                match index.as_ref() {
                    Subscript::Expr(e) => e.identifiers(out),
                    Subscript::Slice { start, end } => {
                        start.iter().chain(end.iter()).for_each(|e| e.identifiers(out))
                    }
                }
            }
            Expr::Neg(inner) => inner.identifiers(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.identifiers(out);
                rhs.identifiers(out);
            }
        }
    }
}

/// Parse a token stream into a program.
pub fn parse(tokens: &[Token]) -> Result<Program, SandboxError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut statements = Vec::new();

    while parser.peek().is_some() {
        statements.push(parser.expr()?);
        match parser.peek() {
            None => break,
            Some(Token::Newline) => parser.pos += 1,
            Some(Token::Assign) => {
                return Err(SandboxError::syntax(
                    "assignments are not supported; write a single expression",
                ))
            }
            Some(other) => {
                return Err(SandboxError::syntax(format!(
                    "unexpected {}",
                    other.describe()
                )))
            }
        }
    }

    if statements.is_empty() {
        return Err(SandboxError::syntax("snippet contains no statements"));
    }
    Ok(Program { statements })
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), SandboxError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(SandboxError::syntax(format!(
                "expected {:?} {}, found {}",
                expected,
                context,
                self.peek()
                    .map(Token::describe)
                    .unwrap_or_else(|| "end of input".to_string())
            )))
        }
    }

    /// Enter one more level of nesting. Callers restore `depth` on success.
    fn descend(&mut self) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SandboxError::syntax("expression nested too deeply"));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, SandboxError> {
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let lhs = self.bitor()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let base = self.depth;
        self.descend()?;
        let rhs = self.bitor()?;
        self.depth = base;
        Ok(binary(op, lhs, rhs))
    }

    fn bitor(&mut self) -> Result<Expr, SandboxError> {
        let base = self.depth;
        let mut lhs = self.bitand()?;
        while self.eat(&Token::Pipe) {
            self.descend()?;
            let rhs = self.bitand()?;
            lhs = binary(BinOp::Or, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn bitand(&mut self) -> Result<Expr, SandboxError> {
        let base = self.depth;
        let mut lhs = self.additive()?;
        while self.eat(&Token::Amp) {
            self.descend()?;
            let rhs = self.additive()?;
            lhs = binary(BinOp::And, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, SandboxError> {
        let base = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, SandboxError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::Minus) {
            let base = self.depth;
            self.descend()?;
            let inner = self.unary()?;
            self.depth = base;
            return Ok(match inner {
                Expr::Number(n) => Expr::Number(-n),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    self.descend()?;
                    match self.advance() {
                        Some(Token::Ident(name)) => expr = Expr::attr(expr, name),
                        other => {
                            return Err(SandboxError::syntax(format!(
                                "expected attribute name after '.', found {}",
                                other
                                    .map(Token::describe)
                                    .unwrap_or_else(|| "end of input".to_string())
                            )))
                        }
                    }
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    self.descend()?;
                    let args = self.args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    self.descend()?;
                    let index = self.subscript()?;
                    self.expect(&Token::RBracket, "to close subscript")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        self.depth = base;
        Ok(expr)
    }

    fn args(&mut self) -> Result<Vec<Arg>, SandboxError> {
        let mut args = Vec::new();
        let mut seen_keyword = false;

        while !self.eat(&Token::RParen) {
            let arg = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Ident(name)), Some(Token::Assign)) => {
                    self.pos += 2;
                    seen_keyword = true;
                    Arg {
                        name: Some(name.clone()),
                        value: self.expr()?,
                    }
                }
                _ => {
                    if seen_keyword {
                        return Err(SandboxError::syntax(
                            "positional argument follows keyword argument",
                        ));
                    }
                    Arg {
                        name: None,
                        value: self.expr()?,
                    }
                }
            };
            args.push(arg);

            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "to close argument list")?;
                break;
            }
        }
        Ok(args)
    }

    fn subscript(&mut self) -> Result<Subscript, SandboxError> {
        let start = if self.peek() == Some(&Token::Colon) {
            None
        } else {
            Some(self.expr()?)
        };

        if !self.eat(&Token::Colon) {
            return start
                .map(Subscript::Expr)
                .ok_or_else(|| SandboxError::syntax("empty subscript"));
        }

        let end = if matches!(self.peek(), Some(Token::RBracket)) {
            None
        } else {
            Some(self.expr()?)
        };
        Ok(Subscript::Slice { start, end })
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        let base = self.depth;
        let expr = match self.advance() {
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "True" => Expr::Bool(true),
                "False" => Expr::Bool(false),
                "None" => Expr::None,
                _ => Expr::Name(name.clone()),
            }),
            Some(Token::Number(n)) => Ok(Expr::Number(*n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s.clone())),
            Some(Token::LBracket) => {
                self.descend()?;
                Ok(Expr::List(self.items(&Token::RBracket)?))
            }
            Some(Token::LParen) => {
                self.descend()?;
                let first = self.expr()?;
                if self.eat(&Token::RParen) {
                    Ok(first)
                } else {
                    self.expect(&Token::Comma, "in tuple")?;
                    let mut items = vec![first];
                    items.extend(self.items(&Token::RParen)?);
                    Ok(Expr::List(items))
                }
            }
            other => Err(SandboxError::syntax(format!(
                "unexpected {}",
                other
                    .map(Token::describe)
                    .unwrap_or_else(|| "end of input".to_string())
            ))),
        };
        self.depth = base;
        expr
    }

    /// Comma-separated expressions up to and including `close`.
    fn items(&mut self, close: &Token) -> Result<Vec<Expr>, SandboxError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(close, "to close list")?;
                break;
            }
        }
        Ok(items)
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::lexer::tokenize;

    fn parse_str(source: &str) -> Result<Program, SandboxError> {
        parse(&tokenize(source)?)
    }

    #[test]
    fn test_parse_groupby_chain() {
        let program = parse_str("df.groupby('country')['sale_price'].mean()").unwrap();
        assert_eq!(program.statements.len(), 1);

        let mut names = Vec::new();
        program.statements[0].identifiers(&mut names);
        assert_eq!(names, vec!["df", "groupby", "mean"]);
    }

    #[test]
    fn test_parse_keyword_arguments() {
        let program = parse_str("df.sort_values(by='a', ascending=False).head(3)").unwrap();
        let mut names = Vec::new();
        program.statements[0].identifiers(&mut names);
        assert!(names.contains(&"by".to_string()));
        assert!(names.contains(&"ascending".to_string()));
        assert!(names.contains(&"False".to_string()));
    }

    #[test]
    fn test_parse_mask_precedence() {
        let program = parse_str("df[(df['a'] > 1) & (df['b'] == 'x')]").unwrap();
        match &program.statements[0] {
            Expr::Index { index, .. } => match index.as_ref() {
                Subscript::Expr(Expr::Binary { op, .. }) => assert_eq!(*op, BinOp::And),
                other => panic!("unexpected subscript {:?}", other),
            },
            other => panic!("unexpected expr {:?}", other),
        }
    }

    #[test]
    fn test_parse_slice() {
        let program = parse_str("df.iloc[:5]").unwrap();
        match &program.statements[0] {
            Expr::Index { index, .. } => assert_eq!(
                index.as_ref(),
                &Subscript::Slice {
                    start: None,
                    end: Some(Expr::Number(5.0))
                }
            ),
            other => panic!("unexpected expr {:?}", other),
        }
    }

    #[test]
    fn test_rejects_assignment() {
        let err = parse_str("x = df['a'].mean()").unwrap_err();
        assert!(matches!(err, SandboxError::InvalidSyntax { .. }));
    }

    #[test]
    fn test_multiple_statements() {
        let program = parse_str("df.shape\nprint(df['a'].sum())").unwrap();
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn test_tuple_literal() {
        let program = parse_str("df.plot(figsize=(10, 6))").unwrap();
        match &program.statements[0] {
            Expr::Call { args, .. } => {
                assert_eq!(
                    args[0].value,
                    Expr::List(vec![Expr::Number(10.0), Expr::Number(6.0)])
                )
            }
            other => panic!("unexpected expr {:?}", other),
        }
    }

    fn assert_too_deep(source: &str) {
        match parse_str(source) {
            Err(SandboxError::InvalidSyntax { message }) => {
                assert_eq!(message, "expression nested too deeply")
            }
            other => panic!("expected nesting error, got {:?}", other),
        }
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        assert_too_deep(&format!("{}df{}", "(".repeat(3_000), ")".repeat(3_000)));
        assert_too_deep(&format!("{}1{}", "[".repeat(3_000), "]".repeat(3_000)));
    }

    #[test]
    fn test_long_chains_are_rejected() {
        assert_too_deep(&format!("{}1", "-".repeat(5_000)));
        assert_too_deep(&format!("df{}", ".head()".repeat(2_000)));
        assert_too_deep(&vec!["df['a']"; 2_000].join(" + "));
        assert_too_deep(&format!("df{}", "['a']".repeat(2_000)));
    }

    #[test]
    fn test_moderate_nesting_still_parses() {
        let source = format!("{}df['a'].mean(){}", "(".repeat(20), ")".repeat(20));
        assert!(parse_str(&source).is_ok());
        assert!(parse_str(&vec!["df['a']"; 20].join(" + ")).is_ok());
    }
}
