//! Tokenizer for candidate snippets.
//!
//! The lexer never fails on unfamiliar characters: they come out as
//! [`Token::Other`] so the allowlist pass can reject them by name.

use crate::error::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Amp,
    Pipe,
    /// Statement separator (newline or `;` outside brackets).
    Newline,
    Other(char),
}

impl Token {
    /// Short description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("name '{}'", name),
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string '{}'", s),
            Token::Newline => "end of statement".to_string(),
            Token::Other(c) => format!("'{}'", c),
            other => format!("{:?}", other),
        }
    }
}

/// Split a snippet into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SandboxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut depth: usize = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '\\' if chars.get(i + 1) == Some(&'\n') => i += 2,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\n' | ';' => {
                if depth == 0 && !matches!(tokens.last(), None | Some(Token::Newline)) {
                    tokens.push(Token::Newline);
                }
                i += 1;
            }
            '\'' | '"' => {
                let (text, next) = read_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (number, next) = read_number(&chars, i)?;
                tokens.push(Token::Number(number));
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::NotEq, 2),
                    ('<', Some('=')) => (Token::Le, 2),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    ('[', _) => (Token::LBracket, 1),
                    (']', _) => (Token::RBracket, 1),
                    (',', _) => (Token::Comma, 1),
                    ('.', _) => (Token::Dot, 1),
                    (':', _) => (Token::Colon, 1),
                    ('=', _) => (Token::Assign, 1),
                    ('+', _) => (Token::Plus, 1),
                    ('-', _) => (Token::Minus, 1),
                    ('*', _) => (Token::Star, 1),
                    ('/', _) => (Token::Slash, 1),
                    ('<', _) => (Token::Lt, 1),
                    ('>', _) => (Token::Gt, 1),
                    ('&', _) => (Token::Amp, 1),
                    ('|', _) => (Token::Pipe, 1),
                    (other, _) => (Token::Other(other), 1),
                };
                match token {
                    Token::LParen | Token::LBracket => depth += 1,
                    Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
                    _ => {}
                }
                tokens.push(token);
                i += width;
            }
        }
    }

    while matches!(tokens.last(), Some(Token::Newline)) {
        tokens.pop();
    }
    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), SandboxError> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                let escaped = chars[i + 1];
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            '\n' => break,
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(SandboxError::syntax("unterminated string literal"))
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), SandboxError> {
    let mut i = start;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
    {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
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

    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| SandboxError::syntax(format!("invalid number literal '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_method_chain() {
        let tokens = tokenize("df['sale price'].mean()").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("df".into()),
                Token::LBracket,
                Token::Str("sale price".into()),
                Token::RBracket,
                Token::Dot,
                Token::Ident("mean".into()),
                Token::LParen,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = tokenize("df.groupby(\n  'a'\n)\n\ndf.head()\n").unwrap();
        let separators = tokens.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(separators, 1);
    }

    #[test]
    fn test_comments_and_operators() {
        let tokens = tokenize("df['a'] >= 2.5 # filter").unwrap();
        assert!(tokens.contains(&Token::Ge));
        assert!(tokens.contains(&Token::Number(2.5)));
        assert!(!tokens.iter().any(|t| matches!(t, Token::Ident(n) if n == "filter")));
    }

    #[test]
    fn test_unknown_characters_become_other() {
        let tokens = tokenize("!rm").unwrap();
        assert_eq!(tokens[0], Token::Other('!'));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            tokenize("df['a"),
            Err(SandboxError::InvalidSyntax { .. })
        ));
    }
}
