//! Tokenizer for the script language, generated with logos.
//!
//! Whitespace and `//` comments are dropped. A string or character literal
//! that runs into the end of the input lexes as [`LexError::Unterminated`]
//! so the parser can ask for more lines instead of failing.

use std::fmt;

use logos::{Logos, Span};
use thiserror::Error;

/// Position of a token in the input, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    /// Line and column of byte `offset` in `source`.
    pub(crate) fn at(source: &str, offset: usize) -> Self {
        let before = source.get(..offset).unwrap_or(source);
        let line = before.matches('\n').count() + 1;
        let column = before
            .rsplit('\n')
            .next()
            .map_or(0, |tail| tail.chars().count())
            + 1;
        Pos { line, column }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Error)]
pub(crate) enum LexError {
    #[default]
    #[error("unexpected character")]
    UnexpectedCharacter,
    #[error("unterminated literal")]
    Unterminated,
    #[error("unknown escape sequence `\\{0}`")]
    InvalidEscape(char),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("empty character literal")]
    EmptyChar,
    #[error("too many characters in character literal")]
    TooManyChars,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n\f]+")]
pub(crate) enum Token {
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("=")]
    Assign,
    #[token("!")]
    Bang,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,

    #[regex(r"[0-9][0-9_]*", lex_int)]
    Int(i64),
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*", lex_float)]
    Float(f64),
    #[regex(r#""([^"\\]|\\.)*""#, lex_string)]
    Str(String),
    #[regex(r"'([^'\\]|\\.)*'", lex_char)]
    Char(char),
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Only match when the closing quote never comes.
    #[regex(r#""([^"\\]|\\.)*\\?"#, unterminated, allow_greedy = true)]
    OpenStr,
    #[regex(r"'([^'\\]|\\.)*\\?", unterminated, allow_greedy = true)]
    OpenChar,

    #[regex(r"//[^\n]*", allow_greedy = true)]
    Comment,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Token::Int(i) => return write!(f, "{i}"),
            Token::Float(x) => return write!(f, "{x}"),
            Token::Ident(name) => return f.write_str(name),
            Token::Str(_) => "string literal",
            Token::Char(_) => "character literal",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::EqEq => "`==`",
            Token::NotEq => "`!=`",
            Token::Le => "`<=`",
            Token::Ge => "`>=`",
            Token::AndAnd => "`&&`",
            Token::OrOr => "`||`",
            Token::Assign => "`=`",
            Token::Bang => "`!`",
            Token::Lt => "`<`",
            Token::Gt => "`>`",
            Token::Plus => "`+`",
            Token::Minus => "`-`",
            Token::Star => "`*`",
            Token::Slash => "`/`",
            Token::Percent => "`%`",
            Token::LParen => "`(`",
            Token::RParen => "`)`",
            Token::LBracket => "`[`",
            Token::RBracket => "`]`",
            Token::LBrace => "`{`",
            Token::RBrace => "`}`",
            Token::Comma => "`,`",
            Token::Colon => "`:`",
            Token::Semi => "`;`",
            Token::OpenStr | Token::OpenChar => "unterminated literal",
            Token::Comment => "comment",
        };
        f.write_str(symbol)
    }
}

fn lex_int(lex: &mut logos::Lexer<'_, Token>) -> Result<i64, LexError> {
    let digits = lex.slice().replace('_', "");
    digits
        .parse()
        .map_err(|_| LexError::InvalidNumber(lex.slice().to_string()))
}

fn lex_float(lex: &mut logos::Lexer<'_, Token>) -> Result<f64, LexError> {
    let digits = lex.slice().replace('_', "");
    digits
        .parse()
        .map_err(|_| LexError::InvalidNumber(lex.slice().to_string()))
}

fn lex_string(lex: &mut logos::Lexer<'_, Token>) -> Result<String, LexError> {
    let s = lex.slice();
    unescape(&s[1..s.len() - 1])
}

fn lex_char(lex: &mut logos::Lexer<'_, Token>) -> Result<char, LexError> {
    let s = lex.slice();
    let text = unescape(&s[1..s.len() - 1])?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Err(LexError::EmptyChar),
        (Some(c), None) => Ok(c),
        (Some(_), Some(_)) => Err(LexError::TooManyChars),
    }
}

fn unterminated(_lex: &mut logos::Lexer<'_, Token>) -> Result<(), LexError> {
    Err(LexError::Unterminated)
}

fn unescape(body: &str) -> Result<String, LexError> {
    let mut text = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        let escaped = match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some(c @ ('"' | '\'' | '\\')) => c,
            Some(other) => return Err(LexError::InvalidEscape(other)),
            None => return Err(LexError::Unterminated),
        };
        text.push(escaped);
    }
    Ok(text)
}

/// A token with its byte range in the source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned<T> {
    pub token: T,
    pub span: Span,
}

/// Split `source` into tokens, stopping at the first error.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned<Token>>, Spanned<LexError>> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(source).spanned() {
        match result {
            Ok(Token::Comment) => {}
            Ok(token) => tokens.push(Spanned { token, span }),
            Err(token) => return Err(Spanned { token, span }),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn toks(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    fn lex_error(input: &str) -> LexError {
        tokenize(input).unwrap_err().token
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            toks("x = 2+2.5 <= 'c' && \"s\";"),
            vec![
                Token::Ident("x".into()),
                Token::Assign,
                Token::Int(2),
                Token::Plus,
                Token::Float(2.5),
                Token::Le,
                Token::Char('c'),
                Token::AndAnd,
                Token::Str("s".into()),
                Token::Semi,
            ]
        );
    }

    #[test]
    fn test_keywords_win_over_identifiers() {
        assert_eq!(
            toks("true trueish null_ null"),
            vec![
                Token::True,
                Token::Ident("trueish".into()),
                Token::Ident("null_".into()),
                Token::Null,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            toks("// require: a.tsc\n1 / 2 // half\n"),
            vec![Token::Int(1), Token::Slash, Token::Int(2)]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(toks(r#""a\"b\n""#), vec![Token::Str("a\"b\n".into())]);
        assert_eq!(toks(r"'\''"), vec![Token::Char('\'')]);
        assert_eq!(lex_error(r#""\q""#), LexError::InvalidEscape('q'));
    }

    #[test]
    fn test_number_separators() {
        assert_eq!(toks("1_000 2_5.0_5"), vec![Token::Int(1000), Token::Float(25.05)]);
        assert!(matches!(
            lex_error("99999999999999999999"),
            LexError::InvalidNumber(_)
        ));
    }

    #[test]
    fn test_unterminated_literals() {
        assert_eq!(lex_error("\"open"), LexError::Unterminated);
        assert_eq!(lex_error("x = \"two\nlines"), LexError::Unterminated);
        assert_eq!(lex_error("'a"), LexError::Unterminated);
        assert_eq!(lex_error("\"trailing\\"), LexError::Unterminated);
    }

    #[test]
    fn test_bad_char_literals() {
        assert_eq!(lex_error("''"), LexError::EmptyChar);
        assert_eq!(lex_error("'ab'"), LexError::TooManyChars);
    }

    #[test]
    fn test_invalid_character_has_span() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.token, LexError::UnexpectedCharacter);
        assert_eq!(err.span, 2..3);
    }

    #[test]
    fn test_pos_tracks_lines() {
        let source = "a\n  b";
        let tokens = tokenize(source).unwrap();
        assert_eq!(
            Pos::at(source, tokens[1].span.start),
            Pos { line: 2, column: 3 }
        );
        assert_eq!(Pos::at(source, 0), Pos { line: 1, column: 1 });
    }
}
