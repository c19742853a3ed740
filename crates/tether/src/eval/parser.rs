//! Parser for the script language, built from chumsky combinators over the
//! logos token stream.
//!
//! Running out of tokens where more are required is reported as
//! [`ParseError::Incomplete`] rather than a syntax error: the shell keeps
//! buffering lines until the statement closes.

use chumsky::{input::ValueInput, prelude::*};

use super::lexer::{LexError, Pos, Spanned, Token, tokenize};

/// Span type used throughout the parser.
pub(crate) type Span = SimpleSpan;

type Extra<'tokens> = extra::Err<Rich<'tokens, Token, Span>>;

/// Deepest bracket and prefix-operator nesting accepted. Parsing and
/// evaluation recurse once per level.
pub(crate) const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Assign { name: String, value: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
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
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Null,
    Var(String),
    Array(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParseError {
    Incomplete,
    Syntax { pos: Pos, message: String },
}

/// Parse a whole input into statements.
pub(crate) fn parse_program(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = tokenize(source).map_err(|e| lex_error(source, e))?;
    check_nesting(source, &tokens)?;

    let tokens: Vec<(Token, Span)> = tokens
        .into_iter()
        .map(|spanned| (spanned.token, spanned.span.into()))
        .collect();
    let end_span: Span = (source.len()..source.len()).into();

    let result = program_parser().parse(tokens.as_slice().map(end_span, |(t, s)| (t, s)));
    result.into_result().map_err(|errs| {
        let Some(e) = errs.first() else {
            return ParseError::Syntax {
                pos: Pos::at(source, 0),
                message: "invalid input".to_string(),
            };
        };
        match e.found() {
            // Hitting the end of input means the statement is still open.
            None => ParseError::Incomplete,
            Some(found) => ParseError::Syntax {
                pos: Pos::at(source, e.span().start),
                message: format!("unexpected {found}"),
            },
        }
    })
}

fn lex_error(source: &str, e: Spanned<LexError>) -> ParseError {
    let pos = Pos::at(source, e.span.start);
    match e.token {
        LexError::Unterminated => ParseError::Incomplete,
        LexError::UnexpectedCharacter => ParseError::Syntax {
            pos,
            message: format!(
                "unexpected character `{}`",
                source.get(e.span).unwrap_or_default()
            ),
        },
        other => ParseError::Syntax {
            pos,
            message: other.to_string(),
        },
    }
}

/// Reject input nested deeper than [`MAX_NESTING`] before the recursive
/// parser sees it.
fn check_nesting(source: &str, tokens: &[Spanned<Token>]) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let mut prefix_run = 0usize;
    for spanned in tokens {
        match spanned.token {
            Token::LParen | Token::LBracket | Token::LBrace => {
                depth += 1;
                prefix_run = 0;
            }
            Token::RParen | Token::RBracket | Token::RBrace => {
                depth = depth.saturating_sub(1);
                prefix_run = 0;
            }
            Token::Minus | Token::Bang => prefix_run += 1,
            _ => prefix_run = 0,
        }
        if depth + prefix_run > MAX_NESTING {
            return Err(ParseError::Syntax {
                pos: Pos::at(source, spanned.span.start),
                message: format!("nesting too deep (limit {MAX_NESTING})"),
            });
        }
    }
    Ok(())
}

/// Statements separated by `;`. Empty statements are skipped.
fn program_parser<'tokens, I>() -> impl Parser<'tokens, I, Vec<Stmt>, Extra<'tokens>>
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    statement_parser()
        .or_not()
        .separated_by(just(Token::Semi))
        .collect::<Vec<_>>()
        .map(|statements| statements.into_iter().flatten().collect())
}

fn statement_parser<'tokens, I>() -> impl Parser<'tokens, I, Stmt, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    let expr = expr_parser();
    let assign = select! { Token::Ident(name) => name }
        .then_ignore(just(Token::Assign))
        .then(expr.clone())
        .map(|(name, value)| Stmt::Assign { name, value });

    choice((assign, expr.map(Stmt::Expr)))
}

/// Expression parser. Binary levels, lowest precedence first:
/// `||`, `&&`, `== !=`, `< <= > >=`, `+ -`, `* / %`. All left associative.
fn expr_parser<'tokens, I>() -> impl Parser<'tokens, I, Expr, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    recursive(|expr| {
        let literal = select! {
            Token::Int(i) => Expr::Int(i),
            Token::Float(x) => Expr::Float(x),
            Token::Str(s) => Expr::Str(s),
            Token::Char(c) => Expr::Char(c),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Null => Expr::Null,
        }
        .labelled("literal");

        let ident = select! { Token::Ident(name) => name }.labelled("identifier");

        let items = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>();

        let call = ident
            .clone()
            .then(
                items
                    .clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(name, args), e| Expr::Call {
                name,
                args,
                span: e.span(),
            });

        let array = items
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(Expr::Array);

        let map = expr
            .clone()
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(Expr::Map);

        let group = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = choice((literal, call, ident.map(Expr::Var), array, map, group)).boxed();

        let postfix = atom.foldl(
            expr.delimited_by(just(Token::LBracket), just(Token::RBracket))
                .map_with(|index, e| (index, e.span()))
                .repeated(),
            |target, (index, span)| Expr::Index {
                target: Box::new(target),
                index: Box::new(index),
                span,
            },
        );

        let unary = select! {
            Token::Minus => UnOp::Neg,
            Token::Bang => UnOp::Not,
        }
        .map_with(|op, e| (op, e.span()))
        .repeated()
        .foldr(postfix, |(op, span), operand| Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
        .boxed();

        let product = infix(
            unary,
            select! {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
            },
        );
        let sum = infix(
            product,
            select! {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
            },
        );
        let comparison = infix(
            sum,
            select! {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
            },
        );
        let equality = infix(
            comparison,
            select! {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::Ne,
            },
        );
        let and = infix(equality, select! { Token::AndAnd => BinOp::And });
        infix(and, select! { Token::OrOr => BinOp::Or }).labelled("expression")
    })
    .boxed()
}

/// One left-associative precedence level: `operand (op operand)*`.
fn infix<'tokens, I, P, O>(
    operand: P,
    op: O,
) -> impl Parser<'tokens, I, Expr, Extra<'tokens>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
    P: Parser<'tokens, I, Expr, Extra<'tokens>> + Clone + 'tokens,
    O: Parser<'tokens, I, BinOp, Extra<'tokens>> + Clone + 'tokens,
{
    operand
        .clone()
        .foldl(
            op.map_with(|op, e| (op, e.span())).then(operand).repeated(),
            |left, ((op, span), right)| Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            },
        )
        .boxed()
}
