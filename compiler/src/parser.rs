// parser.rs — Parser for the textual loop-nest IR
//
// Parses a token stream (from the lexer) into an `ir::Stmt`. The accepted
// text is exactly what `Stmt`'s `Display` prints, so printed IR re-parses.
// Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns a statement tree plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ir::{BinOp, Call, CallKind, Expr, ForKind, Intrinsic, Range, Stmt, Type};
use crate::lexer::Token;

/// Result of parsing: statement tree plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub stmt: Option<Stmt>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse IR source. Lexes then parses; several top-level statements are
/// sequenced into one block.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (stmt, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        stmt,
        errors: all_errors,
    }
}

/// Render parse errors as `line:col: message` lines.
pub fn render_errors(source: &str, errors: &[Rich<'static, Token, SimpleSpan>]) -> String {
    let mut out = String::new();
    for e in errors {
        let offset = e.span().start().min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let col = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
        out.push_str(&format!("{line}:{col}: {e}\n"));
    }
    out
}

#[derive(Clone, Copy)]
enum Prefix {
    Neg,
    Not,
}

fn apply_prefix(prefix: Prefix, e: Expr) -> Expr {
    match (prefix, e) {
        (Prefix::Neg, Expr::IntImm(n)) => Expr::IntImm(-n),
        (Prefix::Neg, other) => Expr::binary(BinOp::Sub, Expr::IntImm(0), other),
        (Prefix::Not, other) => Expr::not(other),
    }
}

fn make_call(name: String, ty: Option<Type>, args: Vec<Expr>) -> Expr {
    let kind = if Intrinsic::from_name(&name).is_some() {
        CallKind::Intrinsic
    } else {
        CallKind::Halide
    };
    Expr::call(ty.unwrap_or_else(Type::int32), name, args, kind)
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by every combinator.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Stmt, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Names ──

    let name = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    // ── Types: scalar keyword or `{type, ...}` ──

    let ty = recursive(|ty| {
        let scalar = name.clone().try_map(|word: String, span| {
            Type::from_keyword(&word).ok_or_else(|| {
                Rich::custom(
                    span,
                    format!(
                        "expected a type (int32, uint8, float32, bool, handle, ...), \
                         found '{word}'"
                    ),
                )
            })
        });
        let fields = ty
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(Type::Struct);
        scalar.or(fields)
    });

    // ── Expressions ──

    let expr = recursive(|expr| {
        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let literal = select! {
            Token::Int(n) => Expr::IntImm(n),
            Token::True => Expr::BoolImm(true),
            Token::False => Expr::BoolImm(false),
            Token::StringLit(s) => Expr::StringImm(s),
        };

        let select_expr = just(Token::Select)
            .ignore_then(
                expr.clone()
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(|((c, t), f)| Expr::select(c, t, f));

        let min_max = select! {
            Token::Min => BinOp::Min,
            Token::Max => BinOp::Max,
        }
        .then(
            expr.clone()
                .then_ignore(just(Token::Comma))
                .then(expr.clone())
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map(|(op, (a, b))| Expr::binary(op, a, b));

        // `name<type>(...)`; a failed `<type>` falls back to a comparison.
        let call = name
            .clone()
            .then(
                ty.clone()
                    .delimited_by(just(Token::Lt), just(Token::Gt))
                    .or_not(),
            )
            .then(args)
            .map(|((name, ty), args)| make_call(name, ty, args));

        let atom = choice((
            literal,
            select_expr,
            min_max,
            call,
            name.clone().map(Expr::Var),
            expr.delimited_by(just(Token::LParen), just(Token::RParen)),
        ))
        .boxed();

        let unary = select! {
            Token::Minus => Prefix::Neg,
            Token::Bang => Prefix::Not,
        }
        .repeated()
        .foldr(atom, apply_prefix)
        .boxed();

        let product = unary
            .clone()
            .foldl(
                select! {
                    Token::Star => BinOp::Mul,
                    Token::Slash => BinOp::Div,
                    Token::Percent => BinOp::Mod,
                }
                .then(unary)
                .repeated(),
                |a, (op, b)| Expr::binary(op, a, b),
            )
            .boxed();

        let sum = product
            .clone()
            .foldl(
                select! {
                    Token::Plus => BinOp::Add,
                    Token::Minus => BinOp::Sub,
                }
                .then(product)
                .repeated(),
                |a, (op, b)| Expr::binary(op, a, b),
            )
            .boxed();

        let comparison = sum
            .clone()
            .foldl(
                select! {
                    Token::EqEq => BinOp::Eq,
                    Token::NotEq => BinOp::Ne,
                    Token::Lt => BinOp::Lt,
                    Token::Le => BinOp::Le,
                    Token::Gt => BinOp::Gt,
                    Token::Ge => BinOp::Ge,
                }
                .then(sum)
                .repeated(),
                |a, (op, b)| Expr::binary(op, a, b),
            )
            .boxed();

        let conjunction = comparison
            .clone()
            .foldl(
                just(Token::AndAnd).to(BinOp::And).then(comparison).repeated(),
                |a, (op, b)| Expr::binary(op, a, b),
            )
            .boxed();

        conjunction.clone().foldl(
            just(Token::OrOr).to(BinOp::Or).then(conjunction).repeated(),
            |a, (op, b)| Expr::binary(op, a, b),
        )
    });

    // ── Statements ──

    let stmt = recursive(|stmt| {
        let body = stmt
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(|stmts: Vec<Stmt>| Stmt::block(stmts))
            .boxed();

        let for_stmt = select! {
            Token::For => ForKind::Serial,
            Token::Unrolled => ForKind::Unrolled,
        }
        .then(
            name.clone()
                .then_ignore(just(Token::Comma))
                .then(expr.clone())
                .then_ignore(just(Token::Comma))
                .then(expr.clone())
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(body.clone())
        .map(|((kind, ((name, min), extent)), body)| Stmt::For {
            name,
            min,
            extent,
            kind,
            body: Box::new(body),
        });

        let if_stmt = just(Token::If)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(body.clone())
            .then(just(Token::Else).ignore_then(body.clone()).or_not())
            .map(|((cond, then_case), else_case)| Stmt::IfThenElse {
                cond,
                then_case: Box::new(then_case),
                else_case: else_case.map(Box::new),
            });

        let range = expr
            .clone()
            .then_ignore(just(Token::Comma))
            .then(expr.clone())
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(|(min, extent)| Range { min, extent });

        let realize_stmt = just(Token::Realize)
            .ignore_then(name.clone())
            .then(
                ty.clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::Lt), just(Token::Gt)),
            )
            .then(
                range
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(body.clone())
            .map(|(((name, types), bounds), body)| Stmt::Realize {
                name,
                types,
                bounds,
                body: Box::new(body),
            });

        let producer_consumer = select! {
            Token::Produce => true,
            Token::Consume => false,
        }
        .then(name.clone())
        .then(body)
        .map(|((is_producer, name), body)| Stmt::ProducerConsumer {
            name,
            is_producer,
            body: Box::new(body),
        });

        // `f(args) = value` or `f(args) = {v0, v1}`; anything else is an
        // evaluated expression.
        let values = expr
            .clone()
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .or(expr.clone().map(|e| vec![e]));

        let expr_stmt = expr
            .clone()
            .then(just(Token::Assign).ignore_then(values).or_not())
            .try_map(|(lhs, rhs), span| match rhs {
                None => Ok(Stmt::Evaluate(lhs)),
                Some(values) => match lhs {
                    Expr::Call(Call {
                        name,
                        args,
                        kind: CallKind::Halide,
                        ty,
                    }) if ty == Type::int32() => Ok(Stmt::Provide { name, values, args }),
                    other => Err(Rich::custom(
                        span,
                        format!("left side of '=' must be a buffer element, found '{other}'"),
                    )),
                },
            });

        choice((
            for_stmt,
            if_stmt,
            realize_stmt,
            producer_consumer,
            expr_stmt,
        ))
        .boxed()
    });

    stmt.repeated()
        .collect::<Vec<_>>()
        .map(|stmts: Vec<Stmt>| Stmt::block(stmts))
}

// ── Tests ──
