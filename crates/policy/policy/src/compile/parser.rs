//! Hand-written recursive descent parser for check strings.
//!
//! `nom` recognizes the low-level tokens; precedence (`or` < `and` < `not`)
//! is handled by one function per level. Semantic failures (unknown keyword,
//! malformed substitution) are raised as `nom::Err::Failure` so they are not
//! swallowed by backtracking and surface with their own [`ParseError`]
//! variant.

use nom::{
    IResult,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::recognize,
    error::{ErrorKind, ParseError as NomParseError},
    multi::many0,
    sequence::{pair, preceded},
};

use crate::error::ParseError;
use crate::ir::expr::{CheckExpr, Operand};

/// Deepest nesting accepted in a check string.
///
/// Counts parentheses and `not` prefixes as well as the height of the
/// resulting tree, so long `and`/`or` chains are bounded too.
pub const MAX_NESTING: usize = 64;

/// Parse a complete check string into a [`CheckExpr`].
pub fn parse_check_str(input: &str) -> Result<CheckExpr, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    check_parentheses(input)?;

    let (rest, (expr, _)) = parse_or(input, 0).map_err(|e| convert_error(input, e))?;
    let rest = rest.trim_start();
    if !rest.is_empty() {
        return Err(unexpected(input, rest));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Error plumbing
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum CheckErrorKind {
    Syntax,
    TooDeep,
    Semantic(ParseError),
}

/// Error type threaded through the nom combinators.
#[derive(Debug)]
struct CheckError<'a> {
    input: &'a str,
    kind: CheckErrorKind,
}

impl<'a> NomParseError<&'a str> for CheckError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        Self {
            input,
            kind: CheckErrorKind::Syntax,
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'a, O> = IResult<&'a str, O, CheckError<'a>>;

fn fail<O>(input: &str, err: ParseError) -> PResult<'_, O> {
    Err(nom::Err::Failure(CheckError {
        input,
        kind: CheckErrorKind::Semantic(err),
    }))
}

fn syntax_error<O>(input: &str) -> PResult<'_, O> {
    Err(nom::Err::Error(CheckError::from_error_kind(
        input,
        ErrorKind::Tag,
    )))
}

fn convert_error(original: &str, err: nom::Err<CheckError<'_>>) -> ParseError {
    match err {
        nom::Err::Incomplete(_) => unexpected(original, ""),
        nom::Err::Error(e) | nom::Err::Failure(e) => match e.kind {
            CheckErrorKind::Semantic(parse_error) => parse_error,
            CheckErrorKind::Syntax => unexpected(original, e.input),
            CheckErrorKind::TooDeep => ParseError::TooDeep {
                offset: original.len() - e.input.len(),
            },
        },
    }
}

fn unexpected(original: &str, rest: &str) -> ParseError {
    ParseError::UnexpectedToken {
        offset: original.len() - rest.len(),
        found: rest.chars().take(24).collect(),
    }
}

// ---------------------------------------------------------------------------
// Parenthesis pre-scan
// ---------------------------------------------------------------------------

/// Verify parentheses balance before parsing, skipping quoted literals and
/// `%(...)s` markers. Reports the offset of the first unmatched parenthesis.
fn check_parentheses(input: &str) -> Result<(), ParseError> {
    let bytes = input.as_bytes();
    let mut open = Vec::new();
    let mut i = 0;
    let mut prev = 0u8;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'%' if bytes.get(i + 1) == Some(&b'(') => {
                // Skip to the closing `)` of the marker, or to the end of the
                // token if there is none (the parser reports it as malformed).
                let mut j = i + 2;
                while j < bytes.len() && bytes[j] != b')' && !bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                i = if bytes.get(j) == Some(&b')') { j + 1 } else { j };
                prev = b')';
                continue;
            }
            b'\'' | b'"' if prev == b':' => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != b {
                    if bytes[j] == b'\\' {
                        j += 1;
                    }
                    j += 1;
                }
                if j >= bytes.len() {
                    // Unterminated literal; the parser reports it.
                    return Ok(());
                }
                i = j + 1;
                prev = b;
                continue;
            }
            b'(' => open.push(i),
            b')' => {
                if open.pop().is_none() {
                    return Err(ParseError::UnbalancedParentheses { offset: i });
                }
            }
            _ => {}
        }
        prev = b;
        i += 1;
    }

    match open.pop() {
        Some(offset) => Err(ParseError::UnbalancedParentheses { offset }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

fn ws(input: &str) -> PResult<'_, &str> {
    multispace0(input)
}

fn close_paren(input: &str) -> PResult<'_, char> {
    char(')')(input)
}

/// Match a whole-word keyword (`and`, `or`, `not`) after optional whitespace.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, ()> {
    move |input: &'a str| {
        let matched: PResult<'a, &str> = preceded(multispace0, tag(word))(input);
        let (rest, _) = matched?;
        if rest
            .chars()
            .next()
            .is_some_and(|c| !c.is_whitespace() && c != '(')
        {
            return syntax_error(input);
        }
        Ok((rest, ()))
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(word, "and" | "or" | "not")
}

/// Parse an identifier matching `[a-zA-Z_][a-zA-Z0-9_]*`.
fn ident(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse a dotted path (`token.project.domain.id`) or a bare keyword.
fn parse_path(input: &str) -> PResult<'_, &str> {
    recognize(pair(ident, many0(preceded(char('.'), ident))))(input)
}

fn bare_literal(input: &str) -> PResult<'_, &str> {
    take_while(|c: char| !c.is_whitespace() && c != '(' && c != ')')(input)
}

// ---------------------------------------------------------------------------
// Operands
// ---------------------------------------------------------------------------

/// Parse the right-hand side of `keyword:operand`.
fn parse_operand<'a>(keyword: &str, input: &'a str) -> PResult<'a, Operand> {
    if input.starts_with("%(") {
        return parse_substitution(input);
    }
    if input.starts_with('\'') || input.starts_with('"') {
        return parse_quoted(input);
    }

    // Substitution is only supported as the whole operand.
    let token = input
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or_default();
    if token.contains("%(") {
        return fail(
            input,
            ParseError::MalformedSubstitution {
                text: token.to_owned(),
            },
        );
    }

    let (rest, raw) = bare_literal(input)?;
    if raw.is_empty() {
        return fail(
            input,
            ParseError::MissingValue {
                keyword: keyword.to_owned(),
            },
        );
    }
    Ok((rest, Operand::Literal(raw.to_owned())))
}

/// Parse a `%(path)s` marker. Anything else starting with `%(` is malformed.
fn parse_substitution(input: &str) -> PResult<'_, Operand> {
    let malformed = || {
        let text = input.split_whitespace().next().unwrap_or(input).to_owned();
        fail(input, ParseError::MalformedSubstitution { text })
    };

    let Ok((rest, path)) = parse_path(&input[2..]) else {
        return malformed();
    };
    let Some(rest) = rest.strip_prefix(")s") else {
        return malformed();
    };
    if rest
        .chars()
        .next()
        .is_some_and(|c| !c.is_whitespace() && c != ')')
    {
        return malformed();
    }
    Ok((rest, Operand::Path(path.to_owned())))
}

/// Parse a single- or double-quoted literal with backslash escapes.
fn parse_quoted(input: &str) -> PResult<'_, Operand> {
    let mut chars = input.char_indices();
    let Some((_, quote)) = chars.next() else {
        return syntax_error(input);
    };

    let mut value = String::new();
    loop {
        match chars.next() {
            Some((_, '\\')) => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            Some((idx, c)) if c == quote => {
                return Ok((&input[idx + c.len_utf8()..], Operand::Literal(value)));
            }
            Some((_, c)) => value.push(c),
            None => break,
        }
    }

    // Unterminated literal.
    Err(nom::Err::Failure(CheckError::from_error_kind(
        input,
        ErrorKind::Char,
    )))
}

// ---------------------------------------------------------------------------
// Atoms
// ---------------------------------------------------------------------------

/// Parse `@`, `!`, or a `keyword:operand` check.
fn parse_atom(input: &str) -> PResult<'_, CheckExpr> {
    if let Some(rest) = input.strip_prefix('@') {
        return Ok((rest, CheckExpr::Always));
    }
    if let Some(rest) = input.strip_prefix('!') {
        return Ok((rest, CheckExpr::Never));
    }

    let (rest, key) = parse_path(input)?;
    if is_reserved(key) {
        return syntax_error(input);
    }

    let dotted = key.contains('.');
    if !dotted && !matches!(key, "role" | "system_scope" | "rule") {
        return fail(
            input,
            ParseError::UnknownAtom {
                keyword: key.to_owned(),
            },
        );
    }

    let Some(after_colon) = rest.strip_prefix(':') else {
        return syntax_error(rest);
    };
    let (rest, operand) = parse_operand(key, after_colon)?;

    let expr = if dotted {
        CheckExpr::Attribute {
            path: key.to_owned(),
            value: operand,
        }
    } else {
        let Operand::Literal(value) = operand else {
            return fail(
                input,
                ParseError::LiteralRequired {
                    keyword: key.to_owned(),
                },
            );
        };
        match key {
            "role" => CheckExpr::Role(value),
            "system_scope" => CheckExpr::SystemScope(value),
            _ => CheckExpr::RuleRef(value),
        }
    };
    Ok((rest, expr))
}

// ---------------------------------------------------------------------------
// Boolean structure
// ---------------------------------------------------------------------------

/// A parsed subtree and its height (atoms are 1).
type Node = (CheckExpr, usize);

fn too_deep(input: &str) -> nom::Err<CheckError<'_>> {
    nom::Err::Failure(CheckError {
        input,
        kind: CheckErrorKind::TooDeep,
    })
}

/// Parse a parenthesised expression or an atom.
///
/// `depth` counts the enclosing parentheses and `not` prefixes.
fn parse_primary(input: &str, depth: usize) -> PResult<'_, Node> {
    let (input, _) = ws(input)?;
    if let Some(rest) = input.strip_prefix('(') {
        if depth >= MAX_NESTING {
            return Err(too_deep(input));
        }
        let (rest, node) = parse_or(rest, depth + 1)?;
        let (rest, _) = ws(rest)?;
        let (rest, _) = close_paren(rest)?;
        return Ok((rest, node));
    }
    let (rest, atom) = parse_atom(input)?;
    Ok((rest, (atom, 1)))
}

/// Parse `not` prefixes.
fn parse_not(input: &str, depth: usize) -> PResult<'_, Node> {
    match keyword("not")(input) {
        Ok((rest, ())) => {
            if depth >= MAX_NESTING {
                return Err(too_deep(input.trim_start()));
            }
            let (rest, (inner, height)) = parse_not(rest, depth + 1)?;
            Ok((rest, (CheckExpr::Not(Box::new(inner)), height + 1)))
        }
        Err(nom::Err::Error(_)) => parse_primary(input, depth),
        Err(e) => Err(e),
    }
}

/// Join two subtrees under a binary node, keeping the tree within
/// [`MAX_NESTING`] levels.
fn join<'a>(
    at: &'a str,
    (lhs, lhs_height): Node,
    (rhs, rhs_height): Node,
    op: fn(Box<CheckExpr>, Box<CheckExpr>) -> CheckExpr,
) -> Result<Node, nom::Err<CheckError<'a>>> {
    let height = lhs_height.max(rhs_height) + 1;
    if height > MAX_NESTING {
        return Err(too_deep(at));
    }
    Ok((op(Box::new(lhs), Box::new(rhs)), height))
}

/// Parse a left-associative chain of `and`.
fn parse_and(input: &str, depth: usize) -> PResult<'_, Node> {
    let (mut input, mut left) = parse_not(input, depth)?;
    loop {
        match keyword("and")(input) {
            Ok((rest, ())) => {
                let (rest, right) = parse_not(rest, depth)?;
                left = join(input.trim_start(), left, right, CheckExpr::And)?;
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, left))
}

/// Parse a left-associative chain of `or`.
fn parse_or(input: &str, depth: usize) -> PResult<'_, Node> {
    let (mut input, mut left) = parse_and(input, depth)?;
    loop {
        match keyword("or")(input) {
            Ok((rest, ())) => {
                let (rest, right) = parse_and(rest, depth)?;
                left = join(input.trim_start(), left, right, CheckExpr::Or)?;
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, left))
}
