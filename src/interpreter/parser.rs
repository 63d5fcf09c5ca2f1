//! PEST-based parser for Flow scripts
//!
//! Produces the AST evaluated by [`super::eval`]. A script is a flat list of
//! statements; there is no function wrapper.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use super::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "interpreter/flow.pest"]
struct FlowParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Pest(String),
    #[error("{0}")]
    Build(String),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Pest(err.to_string())
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Public API ===================== */

/// Parse Flow source text into a program
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let program = FlowParser::parse(Rule::program, source)?
        .next()
        .ok_or_else(|| ParseError::Build("empty parse result".to_string()))?;

    let body = program
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::statement)
        .map(build_statement)
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(Program { body })
}

/* ===================== AST Builder ===================== */

fn next_pair<'i>(inner: &mut Pairs<'i, Rule>, what: &str) -> ParseResult<Pair<'i, Rule>> {
    inner
        .next()
        .ok_or_else(|| ParseError::Build(format!("missing {}", what)))
}

fn build_block(pair: Pair<Rule>) -> ParseResult<Stmt> {
    // block = { "{" ~ statement* ~ "}" }
    let body = pair
        .into_inner()
        .map(build_statement)
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Stmt::Block { body })
}

fn build_statement(pair: Pair<Rule>) -> ParseResult<Stmt> {
    match pair.as_rule() {
        Rule::statement => {
            let mut inner = pair.into_inner();
            build_statement(next_pair(&mut inner, "statement")?)
        }
        Rule::block => build_block(pair),
        Rule::let_stmt => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, "let name")?.as_str().to_string();
            let init = inner.next().map(build_expression).transpose()?;
            Ok(Stmt::Let { name, init })
        }
        Rule::assign_stmt => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, "assignment target")?.as_str().to_string();
            let expr = build_expression(next_pair(&mut inner, "assigned value")?)?;
            Ok(Stmt::Assign { name, expr })
        }
        Rule::expr_stmt => {
            let mut inner = pair.into_inner();
            let expr = build_expression(next_pair(&mut inner, "expression")?)?;
            Ok(Stmt::Expr { expr })
        }
        Rule::if_stmt => {
            // if_stmt = { "if" ~ "(" ~ expression ~ ")" ~ block ~ ("else" ~ (if_stmt | block))? }
            let mut inner = pair.into_inner();
            let test = build_expression(next_pair(&mut inner, "if condition")?)?;
            let then_s = Box::new(build_block(next_pair(&mut inner, "if body")?)?);
            let else_s = inner
                .next()
                .map(|p| build_statement(p).map(Box::new))
                .transpose()?;
            Ok(Stmt::If {
                test,
                then_s,
                else_s,
            })
        }
        Rule::while_stmt => {
            let mut inner = pair.into_inner();
            let test = build_expression(next_pair(&mut inner, "while condition")?)?;
            let body = Box::new(build_block(next_pair(&mut inner, "while body")?)?);
            Ok(Stmt::While { test, body })
        }
        Rule::for_stmt => {
            let mut inner = pair.into_inner();
            let iterator = next_pair(&mut inner, "loop variable")?.as_str().to_string();
            let iterable = build_expression(next_pair(&mut inner, "loop iterable")?)?;
            let body = Box::new(build_block(next_pair(&mut inner, "loop body")?)?);
            Ok(Stmt::For {
                iterator,
                iterable,
                body,
            })
        }
        Rule::try_stmt => {
            let mut inner = pair.into_inner();
            let body = Box::new(build_block(next_pair(&mut inner, "try body")?)?);
            let catch_var = next_pair(&mut inner, "catch variable")?.as_str().to_string();
            let catch_body = Box::new(build_block(next_pair(&mut inner, "catch body")?)?);
            Ok(Stmt::Try {
                body,
                catch_var,
                catch_body,
            })
        }
        Rule::return_stmt => {
            let value = pair.into_inner().next().map(build_expression).transpose()?;
            Ok(Stmt::Return { value })
        }
        Rule::throw_stmt => {
            let mut inner = pair.into_inner();
            let value = build_expression(next_pair(&mut inner, "thrown value")?)?;
            Ok(Stmt::Throw { value })
        }
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        _ => Err(ParseError::Build(format!(
            "Unexpected statement rule: {:?}",
            pair.as_rule()
        ))),
    }
}

fn build_expression(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expression => {
            let mut inner = pair.into_inner();
            build_expression(next_pair(&mut inner, "expression")?)
        }
        Rule::or_expr
        | Rule::and_expr
        | Rule::eq_expr
        | Rule::cmp_expr
        | Rule::add_expr
        | Rule::mul_expr => build_binary_chain(pair),
        Rule::unary_expr => {
            // unary_expr = { unary_op* ~ postfix_expr }
            let mut ops = Vec::new();
            let mut operand = None;
            for child in pair.into_inner() {
                match child.as_rule() {
                    Rule::unary_op => ops.push(match child.as_str() {
                        "!" => UnaryOp::Not,
                        _ => UnaryOp::Neg,
                    }),
                    _ => operand = Some(build_expression(child)?),
                }
            }
            let mut expr =
                operand.ok_or_else(|| ParseError::Build("missing unary operand".to_string()))?;
            // Innermost operator applies first
            for op in ops.into_iter().rev() {
                expr = fold_unary(op, expr);
            }
            Ok(expr)
        }
        Rule::postfix_expr => {
            // postfix_expr = { primary ~ (call_args | member | index)* }
            let mut inner = pair.into_inner();
            let mut expr = build_expression(next_pair(&mut inner, "primary expression")?)?;
            for suffix in inner {
                expr = match suffix.as_rule() {
                    Rule::call_args => Expr::Call {
                        callee: Box::new(expr),
                        args: suffix
                            .into_inner()
                            .map(build_expression)
                            .collect::<ParseResult<Vec<_>>>()?,
                    },
                    Rule::member => {
                        let mut parts = suffix.into_inner();
                        Expr::Member {
                            object: Box::new(expr),
                            property: next_pair(&mut parts, "property name")?.as_str().to_string(),
                        }
                    }
                    Rule::index => {
                        let mut parts = suffix.into_inner();
                        Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(build_expression(next_pair(&mut parts, "index")?)?),
                        }
                    }
                    other => {
                        return Err(ParseError::Build(format!(
                            "Unexpected postfix rule: {:?}",
                            other
                        )))
                    }
                };
            }
            Ok(expr)
        }
        Rule::identifier => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
        }),
        Rule::null_lit => Ok(Expr::LitNull),
        Rule::boolean => Ok(Expr::LitBool {
            v: pair.as_str() == "true",
        }),
        Rule::number => {
            let num_str = pair.as_str();
            let v = num_str.parse::<f64>().map_err(|e| {
                ParseError::Build(format!("Failed to parse number '{}': {}", num_str, e))
            })?;
            Ok(Expr::LitNum { v })
        }
        Rule::string => Ok(Expr::LitStr {
            v: build_string(pair)?,
        }),
        Rule::list_lit => Ok(Expr::LitList {
            items: pair
                .into_inner()
                .map(build_expression)
                .collect::<ParseResult<Vec<_>>>()?,
        }),
        Rule::object_lit => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut parts = entry.into_inner();
                let key_pair = next_pair(&mut parts, "object key")?;
                let key = match key_pair.as_rule() {
                    Rule::string => build_string(key_pair)?,
                    _ => key_pair.as_str().to_string(),
                };
                let value = build_expression(next_pair(&mut parts, "object value")?)?;
                entries.push((key, value));
            }
            Ok(Expr::LitObj { entries })
        }
        _ => Err(ParseError::Build(format!(
            "Unexpected expression rule: {:?}",
            pair.as_rule()
        ))),
    }
}

/// Fold `operand (op operand)*` left-associatively
fn build_binary_chain(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let mut left = build_expression(next_pair(&mut inner, "left operand")?)?;

    while let Some(op_pair) = inner.next() {
        let op = binary_op(op_pair.as_str())?;
        let right = build_expression(next_pair(&mut inner, "right operand")?)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }

    Ok(left)
}

fn binary_op(symbol: &str) -> ParseResult<BinaryOp> {
    let op = match symbol {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        other => return Err(ParseError::Build(format!("Unknown operator '{}'", other))),
    };
    Ok(op)
}

/// Negative number literals collapse into the literal itself
fn fold_unary(op: UnaryOp, operand: Expr) -> Expr {
    match (op, operand) {
        (UnaryOp::Neg, Expr::LitNum { v }) => Expr::LitNum { v: -v },
        (op, operand) => Expr::Unary {
            op,
            operand: Box::new(operand),
        },
    }
}

fn build_string(pair: Pair<Rule>) -> ParseResult<String> {
    // string = ${ ("\"" ~ dq_inner ~ "\"") | ("'" ~ sq_inner ~ "'") }
    let raw = pair
        .into_inner()
        .next()
        .map(|inner| inner.as_str())
        .unwrap_or("");
    unescape(raw)
}

fn unescape(raw: &str) -> ParseResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other @ ('"' | '\'' | '\\' | '/')) => out.push(other),
            Some(other) => {
                return Err(ParseError::Build(format!(
                    "Unknown escape sequence '\\{}'",
                    other
                )))
            }
            None => return Err(ParseError::Build("Dangling escape".to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
