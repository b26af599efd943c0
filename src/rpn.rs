//! The RPN (reverse-Polish notation) stack-machine evaluator (§4.10): evaluates a postfix
//! expression once per aligned timestamp slot, reading prior columns by name.

use std::collections::HashMap;
use std::f64::consts::{E, PI};

use chrono::{DateTime, Datelike, Timelike, Utc};
use snafu::ensure;

use crate::error::{BadRpnSnafu, Result};

const MAX_STACK: usize = 1000;

/// The context a [`RpnProgram`] evaluates within: the output step, a reference "now", and
/// the set of named columns (already-computed series, keyed by source/CDEF name) it may
/// read from via a bare name token or `PREV(name)`.
pub struct RpnContext<'a> {
    pub now: i64,
    pub step: i64,
    pub columns: &'a HashMap<String, Vec<f64>>,
}

#[derive(Debug, Clone)]
enum Token {
    Number(f64),
    Column(String),
    Prev(Option<String>),
    Op(Op),
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Sin,
    Cos,
    Log,
    Exp,
    Floor,
    Ceil,
    Round,
    Pow,
    Abs,
    Sqrt,
    Random,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    If,
    Min,
    Max,
    Limit,
    Dup,
    Exc,
    Pop,
    Un,
    Unkn,
    Now,
    Time,
    Pi,
    E,
    Inf,
    NegInf,
    Step,
    Year,
    Month,
    Date,
    Hour,
    Minute,
    Second,
    Week,
    And,
    Or,
    Xor,
    Sign,
}

/// A parsed, reusable RPN expression: tokenizing happens once at construction, so repeated
/// per-slot evaluation (one call per fetched timestamp) only re-runs the stack machine.
#[derive(Debug, Clone)]
pub struct RpnProgram {
    tokens: Vec<Token>,
}

impl RpnProgram {
    pub fn parse(expr: &str) -> Result<Self> {
        let tokens = expr
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(parse_token)
            .collect::<Result<Vec<_>>>()?;
        ensure!(
            !tokens.is_empty(),
            BadRpnSnafu {
                reason: "expression has no tokens".to_string(),
            }
        );
        Ok(Self { tokens })
    }

    /// Evaluates this expression for one slot, given the already-computed value of the
    /// current column's previous slot (for bare `PREV`) and the full context of named
    /// columns (for `PREV(name)` and column references).
    pub fn eval(&self, slot: usize, self_prev: f64, ctx: &RpnContext<'_>) -> Result<f64> {
        let mut stack: Vec<f64> = Vec::with_capacity(16);
        for tok in &self.tokens {
            match tok {
                Token::Number(n) => push(&mut stack, *n)?,
                Token::Column(name) => {
                    let v = ctx
                        .columns
                        .get(name)
                        .and_then(|c| c.get(slot))
                        .copied()
                        .ok_or_else(|| {
                            BadRpnSnafu {
                                reason: format!("unknown column '{name}'"),
                            }
                            .build()
                        })?;
                    push(&mut stack, v)?;
                }
                Token::Prev(None) => push(&mut stack, self_prev)?,
                Token::Prev(Some(name)) => {
                    let v = if slot == 0 {
                        f64::NAN
                    } else {
                        ctx.columns
                            .get(name)
                            .and_then(|c| c.get(slot - 1))
                            .copied()
                            .ok_or_else(|| {
                                BadRpnSnafu {
                                    reason: format!("unknown column '{name}'"),
                                }
                                .build()
                            })?
                    };
                    push(&mut stack, v)?;
                }
                Token::Op(op) => eval_op(*op, &mut stack, ctx)?,
            }
        }
        ensure!(
            stack.len() == 1,
            BadRpnSnafu {
                reason: format!("expression left {} values on the stack, expected 1", stack.len()),
            }
        );
        Ok(stack[0])
    }
}

fn push(stack: &mut Vec<f64>, v: f64) -> Result<()> {
    ensure!(
        stack.len() < MAX_STACK,
        BadRpnSnafu {
            reason: format!("operand stack exceeded {MAX_STACK} entries"),
        }
    );
    stack.push(v);
    Ok(())
}

fn pop(stack: &mut Vec<f64>) -> Result<f64> {
    stack.pop().ok_or_else(|| {
        BadRpnSnafu {
            reason: "operator applied to an empty stack".to_string(),
        }
        .build()
    })
}

fn truthy(v: f64) -> bool {
    !v.is_nan() && v != 0.0
}

fn eval_op(op: Op, stack: &mut Vec<f64>, ctx: &RpnContext<'_>) -> Result<()> {
    match op {
        Op::Add => binop(stack, |a, b| a + b)?,
        Op::Sub => binop(stack, |a, b| a - b)?,
        Op::Mul => binop(stack, |a, b| a * b)?,
        Op::Div => binop(stack, |a, b| a / b)?,
        Op::Mod => binop(stack, |a, b| a % b)?,
        Op::Sin => unop(stack, f64::sin)?,
        Op::Cos => unop(stack, f64::cos)?,
        Op::Log => unop(stack, f64::ln)?,
        Op::Exp => unop(stack, f64::exp)?,
        Op::Floor => unop(stack, f64::floor)?,
        Op::Ceil => unop(stack, f64::ceil)?,
        Op::Round => unop(stack, f64::round)?,
        Op::Pow => binop(stack, f64::powf)?,
        Op::Abs => unop(stack, f64::abs)?,
        Op::Sqrt => unop(stack, f64::sqrt)?,
        Op::Random => push(stack, rand::random::<f64>())?,
        Op::Lt => binop(stack, |a, b| bool_f64(a < b))?,
        Op::Le => binop(stack, |a, b| bool_f64(a <= b))?,
        Op::Gt => binop(stack, |a, b| bool_f64(a > b))?,
        Op::Ge => binop(stack, |a, b| bool_f64(a >= b))?,
        Op::Eq => binop(stack, |a, b| bool_f64(a == b))?,
        Op::If => {
            let false_val = pop(stack)?;
            let true_val = pop(stack)?;
            let cond = pop(stack)?;
            push(stack, if truthy(cond) { true_val } else { false_val })?;
        }
        Op::Min => binop(stack, crate::util::nan_safe_min)?,
        Op::Max => binop(stack, crate::util::nan_safe_max)?,
        Op::Limit => {
            let hi = pop(stack)?;
            let lo = pop(stack)?;
            let v = pop(stack)?;
            push(stack, if v.is_nan() || v < lo || v > hi { f64::NAN } else { v })?;
        }
        Op::Dup => {
            let v = *stack.last().ok_or_else(|| {
                BadRpnSnafu {
                    reason: "DUP applied to an empty stack".to_string(),
                }
                .build()
            })?;
            push(stack, v)?;
        }
        Op::Exc => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            push(stack, b)?;
            push(stack, a)?;
        }
        Op::Pop => {
            pop(stack)?;
        }
        Op::Un => {
            let v = pop(stack)?;
            push(stack, bool_f64(v.is_nan()))?;
        }
        Op::Unkn => push(stack, f64::NAN)?,
        Op::Now | Op::Time => push(stack, ctx.now as f64)?,
        Op::Pi => push(stack, PI)?,
        Op::E => push(stack, E)?,
        Op::Inf => push(stack, f64::INFINITY)?,
        Op::NegInf => push(stack, f64::NEG_INFINITY)?,
        Op::Step => push(stack, ctx.step as f64)?,
        Op::Year => push(stack, datetime_of(pop(stack)?).year() as f64)?,
        Op::Month => push(stack, datetime_of(pop(stack)?).month() as f64)?,
        Op::Date => push(stack, datetime_of(pop(stack)?).day() as f64)?,
        Op::Hour => push(stack, datetime_of(pop(stack)?).hour() as f64)?,
        Op::Minute => push(stack, datetime_of(pop(stack)?).minute() as f64)?,
        Op::Second => push(stack, datetime_of(pop(stack)?).second() as f64)?,
        Op::Week => push(stack, datetime_of(pop(stack)?).iso_week().week() as f64)?,
        Op::And => binop(stack, |a, b| bool_f64(truthy(a) && truthy(b)))?,
        Op::Or => binop(stack, |a, b| bool_f64(truthy(a) || truthy(b)))?,
        Op::Xor => binop(stack, |a, b| bool_f64(truthy(a) != truthy(b)))?,
        Op::Sign => unop(stack, |v| {
            if v.is_nan() {
                f64::NAN
            } else if v > 0.0 {
                1.0
            } else if v < 0.0 {
                -1.0
            } else {
                0.0
            }
        })?,
    }
    Ok(())
}

fn datetime_of(ts: f64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts as i64, 0).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}

fn bool_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn unop(stack: &mut Vec<f64>, f: impl Fn(f64) -> f64) -> Result<()> {
    let v = pop(stack)?;
    push(stack, f(v))
}

fn binop(stack: &mut Vec<f64>, f: impl Fn(f64, f64) -> f64) -> Result<()> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push(stack, f(a, b))
}

fn parse_token(raw: &str) -> Result<Token> {
    if let Ok(n) = raw.parse::<f64>() {
        return Ok(Token::Number(n));
    }
    if let Some(inner) = raw.strip_prefix("PREV(").and_then(|s| s.strip_suffix(')')) {
        return Ok(Token::Prev(Some(inner.to_string())));
    }
    let op = match raw {
        "+" => Some(Op::Add),
        "-" => Some(Op::Sub),
        "*" => Some(Op::Mul),
        "/" => Some(Op::Div),
        "%" => Some(Op::Mod),
        "SIN" => Some(Op::Sin),
        "COS" => Some(Op::Cos),
        "LOG" => Some(Op::Log),
        "EXP" => Some(Op::Exp),
        "FLOOR" => Some(Op::Floor),
        "CEIL" => Some(Op::Ceil),
        "ROUND" => Some(Op::Round),
        "POW" => Some(Op::Pow),
        "ABS" => Some(Op::Abs),
        "SQRT" => Some(Op::Sqrt),
        "RANDOM" | "RND" => Some(Op::Random),
        "LT" => Some(Op::Lt),
        "LE" => Some(Op::Le),
        "GT" => Some(Op::Gt),
        "GE" => Some(Op::Ge),
        "EQ" => Some(Op::Eq),
        "IF" => Some(Op::If),
        "MIN" => Some(Op::Min),
        "MAX" => Some(Op::Max),
        "LIMIT" => Some(Op::Limit),
        "DUP" => Some(Op::Dup),
        "EXC" => Some(Op::Exc),
        "POP" => Some(Op::Pop),
        "UN" => Some(Op::Un),
        "UNKN" => Some(Op::Unkn),
        "NOW" => Some(Op::Now),
        "TIME" => Some(Op::Time),
        "PI" => Some(Op::Pi),
        "E" => Some(Op::E),
        "INF" => Some(Op::Inf),
        "NEGINF" => Some(Op::NegInf),
        "STEP" => Some(Op::Step),
        "YEAR" => Some(Op::Year),
        "MONTH" => Some(Op::Month),
        "DATE" => Some(Op::Date),
        "HOUR" => Some(Op::Hour),
        "MINUTE" => Some(Op::Minute),
        "SECOND" => Some(Op::Second),
        "WEEK" => Some(Op::Week),
        "AND" => Some(Op::And),
        "OR" => Some(Op::Or),
        "XOR" => Some(Op::Xor),
        "SIGN" => Some(Op::Sign),
        "PREV" => return Ok(Token::Prev(None)),
        _ => None,
    };
    if let Some(op) = op {
        return Ok(Token::Op(op));
    }
    Ok(Token::Column(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(columns: &HashMap<String, Vec<f64>>) -> RpnContext<'_> {
        RpnContext {
            now: 1_000_000,
            step: 300,
            columns,
        }
    }

    #[test]
    fn average_of_two_constant_columns() {
        let mut cols = HashMap::new();
        cols.insert("x".to_string(), vec![2.0; 10]);
        cols.insert("y".to_string(), vec![6.0; 10]);
        let prog = RpnProgram::parse("x,y,+,2,/").unwrap();
        for slot in 0..10 {
            assert_eq!(prog.eval(slot, f64::NAN, &ctx(&cols)).unwrap(), 4.0);
        }
    }

    #[test]
    fn if_selects_branch_by_condition() {
        let cols = HashMap::new();
        let prog = RpnProgram::parse("1,10,20,IF").unwrap();
        assert_eq!(prog.eval(0, f64::NAN, &ctx(&cols)).unwrap(), 10.0);
        let prog = RpnProgram::parse("0,10,20,IF").unwrap();
        assert_eq!(prog.eval(0, f64::NAN, &ctx(&cols)).unwrap(), 20.0);
    }

    #[test]
    fn prev_is_nan_at_slot_zero() {
        let cols = HashMap::new();
        let prog = RpnProgram::parse("PREV").unwrap();
        assert!(prog.eval(0, f64::NAN, &ctx(&cols)).unwrap().is_nan());
        assert_eq!(prog.eval(1, 7.0, &ctx(&cols)).unwrap(), 7.0);
    }

    #[test]
    fn leftover_stack_is_bad_rpn() {
        let cols = HashMap::new();
        let prog = RpnProgram::parse("1,2").unwrap();
        assert!(prog.eval(0, f64::NAN, &ctx(&cols)).is_err());
    }

    #[test]
    fn un_detects_unknown() {
        let cols = HashMap::new();
        let prog = RpnProgram::parse("UNKN,UN").unwrap();
        assert_eq!(prog.eval(0, f64::NAN, &ctx(&cols)).unwrap(), 1.0);
    }
}
