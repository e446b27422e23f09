//! Parameter programs.
//!
//! Each configured parameter is a small program of steps read from the
//! configuration document as `{ "name": <opcode>, "value": <operands> }`.
//! Opcodes are parsed once into [`Op`] and never re-read as strings.
//!
//! | opcode  | value           | effect                                   |
//! |---------|-----------------|------------------------------------------|
//! | `angle` | `<degrees>`     | select the landmarks observed at an angle |
//! | `add`   | `<a> <b>`       | `a + b`, stored in `result`              |
//! | `sub`   | `<a> <b>`       | `a - b`, stored in `result`              |
//! | `mult`  | `<a> <b>`       | `a * b`, stored in `result`              |
//! | `div`   | `<a> <b>`       | `a / b`, stored in `result`              |
//! | `set`   | `<name> <v>`    | `variables[name] = v`                    |
//!
//! Operands are numeric literals, variable names, or `<region>.w` /
//! `<region>.h` landmark sizes. They may be separated by spaces or commas.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Variable that receives every arithmetic result.
pub const RESULT_VARIABLE: &str = "result";

/// Parameter names with block-valued outputs; anything else is a scalar program.
pub const ENCODING_PARAM: &str = "encoding";
pub const MORPHS_PARAM: &str = "json";

/// A literal or a name resolved against the workarea.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(f64),
    Name(String),
}

impl Operand {
    fn parse(token: &str) -> Self {
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() => Operand::Literal(v),
            _ => Operand::Name(token.to_string()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Name(n) => f.write_str(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mult,
    Div,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mult => "mult",
            BinaryOp::Div => "div",
        }
    }
}

/// One parsed program step.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Angle(f64),
    Binary { op: BinaryOp, lhs: Operand, rhs: Operand },
    Set { name: String, value: Operand },
}

impl Op {
    /// Whether the step yields a value that can become the program output.
    pub fn produces_value(&self) -> bool {
        !matches!(self, Op::Angle(_))
    }
}

/// How a parameter turns into output values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// One value: the last value-producing step.
    Scalar,
    /// The example's face encoding at the selected angle.
    Encoding,
    /// The example face's morph values in base-schema order.
    Morphs,
}

/// A named, immutable parameter program.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
    steps: Vec<Op>,
}

impl ParamSpec {
    /// Build a spec, checking that the steps can produce the kind's output.
    pub fn new(name: impl Into<String>, steps: Vec<Op>) -> Result<Self, ParamParseError> {
        let name = name.into();
        let kind = match name.as_str() {
            ENCODING_PARAM => ParamKind::Encoding,
            MORPHS_PARAM => ParamKind::Morphs,
            _ => ParamKind::Scalar,
        };
        match kind {
            ParamKind::Scalar if !steps.iter().any(Op::produces_value) => {
                return Err(ParamParseError::NoOutput);
            }
            ParamKind::Encoding if !steps.iter().any(|s| matches!(s, Op::Angle(_))) => {
                return Err(ParamParseError::MissingAngle);
            }
            _ => {}
        }
        Ok(Self { name, kind, steps })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn steps(&self) -> &[Op] {
        &self.steps
    }

    /// Angles referenced by `angle` steps, in program order.
    pub fn angles(&self) -> impl Iterator<Item = f64> + '_ {
        self.steps.iter().filter_map(|s| match s {
            Op::Angle(a) => Some(*a),
            _ => None,
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamParseError {
    #[error("entry is not a parameter object: {0}")]
    Shape(String),
    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),
    #[error("{opcode}: expected {expected} operand(s), got {actual:?}")]
    Arity {
        opcode: String,
        expected: usize,
        actual: String,
    },
    #[error("invalid angle {0:?}")]
    InvalidAngle(String),
    #[error("cannot assign to {0:?}")]
    InvalidTarget(String),
    #[error("program has no value-producing step")]
    NoOutput,
    #[error("encoding parameter needs an angle step")]
    MissingAngle,
}

/// A skipped parameter entry. Parsing carries on without it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("skipping {section}[{index}] ({name}): {reason}")]
pub struct ParamParseWarning {
    pub section: String,
    pub index: usize,
    pub name: String,
    #[source]
    pub reason: ParamParseError,
}

/// Items that loaded, alongside the ones that were skipped and why.
#[derive(Debug, Clone)]
pub struct Loaded<T, W> {
    pub items: Vec<T>,
    pub warnings: Vec<W>,
}

impl<T, W> Default for Loaded<T, W> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawParam {
    name: String,
    params: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    name: String,
    value: Value,
}

/// Parse one section (`inputs` or `outputs`) entry by entry.
///
/// A skipped entry contributes nothing, including any `angle` steps it read
/// before failing, so the angle set only names angles some parsed program
/// actually needs.
pub fn parse_params(section: &str, entries: &[Value]) -> Loaded<ParamSpec, ParamParseWarning> {
    let mut loaded = Loaded::default();
    for (index, entry) in entries.iter().enumerate() {
        match parse_param(entry) {
            Ok(spec) => loaded.items.push(spec),
            Err(reason) => {
                let name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("<unnamed>")
                    .to_string();
                let warning = ParamParseWarning {
                    section: section.to_string(),
                    index,
                    name,
                    reason,
                };
                tracing::warn!(%warning, "error parsing parameter");
                loaded.warnings.push(warning);
            }
        }
    }
    loaded
}

fn parse_param(entry: &Value) -> Result<ParamSpec, ParamParseError> {
    let raw: RawParam = serde_json::from_value(entry.clone())
        .map_err(|e| ParamParseError::Shape(e.to_string()))?;
    let steps = raw
        .params
        .iter()
        .map(parse_step)
        .collect::<Result<Vec<_>, _>>()?;
    ParamSpec::new(raw.name, steps)
}

fn parse_step(step: &RawStep) -> Result<Op, ParamParseError> {
    let text = match &step.value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(ParamParseError::Shape(format!(
                "{}: value must be a string or number, got {other}",
                step.name
            )))
        }
    };
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    let binary = |op: BinaryOp| -> Result<Op, ParamParseError> {
        match tokens.as_slice() {
            [a, b] => Ok(Op::Binary {
                op,
                lhs: Operand::parse(a),
                rhs: Operand::parse(b),
            }),
            _ => Err(arity(&step.name, 2, &text)),
        }
    };

    match step.name.as_str() {
        "angle" => match tokens.as_slice() {
            [a] => a
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Op::Angle)
                .ok_or_else(|| ParamParseError::InvalidAngle(text.clone())),
            _ => Err(arity(&step.name, 1, &text)),
        },
        "add" => binary(BinaryOp::Add),
        "sub" => binary(BinaryOp::Sub),
        "mult" => binary(BinaryOp::Mult),
        "div" => binary(BinaryOp::Div),
        "set" => match tokens.as_slice() {
            [name, value] => {
                if let Operand::Literal(_) = Operand::parse(name) {
                    return Err(ParamParseError::InvalidTarget(name.to_string()));
                }
                if name.ends_with(".w") || name.ends_with(".h") {
                    return Err(ParamParseError::InvalidTarget(name.to_string()));
                }
                Ok(Op::Set {
                    name: name.to_string(),
                    value: Operand::parse(value),
                })
            }
            _ => Err(arity(&step.name, 2, &text)),
        },
        other => Err(ParamParseError::UnknownOpcode(other.to_string())),
    }
}

fn arity(opcode: &str, expected: usize, actual: &str) -> ParamParseError {
    ParamParseError::Arity {
        opcode: opcode.to_string(),
        expected,
        actual: actual.to_string(),
    }
}

/// Sorted, distinct angles referenced across all parameter programs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngleSet(Vec<f64>);

impl AngleSet {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, angle: f64) -> bool {
        self.0.iter().any(|&a| a == angle)
    }
}

impl FromIterator<f64> for AngleSet {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut angles: Vec<f64> = iter.into_iter().collect();
        angles.sort_by(f64::total_cmp);
        angles.dedup();
        Self(angles)
    }
}
