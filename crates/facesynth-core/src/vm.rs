//! The parameter VM's per-program state and instruction semantics.

use crate::landmarks::Size;
use crate::program::{BinaryOp, Op, Operand, RESULT_VARIABLE};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    #[error("undefined variable {0:?}")]
    UndefinedVariable(String),
    #[error("undefined landmark region {0:?}")]
    UndefinedRegion(String),
    #[error("no landmarks for angle {0}")]
    MissingAngle(f64),
    #[error("division by zero: {lhs} / {rhs}")]
    DivisionByZero { lhs: String, rhs: String },
    #[error("{op} produced a non-finite value from {lhs} and {rhs}")]
    NonFinite {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
}

impl VmError {
    /// Missing landmark data or variable (as opposed to an arithmetic fault).
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            VmError::UndefinedVariable(_) | VmError::UndefinedRegion(_) | VmError::MissingAngle(_)
        )
    }
}

/// Scratch state for evaluating one parameter program.
#[derive(Debug, Clone, Default)]
pub struct Workarea {
    pub landmarks: HashMap<String, Size>,
    pub variables: HashMap<String, f64>,
}

impl Workarea {
    pub fn new(landmarks: HashMap<String, Size>) -> Self {
        Self {
            landmarks,
            variables: HashMap::new(),
        }
    }

    /// `<region>.w` / `<region>.h` read landmark sizes; other names read variables.
    pub fn resolve_variable(&self, name: &str) -> Result<f64, VmError> {
        if let Some(region) = name.strip_suffix(".w") {
            return self.region(region).map(|s| s.width);
        }
        if let Some(region) = name.strip_suffix(".h") {
            return self.region(region).map(|s| s.height);
        }
        self.variables
            .get(name)
            .copied()
            .ok_or_else(|| VmError::UndefinedVariable(name.to_string()))
    }

    fn region(&self, region: &str) -> Result<&Size, VmError> {
        self.landmarks
            .get(region)
            .ok_or_else(|| VmError::UndefinedRegion(region.to_string()))
    }

    pub fn resolve(&self, operand: &Operand) -> Result<f64, VmError> {
        match operand {
            Operand::Literal(v) => Ok(*v),
            Operand::Name(name) => self.resolve_variable(name),
        }
    }

    pub fn add(&self, a: &Operand, b: &Operand) -> Result<f64, VmError> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&self, a: &Operand, b: &Operand) -> Result<f64, VmError> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mult(&self, a: &Operand, b: &Operand) -> Result<f64, VmError> {
        self.binary(BinaryOp::Mult, a, b)
    }

    pub fn div(&self, a: &Operand, b: &Operand) -> Result<f64, VmError> {
        self.binary(BinaryOp::Div, a, b)
    }

    fn binary(&self, op: BinaryOp, a: &Operand, b: &Operand) -> Result<f64, VmError> {
        let lhs = self.resolve(a)?;
        let rhs = self.resolve(b)?;
        let value = match op {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mult => lhs * rhs,
            BinaryOp::Div => {
                if rhs == 0.0 {
                    return Err(VmError::DivisionByZero {
                        lhs: a.to_string(),
                        rhs: b.to_string(),
                    });
                }
                lhs / rhs
            }
        };
        if !value.is_finite() {
            return Err(VmError::NonFinite {
                op: op.name(),
                lhs: a.to_string(),
                rhs: b.to_string(),
            });
        }
        Ok(value)
    }

    pub fn set_variable(&mut self, name: &str, value: &Operand) -> Result<f64, VmError> {
        let value = self.resolve(value)?;
        self.variables.insert(name.to_string(), value);
        Ok(value)
    }

    /// Run one arithmetic or `set` step. Angle selection is the engine's job,
    /// so `Op::Angle` yields no value here.
    pub fn execute(&mut self, step: &Op) -> Result<Option<f64>, VmError> {
        match step {
            Op::Angle(_) => Ok(None),
            Op::Binary { op, lhs, rhs } => {
                let value = self.binary(*op, lhs, rhs)?;
                self.variables.insert(RESULT_VARIABLE.to_string(), value);
                Ok(Some(value))
            }
            Op::Set { name, value } => self.set_variable(name, value).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: f64) -> Operand {
        Operand::Literal(v)
    }

    fn name(n: &str) -> Operand {
        Operand::Name(n.to_string())
    }

    fn workarea() -> Workarea {
        let mut w = Workarea::new(HashMap::from([(
            "nose".to_string(),
            Size {
                width: 10.0,
                height: 20.0,
            },
        )]));
        w.variables.insert("var1".into(), 5.0);
        w.variables.insert("var2".into(), 3.0);
        w
    }

    #[test]
    fn test_vm_arithmetic() {
        let w = workarea();
        assert_eq!(w.add(&lit(5.0), &lit(3.0)), Ok(8.0));
        assert_eq!(w.sub(&lit(5.0), &lit(3.0)), Ok(2.0));
        assert_eq!(w.mult(&lit(5.0), &lit(3.0)), Ok(15.0));
        assert_eq!(w.div(&lit(10.0), &lit(2.0)), Ok(5.0));
        assert_eq!(w.add(&name("var1"), &name("var2")), Ok(8.0));
        assert_eq!(w.sub(&name("var1"), &name("var2")), Ok(2.0));
    }

    #[test]
    fn test_vm_divide_by_zero() {
        let w = workarea();
        for x in [0.0, 1.0, -7.5, 1e300] {
            let err = w.div(&lit(x), &lit(0.0)).unwrap_err();
            assert!(matches!(err, VmError::DivisionByZero { .. }), "x = {x}");
        }
        assert!(w.div(&lit(1.0), &lit(-0.0)).is_err());
    }

    #[test]
    fn test_vm_overflow_is_reported() {
        let w = workarea();
        let err = w.mult(&lit(1e308), &lit(10.0)).unwrap_err();
        assert!(matches!(err, VmError::NonFinite { op: "mult", .. }));
    }

    #[test]
    fn test_vm_resolve_variable() {
        let w = workarea();
        assert_eq!(w.resolve_variable("var1"), Ok(5.0));
        assert_eq!(w.resolve_variable("nose.w"), Ok(10.0));
        assert_eq!(w.resolve_variable("nose.h"), Ok(20.0));
    }

    #[test]
    fn test_vm_lookup_failures() {
        let w = workarea();
        let err = w.resolve_variable("missing").unwrap_err();
        assert_eq!(err, VmError::UndefinedVariable("missing".into()));
        assert!(err.is_lookup());
        let err = w.resolve_variable("eye.w").unwrap_err();
        assert_eq!(err, VmError::UndefinedRegion("eye".into()));
    }

    #[test]
    fn test_vm_set_variable() {
        let mut w = Workarea::default();
        assert_eq!(w.set_variable("new_var", &lit(100.0)), Ok(100.0));
        assert_eq!(w.variables["new_var"], 100.0);
    }

    #[test]
    fn test_execute_stores_result() {
        let mut w = workarea();
        let step = Op::Binary {
            op: BinaryOp::Div,
            lhs: name("nose.h"),
            rhs: name("nose.w"),
        };
        assert_eq!(w.execute(&step), Ok(Some(2.0)));
        assert_eq!(w.resolve_variable(RESULT_VARIABLE), Ok(2.0));
        assert_eq!(w.execute(&Op::Angle(0.0)), Ok(None));
    }
}
