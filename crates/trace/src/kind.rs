//! # Primitive Kinds and Constant Values
//!
//! Every trace value and every low-level slot carries one of six primitive
//! kinds. Constants are stored inline as [`Value`]s and never occupy a slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive kind of a trace value or slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Int,
    Float,
    Long,
    Double,
    Reference,
    Void,
}

impl Kind {
    /// All kinds, in pool order.
    pub const ALL: [Kind; 6] = [
        Kind::Int,
        Kind::Float,
        Kind::Long,
        Kind::Double,
        Kind::Reference,
        Kind::Void,
    ];

    /// Dense index used to address per-kind tables
    pub fn index(self) -> usize {
        match self {
            Kind::Int => 0,
            Kind::Float => 1,
            Kind::Long => 2,
            Kind::Double => 3,
            Kind::Reference => 4,
            Kind::Void => 5,
        }
    }

    /// Longs and doubles occupy two interpreter local-variable slots.
    pub fn is_category2(self) -> bool {
        matches!(self, Kind::Long | Kind::Double)
    }

    /// Single-character prefix used when printing slots (`i3`, `r0`, ...)
    pub fn prefix(self) -> char {
        match self {
            Kind::Int => 'i',
            Kind::Float => 'f',
            Kind::Long => 'l',
            Kind::Double => 'd',
            Kind::Reference => 'r',
            Kind::Void => 'v',
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Long => "long",
            Kind::Double => "double",
            Kind::Reference => "reference",
            Kind::Void => "void",
        };
        f.write_str(name)
    }
}

/// A constant value embedded in a trace or used as an immediate operand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    /// Opaque handle of a heap object captured by the recorder
    Object(u64),
    /// Identity of a guard site; handed to the bailout stub on guard failure
    GuardSite(u32),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Int(_) => Kind::Int,
            Value::Long(_) => Kind::Long,
            Value::Float(_) => Kind::Float,
            Value::Double(_) => Kind::Double,
            Value::Null | Value::Object(_) | Value::GuardSite(_) => Kind::Reference,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{}f", v),
            Value::Double(v) => write!(f, "{}d", v),
            Value::Null => f.write_str("null"),
            Value::Object(handle) => write!(f, "@{:#x}", handle),
            Value::GuardSite(site) => write!(f, "guard#{}", site),
        }
    }
}

/// Comparison performed by a guard or a conditional branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl Comparator {
    /// Negation of `self` for ordered operands. Float and double
    /// comparisons involving NaN are unordered and satisfy neither `self` nor
    /// its complement, except `NotEqual`; guards on such values must not rely
    /// on the complement to catch NaN.
    pub fn complement(self) -> Comparator {
        match self {
            Comparator::Equal => Comparator::NotEqual,
            Comparator::NotEqual => Comparator::Equal,
            Comparator::LessThan => Comparator::GreaterEqual,
            Comparator::LessEqual => Comparator::GreaterThan,
            Comparator::GreaterThan => Comparator::LessEqual,
            Comparator::GreaterEqual => Comparator::LessThan,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
            Comparator::LessThan => "<",
            Comparator::LessEqual => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterEqual => ">=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
