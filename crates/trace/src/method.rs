//! Method references and builtin operations referenced by traces.

use crate::kind::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a callee is entered. Determines the calling convention the code
/// generator has to use for the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalleeKind {
    /// Ordinary managed method
    Managed,
    /// Native (C function) method called from managed code
    NativeExit,
    /// Managed method only ever entered from native code
    VmEntry,
    /// Baseline-compiler template
    Template,
}

/// Reference to a method of the guest program
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub holder: String,
    pub name: String,
    pub params: Vec<Kind>,
    pub result: Kind,
    pub kind: CalleeKind,
}

impl MethodRef {
    pub fn new(holder: impl Into<String>, name: impl Into<String>, params: Vec<Kind>, result: Kind) -> Self {
        Self {
            holder: holder.into(),
            name: name.into(),
            params,
            result,
            kind: CalleeKind::Managed,
        }
    }

    pub fn with_kind(mut self, kind: CalleeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.holder, self.name)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.holder, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, "): {}", self.result)
    }
}

/// Operations the code generator implements inline, without a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    IntAdd,
    IntSub,
    IntMul,
    IntDiv,
    IntRem,
    IntAnd,
    IntOr,
    IntXor,
    IntShl,
    IntShr,
    IntNeg,
    LongAdd,
    LongSub,
    LongMul,
    LongNeg,
    FloatAdd,
    FloatSub,
    FloatMul,
    DoubleAdd,
    DoubleSub,
    DoubleMul,
    IntToLong,
    LongToInt,
    IntToDouble,
    DoubleToInt,
    ArrayLength,
    ReadInt,
    ReadReference,
    WriteInt,
    WriteReference,
}

impl Builtin {
    pub fn result_kind(self) -> Kind {
        use Builtin::*;
        match self {
            IntAdd | IntSub | IntMul | IntDiv | IntRem | IntAnd | IntOr | IntXor | IntShl | IntShr
            | IntNeg | LongToInt | DoubleToInt | ArrayLength | ReadInt => Kind::Int,
            LongAdd | LongSub | LongMul | LongNeg | IntToLong => Kind::Long,
            FloatAdd | FloatSub | FloatMul => Kind::Float,
            DoubleAdd | DoubleSub | DoubleMul | IntToDouble => Kind::Double,
            ReadReference => Kind::Reference,
            WriteInt | WriteReference => Kind::Void,
        }
    }

    /// Expected operand kinds, in order
    pub fn operand_kinds(self) -> &'static [Kind] {
        use Builtin::*;
        use Kind::*;
        match self {
            IntAdd | IntSub | IntMul | IntDiv | IntRem | IntAnd | IntOr | IntXor | IntShl | IntShr => &[Int, Int],
            IntNeg | IntToLong | IntToDouble => &[Int],
            LongAdd | LongSub | LongMul => &[Long, Long],
            LongNeg | LongToInt => &[Long],
            FloatAdd | FloatSub | FloatMul => &[Float, Float],
            DoubleAdd | DoubleSub | DoubleMul => &[Double, Double],
            DoubleToInt => &[Double],
            ArrayLength => &[Reference],
            ReadInt | ReadReference => &[Reference, Int],
            WriteInt => &[Reference, Int, Int],
            WriteReference => &[Reference, Int, Reference],
        }
    }

    pub fn arity(self) -> usize {
        self.operand_kinds().len()
    }

    pub fn name(self) -> &'static str {
        use Builtin::*;
        match self {
            IntAdd => "iadd",
            IntSub => "isub",
            IntMul => "imul",
            IntDiv => "idiv",
            IntRem => "irem",
            IntAnd => "iand",
            IntOr => "ior",
            IntXor => "ixor",
            IntShl => "ishl",
            IntShr => "ishr",
            IntNeg => "ineg",
            LongAdd => "ladd",
            LongSub => "lsub",
            LongMul => "lmul",
            LongNeg => "lneg",
            FloatAdd => "fadd",
            FloatSub => "fsub",
            FloatMul => "fmul",
            DoubleAdd => "dadd",
            DoubleSub => "dsub",
            DoubleMul => "dmul",
            IntToLong => "i2l",
            LongToInt => "l2i",
            IntToDouble => "i2d",
            DoubleToInt => "d2i",
            ArrayLength => "arraylength",
            ReadInt => "readint",
            ReadReference => "readref",
            WriteInt => "writeint",
            WriteReference => "writeref",
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
