//! Calling-convention selection.
//!
//! The lowering pass does not decide how arguments and results are passed; it
//! asks an [`AbiSelector`] and records the answer on every call it emits.

use crate::lir::RuntimeEntry;
use hotpath_trace::{CalleeKind, MethodRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallingConvention {
    /// Ordinary managed-to-managed call
    Managed,
    /// Managed code calling a native function
    NativeExit,
    /// Native code entering the VM
    VmEntry,
    /// Baseline-compiler template
    Template,
    /// Runtime stubs called from compiled traces
    Trace,
}

/// Chooses the calling convention for a callee
pub trait AbiSelector: Send + Sync {
    fn select(&self, method: &MethodRef) -> CallingConvention;

    fn runtime_convention(&self, _entry: RuntimeEntry) -> CallingConvention {
        CallingConvention::Trace
    }

    fn name(&self) -> &str {
        "custom"
    }
}

/// Default selection: one convention per callee kind
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardAbiSelector;

impl AbiSelector for StandardAbiSelector {
    fn select(&self, method: &MethodRef) -> CallingConvention {
        match method.kind {
            CalleeKind::VmEntry => CallingConvention::VmEntry,
            CalleeKind::NativeExit => CallingConvention::NativeExit,
            CalleeKind::Template => CallingConvention::Template,
            CalleeKind::Managed => CallingConvention::Managed,
        }
    }

    fn name(&self) -> &str {
        "standard"
    }
}
