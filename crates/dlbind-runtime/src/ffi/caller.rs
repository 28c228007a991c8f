//! Typed Function Adapter - native functions as callable values
//!
//! `bind()` wraps a validated signature around a symbol address once; each
//! `CallableValue::invoke()` then runs:
//!
//! 1. argument planning (`plan`), which also synthesizes C strings
//! 2. the foreign call (`trampoline`)
//! 3. result decoding (`marshal::decode_word`)
//!
//! A `CallableValue` holds no mutable state, so clones of it may be invoked
//! from any number of threads at once.

use crate::ffi::error::{BindError, CallError};
use crate::ffi::marshal;
use crate::ffi::plan;
use crate::ffi::trampoline;
use crate::ffi::types::{Address, FunctionSignature, Value};
use std::os::raw::c_void;
use std::sync::Arc;

/// Bound native function
///
/// Stores the function address and its validated signature.
#[derive(Debug, Clone)]
pub struct CallableValue {
    address: Address,
    signature: Arc<FunctionSignature>,
}

/// Bind `signature` to the function at `address`
///
/// The signature is validated here, once: more than one result, or a
/// parameter/result kind with no native representation, fails before any
/// foreign call can happen.
///
/// # Safety
///
/// The caller must ensure:
/// - `address` points to a function whose native signature matches `signature`
/// - The function stays loaded for as long as the returned value is invoked
pub unsafe fn bind(
    signature: FunctionSignature,
    address: Address,
) -> Result<CallableValue, BindError> {
    signature.validate()?;
    tracing::debug!(signature = %signature, address = ?address, "bound native function");
    Ok(CallableValue {
        address,
        signature: Arc::new(signature),
    })
}

/// Bind from a raw function pointer, rejecting null
///
/// # Safety
///
/// Same contract as `bind()`.
pub unsafe fn bind_raw(
    signature: FunctionSignature,
    fn_ptr: *const c_void,
) -> Result<CallableValue, BindError> {
    let address = Address::new(fn_ptr as *mut c_void).ok_or(BindError::NullAddress)?;
    bind(signature, address)
}

impl CallableValue {
    /// Call the native function
    ///
    /// Returns `Ok(None)` for functions without a result. Argument errors
    /// (arity, kind mismatches, strings with NUL bytes) are reported before
    /// the foreign call. Byte-buffer arguments are passed by address, so the
    /// callee's writes are visible in `args` afterwards.
    ///
    /// # Panics
    ///
    /// Panics when the trampoline reports a fault, e.g. more stack arguments
    /// than it can place. The call is abandoned at that point.
    ///
    /// # Safety
    ///
    /// The bound function must still be loaded, and every pointer argument
    /// must be valid for what the callee does with it.
    pub unsafe fn invoke(&self, args: &mut [Value]) -> Result<Option<Value>, CallError> {
        let plan = plan::plan_arguments(&self.signature, args)?;

        let raw = match trampoline::invoke(self.address, &plan) {
            Ok(raw) => raw,
            Err(fault) => panic!("native call to {} failed: {}", self.signature, fault),
        };

        // Decode while the plan's strings are alive: the result may point into one
        let value = match (raw.word, self.signature.return_type()) {
            (Some(word), Some(ty)) => Some(marshal::decode_word(word, ty)?),
            _ => None,
        };
        drop(plan);

        Ok(value)
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Number of fixed parameters
    pub fn arity(&self) -> usize {
        self.signature.fixed_count()
    }

    pub fn is_variadic(&self) -> bool {
        self.signature.variadic
    }
}
