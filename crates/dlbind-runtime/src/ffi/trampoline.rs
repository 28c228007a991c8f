//! Native Call Trampoline - executes a call plan against a raw address
//!
//! Argument placement is delegated to libffi, which implements the target's
//! calling convention (register files, spill order, stack alignment). Before
//! dispatch the plan is run through `abi::assign_locations()` so the stack
//! limit is enforced identically on every target.
//!
//! Variadic tails receive the C default argument promotions: `float` travels
//! as `double`, and 8/16-bit integers travel as `int`.

use crate::ffi::abi;
use crate::ffi::plan::{ArgSlot, CallPlan, ReturnClass, SlotClass};
use crate::ffi::types::Address;
use libffi::middle::{Arg, Cif, CodePtr, Type};
use std::os::raw::c_void;
use thiserror::Error;

/// Catastrophic failure raised by the trampoline itself
///
/// Never returned to callers of a bound function: the adapter turns it into
/// a panic, since the call cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrampolineFault {
    #[error("maximum number of stack arguments reached ({0})")]
    StackLimit(usize),
}

/// Raw native result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawResult {
    /// Result register contents, `None` for void functions
    pub word: Option<u64>,
    pub class: ReturnClass,
}

/// A slot payload at its native width
#[derive(Debug, Clone, Copy)]
enum NativeScalar {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
}

/// Payload bits above `bits` are set only when the value was sign-extended
fn sign_extended(payload: u64, bits: u32) -> bool {
    payload >> bits != 0
}

impl NativeScalar {
    fn from_slot(slot: &ArgSlot) -> Self {
        let p = slot.payload;
        match slot.class {
            SlotClass::Int8 if sign_extended(p, 8) => NativeScalar::I8(p as i8),
            SlotClass::Int8 => NativeScalar::U8(p as u8),
            SlotClass::Int16 if sign_extended(p, 16) => NativeScalar::I16(p as i16),
            SlotClass::Int16 => NativeScalar::U16(p as u16),
            SlotClass::Int32 if sign_extended(p, 32) => NativeScalar::I32(p as i32),
            SlotClass::Int32 => NativeScalar::U32(p as u32),
            SlotClass::Int64 => NativeScalar::U64(p),
            SlotClass::Float32 => NativeScalar::F32(f32::from_bits(p as u32)),
            SlotClass::Float64 => NativeScalar::F64(f64::from_bits(p)),
            SlotClass::Pointer => NativeScalar::Ptr(p as usize as *mut c_void),
        }
    }

    /// C default argument promotions
    fn promoted(self) -> Self {
        match self {
            NativeScalar::I8(v) => NativeScalar::I32(v as i32),
            NativeScalar::U8(v) => NativeScalar::I32(v as i32),
            NativeScalar::I16(v) => NativeScalar::I32(v as i32),
            NativeScalar::U16(v) => NativeScalar::I32(v as i32),
            NativeScalar::F32(v) => NativeScalar::F64(v as f64),
            other => other,
        }
    }

    fn ffi_type(&self) -> Type {
        match self {
            NativeScalar::I8(_) => Type::i8(),
            NativeScalar::U8(_) => Type::u8(),
            NativeScalar::I16(_) => Type::i16(),
            NativeScalar::U16(_) => Type::u16(),
            NativeScalar::I32(_) => Type::i32(),
            NativeScalar::U32(_) => Type::u32(),
            NativeScalar::U64(_) => Type::u64(),
            NativeScalar::F32(_) => Type::f32(),
            NativeScalar::F64(_) => Type::f64(),
            NativeScalar::Ptr(_) => Type::pointer(),
        }
    }

    fn arg(&self) -> Arg<'_> {
        match self {
            NativeScalar::I8(v) => Arg::new(v),
            NativeScalar::U8(v) => Arg::new(v),
            NativeScalar::I16(v) => Arg::new(v),
            NativeScalar::U16(v) => Arg::new(v),
            NativeScalar::I32(v) => Arg::new(v),
            NativeScalar::U32(v) => Arg::new(v),
            NativeScalar::U64(v) => Arg::new(v),
            NativeScalar::F32(v) => Arg::new(v),
            NativeScalar::F64(v) => Arg::new(v),
            NativeScalar::Ptr(v) => Arg::new(v),
        }
    }
}

fn return_type(class: ReturnClass) -> Type {
    match class {
        ReturnClass::Void => Type::void(),
        ReturnClass::Slot(SlotClass::Int8) => Type::u8(),
        ReturnClass::Slot(SlotClass::Int16) => Type::u16(),
        ReturnClass::Slot(SlotClass::Int32) => Type::u32(),
        ReturnClass::Slot(SlotClass::Int64) => Type::u64(),
        ReturnClass::Slot(SlotClass::Float32) => Type::f32(),
        ReturnClass::Slot(SlotClass::Float64) => Type::f64(),
        ReturnClass::Slot(SlotClass::Pointer) => Type::pointer(),
    }
}

/// Call the function at `address` with the plan's arguments
///
/// Returns the raw result register contents; decoding them is left to the
/// caller (`marshal::decode_word`). Narrow integer results come back
/// zero-extended to a full word.
///
/// # Safety
///
/// `address` must be a function whose native signature matches the plan's
/// slot classes and return class, and every pointer slot must satisfy the
/// callee's expectations. Nothing here can detect a mismatch.
pub unsafe fn invoke(address: Address, plan: &CallPlan) -> Result<RawResult, TrampolineFault> {
    let layout = abi::native();
    let locations = abi::assign_locations(layout, &plan.slots, plan.fixed_count)?;

    tracing::trace!(
        address = ?address,
        abi = layout.name,
        args = plan.len(),
        stack = abi::stack_slots(&locations),
        "native call"
    );

    let values: Vec<NativeScalar> = plan
        .slots
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            let value = NativeScalar::from_slot(slot);
            if index >= plan.fixed_count {
                value.promoted()
            } else {
                value
            }
        })
        .collect();

    let types = values.iter().map(NativeScalar::ffi_type);
    let result = return_type(plan.return_class);
    let cif = if plan.variadic {
        Cif::new_variadic(types, plan.fixed_count, result)
    } else {
        Cif::new(types, result)
    };

    let args: Vec<Arg> = values.iter().map(NativeScalar::arg).collect();
    let code = CodePtr::from_ptr(address.as_ptr() as *const c_void);

    let word = match plan.return_class {
        ReturnClass::Void => {
            cif.call::<()>(code, &args);
            None
        }
        ReturnClass::Slot(SlotClass::Int64) => Some(cif.call::<u64>(code, &args)),
        ReturnClass::Slot(SlotClass::Float32) => {
            Some(cif.call::<f32>(code, &args).to_bits() as u64)
        }
        ReturnClass::Slot(SlotClass::Float64) => Some(cif.call::<f64>(code, &args).to_bits()),
        // libffi widens narrow integer results to a full register
        ReturnClass::Slot(_) => Some(cif.call::<usize>(code, &args) as u64),
    };

    Ok(RawResult {
        word,
        class: plan.return_class,
    })
}
