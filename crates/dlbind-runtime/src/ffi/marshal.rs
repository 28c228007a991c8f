//! Scalar marshaling - native memory ↔ `Value` conversions
//!
//! - `read_scalar()`: copy a value of a declared type out of native memory
//! - `write_scalar()`: store a value of a declared type into native memory
//! - `decode_word()`: reinterpret a raw native result word, with the same
//!   width/kind rules as `read_scalar()`
//!
//! # Memory Safety
//!
//! Addresses are never validated: a wrong address or a descriptor that does
//! not match the native object is undefined behavior, which is why the
//! memory-touching entry points are `unsafe`.
//!
//! Strings written into native memory are NUL-terminated copies owned by a
//! `MarshalContext`; they stay allocated until the context is dropped.

use crate::ffi::error::MarshalError;
use crate::ffi::types::{Address, IntType, IntWidth, TypeDescriptor, TypedView, Value};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;

/// Owner of NUL-terminated copies handed to native code
///
/// # Example
///
/// ```
/// # use dlbind_runtime::ffi::MarshalContext;
/// let mut ctx = MarshalContext::new();
/// let ptr = ctx.alloc_string("hello").unwrap();
/// assert!(!ptr.is_null());
/// assert_eq!(ctx.len(), 1);
/// // the copy is released when ctx drops
/// ```
#[derive(Debug, Default)]
pub struct MarshalContext {
    /// Track allocated C strings for cleanup
    allocated_strings: Vec<CString>,
}

impl MarshalContext {
    /// Create a new marshal context
    pub fn new() -> Self {
        Self {
            allocated_strings: Vec::new(),
        }
    }

    /// Copy `s` into a fresh NUL-terminated buffer owned by this context
    pub fn alloc_string(&mut self, s: &str) -> Result<*const c_char, MarshalError> {
        let c_string = CString::new(s).map_err(|e| {
            MarshalError::InvalidString(format!("String contains null byte: {}", e))
        })?;

        // The heap buffer does not move when the CString moves into the vec
        let ptr = c_string.as_ptr();
        self.allocated_strings.push(c_string);
        Ok(ptr)
    }

    /// Number of strings currently kept alive
    pub fn len(&self) -> usize {
        self.allocated_strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocated_strings.is_empty()
    }
}

/// Build the value for integer `bits` of type `ty`, truncating to its width
pub(crate) fn int_value(bits: u64, ty: IntType) -> Value {
    match (ty.width, ty.signed) {
        (IntWidth::W8, true) => Value::I8(bits as u8 as i8),
        (IntWidth::W16, true) => Value::I16(bits as u16 as i16),
        (IntWidth::W32, true) => Value::I32(bits as u32 as i32),
        (IntWidth::W64, true) => Value::I64(bits as i64),
        (IntWidth::W8, false) => Value::U8(bits as u8),
        (IntWidth::W16, false) => Value::U16(bits as u16),
        (IntWidth::W32, false) => Value::U32(bits as u32),
        (IntWidth::W64, false) => Value::U64(bits),
    }
}

fn mismatch(ty: &TypeDescriptor, value: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        expected: ty.display_name(),
        got: value.kind_name().to_string(),
    }
}

fn unsupported(ty: &TypeDescriptor) -> MarshalError {
    MarshalError::UnsupportedType(ty.display_name())
}

/// Decode a NUL-terminated string; null decodes to the empty string
unsafe fn c_string(ptr: *const c_char) -> Result<String, MarshalError> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_owned)
        .map_err(|e| MarshalError::InvalidString(format!("Invalid UTF-8: {}", e)))
}

/// Decode a NUL-terminated call result, replacing invalid UTF-8
///
/// The call has already run by the time its result is decoded, so a bad
/// byte sequence must not turn it into an error.
unsafe fn c_string_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

unsafe fn read_int(ptr: *const c_void, ty: IntType) -> Value {
    let bits = match ty.width {
        IntWidth::W8 => ptr::read_unaligned(ptr as *const u8) as u64,
        IntWidth::W16 => ptr::read_unaligned(ptr as *const u16) as u64,
        IntWidth::W32 => ptr::read_unaligned(ptr as *const u32) as u64,
        IntWidth::W64 => ptr::read_unaligned(ptr as *const u64),
    };
    int_value(bits, ty)
}

unsafe fn write_int(ptr: *mut c_void, width: IntWidth, bits: u64) {
    match width {
        IntWidth::W8 => ptr::write_unaligned(ptr as *mut u8, bits as u8),
        IntWidth::W16 => ptr::write_unaligned(ptr as *mut u16, bits as u16),
        IntWidth::W32 => ptr::write_unaligned(ptr as *mut u32, bits as u32),
        IntWidth::W64 => ptr::write_unaligned(ptr as *mut u64, bits),
    }
}

/// Read a value of type `ty` stored at `address`
///
/// - integers: exact width, sign- or zero-extended into the matching `Value`
/// - floats: the IEEE-754 bit pattern, unchanged
/// - `Word` / `Opaque`: the address-sized value stored there
/// - `View(T)`: a view aliasing `address` itself (no copy)
/// - `CString`: the `char *` stored there, decoded up to its NUL
///
/// # Safety
///
/// `address` must be valid for reads of `ty` (and, for `CString`, point to a
/// valid `char *` that is null or NUL-terminated).
///
/// # Examples
///
/// ```
/// # use dlbind_runtime::ffi::{marshal, Address, TypeDescriptor, Value};
/// let mut slot: i16 = -2;
/// let value = unsafe { marshal::read_scalar(Address::of(&mut slot), &TypeDescriptor::i16()) };
/// assert_eq!(value, Ok(Value::I16(-2)));
/// ```
pub unsafe fn read_scalar(address: Address, ty: &TypeDescriptor) -> Result<Value, MarshalError> {
    let ptr = address.as_ptr();
    match ty {
        TypeDescriptor::Int(t) => Ok(read_int(ptr, *t)),
        TypeDescriptor::Float32 => Ok(Value::F32(f32::from_bits(ptr::read_unaligned(
            ptr as *const u32,
        )))),
        TypeDescriptor::Float64 => Ok(Value::F64(f64::from_bits(ptr::read_unaligned(
            ptr as *const u64,
        )))),
        TypeDescriptor::Word => Ok(Value::Word(ptr::read_unaligned(ptr as *const usize))),
        TypeDescriptor::Opaque => {
            let stored = ptr::read_unaligned(ptr as *const *mut c_void);
            Ok(Address::new(stored).map_or(Value::Null, Value::Pointer))
        }
        TypeDescriptor::View(pointee) => {
            Ok(Value::View(TypedView::new(address, (**pointee).clone())))
        }
        TypeDescriptor::CString => {
            let stored = ptr::read_unaligned(ptr as *const *const c_char);
            c_string(stored).map(Value::Str)
        }
        TypeDescriptor::Bytes | TypeDescriptor::Function(_) => Err(unsupported(ty)),
    }
}

/// Write `value` as type `ty` at `address`
///
/// Integers accept any integer value and are truncated to the declared
/// width. Floats require the matching float value. `CString` stores a
/// pointer to a NUL-terminated copy owned by `ctx`; `Value::Null` stores a
/// null pointer. Writing through `View(T)` stores a `T` at `address`.
///
/// # Safety
///
/// `address` must be valid for writes of `ty`, and `ctx` must outlive every
/// native use of strings written through it.
pub unsafe fn write_scalar(
    address: Address,
    ty: &TypeDescriptor,
    value: &Value,
    ctx: &mut MarshalContext,
) -> Result<(), MarshalError> {
    let ptr = address.as_ptr();
    match ty {
        TypeDescriptor::Int(t) => {
            let bits = value.int_bits().ok_or_else(|| mismatch(ty, value))?;
            write_int(ptr, t.width, bits);
        }
        TypeDescriptor::Float32 => match value {
            Value::F32(f) => ptr::write_unaligned(ptr as *mut u32, f.to_bits()),
            _ => return Err(mismatch(ty, value)),
        },
        TypeDescriptor::Float64 => match value {
            Value::F64(f) => ptr::write_unaligned(ptr as *mut u64, f.to_bits()),
            _ => return Err(mismatch(ty, value)),
        },
        TypeDescriptor::Word => {
            let bits = value.int_bits().ok_or_else(|| mismatch(ty, value))?;
            ptr::write_unaligned(ptr as *mut usize, bits as usize);
        }
        TypeDescriptor::Opaque => {
            let addr = value.pointer_bits().ok_or_else(|| mismatch(ty, value))?;
            ptr::write_unaligned(ptr as *mut *mut c_void, addr as *mut c_void);
        }
        TypeDescriptor::View(pointee) => return write_scalar(address, pointee, value, ctx),
        TypeDescriptor::CString => {
            let stored = match value {
                Value::Str(s) => ctx.alloc_string(s)?,
                Value::Null => ptr::null(),
                _ => return Err(mismatch(ty, value)),
            };
            ptr::write_unaligned(ptr as *mut *const c_char, stored);
        }
        TypeDescriptor::Bytes | TypeDescriptor::Function(_) => return Err(unsupported(ty)),
    }
    Ok(())
}

/// Reinterpret a raw native result word as type `ty`
///
/// Integer results are truncated to the declared width first, so whatever
/// the callee left in the upper bits of the register is ignored. `View(T)`
/// yields a view at the returned address, except `View(CString)`, which is
/// the nullable string: null decodes to `Value::Null`, anything else to the
/// decoded text. A plain `CString` result decodes null to the empty string.
/// Invalid UTF-8 in a string result is replaced with U+FFFD.
///
/// # Safety
///
/// For string results, the word must be null or point to a NUL-terminated
/// string.
pub unsafe fn decode_word(word: u64, ty: &TypeDescriptor) -> Result<Value, MarshalError> {
    let addr = word as usize;
    match ty {
        TypeDescriptor::Int(t) => Ok(int_value(word, *t)),
        TypeDescriptor::Float32 => Ok(Value::F32(f32::from_bits(word as u32))),
        TypeDescriptor::Float64 => Ok(Value::F64(f64::from_bits(word))),
        TypeDescriptor::Word => Ok(Value::Word(addr)),
        TypeDescriptor::Opaque => Ok(Address::from_usize(addr).map_or(Value::Null, Value::Pointer)),
        TypeDescriptor::View(pointee) => match Address::from_usize(addr) {
            None => Ok(Value::Null),
            Some(_) if **pointee == TypeDescriptor::CString => {
                Ok(Value::Str(c_string_lossy(addr as *const c_char)))
            }
            Some(target) => Ok(Value::View(TypedView::new(target, (**pointee).clone()))),
        },
        TypeDescriptor::CString => Ok(Value::Str(c_string_lossy(addr as *const c_char))),
        TypeDescriptor::Bytes | TypeDescriptor::Function(_) => Err(unsupported(ty)),
    }
}
