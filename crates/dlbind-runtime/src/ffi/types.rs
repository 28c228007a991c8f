//! FFI type system - descriptors and values at the native boundary
//!
//! Defines:
//! - `TypeDescriptor`: the declared shape of a symbol, parameter or result
//! - `FunctionSignature`: ordered parameters, variadic marker, return list
//! - `Value`: caller-side representation of native values
//! - `Address` / `TypedView`: non-owning references into native memory
//!
//! Type mapping:
//! - TypeDescriptor::Int(i32)  ↔ Value::I32
//! - TypeDescriptor::Float64   ↔ Value::F64
//! - TypeDescriptor::Word      ↔ Value::Word(usize)
//! - TypeDescriptor::Opaque    ↔ Value::Pointer / Value::Null
//! - TypeDescriptor::View(T)   ↔ Value::View(TypedView)
//! - TypeDescriptor::CString   ↔ Value::Str
//! - TypeDescriptor::Bytes     ↔ Value::Bytes (arguments only)

use crate::ffi::error::{BindError, MarshalError};
use crate::ffi::marshal::{self, MarshalContext};
use std::fmt;
use std::mem::size_of;
use std::os::raw::{c_char, c_int, c_long, c_void};
use std::ptr::NonNull;

/// Integer storage width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    /// Pointer / general-purpose register width
    pub const WORD: IntWidth = IntWidth::of_bytes(size_of::<usize>());

    /// Width of the native C `long` (32-bit on Windows, word-sized elsewhere)
    pub const LONG: IntWidth = IntWidth::of_bytes(size_of::<c_long>());

    /// Width of the native C `int`
    pub const INT: IntWidth = IntWidth::of_bytes(size_of::<c_int>());

    const fn of_bytes(bytes: usize) -> IntWidth {
        match bytes {
            1 => IntWidth::W8,
            2 => IntWidth::W16,
            4 => IntWidth::W32,
            _ => IntWidth::W64,
        }
    }

    /// Size in bytes
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }

    /// Size in bits
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// Integer type: width plus signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntType {
    pub width: IntWidth,
    pub signed: bool,
}

impl IntType {
    /// Truncate `bits` to this width, then sign- or zero-extend back to 64 bits
    pub fn extend(self, bits: u64) -> u64 {
        let shift = 64 - self.width.bits();
        if shift == 0 {
            bits
        } else if self.signed {
            (((bits << shift) as i64) >> shift) as u64
        } else {
            (bits << shift) >> shift
        }
    }
}

/// Declared shape of a native value
///
/// A closed set: every marshaling path matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// Fixed-width integer
    Int(IntType),
    /// IEEE-754 single precision
    Float32,
    /// IEEE-754 double precision
    Float64,
    /// Pointer-sized unsigned integer (`uintptr_t`)
    Word,
    /// Untyped pointer (`void *`)
    Opaque,
    /// Typed pointer: a non-owning view of a `T` in native memory
    View(Box<TypeDescriptor>),
    /// NUL-terminated, read-only string (`const char *`)
    CString,
    /// Caller-owned mutable byte buffer, passed as a pointer to its first byte
    Bytes,
    /// Function signature
    Function(Box<FunctionSignature>),
}

impl TypeDescriptor {
    pub fn int(width: IntWidth, signed: bool) -> Self {
        TypeDescriptor::Int(IntType { width, signed })
    }

    pub fn i8() -> Self {
        Self::int(IntWidth::W8, true)
    }

    pub fn i16() -> Self {
        Self::int(IntWidth::W16, true)
    }

    pub fn i32() -> Self {
        Self::int(IntWidth::W32, true)
    }

    pub fn i64() -> Self {
        Self::int(IntWidth::W64, true)
    }

    pub fn u8() -> Self {
        Self::int(IntWidth::W8, false)
    }

    pub fn u16() -> Self {
        Self::int(IntWidth::W16, false)
    }

    pub fn u32() -> Self {
        Self::int(IntWidth::W32, false)
    }

    pub fn u64() -> Self {
        Self::int(IntWidth::W64, false)
    }

    /// C `char`, with the platform's signedness
    pub fn c_char() -> Self {
        Self::int(IntWidth::W8, c_char::MIN != 0)
    }

    /// C `int`
    pub fn c_int() -> Self {
        Self::int(IntWidth::INT, true)
    }

    /// C `long`, sized by `IntWidth::LONG`
    pub fn c_long() -> Self {
        Self::int(IntWidth::LONG, true)
    }

    /// C `unsigned long`, sized by `IntWidth::LONG`
    pub fn c_ulong() -> Self {
        Self::int(IntWidth::LONG, false)
    }

    pub fn f32() -> Self {
        TypeDescriptor::Float32
    }

    pub fn f64() -> Self {
        TypeDescriptor::Float64
    }

    pub fn view(pointee: TypeDescriptor) -> Self {
        TypeDescriptor::View(Box::new(pointee))
    }

    pub fn function(signature: FunctionSignature) -> Self {
        TypeDescriptor::Function(Box::new(signature))
    }

    /// Get a display name for this descriptor
    pub fn display_name(&self) -> String {
        match self {
            TypeDescriptor::Int(t) => {
                format!("{}{}", if t.signed { "int" } else { "uint" }, t.width.bits())
            }
            TypeDescriptor::Float32 => "float32".to_string(),
            TypeDescriptor::Float64 => "float64".to_string(),
            TypeDescriptor::Word => "uintptr".to_string(),
            TypeDescriptor::Opaque => "pointer".to_string(),
            TypeDescriptor::View(inner) => format!("*{}", inner.display_name()),
            TypeDescriptor::CString => "cstring".to_string(),
            TypeDescriptor::Bytes => "bytes".to_string(),
            TypeDescriptor::Function(sig) => sig.to_string(),
        }
    }

    /// Check if a value can be passed where this descriptor is declared
    ///
    /// # Examples
    ///
    /// ```
    /// # use dlbind_runtime::ffi::{TypeDescriptor, Value};
    /// assert!(TypeDescriptor::i32().accepts(&Value::I64(7)));
    /// assert!(TypeDescriptor::CString.accepts(&Value::Str("x".into())));
    /// assert!(!TypeDescriptor::Float64.accepts(&Value::F32(1.0)));
    /// ```
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            TypeDescriptor::Int(_) | TypeDescriptor::Word => value.int_bits().is_some(),
            TypeDescriptor::Float32 => matches!(value, Value::F32(_)),
            TypeDescriptor::Float64 => matches!(value, Value::F64(_)),
            TypeDescriptor::Opaque | TypeDescriptor::View(_) => value.pointer_bits().is_some(),
            TypeDescriptor::CString => matches!(value, Value::Str(_) | Value::Null),
            TypeDescriptor::Bytes => matches!(value, Value::Bytes(_) | Value::Null),
            TypeDescriptor::Function(_) => false,
        }
    }

    /// Whether this descriptor can be passed as a native argument
    pub fn is_passable(&self) -> bool {
        !matches!(self, TypeDescriptor::Function(_))
    }

    /// Whether a native result can be decoded as this descriptor
    pub fn is_returnable(&self) -> bool {
        !matches!(self, TypeDescriptor::Bytes | TypeDescriptor::Function(_))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Declared native function type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FunctionSignature {
    /// Fixed parameters, in order
    pub params: Vec<TypeDescriptor>,
    /// Trailing variadic parameter (`...`)
    pub variadic: bool,
    /// Declared results; native functions allow at most one
    pub returns: Vec<TypeDescriptor>,
}

impl FunctionSignature {
    /// Create a signature with the given fixed parameters and no result
    pub fn new(params: Vec<TypeDescriptor>) -> Self {
        Self {
            params,
            variadic: false,
            returns: Vec::new(),
        }
    }

    /// Mark the signature as ending in `...`
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Append a result type
    pub fn returning(mut self, ty: TypeDescriptor) -> Self {
        self.returns.push(ty);
        self
    }

    /// The single result type, if any
    pub fn return_type(&self) -> Option<&TypeDescriptor> {
        self.returns.first()
    }

    /// Number of fixed (non-variadic) parameters
    pub fn fixed_count(&self) -> usize {
        self.params.len()
    }

    /// Check that the signature has a native equivalent
    pub fn validate(&self) -> Result<(), BindError> {
        if self.returns.len() > 1 {
            return Err(BindError::MultipleReturns(self.returns.len()));
        }
        if let Some((index, ty)) = self
            .params
            .iter()
            .enumerate()
            .find(|(_, ty)| !ty.is_passable())
        {
            return Err(BindError::UnsupportedParameter {
                index,
                ty: ty.display_name(),
            });
        }
        if let Some(ty) = self.returns.iter().find(|ty| !ty.is_returnable()) {
            return Err(BindError::UnsupportedReturn(ty.display_name()));
        }
        Ok(())
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<String> = self.params.iter().map(|t| t.display_name()).collect();
        if self.variadic {
            params.push("...".to_string());
        }
        write!(f, "fn({})", params.join(", "))?;
        match self.returns.as_slice() {
            [] => Ok(()),
            [one] => write!(f, " -> {}", one),
            many => {
                let names: Vec<String> = many.iter().map(|t| t.display_name()).collect();
                write!(f, " -> ({})", names.join(", "))
            }
        }
    }
}

/// Non-null raw address in native memory
///
/// Non-owning. An address resolved from a library is only valid while that
/// library stays open; this is a caller contract and is never checked.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(NonNull<c_void>);

/// Address of a resolved symbol
pub type SymbolAddress = Address;

// Safety: Address is a plain number; dereferencing it is always unsafe
unsafe impl Send for Address {}
unsafe impl Sync for Address {}

impl Address {
    /// Wrap a raw pointer, `None` when null
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Address)
    }

    /// Address of a local value
    pub fn of<T>(value: &mut T) -> Self {
        Address(NonNull::from(value).cast())
    }

    pub fn from_usize(addr: usize) -> Option<Self> {
        Self::new(addr as *mut c_void)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    pub fn as_usize(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.as_usize())
    }
}

/// Non-owning typed alias of native memory
///
/// Reads and writes go straight to `address`; nothing is copied at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedView {
    address: Address,
    pointee: TypeDescriptor,
}

impl TypedView {
    pub fn new(address: Address, pointee: TypeDescriptor) -> Self {
        Self { address, pointee }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn pointee(&self) -> &TypeDescriptor {
        &self.pointee
    }

    /// Copy the current pointee value out of native memory
    ///
    /// # Safety
    ///
    /// `address` must still be valid for reads of the pointee type.
    pub unsafe fn read(&self) -> Result<Value, MarshalError> {
        marshal::read_scalar(self.address, &self.pointee)
    }

    /// Store `value` into native memory
    ///
    /// # Safety
    ///
    /// `address` must still be valid for writes of the pointee type.
    pub unsafe fn write(&self, value: &Value, ctx: &mut MarshalContext) -> Result<(), MarshalError> {
        marshal::write_scalar(self.address, &self.pointee, value, ctx)
    }
}

/// Caller-side value crossing the native boundary
#[derive(Debug, Clone)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Pointer-sized integer
    Word(usize),
    /// Non-null untyped pointer
    Pointer(Address),
    /// Typed view of native memory
    View(TypedView),
    /// Owned string; copied into a NUL-terminated buffer when passed
    Str(String),
    /// Byte buffer; native writes land back in the vector
    Bytes(Vec<u8>),
    /// Variadic tail; flattened into one argument per element
    Sequence(Vec<Value>),
    /// Null pointer
    Null,
}

// Manual PartialEq: floats compare by bit pattern so NaN and -0.0 round-trip
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Word(a), Value::Word(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::View(a), Value::View(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Value {
    /// Get the kind name of this value
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Word(_) => "word",
            Value::Pointer(_) => "pointer",
            Value::View(_) => "view",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Sequence(_) => "sequence",
            Value::Null => "null",
        }
    }

    /// Integer payload widened to 64 bits by the value's own signedness
    pub fn int_bits(&self) -> Option<u64> {
        match self {
            Value::I8(v) => Some(*v as i64 as u64),
            Value::I16(v) => Some(*v as i64 as u64),
            Value::I32(v) => Some(*v as i64 as u64),
            Value::I64(v) => Some(*v as u64),
            Value::U8(v) => Some(*v as u64),
            Value::U16(v) => Some(*v as u64),
            Value::U32(v) => Some(*v as u64),
            Value::U64(v) => Some(*v),
            Value::Word(v) => Some(*v as u64),
            _ => None,
        }
    }

    /// Address carried by pointer-like values (null is zero)
    pub fn pointer_bits(&self) -> Option<usize> {
        match self {
            Value::Pointer(addr) => Some(addr.as_usize()),
            Value::View(view) => Some(view.address().as_usize()),
            Value::Word(w) => Some(*w),
            Value::Null => Some(0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(_) | Value::I16(_) | Value::I32(_) | Value::I64(_) => {
                self.int_bits().map(|b| b as i64)
            }
            Value::U8(_) | Value::U16(_) | Value::U32(_) => self.int_bits().map(|b| b as i64),
            Value::U64(v) => i64::try_from(*v).ok(),
            Value::Word(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_view(&self) -> Option<&TypedView> {
        match self {
            Value::View(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}
