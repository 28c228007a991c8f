//! Call Descriptor Builder - signature + values → flat call plan
//!
//! A `CallPlan` is the ABI-agnostic description of one foreign call: one
//! `ArgSlot` per native argument (a 64-bit payload plus its class) and the
//! class of the result. Plans are built fresh for every call and own the
//! C strings synthesized for their arguments, so those strings outlive the
//! foreign call and are released with the plan.
//!
//! Slot payloads hold integers already sign- or zero-extended to 64 bits and
//! floats as their IEEE-754 bit pattern. The class carries the storage width
//! and the register file, never the signedness.

use crate::ffi::error::{BindError, CallError};
use crate::ffi::marshal::MarshalContext;
use crate::ffi::types::{FunctionSignature, IntWidth, TypeDescriptor, Value};
use std::ops::BitOr;

/// Argument classification: storage width and register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotClass {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Pointer,
}

impl SlotClass {
    /// Integer class for a storage width
    pub fn for_width(width: IntWidth) -> Self {
        match width {
            IntWidth::W8 => SlotClass::Int8,
            IntWidth::W16 => SlotClass::Int16,
            IntWidth::W32 => SlotClass::Int32,
            IntWidth::W64 => SlotClass::Int64,
        }
    }

    /// Routed to the floating-point register file
    pub fn is_float(self) -> bool {
        matches!(self, SlotClass::Float32 | SlotClass::Float64)
    }

    pub fn flags(self) -> ClassFlags {
        match self {
            SlotClass::Int8 => ClassFlags::SIZE_8,
            SlotClass::Int16 => ClassFlags::SIZE_16,
            SlotClass::Int32 => ClassFlags::SIZE_32,
            SlotClass::Int64 => ClassFlags::SIZE_64,
            SlotClass::Float32 => ClassFlags::FLOAT | ClassFlags::SIZE_32,
            SlotClass::Float64 => ClassFlags::FLOAT | ClassFlags::SIZE_64,
            SlotClass::Pointer => ClassFlags::SIZE_PTR,
        }
    }
}

/// Classification bit set, one entry per argument plus one for the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClassFlags(u8);

impl ClassFlags {
    pub const NONE: ClassFlags = ClassFlags(0);
    pub const SIZE_8: ClassFlags = ClassFlags(1 << 0);
    pub const SIZE_16: ClassFlags = ClassFlags(1 << 1);
    pub const SIZE_32: ClassFlags = ClassFlags(1 << 2);
    pub const SIZE_64: ClassFlags = ClassFlags(1 << 3);
    pub const SIZE_PTR: ClassFlags = ClassFlags(1 << 4);
    pub const FLOAT: ClassFlags = ClassFlags(1 << 5);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ClassFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClassFlags {
    type Output = ClassFlags;

    fn bitor(self, rhs: ClassFlags) -> ClassFlags {
        ClassFlags(self.0 | rhs.0)
    }
}

/// One native argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSlot {
    pub payload: u64,
    pub class: SlotClass,
}

impl ArgSlot {
    pub fn new(payload: u64, class: SlotClass) -> Self {
        Self { payload, class }
    }

    fn pointer(addr: usize) -> Self {
        Self::new(addr as u64, SlotClass::Pointer)
    }
}

/// Result classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnClass {
    Void,
    Slot(SlotClass),
}

impl ReturnClass {
    /// Classify a declared result (`None` for a function without one)
    pub fn of(ty: Option<&TypeDescriptor>) -> Result<Self, BindError> {
        let Some(ty) = ty else {
            return Ok(ReturnClass::Void);
        };
        let class = match ty {
            TypeDescriptor::Int(t) => SlotClass::for_width(t.width),
            TypeDescriptor::Float32 => SlotClass::Float32,
            TypeDescriptor::Float64 => SlotClass::Float64,
            TypeDescriptor::Word
            | TypeDescriptor::Opaque
            | TypeDescriptor::View(_)
            | TypeDescriptor::CString => SlotClass::Pointer,
            TypeDescriptor::Bytes | TypeDescriptor::Function(_) => {
                return Err(BindError::UnsupportedReturn(ty.display_name()))
            }
        };
        Ok(ReturnClass::Slot(class))
    }

    pub fn is_float(self) -> bool {
        matches!(self, ReturnClass::Slot(c) if c.is_float())
    }

    pub fn flags(self) -> ClassFlags {
        match self {
            ReturnClass::Void => ClassFlags::NONE,
            ReturnClass::Slot(class) => class.flags(),
        }
    }
}

/// Flat description of one foreign call
#[derive(Debug)]
pub struct CallPlan {
    /// Native arguments in declared order, variadic tail flattened
    pub slots: Vec<ArgSlot>,
    /// Number of leading slots that belong to fixed parameters
    pub fixed_count: usize,
    /// Whether slots past `fixed_count` form a variadic tail
    pub variadic: bool,
    pub return_class: ReturnClass,
    /// Strings synthesized for pointer slots; released with the plan
    pub strings: MarshalContext,
}

impl CallPlan {
    /// Classification list: one entry per slot, then the result
    pub fn flags(&self) -> Vec<ClassFlags> {
        self.slots
            .iter()
            .map(|slot| slot.class.flags())
            .chain(std::iter::once(self.return_class.flags()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots passed through the variadic tail
    pub fn variadic_slots(&self) -> &[ArgSlot] {
        &self.slots[self.fixed_count..]
    }
}

/// Build the call plan for `args` against `signature`
///
/// Validates the signature first, so a two-result signature fails here with
/// `CallError::Bind` before anything is marshaled. Byte buffers are borrowed
/// mutably: their pointers go into the plan, and native writes land back in
/// the caller's vectors.
///
/// # Example
///
/// ```
/// # use dlbind_runtime::ffi::{build_call_plan, FunctionSignature, TypeDescriptor, Value};
/// let sig = FunctionSignature::new(vec![TypeDescriptor::CString])
///     .variadic()
///     .returning(TypeDescriptor::c_int());
/// let mut args = vec![
///     Value::Str("%d %s".into()),
///     Value::Sequence(vec![Value::I32(7), Value::Str("x".into())]),
/// ];
/// let plan = build_call_plan(&sig, &mut args).unwrap();
/// assert_eq!(plan.len(), 3);
/// assert_eq!(plan.flags().len(), 4);
/// ```
pub fn build_call_plan(
    signature: &FunctionSignature,
    args: &mut [Value],
) -> Result<CallPlan, CallError> {
    signature.validate()?;
    plan_arguments(signature, args)
}

/// Build a plan for a signature already validated at bind time
pub(crate) fn plan_arguments(
    signature: &FunctionSignature,
    args: &mut [Value],
) -> Result<CallPlan, CallError> {
    let fixed = signature.fixed_count();
    check_arity(signature, args)?;

    let return_class = ReturnClass::of(signature.return_type())?;
    let mut strings = MarshalContext::new();
    let mut slots = Vec::with_capacity(args.len());

    let (fixed_args, tail) = args.split_at_mut(fixed);
    for (index, (ty, value)) in signature.params.iter().zip(fixed_args.iter_mut()).enumerate() {
        slots.push(encode_declared(index, ty, value, &mut strings)?);
    }

    if let Some(Value::Sequence(elements)) = tail.first_mut() {
        for (offset, value) in elements.iter_mut().enumerate() {
            slots.push(encode_by_kind(fixed + offset, value, &mut strings)?);
        }
    }

    tracing::trace!(
        slots = slots.len(),
        fixed,
        variadic = signature.variadic,
        strings = strings.len(),
        "built call plan"
    );

    Ok(CallPlan {
        slots,
        fixed_count: fixed,
        variadic: signature.variadic,
        return_class,
        strings,
    })
}

fn check_arity(signature: &FunctionSignature, args: &[Value]) -> Result<(), CallError> {
    let fixed = signature.fixed_count();
    if !signature.variadic {
        if args.len() != fixed {
            return Err(CallError::ArityMismatch {
                expected: fixed,
                got: args.len(),
            });
        }
        return Ok(());
    }

    match args.len() {
        n if n == fixed => Ok(()),
        n if n == fixed + 1 => match &args[fixed] {
            Value::Sequence(_) => Ok(()),
            other => Err(CallError::TypeMismatch {
                index: fixed,
                expected: "sequence".to_string(),
                got: other.kind_name().to_string(),
            }),
        },
        n => Err(CallError::ArityMismatch {
            expected: fixed + 1,
            got: n,
        }),
    }
}

fn mismatch(index: usize, ty: &TypeDescriptor, value: &Value) -> CallError {
    CallError::TypeMismatch {
        index,
        expected: ty.display_name(),
        got: value.kind_name().to_string(),
    }
}

fn cannot_bind(index: usize, kind: impl Into<String>) -> CallError {
    CallError::CannotBind {
        index,
        kind: kind.into(),
    }
}

/// First element of a byte buffer, or null when it is empty
fn buffer_address(bytes: &mut [u8]) -> usize {
    if bytes.is_empty() {
        0
    } else {
        bytes.as_mut_ptr() as usize
    }
}

/// Encode a fixed argument against its declared parameter type
fn encode_declared(
    index: usize,
    ty: &TypeDescriptor,
    value: &mut Value,
    strings: &mut MarshalContext,
) -> Result<ArgSlot, CallError> {
    if let Value::Sequence(_) = value {
        return Err(cannot_bind(index, "sequence"));
    }

    if !ty.is_passable() {
        return Err(cannot_bind(index, ty.display_name()));
    }
    if !ty.accepts(value) {
        return Err(mismatch(index, ty, value));
    }

    let slot = match (ty, value) {
        (TypeDescriptor::Int(t), value) => ArgSlot::new(
            t.extend(value.int_bits().unwrap_or_default()),
            SlotClass::for_width(t.width),
        ),
        (TypeDescriptor::Float32, Value::F32(f)) => ArgSlot::new(f.to_bits() as u64, SlotClass::Float32),
        (TypeDescriptor::Float64, Value::F64(f)) => ArgSlot::new(f.to_bits(), SlotClass::Float64),
        (TypeDescriptor::Word, value) => ArgSlot::pointer(value.int_bits().unwrap_or_default() as usize),
        (TypeDescriptor::CString, Value::Str(s)) => ArgSlot::pointer(strings.alloc_string(s)? as usize),
        (TypeDescriptor::Bytes, Value::Bytes(bytes)) => ArgSlot::pointer(buffer_address(bytes)),
        // Pointer descriptors, and null for strings and buffers
        (_, value) => ArgSlot::pointer(value.pointer_bits().unwrap_or_default()),
    };
    Ok(slot)
}

/// Encode a variadic element by its own kind
fn encode_by_kind(
    index: usize,
    value: &mut Value,
    strings: &mut MarshalContext,
) -> Result<ArgSlot, CallError> {
    let slot = match value {
        Value::I8(_) | Value::U8(_) => ArgSlot::new(int_payload(value), SlotClass::Int8),
        Value::I16(_) | Value::U16(_) => ArgSlot::new(int_payload(value), SlotClass::Int16),
        Value::I32(_) | Value::U32(_) => ArgSlot::new(int_payload(value), SlotClass::Int32),
        Value::I64(_) | Value::U64(_) => ArgSlot::new(int_payload(value), SlotClass::Int64),
        Value::F32(f) => ArgSlot::new(f.to_bits() as u64, SlotClass::Float32),
        Value::F64(f) => ArgSlot::new(f.to_bits(), SlotClass::Float64),
        Value::Word(w) => ArgSlot::pointer(*w),
        Value::Pointer(addr) => ArgSlot::pointer(addr.as_usize()),
        Value::View(view) => ArgSlot::pointer(view.address().as_usize()),
        Value::Null => ArgSlot::pointer(0),
        Value::Str(s) => ArgSlot::pointer(strings.alloc_string(s)? as usize),
        Value::Bytes(bytes) => ArgSlot::pointer(buffer_address(bytes)),
        Value::Sequence(_) => return Err(cannot_bind(index, "sequence")),
    };
    Ok(slot)
}

fn int_payload(value: &Value) -> u64 {
    value.int_bits().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn printf_like() -> FunctionSignature {
        FunctionSignature::new(vec![TypeDescriptor::CString])
            .variadic()
            .returning(TypeDescriptor::c_int())
    }

    #[rstest]
    #[case(TypeDescriptor::i8(), Value::I8(-1), u64::MAX, SlotClass::Int8)]
    #[case(TypeDescriptor::u8(), Value::I8(-1), 0xff, SlotClass::Int8)]
    #[case(TypeDescriptor::u32(), Value::I32(-1), 0xffff_ffff, SlotClass::Int32)]
    #[case(TypeDescriptor::i16(), Value::I64(0x1_8000), 0xffff_ffff_ffff_8000, SlotClass::Int16)]
    #[case(TypeDescriptor::i64(), Value::U64(u64::MAX), u64::MAX, SlotClass::Int64)]
    #[case(TypeDescriptor::Float64, Value::F64(2.5), 2.5f64.to_bits(), SlotClass::Float64)]
    #[case(TypeDescriptor::Float32, Value::F32(-0.5), (-0.5f32).to_bits() as u64, SlotClass::Float32)]
    #[case(TypeDescriptor::Opaque, Value::Null, 0, SlotClass::Pointer)]
    #[case(TypeDescriptor::Word, Value::Word(0xdead), 0xdead, SlotClass::Pointer)]
    fn test_declared_classification(
        #[case] ty: TypeDescriptor,
        #[case] value: Value,
        #[case] payload: u64,
        #[case] class: SlotClass,
    ) {
        let sig = FunctionSignature::new(vec![ty]);
        let mut args = vec![value];
        let plan = build_call_plan(&sig, &mut args).unwrap();
        assert_eq!(plan.slots, vec![ArgSlot::new(payload, class)]);
    }

    #[test]
    fn test_flags_have_extra_return_entry() {
        let sig = FunctionSignature::new(vec![TypeDescriptor::c_int(), TypeDescriptor::Float64])
            .returning(TypeDescriptor::Float32);
        let mut args = vec![Value::I32(1), Value::F64(1.0)];
        let plan = build_call_plan(&sig, &mut args).unwrap();
        let flags = plan.flags();
        assert_eq!(flags.len(), 3);
        assert_eq!(flags[0], ClassFlags::SIZE_32);
        assert!(flags[1].contains(ClassFlags::FLOAT));
        assert!(flags[2].contains(ClassFlags::FLOAT | ClassFlags::SIZE_32));
    }

    #[test]
    fn test_zero_arguments() {
        let sig = FunctionSignature::default();
        let plan = build_call_plan(&sig, &mut []).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.return_class, ReturnClass::Void);
        assert_eq!(plan.flags(), vec![ClassFlags::NONE]);
    }

    #[test]
    fn test_variadic_without_tail() {
        let mut args = vec![Value::Str("plain".into())];
        let plan = build_call_plan(&printf_like(), &mut args).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.variadic_slots().is_empty());
    }

    #[test]
    fn test_variadic_empty_sequence() {
        let mut args = vec![Value::Str("plain".into()), Value::Sequence(vec![])];
        let plan = build_call_plan(&printf_like(), &mut args).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_variadic_flattens_in_order() {
        let mut args = vec![
            Value::Str("%d %f %s".into()),
            Value::Sequence(vec![
                Value::I32(7),
                Value::F64(1.5),
                Value::Str("x".into()),
            ]),
        ];
        let plan = build_call_plan(&printf_like(), &mut args).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.fixed_count, 1);
        let classes: Vec<SlotClass> = plan.variadic_slots().iter().map(|s| s.class).collect();
        assert_eq!(
            classes,
            vec![SlotClass::Int32, SlotClass::Float64, SlotClass::Pointer]
        );
        // format string plus the tail string
        assert_eq!(plan.strings.len(), 2);
    }

    #[test]
    fn test_variadic_tail_must_be_sequence() {
        let mut args = vec![Value::Str("%d".into()), Value::I32(1)];
        let result = build_call_plan(&printf_like(), &mut args);
        assert!(matches!(result, Err(CallError::TypeMismatch { index: 1, .. })));
    }

    #[test]
    fn test_nested_sequence_cannot_bind() {
        let mut args = vec![
            Value::Str("%d".into()),
            Value::Sequence(vec![Value::I32(1), Value::Sequence(vec![])]),
        ];
        let result = build_call_plan(&printf_like(), &mut args);
        assert_eq!(
            result.unwrap_err(),
            CallError::CannotBind {
                index: 2,
                kind: "sequence".to_string()
            }
        );
    }

    #[test]
    fn test_sequence_in_fixed_position() {
        let sig = FunctionSignature::new(vec![TypeDescriptor::c_int()]);
        let mut args = vec![Value::Sequence(vec![Value::I32(1)])];
        let result = build_call_plan(&sig, &mut args);
        assert!(matches!(result, Err(CallError::CannotBind { index: 0, .. })));
    }

    #[test]
    fn test_empty_bytes_pass_null() {
        let sig = FunctionSignature::new(vec![TypeDescriptor::Bytes, TypeDescriptor::Bytes]);
        let mut args = vec![Value::Bytes(vec![]), Value::Bytes(vec![1, 2, 3])];
        let expected = match &mut args[1] {
            Value::Bytes(b) => b.as_mut_ptr() as u64,
            _ => unreachable!(),
        };
        let plan = build_call_plan(&sig, &mut args).unwrap();
        assert_eq!(plan.slots[0].payload, 0);
        assert_eq!(plan.slots[1].payload, expected);
    }

    #[test]
    fn test_arity_mismatch() {
        let sig = FunctionSignature::new(vec![TypeDescriptor::c_int(), TypeDescriptor::c_int()]);
        let mut args = vec![Value::I32(1)];
        assert_eq!(
            build_call_plan(&sig, &mut args).unwrap_err(),
            CallError::ArityMismatch { expected: 2, got: 1 }
        );
    }

    #[test]
    fn test_type_mismatch() {
        let sig = FunctionSignature::new(vec![TypeDescriptor::Float64]);
        let mut args = vec![Value::Str("1.0".into())];
        assert!(matches!(
            build_call_plan(&sig, &mut args),
            Err(CallError::TypeMismatch { index: 0, .. })
        ));
    }

    #[rstest]
    #[case(TypeDescriptor::c_int(), Value::Word(3))]
    #[case(TypeDescriptor::c_int(), Value::F64(3.0))]
    #[case(TypeDescriptor::Float32, Value::F64(1.0))]
    #[case(TypeDescriptor::Word, Value::Null)]
    #[case(TypeDescriptor::Opaque, Value::Null)]
    #[case(TypeDescriptor::Opaque, Value::I32(1))]
    #[case(TypeDescriptor::view(TypeDescriptor::c_int()), Value::Word(16))]
    #[case(TypeDescriptor::CString, Value::Null)]
    #[case(TypeDescriptor::CString, Value::Bytes(vec![1]))]
    #[case(TypeDescriptor::Bytes, Value::Null)]
    #[case(TypeDescriptor::Bytes, Value::Str("x".into()))]
    fn test_declared_parameter_follows_accepts(#[case] ty: TypeDescriptor, #[case] value: Value) {
        let accepted = ty.accepts(&value);
        let sig = FunctionSignature::new(vec![ty]);
        let mut args = vec![value];
        match build_call_plan(&sig, &mut args) {
            Ok(_) => assert!(accepted),
            Err(err) => {
                assert!(!accepted);
                assert!(matches!(err, CallError::TypeMismatch { index: 0, .. }));
            }
        }
    }

    #[test]
    fn test_interior_nul_is_marshal_error() {
        let sig = FunctionSignature::new(vec![TypeDescriptor::CString]);
        let mut args = vec![Value::Str("a\0b".into())];
        assert!(matches!(
            build_call_plan(&sig, &mut args),
            Err(CallError::Marshal(_))
        ));
    }

    #[test]
    fn test_multiple_returns_rejected() {
        let sig = FunctionSignature::default()
            .returning(TypeDescriptor::c_int())
            .returning(TypeDescriptor::c_int());
        assert_eq!(
            build_call_plan(&sig, &mut []).unwrap_err(),
            CallError::Bind(BindError::MultipleReturns(2))
        );
    }

    #[test]
    fn test_return_classes() {
        assert_eq!(ReturnClass::of(None), Ok(ReturnClass::Void));
        assert_eq!(
            ReturnClass::of(Some(&TypeDescriptor::CString)),
            Ok(ReturnClass::Slot(SlotClass::Pointer))
        );
        assert!(ReturnClass::of(Some(&TypeDescriptor::Float64)).unwrap().is_float());
        assert!(ReturnClass::of(Some(&TypeDescriptor::Bytes)).is_err());
    }
}
