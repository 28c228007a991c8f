//! Variable access through opened libraries
//!
//! Reads copy a variable's value out; views alias its storage. Tests that
//! mutate fixture variables run serially because every test in this binary
//! shares one loaded copy of the library.

mod common;

use common::*;
use dlbind_runtime::ffi::{
    Error, IntWidth, LoadError, MarshalContext, MarshalError, TypeDescriptor, Value,
};
use pretty_assertions::assert_eq;
use serial_test::serial;

// ===== Value vs View =====

#[test]
#[serial]
fn test_value_is_a_copy_view_is_an_alias() {
    let lib = open_testlib();
    let u32_ty = TypeDescriptor::u32();

    let before = unsafe { lib.read_symbol("my_uint32", &u32_ty) }.unwrap();
    assert_eq!(before, Value::U32(1337));

    let view = lib.symbol_view("my_uint32", u32_ty.clone()).unwrap();
    assert_eq!(unsafe { view.read() }, Ok(Value::U32(1337)));

    let mut ctx = MarshalContext::new();
    unsafe { view.write(&Value::U32(42), &mut ctx) }.unwrap();

    assert_eq!(unsafe { view.read() }, Ok(Value::U32(42)));
    assert_eq!(unsafe { lib.read_symbol("my_uint32", &u32_ty) }, Ok(Value::U32(42)));
    // The earlier copy is unaffected
    assert_eq!(before, Value::U32(1337));

    unsafe { view.write(&before, &mut ctx) }.unwrap();
    assert_eq!(unsafe { lib.read_symbol("my_uint32", &u32_ty) }, Ok(Value::U32(1337)));
}

#[test]
#[serial]
fn test_read_as_view_descriptor() {
    let lib = open_testlib();
    let value = unsafe { lib.read_symbol("my_uint32", &TypeDescriptor::view(TypeDescriptor::u32())) }
        .unwrap();
    let view = value.as_view().expect("view value");
    assert_eq!(view.pointee(), &TypeDescriptor::u32());
    assert_eq!(
        view.address(),
        lib.symbol_address("my_uint32").unwrap()
    );
    assert_eq!(unsafe { view.read() }, Ok(Value::U32(1337)));
}

// ===== Scalar Reads =====

#[test]
fn test_read_char() {
    let lib = open_testlib();
    assert_eq!(unsafe { lib.read_symbol("my_char", &TypeDescriptor::i8()) }, Ok(Value::I8(42)));
}

#[test]
fn test_read_int_and_long() {
    let lib = open_testlib();
    assert_eq!(
        unsafe { lib.read_symbol("my_int", &TypeDescriptor::c_int()) },
        Ok(Value::I32(-9000))
    );

    let long = unsafe { lib.read_symbol("my_long", &TypeDescriptor::c_long()) }.unwrap();
    assert_eq!(long.as_i64(), Some(-9000));
    let expected = if IntWidth::LONG == IntWidth::W64 {
        Value::I64(-9000)
    } else {
        Value::I32(-9000)
    };
    assert_eq!(long, expected);
}

#[test]
fn test_read_unsigned_reinterprets_int() {
    let lib = open_testlib();
    assert_eq!(
        unsafe { lib.read_symbol("my_int", &TypeDescriptor::u32()) },
        Ok(Value::U32(-9000i32 as u32))
    );
}

#[test]
fn test_read_pointer() {
    let lib = open_testlib();

    let opaque = unsafe { lib.read_symbol("my_pointer", &TypeDescriptor::Opaque) }.unwrap();
    match opaque {
        Value::Pointer(address) => assert_eq!(address.as_usize(), 0xdeadbeef),
        other => panic!("Expected Pointer, got {:?}", other),
    }

    assert_eq!(
        unsafe { lib.read_symbol("my_pointer", &TypeDescriptor::Word) },
        Ok(Value::Word(0xdeadbeef))
    );
}

#[test]
fn test_read_floats() {
    let lib = open_testlib();
    assert_eq!(
        unsafe { lib.read_symbol("my_double", &TypeDescriptor::f64()) },
        Ok(Value::F64(2.5))
    );
    assert_eq!(
        unsafe { lib.read_symbol("my_float", &TypeDescriptor::f32()) },
        Ok(Value::F32(-0.5))
    );
}

#[test]
#[serial]
fn test_read_string() {
    let lib = open_testlib();
    assert_eq!(
        unsafe { lib.read_symbol("my_string", &TypeDescriptor::CString) },
        Ok(Value::Str("mystring".to_string()))
    );
}

// ===== Writes =====

#[test]
#[serial]
fn test_write_string_variable() {
    let lib = open_testlib();
    let original = unsafe { lib.read_symbol("my_string", &TypeDescriptor::Word) }.unwrap();

    unsafe { lib.write_symbol("my_string", &TypeDescriptor::CString, &Value::Str("replaced".into())) }
        .unwrap();
    assert_eq!(
        unsafe { lib.read_symbol("my_string", &TypeDescriptor::CString) },
        Ok(Value::Str("replaced".to_string()))
    );

    unsafe { lib.write_symbol("my_string", &TypeDescriptor::CString, &Value::Null) }.unwrap();
    assert_eq!(
        unsafe { lib.read_symbol("my_string", &TypeDescriptor::CString) },
        Ok(Value::Str(String::new()))
    );

    unsafe { lib.write_symbol("my_string", &TypeDescriptor::Word, &original) }.unwrap();
    assert_eq!(
        unsafe { lib.read_symbol("my_string", &TypeDescriptor::CString) },
        Ok(Value::Str("mystring".to_string()))
    );
}

#[test]
#[serial]
fn test_written_string_outlives_writing_handle() {
    let writer = open_testlib();
    let reader = open_testlib();
    let original = unsafe { reader.read_symbol("my_string", &TypeDescriptor::Word) }.unwrap();
    let long = "x".repeat(64);

    unsafe { writer.write_symbol("my_string", &TypeDescriptor::CString, &Value::Str(long.clone())) }
        .unwrap();
    writer.close().unwrap();

    // Reuse freed heap blocks of the same size
    let scribble: Vec<Vec<u8>> = (0..64).map(|_| vec![b'Z'; 65]).collect();
    assert_eq!(
        unsafe { reader.read_symbol("my_string", &TypeDescriptor::CString) },
        Ok(Value::Str(long))
    );
    drop(scribble);

    unsafe { reader.write_symbol("my_string", &TypeDescriptor::Word, &original) }.unwrap();
}

#[test]
#[serial]
fn test_write_truncates_integers() {
    let lib = open_testlib();
    let u32_ty = TypeDescriptor::u32();

    unsafe { lib.write_symbol("my_uint32", &u32_ty, &Value::I64(0x1_0000_0007)) }.unwrap();
    assert_eq!(unsafe { lib.read_symbol("my_uint32", &u32_ty) }, Ok(Value::U32(7)));

    unsafe { lib.write_symbol("my_uint32", &u32_ty, &Value::U32(1337)) }.unwrap();
}

#[test]
fn test_write_float_requires_float() {
    let lib = open_testlib();
    let result = unsafe { lib.write_symbol("my_double", &TypeDescriptor::f64(), &Value::I32(1)) };
    assert_eq!(
        result,
        Err(Error::Marshal(MarshalError::TypeMismatch {
            expected: "float64".to_string(),
            got: "i32".to_string(),
        }))
    );
}

#[test]
fn test_string_with_nul_rejected() {
    let lib = open_testlib();
    let result = unsafe {
        lib.write_symbol("my_string", &TypeDescriptor::CString, &Value::Str("a\0b".into()))
    };
    assert!(matches!(result, Err(Error::Marshal(MarshalError::InvalidString(_)))));
}

// ===== Lookup Failures =====

#[test]
fn test_missing_symbol() {
    let lib = open_testlib();
    match lib.symbol_address("no_such_symbol") {
        Err(LoadError::SymbolNotFound { symbol, .. }) => assert_eq!(symbol, "no_such_symbol"),
        other => panic!("Expected SymbolNotFound, got {:?}", other),
    }
}

#[test]
fn test_unreadable_descriptor() {
    let lib = open_testlib();
    let result = unsafe { lib.read_symbol("my_int", &TypeDescriptor::Bytes) };
    assert_eq!(
        result,
        Err(Error::Marshal(MarshalError::UnsupportedType("bytes".to_string())))
    );
}

// ===== Lifecycle =====

#[test]
fn test_close_twice() {
    let lib = open_testlib();
    assert!(!lib.is_closed());
    assert_eq!(lib.close(), Ok(()));
    assert_eq!(lib.close(), Ok(()));
    assert!(lib.is_closed());

    assert!(matches!(lib.symbol_address("my_int"), Err(LoadError::Closed(_))));
    assert!(matches!(
        unsafe { lib.read_symbol("my_int", &TypeDescriptor::c_int()) },
        Err(Error::Load(LoadError::Closed(_)))
    ));
}

#[test]
fn test_handle_debug() {
    let lib = open_testlib();
    let rendered = format!("{:?}", lib);
    assert!(rendered.contains("LibraryHandle"));
    assert!(rendered.contains("closed: false"));
}
