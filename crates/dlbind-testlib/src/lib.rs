//! Shared-library fixture for dlbind tests
//!
//! Built as a `cdylib` and opened at runtime by the integration tests. Every
//! item is exported unmangled with the C ABI so the tests exercise the same
//! paths a real C library would.

#![allow(non_upper_case_globals)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_double, c_float, c_int, c_long, c_uchar, c_void};
use std::sync::atomic::{AtomicI32, Ordering};

// ===== Variables =====

#[no_mangle]
pub static mut my_string: *const c_char = b"mystring\0".as_ptr() as *const c_char;

#[no_mangle]
pub static mut my_char: c_char = 42;

#[no_mangle]
pub static mut my_uint32: u32 = 1337;

#[no_mangle]
pub static mut my_int: c_int = -9000;

#[no_mangle]
pub static mut my_long: c_long = -9000;

#[no_mangle]
pub static mut my_pointer: *mut c_void = 0xdeadbeef_usize as *mut c_void;

#[no_mangle]
pub static mut my_double: c_double = 2.5;

#[no_mangle]
pub static mut my_float: c_float = -0.5;

#[no_mangle]
pub static mut verbose: c_int = 0;

#[no_mangle]
pub static counter: AtomicI32 = AtomicI32::new(0);

// ===== Functions =====

#[no_mangle]
pub extern "C" fn increase_counter() {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[no_mangle]
pub extern "C" fn counter_address() -> *mut c_int {
    counter.as_ptr()
}

#[no_mangle]
pub extern "C" fn square(a: c_double) -> c_double {
    a * a
}

#[no_mangle]
pub extern "C" fn squaref(a: c_float) -> c_float {
    a * a
}

#[no_mangle]
pub unsafe extern "C" fn strlength(s1: *const c_char, s2: *const c_char, s3: *const c_char) -> c_int {
    let len = |s: *const c_char| CStr::from_ptr(s).to_bytes().len() as c_int;
    len(s1) + len(s2) + len(s3)
}

#[no_mangle]
pub extern "C" fn add(a: c_int, b: c_int) -> c_int {
    a.wrapping_add(b)
}

#[no_mangle]
pub unsafe extern "C" fn fill42(data: *mut c_uchar, count: c_int) {
    for ii in 0..count as usize {
        *data.add(ii) = 42;
    }
}

/// Returns -1 for a null buffer so callers can observe how empty buffers travel.
#[no_mangle]
pub unsafe extern "C" fn count_nonzero(data: *const c_uchar, count: c_int) -> c_int {
    if data.is_null() {
        return -1;
    }
    (0..count as usize).filter(|&ii| *data.add(ii) != 0).count() as c_int
}

#[no_mangle]
pub extern "C" fn sum6(a1: c_int, a2: c_int, a3: c_int, a4: c_int, a5: c_int, a6: c_int) -> c_int {
    a1 + a2 + a3 + a4 + a5 + a6
}

#[no_mangle]
pub extern "C" fn sum8(
    a1: c_int,
    a2: c_int,
    a3: c_int,
    a4: c_int,
    a5: c_int,
    a6: c_int,
    a7: c_int,
    a8: c_int,
) -> c_int {
    a1 + a2 + a3 + a4 + a5 + a6 + a7 + a8
}

#[no_mangle]
pub extern "C" fn ret8(
    _a1: c_int,
    _a2: c_int,
    _a3: c_int,
    _a4: c_int,
    _a5: c_int,
    _a6: c_int,
    _a7: c_int,
    a8: c_int,
) -> c_int {
    a8
}

#[no_mangle]
pub extern "C" fn sum_doubles10(
    d1: c_double,
    d2: c_double,
    d3: c_double,
    d4: c_double,
    d5: c_double,
    d6: c_double,
    d7: c_double,
    d8: c_double,
    d9: c_double,
    d10: c_double,
) -> c_double {
    d1 + d2 + d3 + d4 + d5 + d6 + d7 + d8 + d9 + d10
}

/// Interleaves both register files and spills both of them.
#[no_mangle]
pub extern "C" fn mixed_spill(
    i1: c_int,
    d1: c_double,
    i2: c_long,
    f1: c_float,
    i3: c_int,
    d2: c_double,
    i4: c_int,
    d3: c_double,
    i5: c_int,
    d4: c_double,
    i6: c_int,
    d5: c_double,
    i7: c_int,
    d6: c_double,
    i8: c_int,
    d7: c_double,
    d8: c_double,
    d9: c_double,
) -> c_double {
    let ints = (i1 + i3 + i4 + i5 + i6 + i7 + i8) as c_double + i2 as c_double;
    let floats = d1 + d2 + d3 + d4 + d5 + d6 + d7 + d8 + d9 + f1 as c_double;
    ints + floats
}

#[no_mangle]
pub extern "C" fn negate_i8(x: i8) -> i8 {
    x.wrapping_neg()
}

#[no_mangle]
pub extern "C" fn widen(a: i8, b: u16, c: i32) -> i64 {
    a as i64 + b as i64 + c as i64
}

#[no_mangle]
pub extern "C" fn max_u64() -> u64 {
    u64::MAX
}

#[no_mangle]
pub extern "C" fn identity_ptr(p: *mut c_void) -> *mut c_void {
    p
}

#[no_mangle]
pub extern "C" fn return_string(a: c_int) -> *const c_char {
    match a {
        0 => std::ptr::null(),
        1 => b"\0".as_ptr() as *const c_char,
        _ => b"non-empty\0".as_ptr() as *const c_char,
    }
}
