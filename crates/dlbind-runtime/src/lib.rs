//! dlbind runtime - bind shared-library symbols at runtime
//!
//! Opens shared libraries, reads and writes their exported variables, and
//! turns their exported functions into callable values, given only a
//! runtime description of each symbol's type.
//!
//! ```no_run
//! use dlbind_runtime::ffi::{FunctionSignature, LibraryHandle, OpenFlags, TypeDescriptor, Value};
//!
//! let libm = unsafe { LibraryHandle::open("libm", OpenFlags::NOW) }?;
//! let sig = FunctionSignature::new(vec![TypeDescriptor::Float64]).returning(TypeDescriptor::Float64);
//! let sqrt = unsafe { libm.bind_symbol("sqrt", sig) }?;
//! let root = unsafe { sqrt.invoke(&mut [Value::F64(2.0)]) }?;
//! println!("sqrt(2) = {:?}", root);
//! # Ok::<(), dlbind_runtime::ffi::Error>(())
//! ```

/// dlbind runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ffi;

// Re-export commonly used types
pub use ffi::{
    CallableValue, Error, FunctionSignature, LibraryHandle, OpenFlags, ResolvePolicy,
    TypeDescriptor, Value,
};
