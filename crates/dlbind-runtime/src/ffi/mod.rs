//! Foreign Function Interface (FFI) infrastructure
//!
//! Binds symbols of shared libraries loaded at runtime:
//! - Type descriptors and caller-side values (`types`)
//! - Scalar marshaling between native memory and values (`marshal`)
//! - Call planning: values → classified argument slots (`plan`)
//! - Calling-convention layouts (`abi`)
//! - The native call trampoline (`trampoline`)
//! - Callable values wrapping native functions (`caller`)
//! - Library handles and symbol resolution (`loader`)
//!
//! # Safety
//!
//! Every operation that dereferences a native address, or calls through
//! one, is an `unsafe fn`. Passing a descriptor or signature that does not
//! match the native symbol is undefined behavior and is never detected.

pub mod abi;
pub mod caller;
pub mod error;
pub mod loader;
pub mod marshal;
pub mod plan;
pub mod trampoline;
pub mod types;

pub use caller::{bind, bind_raw, CallableValue};
pub use error::{BindError, CallError, Error, LoadError, MarshalError, Result};
pub use loader::{symbol_default, symbol_next, LibraryHandle, OpenFlags, ResolvePolicy, LIB_EXT};
pub use marshal::{decode_word, read_scalar, write_scalar, MarshalContext};
pub use plan::{build_call_plan, ArgSlot, CallPlan, ClassFlags, ReturnClass, SlotClass};
pub use trampoline::{RawResult, TrampolineFault};
pub use types::{
    Address, FunctionSignature, IntType, IntWidth, SymbolAddress, TypeDescriptor, TypedView, Value,
};
