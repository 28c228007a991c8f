//! FFI error taxonomy
//!
//! - `LoadError`: resolution failures reported by the native loader
//! - `MarshalError`: value/memory conversion failures
//! - `BindError`: signatures rejected before any foreign call
//! - `CallError`: per-call argument failures, raised before the foreign call
//!
//! Native invocation failures are not represented here: they abort the call
//! with a panic (see `trampoline::TrampolineFault`).

use thiserror::Error;

/// Library loading errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// Library could not be opened; carries the loader diagnostic
    #[error("Failed to open library '{name}': {message}")]
    OpenFailed { name: String, message: String },

    /// Symbol not found in library
    #[error("Symbol '{symbol}' not found in library '{library}': {message}")]
    SymbolNotFound {
        library: String,
        symbol: String,
        message: String,
    },

    /// The native loader refused to close the handle
    #[error("Failed to close library '{name}': {message}")]
    CloseFailed { name: String, message: String },

    /// Operation attempted on a handle that was already closed
    #[error("Library '{0}' is closed")]
    Closed(String),

    /// Name contains an interior NUL byte
    #[error("Invalid name '{0}': contains a NUL byte")]
    InvalidName(String),

    /// Lookup kind not available on this platform
    #[error("Unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

/// Marshal error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    /// Type descriptor kind has no scalar read/write path
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Value kind does not fit the target descriptor
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Invalid string (contains a NUL byte)
    #[error("Invalid string: {0}")]
    InvalidString(String),
}

/// Signature binding errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    /// More than one return value declared
    #[error("native functions return at most one value, signature declares {0}")]
    MultipleReturns(usize),

    /// Parameter kind cannot be passed to native code
    #[error("cannot bind parameter {index} of type {ty}")]
    UnsupportedParameter { index: usize, ty: String },

    /// Return kind cannot be decoded from a native result
    #[error("cannot return value of type {0}")]
    UnsupportedReturn(String),

    /// Symbol address was null
    #[error("cannot bind a null function address")]
    NullAddress,
}

/// FFI call errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// Marshaling error (value ↔ native conversion failed)
    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    /// Wrong number of arguments
    #[error("Expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// Value kind has no argument classification
    #[error("cannot bind argument {index} of this type: {kind}")]
    CannotBind { index: usize, kind: String },

    /// Value does not match the declared parameter type
    #[error("argument {index}: expected {expected}, got {got}")]
    TypeMismatch {
        index: usize,
        expected: String,
        got: String,
    },

    /// Signature rejected (only reachable through `build_call_plan` directly)
    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Any error surfaced by the symbol-level API
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Call(#[from] CallError),
}

/// Result type for symbol-level operations
pub type Result<T> = std::result::Result<T, Error>;
