//! Dynamic library loading and symbol resolution
//!
//! Provides cross-platform library handles on top of `libloading`, plus the
//! symbol-level API: read or write an exported variable, view it in place,
//! or bind an exported function.
//!
//! Every open, lookup and close goes through one process-global lock,
//! because the native loader keeps process-global, non-reentrant state
//! (`dlerror` in particular). `close` additionally takes the handle's own
//! guard first, so racing closes release the library exactly once.
//!
//! # Name resolution
//!
//! A `ResolvePolicy` decides which file names are tried:
//! - a bare name without extension gets the platform extension (`.so`,
//!   `.dylib`, `.dll`)
//! - configured search paths are tried before the loader's own search
//! - on Linux, `libc.so` (a linker script on glibc systems) is retried as
//!   `libc.so.6`

use crate::ffi::caller::{self, CallableValue};
use crate::ffi::error::{LoadError, Result};
use crate::ffi::marshal::{self, MarshalContext};
use crate::ffi::types::{Address, FunctionSignature, TypeDescriptor, TypedView, Value};
use dlbind_config::{Config, ConfigError, ConfigLoader, ConfigResult, FLAG_NAMES};
use libloading::Library;
use std::fmt;
use std::ops::BitOr;
use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Platform default shared-library extension
#[cfg(target_os = "windows")]
pub const LIB_EXT: &str = ".dll";
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub const LIB_EXT: &str = ".dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "ios")))]
pub const LIB_EXT: &str = ".so";

static LOADER_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Strings stored into library variables
///
/// A library stays mapped while any handle to it is open (or for good with
/// `NODELETE`), so no single handle can tell when a written string is no
/// longer referenced. They are kept for the life of the process.
static WRITTEN_STRINGS: OnceLock<Mutex<MarshalContext>> = OnceLock::new();

fn written_strings() -> MutexGuard<'static, MarshalContext> {
    WRITTEN_STRINGS
        .get_or_init(|| Mutex::new(MarshalContext::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Serialize access to the native loader
fn loader_lock() -> MutexGuard<'static, ()> {
    LOADER_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn check_name(name: &str) -> std::result::Result<(), LoadError> {
    if name.contains('\0') {
        return Err(LoadError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// `dlopen` mode bits
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const EMPTY: OpenFlags = OpenFlags(0);
    /// Resolve function symbols on first call
    pub const LAZY: OpenFlags = OpenFlags(1 << 0);
    /// Resolve every symbol before `open` returns
    pub const NOW: OpenFlags = OpenFlags(1 << 1);
    /// Make the library's symbols available to later loads
    pub const GLOBAL: OpenFlags = OpenFlags(1 << 2);
    pub const LOCAL: OpenFlags = OpenFlags(1 << 3);
    /// Keep the library mapped after close
    pub const NODELETE: OpenFlags = OpenFlags(1 << 4);
    /// Only succeed if the library is already loaded
    pub const NOLOAD: OpenFlags = OpenFlags(1 << 5);

    /// Bits in the order of `dlbind_config::FLAG_NAMES`
    const BY_NAME: [OpenFlags; FLAG_NAMES.len()] = [
        OpenFlags::LAZY,
        OpenFlags::NOW,
        OpenFlags::GLOBAL,
        OpenFlags::LOCAL,
        OpenFlags::NODELETE,
        OpenFlags::NOLOAD,
    ];

    fn named() -> impl Iterator<Item = (&'static str, OpenFlags)> {
        FLAG_NAMES.iter().copied().zip(Self::BY_NAME)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse one flag name as used in configuration files
    pub fn from_name(name: &str) -> Option<OpenFlags> {
        let name = name.to_lowercase();
        Self::named().find(|(n, _)| *n == name).map(|(_, flag)| flag)
    }

    /// Apply `NOW` when neither bind mode is present
    pub fn with_default_bind(self) -> OpenFlags {
        if self.contains(OpenFlags::LAZY) || self.contains(OpenFlags::NOW) {
            self
        } else {
            self | OpenFlags::NOW
        }
    }

    #[cfg(unix)]
    fn to_native(self) -> i32 {
        let mut native = 0;
        if self.contains(OpenFlags::LAZY) {
            native |= libc::RTLD_LAZY;
        }
        if self.contains(OpenFlags::NOW) {
            native |= libc::RTLD_NOW;
        }
        if self.contains(OpenFlags::GLOBAL) {
            native |= libc::RTLD_GLOBAL;
        }
        if self.contains(OpenFlags::LOCAL) {
            native |= libc::RTLD_LOCAL;
        }
        if self.contains(OpenFlags::NODELETE) {
            native |= native_extra::NODELETE;
        }
        if self.contains(OpenFlags::NOLOAD) {
            native |= native_extra::NOLOAD;
        }
        native
    }
}

#[cfg(all(unix, any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd")))]
mod native_extra {
    pub const NODELETE: i32 = libc::RTLD_NODELETE;
    pub const NOLOAD: i32 = libc::RTLD_NOLOAD;
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd"))))]
mod native_extra {
    pub const NODELETE: i32 = 0;
    pub const NOLOAD: i32 = 0;
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::named()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| name)
            .collect();
        write!(f, "OpenFlags({})", names.join(" | "))
    }
}

/// How library names are turned into files to open
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvePolicy {
    /// Append `LIB_EXT` to names without an extension
    pub append_extension: bool,
    /// Retry `libc.so` as `libc.so.6` on Linux
    pub libc_fallback: bool,
    /// Directories searched before the native loader's own search
    pub search_paths: Vec<PathBuf>,
    /// Flags used when `open_with` is given `OpenFlags::EMPTY`
    pub default_flags: OpenFlags,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            append_extension: true,
            libc_fallback: true,
            search_paths: Vec::new(),
            default_flags: OpenFlags::EMPTY,
        }
    }
}

impl ResolvePolicy {
    /// Build a policy from loaded configuration
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let mut default_flags = OpenFlags::EMPTY;
        for name in config.default_flags() {
            let flag = OpenFlags::from_name(&name).ok_or_else(|| ConfigError::InvalidValue {
                field: "loader.default_flags".to_string(),
                reason: format!("unknown flag '{}'", name),
            })?;
            default_flags = default_flags | flag;
        }

        Ok(Self {
            append_extension: config.append_extension(),
            libc_fallback: config.libc_fallback(),
            search_paths: config.search_paths(),
            default_flags,
        })
    }

    /// Load configuration starting at `start_dir` and build a policy from it
    pub fn discover(start_dir: &Path) -> ConfigResult<Self> {
        let config = ConfigLoader::new().load_from_directory(start_dir)?;
        Self::from_config(&config)
    }

    /// File name for `name` after extension inference
    pub fn file_name(&self, name: &str) -> String {
        if self.append_extension && !name.is_empty() && Path::new(name).extension().is_none() {
            format!("{}{}", name, LIB_EXT)
        } else {
            name.to_string()
        }
    }

    /// Names handed to the native loader, in order
    ///
    /// Existing files under the search paths come first; the bare name is
    /// always last so the loader's own search still applies.
    pub fn candidates(&self, file: &str) -> Vec<String> {
        let path = Path::new(file);
        let mut candidates = Vec::new();
        if !path.is_absolute() && path.components().count() == 1 {
            candidates.extend(
                self.search_paths
                    .iter()
                    .map(|dir| dir.join(file))
                    .filter(|p| p.is_file())
                    .map(|p| p.to_string_lossy().into_owned()),
            );
        }
        candidates.push(file.to_string());
        candidates
    }
}

#[cfg(unix)]
unsafe fn native_open(name: &str, flags: OpenFlags) -> std::result::Result<Library, libloading::Error> {
    libloading::os::unix::Library::open(Some(name), flags.to_native()).map(Library::from)
}

#[cfg(windows)]
unsafe fn native_open(name: &str, _flags: OpenFlags) -> std::result::Result<Library, libloading::Error> {
    Library::new(name)
}

#[cfg(unix)]
fn native_this() -> std::result::Result<Library, libloading::Error> {
    Ok(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn native_this() -> std::result::Result<Library, libloading::Error> {
    libloading::os::windows::Library::this().map(Library::from)
}

/// An opened shared library
///
/// Owns the native handle. Every address resolved through it is valid only
/// until the handle is closed or dropped.
pub struct LibraryHandle {
    name: String,
    library: Mutex<Option<Library>>,
}

impl LibraryHandle {
    /// Open `name` with the default resolve policy
    ///
    /// # Safety
    ///
    /// Opening a library runs its initializers. The caller must trust it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use dlbind_runtime::ffi::{LibraryHandle, OpenFlags};
    /// let libm = unsafe { LibraryHandle::open("libm", OpenFlags::LAZY) }.unwrap();
    /// libm.close().unwrap();
    /// libm.close().unwrap(); // no-op
    /// ```
    pub unsafe fn open(name: &str, flags: OpenFlags) -> std::result::Result<Self, LoadError> {
        Self::open_with(name, flags, &ResolvePolicy::default())
    }

    /// Open `name` under an explicit resolve policy
    ///
    /// # Safety
    ///
    /// Same as `open()`.
    pub unsafe fn open_with(
        name: &str,
        flags: OpenFlags,
        policy: &ResolvePolicy,
    ) -> std::result::Result<Self, LoadError> {
        check_name(name)?;
        let flags = if flags.is_empty() {
            policy.default_flags
        } else {
            flags
        }
        .with_default_bind();

        let file = policy.file_name(name);
        let mut message = String::new();
        for candidate in policy.candidates(&file) {
            let opened = {
                let _loader = loader_lock();
                native_open(&candidate, flags)
            };
            match opened {
                Ok(library) => {
                    tracing::debug!(library = %candidate, flags = ?flags, "opened library");
                    return Ok(Self::from_library(candidate, library));
                }
                Err(e) => message = e.to_string(),
            }
        }

        if cfg!(target_os = "linux") && policy.libc_fallback && file == "libc.so" {
            tracing::debug!("libc.so failed to load, retrying as libc.so.6");
            return Self::open_with("libc.so.6", flags, policy);
        }

        Err(LoadError::OpenFailed {
            name: file,
            message,
        })
    }

    /// Handle to the running process image
    pub fn process() -> std::result::Result<Self, LoadError> {
        let library = {
            let _loader = loader_lock();
            native_this()
        }
        .map_err(|e| LoadError::OpenFailed {
            name: "<process>".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_library("<process>".to_string(), library))
    }

    fn from_library(name: String, library: Library) -> Self {
        Self {
            name,
            library: Mutex::new(Some(library)),
        }
    }

    /// Name the library was opened under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.library
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Resolve the address of symbol `name`
    pub fn symbol_address(&self, name: &str) -> std::result::Result<Address, LoadError> {
        check_name(name)?;
        let guard = self.library.lock().unwrap_or_else(PoisonError::into_inner);
        let library = guard
            .as_ref()
            .ok_or_else(|| LoadError::Closed(self.name.clone()))?;

        let not_found = |message: String| LoadError::SymbolNotFound {
            library: self.name.clone(),
            symbol: name.to_string(),
            message,
        };

        let raw = {
            let _loader = loader_lock();
            // Safety: the symbol is only read as an address, never as a `T`
            unsafe { library.get::<*mut c_void>(name.as_bytes()) }
                .map(|symbol| *symbol)
                .map_err(|e| not_found(e.to_string()))?
        };
        let address = Address::new(raw).ok_or_else(|| not_found("resolved to null".to_string()))?;

        tracing::debug!(library = %self.name, symbol = name, address = ?address, "resolved symbol");
        Ok(address)
    }

    /// Close the library
    ///
    /// Closing an already closed handle is a no-op. After a successful close
    /// every address resolved from this handle is dangling.
    pub fn close(&self) -> std::result::Result<(), LoadError> {
        let mut guard = self.library.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(library) = guard.take() else {
            return Ok(());
        };

        {
            let _loader = loader_lock();
            library.close().map_err(|e| LoadError::CloseFailed {
                name: self.name.clone(),
                message: e.to_string(),
            })?;
        }

        tracing::debug!(library = %self.name, "closed library");
        Ok(())
    }

    /// Copy the value of variable `name` out of the library
    ///
    /// # Safety
    ///
    /// `ty` must describe the variable's actual type.
    pub unsafe fn read_symbol(&self, name: &str, ty: &TypeDescriptor) -> Result<Value> {
        let address = self.symbol_address(name)?;
        Ok(marshal::read_scalar(address, ty)?)
    }

    /// Store `value` into variable `name`
    ///
    /// Strings are copied into process-wide buffers that are never freed,
    /// since the variable may outlive this handle.
    ///
    /// # Safety
    ///
    /// `ty` must describe the variable's actual type, and the variable must
    /// be writable.
    pub unsafe fn write_symbol(&self, name: &str, ty: &TypeDescriptor, value: &Value) -> Result<()> {
        let address = self.symbol_address(name)?;
        Ok(marshal::write_scalar(address, ty, value, &mut written_strings())?)
    }

    /// View variable `name` in place as a `pointee`
    pub fn symbol_view(&self, name: &str, pointee: TypeDescriptor) -> Result<TypedView> {
        let address = self.symbol_address(name)?;
        Ok(TypedView::new(address, pointee))
    }

    /// Bind function `name` to `signature`
    ///
    /// # Safety
    ///
    /// See `caller::bind()`. The callable must not be invoked after this
    /// handle is closed.
    pub unsafe fn bind_symbol(&self, name: &str, signature: FunctionSignature) -> Result<CallableValue> {
        let address = self.symbol_address(name)?;
        Ok(caller::bind(signature, address)?)
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close library on drop");
        }
    }
}

/// Resolve `name` in the default symbol scope of the process
#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
pub fn symbol_default(name: &str) -> std::result::Result<Address, LoadError> {
    process_symbol(libc::RTLD_DEFAULT, "RTLD_DEFAULT", name)
}

/// Resolve the next occurrence of `name` after the calling object
#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
pub fn symbol_next(name: &str) -> std::result::Result<Address, LoadError> {
    process_symbol(libc::RTLD_NEXT, "RTLD_NEXT", name)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
pub fn symbol_default(_name: &str) -> std::result::Result<Address, LoadError> {
    Err(LoadError::Unsupported("RTLD_DEFAULT lookups"))
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
pub fn symbol_next(_name: &str) -> std::result::Result<Address, LoadError> {
    Err(LoadError::Unsupported("RTLD_NEXT lookups"))
}

#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
fn process_symbol(
    handle: *mut c_void,
    scope: &str,
    name: &str,
) -> std::result::Result<Address, LoadError> {
    use std::ffi::{CStr, CString};

    let c_name = CString::new(name).map_err(|_| LoadError::InvalidName(name.to_string()))?;
    let _loader = loader_lock();
    // Safety: dlerror/dlsym are serialized by the loader lock
    let raw = unsafe {
        libc::dlerror();
        libc::dlsym(handle, c_name.as_ptr())
    };
    match Address::new(raw) {
        Some(address) => Ok(address),
        None => {
            let message = unsafe {
                let err = libc::dlerror();
                if err.is_null() {
                    "resolved to null".to_string()
                } else {
                    CStr::from_ptr(err).to_string_lossy().into_owned()
                }
            };
            Err(LoadError::SymbolNotFound {
                library: scope.to_string(),
                symbol: name.to_string(),
                message,
            })
        }
    }
}
