//! Shared test utilities
//!
//! Locates and opens the `dlbind-testlib` shared library built alongside the
//! integration tests.

#![allow(dead_code)]

use dlbind_runtime::ffi::{FunctionSignature, LibraryHandle, OpenFlags, TypeDescriptor, Value};
use std::env;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the fixture library location
pub const TESTLIB_ENV: &str = "DLBIND_TESTLIB";

/// Path of the compiled fixture library
///
/// `DLBIND_TESTLIB` wins when set. Otherwise the directory holding the test
/// executable (`target/<profile>/deps`) and its parent are searched, newest
/// match first.
pub fn testlib_path() -> PathBuf {
    if let Some(path) = env::var_os(TESTLIB_ENV) {
        return PathBuf::from(path);
    }

    let exe = env::current_exe().expect("test executable path");
    let deps = exe.parent().expect("test executable directory");
    let prefix = format!("{}dlbind_testlib", DLL_PREFIX);

    let mut found: Vec<(PathBuf, std::time::SystemTime)> = [Some(deps), deps.parent()]
        .into_iter()
        .flatten()
        .filter_map(|dir| fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(|e| e.ok()))
        .map(|entry| entry.path())
        .filter(|path| is_testlib(path, &prefix))
        .filter_map(|path| {
            let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((path, modified))
        })
        .collect();

    found.sort_by(|a, b| b.1.cmp(&a.1));
    match found.into_iter().next() {
        Some((path, _)) => path,
        None => panic!(
            "{}dlbind_testlib{} not found next to {}; build the workspace or set {}",
            DLL_PREFIX,
            DLL_SUFFIX,
            exe.display(),
            TESTLIB_ENV
        ),
    }
}

fn is_testlib(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(prefix) && n.ends_with(DLL_SUFFIX))
        .unwrap_or(false)
}

/// Open the fixture library with immediate binding
pub fn open_testlib() -> LibraryHandle {
    let path = testlib_path();
    let path = path.to_str().expect("UTF-8 fixture path");
    unsafe { LibraryHandle::open(path, OpenFlags::NOW) }.expect("open fixture library")
}

/// Bind `name` from the fixture and call it once
pub fn call(lib: &LibraryHandle, name: &str, signature: FunctionSignature, args: &mut [Value]) -> Option<Value> {
    let function = unsafe { lib.bind_symbol(name, signature) }.expect("bind fixture function");
    unsafe { function.invoke(args) }.expect("invoke fixture function")
}

/// `fn(int, int) -> int`
pub fn int_binary() -> FunctionSignature {
    FunctionSignature::new(vec![TypeDescriptor::c_int(); 2]).returning(TypeDescriptor::c_int())
}
