//! Loaded artifacts.
//!
//! A shared library stays loaded for as long as any [`Artifact`] or
//! [`ClassBinding`] built from it is alive. Function pointers are copied out
//! of their `Symbol`s once, at load time, and never outlive the `Library`
//! stored beside them.

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};

use common::Release;
use forge::abi::{
    cpp_type_symbol, drop_symbol, get_symbol, probe_kind, probe_symbol, set_symbol, tag, CppTypeFn, DropFn,
    EntryFn, EnumCountFn, EnumEntriesFn, GetFn, ProbeFn, SetFn, ENUM_COUNT_SYMBOL, ENUM_ENTRIES_SYMBOL, MAX_EXTENTS,
    STATUS_ARITY, STATUS_NATIVE_ERROR, STATUS_OK, STATUS_UNKNOWN_FIELD,
};
use forge::RawValue;
use libloading::Library;
use tracing::{debug, warn};

use crate::index::entry_kind;
use crate::VaultError;

/// Copies a C string owned by the native side.
fn read_c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: every string crossing the ABI is NUL terminated and stays
    // valid until the next call on the same thread.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn open_library(path: &Path) -> Result<Library, VaultError> {
    // SAFETY: artifacts are built from generated sources whose static
    // initializers only touch the bound library.
    unsafe { Library::new(path) }.map_err(|e| VaultError::Load {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Resolves `name` and copies the function pointer out of the symbol.
///
/// # Safety
/// `T` must match the exported symbol's signature.
unsafe fn symbol<T: Copy>(library: &Library, path: &Path, name: &str) -> Result<T, VaultError> {
    let c_name = CString::new(name).map_err(|e| VaultError::Load {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let sym = library.get::<T>(c_name.as_bytes_with_nul()).map_err(|e| VaultError::Load {
        path: path.display().to_string(),
        reason: format!("symbol `{name}`: {e}"),
    })?;
    Ok(*sym)
}

/// A native object reference crossing back into the host.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHandle {
    pub ptr: *mut c_void,
    /// The native side returned a pointer it still owns.
    pub is_pointer: bool,
    /// Compiler spelling of the pointee type.
    pub type_name: String,
    /// Extents, for types that expose `rank` and `extent(i)`.
    pub extents: Vec<usize>,
}

/// A decoded `bind_value`.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeResult {
    Void,
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    Enum { type_name: String, value: i64 },
    Handle(RawHandle),
}

impl NativeResult {
    /// Decodes `raw` as written by a call that returned `status`.
    pub fn from_raw(raw: &RawValue, status: i32, target: &str) -> Result<Self, VaultError> {
        match status {
            STATUS_OK => {}
            STATUS_NATIVE_ERROR => return Err(VaultError::Native(read_c_str(raw.s))),
            STATUS_ARITY => return Err(VaultError::Arity(target.to_string())),
            other => return Err(VaultError::Status { symbol: target.to_string(), status: other }),
        }
        Ok(match raw.tag {
            tag::VOID => NativeResult::Void,
            tag::INT => NativeResult::Int(raw.i),
            tag::REAL => NativeResult::Real(raw.d),
            tag::BOOL => NativeResult::Bool(raw.i != 0),
            tag::TEXT => NativeResult::Text(read_c_str(raw.s)),
            tag::ENUM => NativeResult::Enum { type_name: read_c_str(raw.type_name), value: raw.i },
            tag::HANDLE => {
                let rank = usize::try_from(raw.rank).unwrap_or(0).min(MAX_EXTENTS);
                NativeResult::Handle(RawHandle {
                    ptr: raw.p,
                    is_pointer: raw.is_pointer != 0,
                    type_name: read_c_str(raw.type_name),
                    extents: raw.extents[..rank].iter().map(|&e| usize::try_from(e).unwrap_or(0)).collect(),
                })
            }
            tag::ERROR => return Err(VaultError::Native(read_c_str(raw.s))),
            other => return Err(VaultError::Status { symbol: target.to_string(), status: other }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Void,
    Primitive,
    Class,
}

impl ProbeKind {
    pub fn index_kind(self) -> u8 {
        match self {
            ProbeKind::Void => entry_kind::VOID,
            ProbeKind::Primitive => entry_kind::PRIMITIVE,
            ProbeKind::Class => entry_kind::CLASS,
        }
    }
}

/// Return type of an entry point, as deduced by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnProbe {
    pub kind: ProbeKind,
    pub type_name: String,
}

/// One compiled call wrapper.
#[derive(Debug)]
pub struct Artifact {
    pub hash: String,
    pub path: PathBuf,
    entry: EntryFn,
    return_probe: ReturnProbe,
    _library: Library,
}

impl Artifact {
    /// Loads `path` and runs the return-type probe once.
    pub fn load(hash: &str, path: &Path) -> Result<Self, VaultError> {
        let library = open_library(path)?;
        // SAFETY: the symbol types mirror the declarations in the prelude.
        let (entry, probe) = unsafe {
            (
                symbol::<EntryFn>(&library, path, hash)?,
                symbol::<ProbeFn>(&library, path, &probe_symbol(hash))?,
            )
        };
        // SAFETY: the probe takes no arguments and returns a static name.
        let raw = unsafe { probe() };
        let kind = match raw.kind {
            probe_kind::VOID => ProbeKind::Void,
            probe_kind::PRIMITIVE => ProbeKind::Primitive,
            probe_kind::CLASS => ProbeKind::Class,
            other => {
                return Err(VaultError::Load {
                    path: path.display().to_string(),
                    reason: format!("unknown probe kind {other}"),
                })
            }
        };
        let return_probe = ReturnProbe { kind, type_name: read_c_str(raw.type_name) };
        debug!(artifact = hash, returns = %return_probe.type_name, "artifact loaded");
        Ok(Self { hash: hash.to_string(), path: path.to_path_buf(), entry, return_probe, _library: library })
    }

    pub fn return_probe(&self) -> &ReturnProbe {
        &self.return_probe
    }

    /// Calls the entry point. Pointers inside `args` must stay valid for the call.
    pub fn invoke(&self, args: &[RawValue]) -> Result<NativeResult, VaultError> {
        let mut out = RawValue::default();
        // SAFETY: `args` and `out` are valid for the duration of the call.
        let status = unsafe { (self.entry)(args.as_ptr(), args.len(), &mut out) };
        NativeResult::from_raw(&out, status, &self.hash)
    }
}

/// Drop and field accessors for one fully qualified class.
#[derive(Debug)]
pub struct ClassBinding {
    pub qualified: String,
    pub hash: String,
    cpp_type: String,
    drop_fn: DropFn,
    get_fn: GetFn,
    set_fn: SetFn,
    _library: Library,
}

impl ClassBinding {
    pub fn load(hash: &str, qualified: &str, path: &Path) -> Result<Self, VaultError> {
        let library = open_library(path)?;
        // SAFETY: the symbol types mirror the declarations in the prelude.
        let (drop_fn, get_fn, set_fn, cpp_type_fn) = unsafe {
            (
                symbol::<DropFn>(&library, path, &drop_symbol(hash))?,
                symbol::<GetFn>(&library, path, &get_symbol(hash))?,
                symbol::<SetFn>(&library, path, &set_symbol(hash))?,
                symbol::<CppTypeFn>(&library, path, &cpp_type_symbol(hash))?,
            )
        };
        // SAFETY: returns a pointer to a static string.
        let cpp_type = read_c_str(unsafe { cpp_type_fn() });
        Ok(Self {
            qualified: qualified.to_string(),
            hash: hash.to_string(),
            cpp_type,
            drop_fn,
            get_fn,
            set_fn,
            _library: library,
        })
    }

    /// Compiler spelling of the registered class.
    pub fn cpp_type(&self) -> &str {
        &self.cpp_type
    }

    pub fn get_field(&self, ptr: *mut c_void, field: &str) -> Result<NativeResult, VaultError> {
        let name = self.field_name(field)?;
        let mut out = RawValue::default();
        // SAFETY: `ptr` points at a live instance of this class.
        let status = unsafe { (self.get_fn)(ptr, name.as_ptr(), &mut out) };
        match status {
            STATUS_UNKNOWN_FIELD => Err(self.unknown_field(field)),
            STATUS_NATIVE_ERROR => Err(self.accessor_failed("reading", field)),
            other => NativeResult::from_raw(&out, other, &format!("{}.{field}", self.qualified)),
        }
    }

    pub fn set_field(&self, ptr: *mut c_void, field: &str, value: &RawValue) -> Result<(), VaultError> {
        let name = self.field_name(field)?;
        // SAFETY: `ptr` points at a live instance of this class and `value`
        // is valid for the duration of the call.
        let status = unsafe { (self.set_fn)(ptr, name.as_ptr(), value) };
        match status {
            STATUS_OK => Ok(()),
            STATUS_UNKNOWN_FIELD => Err(self.unknown_field(field)),
            STATUS_NATIVE_ERROR => Err(self.accessor_failed("assigning", field)),
            other => Err(VaultError::Status { symbol: format!("{}.{field}", self.qualified), status: other }),
        }
    }

    fn accessor_failed(&self, action: &str, field: &str) -> VaultError {
        VaultError::Native(format!("exception while {action} `{}.{field}`", self.qualified))
    }

    fn field_name(&self, field: &str) -> Result<CString, VaultError> {
        CString::new(field).map_err(|_| self.unknown_field(field))
    }

    fn unknown_field(&self, field: &str) -> VaultError {
        VaultError::UnknownField { class: self.qualified.clone(), field: field.to_string() }
    }
}

impl Release for ClassBinding {
    fn release(&self, ptr: *mut c_void) {
        // SAFETY: only owned handles created by this class's wrappers reach here.
        unsafe { (self.drop_fn)(ptr) }
    }
}

/// One row of the consolidated enum table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    /// Compiler spelling of the enum type.
    pub type_name: String,
    pub enumerator: String,
    pub value: i64,
}

/// Reads every row of a compiled enum table. The library is unloaded afterwards.
pub fn read_enum_table(path: &Path) -> Result<Vec<EnumEntry>, VaultError> {
    let library = open_library(path)?;
    // SAFETY: the symbol types mirror the declarations in the prelude.
    let (count, entries) = unsafe {
        (
            symbol::<EnumCountFn>(&library, path, ENUM_COUNT_SYMBOL)?,
            symbol::<EnumEntriesFn>(&library, path, ENUM_ENTRIES_SYMBOL)?,
        )
    };
    // SAFETY: the table is a static array of `count()` entries.
    let rows = unsafe {
        let n = count();
        let base = entries();
        if base.is_null() {
            warn!(path = %path.display(), "enum table is empty");
            &[][..]
        } else {
            std::slice::from_raw_parts(base, n)
        }
    };
    Ok(rows
        .iter()
        .map(|row| EnumEntry {
            type_name: read_c_str(row.type_name),
            enumerator: read_c_str(row.enumerator),
            value: row.value,
        })
        .collect())
}
