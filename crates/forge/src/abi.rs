//! # Native Binding ABI
//!
//! Every generated artifact includes `bind_abi.hpp` and talks to the host
//! through the plain C structs declared there. The `#[repr(C)]` types in this
//! module mirror them field for field.
//!
//! ## Entry points
//! - `int <hash>(const bind_value *args, size_t nargs, bind_value *out)`:
//!   `0` on success, `1` when the native call threw (message in `out->s`),
//!   `2` on an argument count mismatch.
//! - `bind_probe <hash>_probe()`: kind and compiler-spelled name of the
//!   call's deduced return type.
//! - class registrations export `<hash>_drop`, `<hash>_get`, `<hash>_set`
//!   and `<hash>_cpp_type`.
//! - the enum registration exports `_kernel_enums_count` and
//!   `_kernel_enums_entries`.

use std::ffi::{c_char, c_int, c_void};
use std::io;
use std::path::Path;

/// File name of the prelude inside a build directory.
pub const PRELUDE_FILE: &str = "bind_abi.hpp";

/// Artifact stem of the consolidated enum registration.
pub const ENUM_ARTIFACT: &str = "_kernel_enums";
pub const ENUM_COUNT_SYMBOL: &str = "_kernel_enums_count";
pub const ENUM_ENTRIES_SYMBOL: &str = "_kernel_enums_entries";

pub const STATUS_OK: c_int = 0;
pub const STATUS_NATIVE_ERROR: c_int = 1;
pub const STATUS_ARITY: c_int = 2;
/// Returned by field accessors for a field the class does not expose.
pub const STATUS_UNKNOWN_FIELD: c_int = -1;

/// Discriminant of `bind_value::tag`.
pub mod tag {
    pub const VOID: i32 = 0;
    pub const INT: i32 = 1;
    pub const REAL: i32 = 2;
    pub const BOOL: i32 = 3;
    pub const TEXT: i32 = 4;
    pub const HANDLE: i32 = 5;
    pub const ENUM: i32 = 6;
    pub const ERROR: i32 = 7;
}

/// Discriminant of `bind_probe::kind`.
pub mod probe_kind {
    pub const VOID: i32 = 0;
    pub const PRIMITIVE: i32 = 1;
    pub const CLASS: i32 = 2;
}

pub const MAX_EXTENTS: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawValue {
    pub tag: i32,
    pub is_pointer: i32,
    pub i: i64,
    pub d: f64,
    pub s: *const c_char,
    pub p: *mut c_void,
    pub type_name: *const c_char,
    pub rank: i32,
    pub extents: [i64; MAX_EXTENTS],
}

impl Default for RawValue {
    fn default() -> Self {
        Self {
            tag: tag::VOID,
            is_pointer: 0,
            i: 0,
            d: 0.0,
            s: std::ptr::null(),
            p: std::ptr::null_mut(),
            type_name: std::ptr::null(),
            rank: 0,
            extents: [0; MAX_EXTENTS],
        }
    }
}

impl RawValue {
    pub fn int(v: i64) -> Self {
        Self { tag: tag::INT, i: v, ..Self::default() }
    }

    pub fn real(v: f64) -> Self {
        Self { tag: tag::REAL, d: v, ..Self::default() }
    }

    pub fn boolean(v: bool) -> Self {
        Self { tag: tag::BOOL, i: i64::from(v), ..Self::default() }
    }

    pub fn enumeration(v: i64) -> Self {
        Self { tag: tag::ENUM, i: v, ..Self::default() }
    }

    /// Text argument. The pointer must outlive the call.
    pub fn text(s: *const c_char) -> Self {
        Self { tag: tag::TEXT, s, ..Self::default() }
    }

    pub fn handle(p: *mut c_void) -> Self {
        Self { tag: tag::HANDLE, p, ..Self::default() }
    }

    pub fn pointer_tagged(mut self) -> Self {
        self.is_pointer = 1;
        self
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProbe {
    pub kind: i32,
    pub type_name: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEnumEntry {
    pub type_name: *const c_char,
    pub enumerator: *const c_char,
    pub value: i64,
}

pub type EntryFn = unsafe extern "C" fn(*const RawValue, usize, *mut RawValue) -> c_int;
pub type ProbeFn = unsafe extern "C" fn() -> RawProbe;
pub type DropFn = unsafe extern "C" fn(*mut c_void);
pub type CppTypeFn = unsafe extern "C" fn() -> *const c_char;
pub type GetFn = unsafe extern "C" fn(*mut c_void, *const c_char, *mut RawValue) -> c_int;
pub type SetFn = unsafe extern "C" fn(*mut c_void, *const c_char, *const RawValue) -> c_int;
pub type EnumCountFn = unsafe extern "C" fn() -> usize;
pub type EnumEntriesFn = unsafe extern "C" fn() -> *const RawEnumEntry;

pub fn probe_symbol(hash: &str) -> String {
    format!("{hash}_probe")
}

pub fn drop_symbol(hash: &str) -> String {
    format!("{hash}_drop")
}

pub fn get_symbol(hash: &str) -> String {
    format!("{hash}_get")
}

pub fn set_symbol(hash: &str) -> String {
    format!("{hash}_set")
}

pub fn cpp_type_symbol(hash: &str) -> String {
    format!("{hash}_cpp_type")
}

/// Writes `bind_abi.hpp` into `dir`, leaving an identical file untouched.
pub fn write_prelude(dir: &Path) -> io::Result<()> {
    let path = dir.join(PRELUDE_FILE);
    if std::fs::read_to_string(&path).is_ok_and(|existing| existing == ABI_PRELUDE) {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(path, ABI_PRELUDE)
}

/// Contents of `bind_abi.hpp`. Requires C++17 and `__PRETTY_FUNCTION__` (GCC, Clang).
pub const ABI_PRELUDE: &str = r#"// Generated. Shared by every binding artifact in this directory.
#pragma once

#include <cstddef>
#include <cstdint>
#include <cstring>
#include <exception>
#include <stdexcept>
#include <string>
#include <type_traits>
#include <utility>

#if defined(_WIN32)
#define BIND_EXPORT __declspec(dllexport)
#else
#define BIND_EXPORT __attribute__((visibility("default")))
#endif

extern "C" {

enum {
    BIND_VOID = 0,
    BIND_INT = 1,
    BIND_REAL = 2,
    BIND_BOOL = 3,
    BIND_TEXT = 4,
    BIND_HANDLE = 5,
    BIND_ENUM = 6,
    BIND_ERROR = 7
};

enum {
    BIND_PROBE_VOID = 0,
    BIND_PROBE_PRIMITIVE = 1,
    BIND_PROBE_CLASS = 2
};

typedef struct bind_value {
    int32_t tag;
    int32_t is_pointer;
    int64_t i;
    double d;
    const char *s;
    void *p;
    const char *type_name;
    int32_t rank;
    int64_t extents[8];
} bind_value;

typedef struct bind_probe {
    int32_t kind;
    const char *type_name;
} bind_probe;

typedef struct bind_enum_entry {
    const char *type_name;
    const char *enumerator;
    int64_t value;
} bind_enum_entry;

}

namespace bind {

namespace detail {

inline std::string extract_type_name(const char *pretty) {
    std::string text(pretty);
    std::size_t start = text.find("T = ");
    if (start == std::string::npos) {
        return text;
    }
    start += 4;
    int depth = 0;
    std::size_t end = start;
    for (; end < text.size(); ++end) {
        char c = text[end];
        if (c == '<' || c == '(' || c == '[') {
            ++depth;
        } else if (c == '>' || c == ')') {
            --depth;
        } else if (c == ']') {
            if (depth == 0) {
                break;
            }
            --depth;
        } else if (c == ';' && depth == 0) {
            break;
        }
    }
    return text.substr(start, end - start);
}

inline std::string &text_slot() {
    thread_local std::string slot;
    return slot;
}

template <typename U, typename = void>
struct has_extents : std::false_type {};

template <typename U>
struct has_extents<U, std::void_t<decltype(U::rank), decltype(std::declval<const U &>().extent(0))>>
    : std::true_type {};

template <typename U>
void fill_extents(bind_value *out, const U &value) {
    if constexpr (has_extents<U>::value) {
        out->rank = static_cast<int32_t>(U::rank);
        for (int32_t r = 0; r < out->rank && r < 8; ++r) {
            out->extents[r] = static_cast<int64_t>(value.extent(r));
        }
    } else {
        (void)out;
        (void)value;
    }
}

}  // namespace detail

template <typename T>
const char *type_name() {
    static const std::string name = detail::extract_type_name(__PRETTY_FUNCTION__);
    return name.c_str();
}

inline void set_error(bind_value *out, const char *message) {
    *out = bind_value{};
    detail::text_slot() = message;
    out->tag = BIND_ERROR;
    out->s = detail::text_slot().c_str();
}

template <typename T>
T read(const bind_value &v) {
    using U = std::remove_cv_t<T>;
    if constexpr (std::is_same_v<U, bool>) {
        return v.i != 0;
    } else if constexpr (std::is_enum_v<U>) {
        return static_cast<U>(v.i);
    } else if constexpr (std::is_integral_v<U>) {
        return v.tag == BIND_REAL ? static_cast<U>(v.d) : static_cast<U>(v.i);
    } else if constexpr (std::is_floating_point_v<U>) {
        return v.tag == BIND_INT ? static_cast<U>(v.i) : static_cast<U>(v.d);
    } else if constexpr (std::is_same_v<U, std::string>) {
        return std::string(v.s != nullptr ? v.s : "");
    } else {
        if (v.p == nullptr) {
            throw std::invalid_argument("null native handle");
        }
        return *static_cast<U *>(v.p);
    }
}

template <typename T>
T &deref(const bind_value &v) {
    if (v.p == nullptr) {
        throw std::invalid_argument("null native handle");
    }
    return *static_cast<T *>(v.p);
}

template <typename T>
T *pointer(const bind_value &v) {
    return static_cast<T *>(v.p);
}

template <typename T>
void ret(bind_value *out, T &&value) {
    using U = std::remove_cv_t<std::remove_reference_t<T>>;
    *out = bind_value{};
    if constexpr (std::is_same_v<U, bool>) {
        out->tag = BIND_BOOL;
        out->i = value ? 1 : 0;
    } else if constexpr (std::is_enum_v<U>) {
        out->tag = BIND_ENUM;
        out->i = static_cast<int64_t>(value);
        out->type_name = type_name<U>();
    } else if constexpr (std::is_integral_v<U>) {
        out->tag = BIND_INT;
        out->i = static_cast<int64_t>(value);
    } else if constexpr (std::is_floating_point_v<U>) {
        out->tag = BIND_REAL;
        out->d = static_cast<double>(value);
    } else if constexpr (std::is_same_v<U, std::string>) {
        detail::text_slot() = value;
        out->tag = BIND_TEXT;
        out->s = detail::text_slot().c_str();
    } else if constexpr (std::is_same_v<U, const char *> || std::is_same_v<U, char *>) {
        detail::text_slot() = value != nullptr ? value : "";
        out->tag = BIND_TEXT;
        out->s = detail::text_slot().c_str();
    } else if constexpr (std::is_pointer_v<U>) {
        using P = std::remove_cv_t<std::remove_pointer_t<U>>;
        out->tag = BIND_HANDLE;
        out->is_pointer = 1;
        out->p = const_cast<void *>(static_cast<const void *>(value));
        out->type_name = type_name<P>();
        if constexpr (!std::is_void_v<P>) {
            if (value != nullptr) {
                detail::fill_extents(out, *value);
            }
        }
    } else if constexpr (std::is_array_v<U> || !std::is_constructible_v<U, T &&>) {
        set_error(out, "value cannot be returned by copy");
    } else {
        U *copy = new U(std::forward<T>(value));
        out->tag = BIND_HANDLE;
        out->p = copy;
        out->type_name = type_name<U>();
        detail::fill_extents(out, *copy);
    }
}

// Class-typed fields come back as a pointer into the object that holds them.
template <typename F>
void ret_field(bind_value *out, F &field) {
    using U = std::remove_cv_t<F>;
    if constexpr (std::is_arithmetic_v<U> || std::is_enum_v<U> || std::is_same_v<U, std::string> ||
                  std::is_pointer_v<U> || std::is_array_v<U>) {
        ret(out, field);
    } else {
        ret(out, &field);
    }
}

template <typename F>
void assign(F &field, const bind_value &value) {
    if constexpr (std::is_copy_assignable_v<F> && std::is_copy_constructible_v<F> &&
                  !std::is_array_v<F>) {
        field = read<F>(value);
    } else {
        (void)field;
        (void)value;
        throw std::logic_error("field is not assignable");
    }
}

template <typename T>
bind_probe describe() {
    using U = std::remove_cv_t<std::remove_reference_t<T>>;
    if constexpr (std::is_arithmetic_v<U> || std::is_enum_v<U> || std::is_same_v<U, std::string> ||
                  std::is_same_v<U, const char *> || std::is_same_v<U, char *> ||
                  std::is_same_v<U, void *> || std::is_same_v<U, const void *>) {
        return bind_probe{BIND_PROBE_PRIMITIVE, type_name<U>()};
    } else if constexpr (std::is_pointer_v<U>) {
        return bind_probe{BIND_PROBE_CLASS, type_name<std::remove_cv_t<std::remove_pointer_t<U>>>()};
    } else {
        return bind_probe{BIND_PROBE_CLASS, type_name<U>()};
    }
}

inline bind_probe describe_void() {
    return bind_probe{BIND_PROBE_VOID, "void"};
}

template <typename T>
bind_probe probe() {
    if constexpr (std::is_void_v<T>) {
        return describe_void();
    } else {
        return describe<T>();
    }
}

template <typename F>
int invoke(std::size_t expected, std::size_t given, bind_value *out, F &&body) {
    if (expected != given) {
        set_error(out, "argument count mismatch");
        return 2;
    }
    try {
        if constexpr (std::is_void_v<decltype(body())>) {
            body();
            *out = bind_value{};
            out->tag = BIND_VOID;
        } else {
            ret(out, body());
        }
        return 0;
    } catch (const std::exception &e) {
        set_error(out, e.what());
        return 1;
    } catch (...) {
        set_error(out, "unknown native exception");
        return 1;
    }
}

template <typename F>
int guard(F &&body) {
    try {
        return body();
    } catch (...) {
        return 1;
    }
}

}  // namespace bind
"#;
