//! # zzuf-preload
//!
//! LD_PRELOAD / DYLD_INSERT_LIBRARIES library that corrupts what a host
//! program reads through C stdio.
//!
//! The exported symbols shadow libc's. Each one resolves the real function
//! through `dlsym(RTLD_NEXT, ..)` and hands it to the process-wide
//! [`Interceptor`](zzuf_stream::Interceptor), which falls back to a bare
//! pass-through until the load-time constructor has armed it.

// Allow unsafe FFI functions without safety docs - these are inherently unsafe C ABI
#![allow(clippy::missing_safety_doc)]

pub mod state;
pub mod stdio;

/// Load-time constructor for ELF platforms (.init_array).
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
#[link_section = ".init_array"]
#[used]
pub static ZZUF_INIT: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        crate::state::init();
    }
    init
};

/// Load-time constructor for macOS (__mod_init_func).
#[cfg(target_os = "macos")]
#[link_section = "__DATA,__mod_init_func"]
#[used]
pub static ZZUF_INIT: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        crate::state::init();
    }
    init
};
