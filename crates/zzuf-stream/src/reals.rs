//! Real Symbol Storage
//!
//! Every intercepted stdio entry point is bound lazily to the next definition
//! in link order (`dlsym(RTLD_NEXT, ..)`), memoized in an atomic pointer.
//! Resolution is idempotent, so two threads racing on first use store the
//! same address and nothing else.

use libc::{c_char, c_int, c_long, c_void, off_t, size_t, ssize_t, FILE};
use std::ffi::CStr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Storage for a real libc function, resolved on first use.
pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    name: &'static CStr,
}

impl RealSymbol {
    pub const fn new(name: &'static CStr) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name.to_str().unwrap_or("?")
    }

    /// Resolve without failing; null when the host library lacks the symbol.
    pub fn probe(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let f = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr()) };
        if !f.is_null() {
            self.ptr.store(f, Ordering::Release);
        }
        f
    }

    /// Get the real function pointer. A missing symbol leaves no safe
    /// pass-through, so it aborts the process.
    pub fn get(&self) -> *mut c_void {
        let f = self.probe();
        if f.is_null() {
            fatal_missing(self.name());
        }
        f
    }
}

/// Write `msg` to stderr with a raw write and abort.
pub fn fatal(msg: &str) -> ! {
    unsafe {
        libc::write(2, msg.as_ptr() as *const c_void, msg.len());
        libc::abort();
    }
}

#[cold]
fn fatal_missing(name: &str) -> ! {
    let mut buf = [0u8; 160];
    let prefix = b"zzuf: cannot resolve real symbol ";
    let mut len = 0;
    for part in [&prefix[..], name.as_bytes(), b"\n"] {
        let n = part.len().min(buf.len() - len);
        buf[len..len + n].copy_from_slice(&part[..n]);
        len += n;
    }
    fatal(std::str::from_utf8(&buf[..len]).unwrap_or("zzuf: cannot resolve real symbol\n"))
}

/// Resolve a [`RealSymbol`] as a typed function pointer.
///
/// ```ignore
/// let fgetc = real!(REAL_FGETC, FgetcFn);
/// ```
#[macro_export]
macro_rules! real {
    ($sym:expr, $t:ty) => {
        std::mem::transmute::<*mut libc::c_void, $t>($sym.get())
    };
}

pub type FopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
pub type FreopenFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut FILE) -> *mut FILE;
pub type FcloseFn = unsafe extern "C" fn(*mut FILE) -> c_int;
pub type FseekFn = unsafe extern "C" fn(*mut FILE, c_long, c_int) -> c_int;
pub type FseekoFn = unsafe extern "C" fn(*mut FILE, off_t, c_int) -> c_int;
pub type RewindFn = unsafe extern "C" fn(*mut FILE);
pub type FreadFn = unsafe extern "C" fn(*mut c_void, size_t, size_t, *mut FILE) -> size_t;
pub type FgetcFn = unsafe extern "C" fn(*mut FILE) -> c_int;
pub type FgetsFn = unsafe extern "C" fn(*mut c_char, c_int, *mut FILE) -> *mut c_char;
pub type UngetcFn = unsafe extern "C" fn(c_int, *mut FILE) -> c_int;
pub type GetlineFn = unsafe extern "C" fn(*mut *mut c_char, *mut size_t, *mut FILE) -> ssize_t;
pub type GetdelimFn =
    unsafe extern "C" fn(*mut *mut c_char, *mut size_t, c_int, *mut FILE) -> ssize_t;
pub type FgetlnFn = unsafe extern "C" fn(*mut FILE, *mut size_t) -> *mut c_char;
pub type SrefillFn = unsafe extern "C" fn(*mut FILE) -> c_int;

// Global list of real symbols used by the interception layer
pub static REAL_FOPEN: RealSymbol = RealSymbol::new(c"fopen");
pub static REAL_FOPEN64: RealSymbol = RealSymbol::new(c"fopen64");
pub static REAL_FREOPEN: RealSymbol = RealSymbol::new(c"freopen");
pub static REAL_FCLOSE: RealSymbol = RealSymbol::new(c"fclose");
pub static REAL_FSEEK: RealSymbol = RealSymbol::new(c"fseek");
pub static REAL_FSEEKO: RealSymbol = RealSymbol::new(c"fseeko");
pub static REAL_REWIND: RealSymbol = RealSymbol::new(c"rewind");
pub static REAL_FREAD: RealSymbol = RealSymbol::new(c"fread");
pub static REAL_GETC: RealSymbol = RealSymbol::new(c"getc");
pub static REAL_FGETC: RealSymbol = RealSymbol::new(c"fgetc");
pub static REAL_IO_GETC: RealSymbol = RealSymbol::new(c"_IO_getc");
pub static REAL_FGETS: RealSymbol = RealSymbol::new(c"fgets");
pub static REAL_UNGETC: RealSymbol = RealSymbol::new(c"ungetc");
pub static REAL_GETLINE: RealSymbol = RealSymbol::new(c"getline");
pub static REAL_GETDELIM: RealSymbol = RealSymbol::new(c"getdelim");
pub static REAL___GETDELIM: RealSymbol = RealSymbol::new(c"__getdelim");
pub static REAL_FGETLN: RealSymbol = RealSymbol::new(c"fgetln");
pub static REAL___SREFILL: RealSymbol = RealSymbol::new(c"__srefill");
