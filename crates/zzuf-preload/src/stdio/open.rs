use crate::state;
use libc::{c_char, c_int, FILE};
use std::ffi::CStr;
use zzuf_stream::real;
use zzuf_stream::reals::{
    FcloseFn, FopenFn, FreopenFn, RealSymbol, REAL_FCLOSE, REAL_FOPEN, REAL_FREOPEN,
};

#[inline(always)]
unsafe fn path_arg<'a>(path: *const c_char) -> Option<&'a CStr> {
    (!path.is_null()).then(|| CStr::from_ptr(path))
}

unsafe fn open_with(
    func: &str,
    sym: &RealSymbol,
    path: *const c_char,
    mode: *const c_char,
) -> *mut FILE {
    let real_fopen = real!(sym, FopenFn);
    let ret = real_fopen(path, mode);
    if !ret.is_null() {
        if let Some(zz) = state::active() {
            zz.after_open(func, path_arg(path), libc::fileno(ret));
        }
    }
    ret
}

#[no_mangle]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    open_with("fopen", &REAL_FOPEN, path, mode)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[no_mangle]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    open_with("fopen64", &zzuf_stream::reals::REAL_FOPEN64, path, mode)
}

#[no_mangle]
pub unsafe extern "C" fn freopen(
    path: *const c_char,
    mode: *const c_char,
    fp: *mut FILE,
) -> *mut FILE {
    let real_freopen = real!(REAL_FREOPEN, FreopenFn);
    let Some(zz) = state::active() else {
        return real_freopen(path, mode, fp);
    };

    let old_fd: c_int = if fp.is_null() { -1 } else { libc::fileno(fp) };
    let mut ret = std::ptr::null_mut();
    zz.reopen(path_arg(path), old_fd, || {
        ret = real_freopen(path, mode, fp);
        if ret.is_null() {
            -1
        } else {
            libc::fileno(ret)
        }
    });
    ret
}

#[no_mangle]
pub unsafe extern "C" fn fclose(fp: *mut FILE) -> c_int {
    let real_fclose = real!(REAL_FCLOSE, FcloseFn);
    match (state::active(), super::stream(fp)) {
        (Some(zz), Some(mut s)) => zz.close(&mut s, |s| real_fclose(s.as_ptr())),
        _ => real_fclose(fp),
    }
}
