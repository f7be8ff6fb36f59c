use super::stream;
use crate::state;
use libc::{c_char, c_int, size_t, ssize_t, FILE};
use zzuf_stream::real;
use zzuf_stream::reals::{
    FgetsFn, GetdelimFn, GetlineFn, RealSymbol, REAL_FGETS, REAL_GETDELIM, REAL_GETLINE,
};

#[no_mangle]
pub unsafe extern "C" fn fgets(s: *mut c_char, size: c_int, fp: *mut FILE) -> *mut c_char {
    let real_fgets = real!(REAL_FGETS, FgetsFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut raw)) => {
            zz.read_string(&mut raw, s, size, |raw| real_fgets(s, size, raw.as_ptr()))
        }
        _ => real_fgets(s, size, fp),
    }
}

#[no_mangle]
pub unsafe extern "C" fn getline(
    lineptr: *mut *mut c_char,
    n: *mut size_t,
    fp: *mut FILE,
) -> ssize_t {
    let real_getline = real!(REAL_GETLINE, GetlineFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.read_delimited(&mut s, lineptr, n, b'\n' as c_int, |s| {
            real_getline(lineptr, n, s.as_ptr())
        }),
        _ => real_getline(lineptr, n, fp),
    }
}

unsafe fn getdelim_with(
    sym: &RealSymbol,
    lineptr: *mut *mut c_char,
    n: *mut size_t,
    delim: c_int,
    fp: *mut FILE,
) -> ssize_t {
    let real_getdelim = real!(sym, GetdelimFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.read_delimited(&mut s, lineptr, n, delim, |s| {
            real_getdelim(lineptr, n, delim, s.as_ptr())
        }),
        _ => real_getdelim(lineptr, n, delim, fp),
    }
}

#[no_mangle]
pub unsafe extern "C" fn getdelim(
    lineptr: *mut *mut c_char,
    n: *mut size_t,
    delim: c_int,
    fp: *mut FILE,
) -> ssize_t {
    getdelim_with(&REAL_GETDELIM, lineptr, n, delim, fp)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[no_mangle]
pub unsafe extern "C" fn __getdelim(
    lineptr: *mut *mut c_char,
    n: *mut size_t,
    delim: c_int,
    fp: *mut FILE,
) -> ssize_t {
    getdelim_with(&zzuf_stream::reals::REAL___GETDELIM, lineptr, n, delim, fp)
}
