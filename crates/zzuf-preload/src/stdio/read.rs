use super::stream;
use crate::state;
use libc::{c_int, c_void, size_t, FILE};
use zzuf_stream::real;
use zzuf_stream::reals::{
    FgetcFn, FreadFn, RealSymbol, UngetcFn, REAL_FGETC, REAL_FREAD, REAL_GETC, REAL_UNGETC,
};

#[no_mangle]
pub unsafe extern "C" fn fread(ptr: *mut c_void, size: size_t, nmemb: size_t, fp: *mut FILE) -> size_t {
    let real_fread = real!(REAL_FREAD, FreadFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.read_block(&mut s, ptr, size, nmemb, |s| {
            real_fread(ptr, size, nmemb, s.as_ptr())
        }),
        _ => real_fread(ptr, size, nmemb, fp),
    }
}

/// `getc`, `fgetc` and `_IO_getc` differ only in which real symbol they use.
#[inline(always)]
unsafe fn read_char_with(sym: &RealSymbol, fp: *mut FILE) -> c_int {
    let real_getc = real!(sym, FgetcFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.read_char(&mut s, |s| real_getc(s.as_ptr())),
        _ => real_getc(fp),
    }
}

#[no_mangle]
pub unsafe extern "C" fn getc(fp: *mut FILE) -> c_int {
    read_char_with(&REAL_GETC, fp)
}

#[no_mangle]
pub unsafe extern "C" fn fgetc(fp: *mut FILE) -> c_int {
    read_char_with(&REAL_FGETC, fp)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[no_mangle]
pub unsafe extern "C" fn _IO_getc(fp: *mut FILE) -> c_int {
    read_char_with(&zzuf_stream::reals::REAL_IO_GETC, fp)
}

#[no_mangle]
pub unsafe extern "C" fn ungetc(c: c_int, fp: *mut FILE) -> c_int {
    let real_ungetc = real!(REAL_UNGETC, UngetcFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.unread_char(&mut s, c, |s, c| real_ungetc(c, s.as_ptr())),
        _ => real_ungetc(c, fp),
    }
}
