//! Entry points that only exist in BSD-derived libcs.

use super::stream;
use crate::state;
use libc::{c_char, c_int, c_short, size_t, FILE};
use zzuf_stream::real;
use zzuf_stream::reals::{FgetlnFn, SrefillFn, REAL_FGETLN, REAL___SREFILL};

/// Leading fields of the BSD `FILE` structure.
#[repr(C)]
#[allow(dead_code)]
struct SFileHead {
    /// Current position in the buffer.
    p: *mut u8,
    /// Read space left.
    r: c_int,
    w: c_int,
    flags: c_short,
    file: c_short,
}

#[no_mangle]
pub unsafe extern "C" fn fgetln(fp: *mut FILE, len: *mut size_t) -> *mut c_char {
    let real_fgetln = real!(REAL_FGETLN, FgetlnFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.read_bsd_line(&mut s, len, |s| real_fgetln(s.as_ptr(), len)),
        _ => real_fgetln(fp, len),
    }
}

#[no_mangle]
pub unsafe extern "C" fn __srefill(fp: *mut FILE) -> c_int {
    let real_srefill = real!(REAL___SREFILL, SrefillFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.refill(
            &mut s,
            |s| real_srefill(s.as_ptr()),
            |s| {
                let head = s.as_ptr() as *const SFileHead;
                ((*head).p, (*head).r.max(0) as usize)
            },
        ),
        _ => real_srefill(fp),
    }
}
