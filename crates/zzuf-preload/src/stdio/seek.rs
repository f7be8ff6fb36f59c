use super::stream;
use crate::state;
use libc::{c_int, c_long, off_t, FILE};
use zzuf_stream::real;
use zzuf_stream::reals::{FseekFn, FseekoFn, RewindFn, REAL_FSEEK, REAL_FSEEKO, REAL_REWIND};

#[no_mangle]
pub unsafe extern "C" fn fseek(fp: *mut FILE, offset: c_long, whence: c_int) -> c_int {
    let real_fseek = real!(REAL_FSEEK, FseekFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.seek(&mut s, offset as i64, whence, |s| {
            real_fseek(s.as_ptr(), offset, whence)
        }),
        _ => real_fseek(fp, offset, whence),
    }
}

#[no_mangle]
pub unsafe extern "C" fn fseeko(fp: *mut FILE, offset: off_t, whence: c_int) -> c_int {
    let real_fseeko = real!(REAL_FSEEKO, FseekoFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.seek(&mut s, offset as i64, whence, |s| {
            real_fseeko(s.as_ptr(), offset, whence)
        }),
        _ => real_fseeko(fp, offset, whence),
    }
}

#[no_mangle]
pub unsafe extern "C" fn rewind(fp: *mut FILE) {
    let real_rewind = real!(REAL_REWIND, RewindFn);
    match (state::active(), stream(fp)) {
        (Some(zz), Some(mut s)) => zz.rewind(&mut s, |s| real_rewind(s.as_ptr())),
        _ => real_rewind(fp),
    }
}
