//! Exported stdio entry points.
//!
//! Every function here has the exact C signature of the libc function it
//! shadows. A null stream, an unarmed layer and an unwatched descriptor all
//! reduce to a bare call to the real function.

pub mod line;
pub mod open;
pub mod read;
pub mod seek;

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub mod bsd;

use libc::FILE;
use zzuf_stream::LibcStream;

#[inline(always)]
pub(crate) unsafe fn stream(fp: *mut FILE) -> Option<LibcStream> {
    if fp.is_null() {
        None
    } else {
        Some(LibcStream::new(fp))
    }
}
