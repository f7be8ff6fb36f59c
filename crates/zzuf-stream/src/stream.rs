//! The raw stream capability.
//!
//! Composite operations and position queries go through [`RawStream`], which
//! only ever reaches the *real* library: never the layer's own exported
//! entry points. That is what keeps the descriptor critical section from
//! being re-entered and bytes from being corrupted twice.

use crate::real;
use crate::reals::{FgetcFn, REAL_FGETC};
use libc::{c_int, FILE};

pub const EOF: c_int = -1;

pub trait RawStream {
    /// Descriptor backing the stream, or -1.
    fn fd(&self) -> c_int;

    /// Real elemental character read. Returns [`EOF`] at end of stream or on
    /// error, with the stream's flags set exactly as the library sets them.
    fn getc(&mut self) -> c_int;

    /// The stream's error indicator.
    fn error(&mut self) -> bool;

    /// The stream's end-of-file indicator.
    fn eof(&mut self) -> bool;

    /// Real logical cursor. Values `<= 0` after a read mean the position is
    /// unusable (pipes, terminals). Must leave `errno` untouched.
    fn tell(&mut self) -> i64;

    /// Position of the underlying descriptor, or -1. Must leave `errno`
    /// untouched.
    fn descriptor_offset(&mut self) -> i64;
}

/// A real stdio `FILE*`.
pub struct LibcStream {
    file: *mut FILE,
}

impl LibcStream {
    /// # Safety
    /// `file` must be a valid, open stream for as long as this value is used.
    pub unsafe fn new(file: *mut FILE) -> Self {
        Self { file }
    }

    pub fn as_ptr(&self) -> *mut FILE {
        self.file
    }
}

impl RawStream for LibcStream {
    fn fd(&self) -> c_int {
        unsafe { libc::fileno(self.file) }
    }

    fn getc(&mut self) -> c_int {
        unsafe {
            let fgetc = real!(REAL_FGETC, FgetcFn);
            fgetc(self.file)
        }
    }

    fn error(&mut self) -> bool {
        unsafe { libc::ferror(self.file) != 0 }
    }

    fn eof(&mut self) -> bool {
        unsafe { libc::feof(self.file) != 0 }
    }

    fn tell(&mut self) -> i64 {
        let _errno = ErrnoGuard::save();
        unsafe { libc::ftello(self.file) as i64 }
    }

    fn descriptor_offset(&mut self) -> i64 {
        let _errno = ErrnoGuard::save();
        unsafe { libc::lseek(self.fd(), 0, libc::SEEK_CUR) as i64 }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__error()
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut c_int {
    libc::__errno()
}

pub fn errno() -> c_int {
    unsafe { *errno_location() }
}

pub fn set_errno(e: c_int) {
    unsafe { *errno_location() = e }
}

/// Restores `errno` on drop, so auxiliary queries stay invisible to the host.
pub struct ErrnoGuard(c_int);

impl ErrnoGuard {
    pub fn save() -> Self {
        Self(errno())
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        set_errno(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_guard_restores() {
        set_errno(libc::EAGAIN);
        {
            let _g = ErrnoGuard::save();
            set_errno(libc::ESPIPE);
        }
        assert_eq!(errno(), libc::EAGAIN);
    }

    #[test]
    fn tell_on_pipe_is_unusable_and_silent() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let file = unsafe { libc::fdopen(fds[0], c"r".as_ptr()) };
        assert!(!file.is_null());
        let mut s = unsafe { LibcStream::new(file) };
        set_errno(0);
        assert!(s.tell() < 0);
        assert!(s.descriptor_offset() < 0);
        assert_eq!(errno(), 0);
        assert_eq!(s.fd(), fds[0]);
        unsafe {
            libc::fclose(file);
            libc::close(fds[1]);
        }
    }
}
