//! Line-oriented reads rebuilt from the elemental character read.
//!
//! Outside the refill mode these never call the real composite function:
//! each character comes from the real `fgetc` under its own short critical
//! section and is corrupted exactly once, so line boundaries are decided on
//! the corrupted bytes the caller actually sees.

use crate::engine::FuzzEngine;
use crate::interceptor::Interceptor;
use crate::policy::WatchPolicy;
use crate::stream::{errno, set_errno, RawStream};
use libc::{c_char, c_int, c_void, size_t, ssize_t};
use std::ptr;
use zzuf_config::log_stream_debug;

/// First allocation made by `getdelim` for a null or empty buffer.
pub const INITIAL_LINE_CAPACITY: usize = 120;

impl<E: FuzzEngine, P: WatchPolicy> Interceptor<E, P> {
    /// `fgets`.
    ///
    /// # Safety
    /// `s` must be valid for `size` bytes of writes.
    pub unsafe fn read_string<S, F>(
        &self,
        stream: &mut S,
        s: *mut c_char,
        size: c_int,
        real: F,
    ) -> *mut c_char
    where
        S: RawStream,
        F: FnOnce(&mut S) -> *mut c_char,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };
        if !self.mode().corrupts_on_read() {
            let ret = {
                let _guard = slot.lock();
                real(stream)
            };
            log_stream_debug!("fgets", fd = fd, size = size, ok = !ret.is_null());
            return ret;
        }

        if size <= 0 || s.is_null() {
            log_stream_debug!("fgets", fd = fd, size = size, ok = false);
            return ptr::null_mut();
        }
        if size == 1 {
            *s = 0;
            log_stream_debug!("fgets", fd = fd, size = size, ok = true);
            return s;
        }

        // The error indicator may already be set on entry. A read that fails
        // then leaves end-of-file clear, which tells a fresh error apart from
        // a plain end of stream.
        let had_error = stream.error();
        let limit = (size - 1) as usize;
        let mut len = 0usize;
        let mut ret = s;
        while len < limit {
            match self.replay_char(&slot, stream) {
                Some(b) => {
                    *s.add(len) = b as c_char;
                    len += 1;
                    if b == b'\n' {
                        break;
                    }
                }
                None => {
                    let errored = if had_error {
                        !stream.eof()
                    } else {
                        stream.error()
                    };
                    let failed = errored && errno() != libc::EAGAIN;
                    if len == 0 || failed {
                        ret = ptr::null_mut();
                    }
                    break;
                }
            }
        }
        if !ret.is_null() {
            *s.add(len) = 0;
        }

        log_stream_debug!(
            "fgets",
            fd = fd,
            size = size,
            len = len,
            ok = !ret.is_null()
        );
        ret
    }

    /// `getdelim`, `getline` and `__getdelim`.
    ///
    /// The buffer is grown with the C allocator since the caller owns and
    /// frees it.
    ///
    /// # Safety
    /// `lineptr` and `n` must follow the `getdelim` contract: `*lineptr` is
    /// null or a `malloc`ed block of at least `*n` bytes.
    pub unsafe fn read_delimited<S, F>(
        &self,
        stream: &mut S,
        lineptr: *mut *mut c_char,
        n: *mut size_t,
        delim: c_int,
        real: F,
    ) -> ssize_t
    where
        S: RawStream,
        F: FnOnce(&mut S) -> ssize_t,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };
        if !self.mode().corrupts_on_read() {
            let ret = {
                let _guard = slot.lock();
                real(stream)
            };
            log_stream_debug!("getdelim", fd = fd, delim = delim, ret = ret);
            return ret;
        }

        if lineptr.is_null() || n.is_null() {
            log_stream_debug!("getdelim", fd = fd, delim = delim, ret = -1);
            set_errno(libc::EINVAL);
            return -1;
        }

        let mut line = *lineptr as *mut u8;
        let mut cap = if line.is_null() { 0 } else { *n };
        if cap == 0 {
            let Some(grown) = grow(line, INITIAL_LINE_CAPACITY) else {
                return -1;
            };
            line = grown;
            cap = INITIAL_LINE_CAPACITY;
            *lineptr = line as *mut c_char;
            *n = cap;
        }

        let delim = delim as u8;
        let mut len = 0usize;
        while let Some(b) = self.replay_char(&slot, stream) {
            // Keep room for this byte and the terminator.
            if len + 2 > cap {
                let new_cap = cap.saturating_mul(2).max(len + 2);
                let Some(grown) = grow(line, new_cap) else {
                    return -1;
                };
                line = grown;
                cap = new_cap;
                *lineptr = line as *mut c_char;
                *n = cap;
            }
            *line.add(len) = b;
            len += 1;
            if b == delim {
                break;
            }
        }
        *line.add(len) = 0;

        let ret = if len == 0 { -1 } else { len as ssize_t };
        log_stream_debug!(
            "getdelim",
            fd = fd,
            delim = delim,
            cap = cap,
            ret = ret
        );
        ret
    }

    /// BSD `fgetln`. The returned line lives in the session's scratch buffer
    /// and is not NUL-terminated; it stays valid until the next read on the
    /// same stream.
    ///
    /// # Safety
    /// `len` must be null or valid for a write.
    pub unsafe fn read_bsd_line<S, F>(&self, stream: &mut S, len: *mut size_t, real: F) -> *mut c_char
    where
        S: RawStream,
        F: FnOnce(&mut S) -> *mut c_char,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };
        if !self.mode().corrupts_on_read() {
            let ret = {
                let _guard = slot.lock();
                real(stream)
            };
            log_stream_debug!("fgetln", fd = fd, ok = !ret.is_null());
            return ret;
        }

        // The buffer travels out of the session while characters are read,
        // each under its own critical section.
        let mut line = std::mem::take(&mut slot.lock().scratch);
        line.clear();
        while let Some(b) = self.replay_char(&slot, stream) {
            line.push(b);
            if b == b'\n' {
                break;
            }
        }

        let count = line.len();
        let ret = {
            let mut session = slot.lock();
            session.scratch = line;
            if count == 0 {
                ptr::null_mut()
            } else {
                session.scratch.as_mut_ptr() as *mut c_char
            }
        };
        if !len.is_null() {
            *len = count;
        }
        log_stream_debug!("fgetln", fd = fd, len = count);
        ret
    }
}

unsafe fn grow(line: *mut u8, cap: usize) -> Option<*mut u8> {
    let grown = libc::realloc(line as *mut c_void, cap) as *mut u8;
    if grown.is_null() {
        set_errno(libc::ENOMEM);
        None
    } else {
        Some(grown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::CapabilityMode;
    use crate::testing::{armed_interceptor, capture_logs, MemStream, RecordingFuzzer};
    use std::ffi::CStr;

    const FD: c_int = 9;

    fn setup(mode: CapabilityMode, ratio: f64, data: &[u8]) -> (Interceptor<RecordingFuzzer>, MemStream) {
        let zz = armed_interceptor(mode, 5, ratio);
        zz.after_open("fopen", Some(c"/tmp/lines"), FD);
        (zz, MemStream::seekable(FD, data.to_vec()))
    }

    fn fgets(zz: &Interceptor<RecordingFuzzer>, s: &mut MemStream, buf: &mut [c_char]) -> Option<String> {
        let ret = unsafe {
            zz.read_string(s, buf.as_mut_ptr(), buf.len() as c_int, |_| {
                panic!("composite read must not reach the real fgets")
            })
        };
        if ret.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ret) }.to_string_lossy().into_owned())
    }

    #[test]
    fn fgets_stops_after_newline() {
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.0, b"one\ntwo");
        let mut buf = [0 as c_char; 16];
        assert_eq!(fgets(&zz, &mut s, &mut buf).as_deref(), Some("one\n"));
        assert_eq!(fgets(&zz, &mut s, &mut buf).as_deref(), Some("two"));
        assert_eq!(fgets(&zz, &mut s, &mut buf), None);
        assert_eq!(zz.position(FD), Some(7));
    }

    #[test]
    fn fgets_respects_buffer_size() {
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.0, b"abcdef\n");
        let mut buf = [0 as c_char; 4];
        assert_eq!(fgets(&zz, &mut s, &mut buf).as_deref(), Some("abc"));
        assert_eq!(fgets(&zz, &mut s, &mut buf[..1]).as_deref(), Some(""));
        assert_eq!(zz.position(FD), Some(3));
        let ret = unsafe { zz.read_string(&mut s, buf.as_mut_ptr(), 0, |_| ptr::null_mut()) };
        assert!(ret.is_null());
    }

    #[test]
    fn fgets_reports_read_errors() {
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.0, b"abcdef");
        let mut buf = [0 as c_char; 8];
        set_errno(0);
        s.fail_next_read();
        assert_eq!(fgets(&zz, &mut s, &mut buf), None);
    }

    #[test]
    fn fgets_sees_a_new_error_when_the_indicator_was_already_set() {
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.0, b"abcdef\n");
        let mut buf = [0 as c_char; 16];
        set_errno(0);
        s.fail_next_read();
        assert_eq!(fgets(&zz, &mut s, &mut buf), None);
        assert!(s.error());

        s.fail_read_after(2);
        assert_eq!(fgets(&zz, &mut s, &mut buf), None);

        assert_eq!(fgets(&zz, &mut s, &mut buf).as_deref(), Some("cdef\n"));
        assert_eq!(fgets(&zz, &mut s, &mut buf), None);
    }

    #[test]
    fn fgets_in_refill_mode_uses_the_real_call() {
        let (zz, mut s) = setup(CapabilityMode::RefillHook, 0.5, b"abc");
        let mut buf = [0 as c_char; 8];
        let p = buf.as_mut_ptr();
        let logs = capture_logs(|| {
            let ret = unsafe { zz.read_string(&mut s, p, 8, |_| p) };
            assert_eq!(ret, p);
        });
        assert!(zz.engine().windows().is_empty());
        assert!(logs.contains("fgets"), "{logs}");
    }

    #[test]
    fn refill_mode_line_reads_are_logged() {
        let (zz, mut s) = setup(CapabilityMode::RefillHook, 0.5, b"abc");
        let mut line: *mut c_char = ptr::null_mut();
        let mut cap: size_t = 0;
        let logs = capture_logs(|| {
            let n = unsafe {
                zz.read_delimited(&mut s, &mut line, &mut cap, b'\n' as c_int, |_| 3)
            };
            assert_eq!(n, 3);
            let mut len: size_t = 0;
            let ret = unsafe { zz.read_bsd_line(&mut s, &mut len, |_| ptr::null_mut()) };
            assert!(ret.is_null());
        });
        assert!(logs.contains("getdelim"), "{logs}");
        assert!(logs.contains("fgetln"), "{logs}");
    }

    #[test]
    fn getline_splits_on_corrupted_bytes() {
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.0, b"abc\ndef");
        let mut line: *mut c_char = ptr::null_mut();
        let mut cap: size_t = 0;
        let mut read = || unsafe {
            zz.read_delimited(&mut s, &mut line, &mut cap, b'\n' as c_int, |_| {
                panic!("composite read must not reach the real getdelim")
            })
        };
        assert_eq!(read(), 4);
        assert_eq!(read(), 3);
        let windows_before_eof = zz.engine().windows().len();
        assert_eq!(read(), -1);
        assert_eq!(zz.engine().windows().len(), windows_before_eof);

        assert!(!line.is_null());
        assert!(cap >= INITIAL_LINE_CAPACITY);
        assert_eq!(unsafe { CStr::from_ptr(line) }.to_bytes(), b"");
        unsafe { libc::free(line as *mut c_void) };
    }

    #[test]
    fn getdelim_grows_the_callers_buffer() {
        let mut data = vec![b'x'; 500];
        data.push(b';');
        data.extend_from_slice(b"tail");
        let (zz, mut s) = setup(CapabilityMode::CharacterReplay, 0.0, &data);
        let mut line = unsafe { libc::malloc(8) } as *mut c_char;
        let mut cap: size_t = 8;
        let n = unsafe {
            zz.read_delimited(&mut s, &mut line, &mut cap, b';' as c_int, |_| -1)
        };
        assert_eq!(n, 501);
        assert!(cap > 501);
        let got = unsafe { CStr::from_ptr(line) }.to_bytes();
        assert_eq!(got.len(), 501);
        assert_eq!(got.last(), Some(&b';'));
        unsafe { libc::free(line as *mut c_void) };
    }

    #[test]
    fn getdelim_rejects_null_arguments() {
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.0, b"abc");
        let mut cap: size_t = 0;
        let n = unsafe {
            zz.read_delimited(&mut s, ptr::null_mut(), &mut cap, b'\n' as c_int, |_| 0)
        };
        assert_eq!(n, -1);
        assert_eq!(errno(), libc::EINVAL);
        assert_eq!(zz.position(FD), Some(0));
    }

    #[test]
    fn corrupted_stream_matches_engine_output() {
        let data = b"first line\nsecond line\n".to_vec();
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.2, &data);
        let mut expected = data.clone();
        crate::engine::XorFuzzer::new(5, 0.2).corrupt(FD, 0, &mut expected);

        let mut line: *mut c_char = ptr::null_mut();
        let mut cap: size_t = 0;
        let mut got = Vec::new();
        loop {
            let n = unsafe {
                zz.read_delimited(&mut s, &mut line, &mut cap, b'\n' as c_int, |_| -1)
            };
            if n < 0 {
                break;
            }
            let bytes = unsafe { std::slice::from_raw_parts(line as *const u8, n as usize) };
            // Every line but the last ends on a corrupted byte equal to the delimiter.
            assert!(bytes[..bytes.len() - 1].iter().all(|&b| b != b'\n'));
            got.extend_from_slice(bytes);
        }
        unsafe { libc::free(line as *mut c_void) };
        assert_eq!(got, expected);
        assert!(zz.engine().coverage(FD).values().all(|&n| n == 1));
    }

    #[test]
    fn fgetln_returns_unterminated_lines() {
        let (zz, mut s) = setup(CapabilityMode::Differential, 0.0, b"ab\ncd");
        let mut len: size_t = 0;
        let mut next = || unsafe {
            let p = zz.read_bsd_line(&mut s, &mut len, |_| ptr::null_mut());
            (!p.is_null()).then(|| std::slice::from_raw_parts(p as *const u8, len).to_vec())
        };
        assert_eq!(next().as_deref(), Some(&b"ab\n"[..]));
        assert_eq!(next().as_deref(), Some(&b"cd"[..]));
        assert_eq!(next(), None);
        assert_eq!(zz.position(FD), Some(5));
    }
}
