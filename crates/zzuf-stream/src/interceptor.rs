//! Interception of the stdio entry points for watched descriptors.
//!
//! Every method here takes the stream through [`RawStream`] and the real
//! library call as a closure. Callers pass the real implementation of the
//! entry point they are standing in for (`getc`, `fgetc` and `_IO_getc` all
//! share [`Interceptor::read_char`]); the interceptor decides whether to run
//! it bare or under the descriptor critical section, and what to corrupt
//! afterwards.

use crate::engine::{FuzzEngine, XorFuzzer};
use crate::mode::CapabilityMode;
use crate::policy::{PatternPolicy, PolicyError, WatchPolicy};
use crate::session::{Session, SessionSlot, SessionTable};
use crate::stream::{RawStream, EOF};
use libc::{c_int, c_void};
use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zzuf_config::{log_lifecycle_debug, log_stream_debug, log_stream_trace, Config};

pub struct Interceptor<E = XorFuzzer, P = PatternPolicy> {
    mode: CapabilityMode,
    armed: AtomicBool,
    sessions: SessionTable,
    engine: E,
    policy: P,
}

impl Interceptor<XorFuzzer, PatternPolicy> {
    /// Build the default engine and policy from configuration. The result is
    /// not armed yet.
    pub fn from_config(config: &Config) -> Result<Self, PolicyError> {
        let policy = PatternPolicy::new(&config.watch.include, &config.watch.exclude)?;
        let engine = XorFuzzer::new(config.fuzz.seed, config.fuzz.ratio);
        Ok(Self::new(
            CapabilityMode::select(config.stream.mode),
            engine,
            policy,
        ))
    }
}

impl<E: FuzzEngine, P: WatchPolicy> Interceptor<E, P> {
    pub fn new(mode: CapabilityMode, engine: E, policy: P) -> Self {
        Self {
            mode,
            armed: AtomicBool::new(false),
            sessions: SessionTable::new(),
            engine,
            policy,
        }
    }

    /// Until armed, every entry point is a bare call to the real function.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> CapabilityMode {
        self.mode
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Logical offset of a watched descriptor.
    pub fn position(&self, fd: c_int) -> Option<i64> {
        self.sessions.get(fd).map(|slot| slot.lock().position())
    }

    #[inline]
    pub(crate) fn watched(&self, fd: c_int) -> Option<Arc<SessionSlot>> {
        if !self.is_armed() {
            return None;
        }
        self.sessions.get(fd)
    }

    /// Hand one freshly produced window to the engine. The window starts at
    /// the session's current logical offset.
    pub(crate) fn dispatch(&self, session: &Session, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        log_stream_trace!(
            "corrupt",
            fd = session.fd,
            offset = session.position(),
            len = buf.len()
        );
        self.engine.corrupt(session.fd, session.position(), buf);
    }

    /// Corrupt a single character the real library just returned and account
    /// for it. EOF passes through untouched.
    pub(crate) fn corrupt_char(&self, session: &mut Session, ch: c_int) -> c_int {
        if ch == EOF || !session.mode.corrupts_on_read() {
            return ch;
        }
        let mut byte = [ch as u8];
        self.dispatch(session, &mut byte);
        session.advance_position(1);
        byte[0] as c_int
    }

    /// One elemental read for composite operations: lock, real `fgetc`,
    /// corrupt, unlock.
    pub(crate) fn replay_char<S: RawStream>(
        &self,
        slot: &SessionSlot,
        stream: &mut S,
    ) -> Option<u8> {
        let mut session = slot.lock();
        let ch = stream.getc();
        if ch == EOF {
            return None;
        }
        Some(self.corrupt_char(&mut session, ch) as u8)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register `fd` after a successful open if `path` matches the policy.
    pub fn after_open(&self, func: &str, path: Option<&CStr>, fd: c_int) -> bool {
        if !self.is_armed() || fd < 0 {
            return false;
        }
        let Some(path) = path else {
            return false;
        };
        if !self.policy.should_watch(path) {
            return false;
        }
        self.sessions.register(fd, self.mode);
        log_lifecycle_debug!(
            "open",
            func = func,
            path = tracing::field::display(path.to_string_lossy()),
            fd = fd
        );
        true
    }

    /// Re-point a stream. `real` performs the reopen and returns the new
    /// descriptor or -1. The old session is dropped and a new one created if
    /// the new path is watched; both are reported as one event.
    pub fn reopen<F>(&self, path: Option<&CStr>, old_fd: c_int, real: F) -> c_int
    where
        F: FnOnce() -> c_int,
    {
        if !self.is_armed() {
            return real();
        }

        let old = self.sessions.get(old_fd);
        let new_fd = match old {
            Some(ref slot) => {
                let _guard = slot.lock();
                self.sessions.unregister(old_fd);
                real()
            }
            None => real(),
        };

        let mut registered = false;
        if new_fd >= 0 && path.is_some_and(|p| self.policy.should_watch(p)) {
            self.sessions.register(new_fd, self.mode);
            registered = true;
        }

        if old.is_some() || registered {
            let shown = path.map(CStr::to_string_lossy).unwrap_or_default();
            log_lifecycle_debug!(
                "freopen",
                path = tracing::field::display(&shown),
                old_fd = old_fd,
                new_fd = new_fd,
                watched = registered
            );
        }
        new_fd
    }

    pub fn close<S, F>(&self, stream: &mut S, real: F) -> c_int
    where
        S: RawStream,
        F: FnOnce(&mut S) -> c_int,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };
        let ret = {
            let _guard = slot.lock();
            self.sessions.unregister(fd);
            real(stream)
        };
        log_lifecycle_debug!("fclose", fd = fd, ret = ret);
        ret
    }

    // ------------------------------------------------------------------
    // Position synchronization
    // ------------------------------------------------------------------

    /// `fseek`/`fseeko`. On success the logical offset follows the seek so
    /// later reads corrupt the right range.
    pub fn seek<S, F>(&self, stream: &mut S, offset: i64, whence: c_int, real: F) -> c_int
    where
        S: RawStream,
        F: FnOnce(&mut S) -> c_int,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };
        let mut session = slot.lock();
        let ret = real(stream);
        if ret == 0 && session.mode.corrupts_on_read() {
            match whence {
                libc::SEEK_SET => session.set_position(offset),
                libc::SEEK_CUR => session.advance_position(offset),
                libc::SEEK_END => {
                    let end = stream.tell();
                    if end >= 0 {
                        session.set_position(end);
                    }
                }
                _ => {}
            }
        }
        log_stream_debug!(
            "fseek",
            fd = fd,
            offset = offset,
            whence = whence,
            ret = ret,
            pos = session.position()
        );
        ret
    }

    pub fn rewind<S, F>(&self, stream: &mut S, real: F)
    where
        S: RawStream,
        F: FnOnce(&mut S),
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };
        let mut session = slot.lock();
        real(stream);
        if session.mode.corrupts_on_read() {
            session.set_position(0);
        }
        log_stream_debug!("rewind", fd = fd);
    }

    // ------------------------------------------------------------------
    // Character and block reads
    // ------------------------------------------------------------------

    /// `getc`, `fgetc`, `_IO_getc`.
    pub fn read_char<S, F>(&self, stream: &mut S, real: F) -> c_int
    where
        S: RawStream,
        F: FnOnce(&mut S) -> c_int,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };
        let ret = {
            let mut session = slot.lock();
            let ch = real(stream);
            self.corrupt_char(&mut session, ch)
        };
        log_stream_debug!("fgetc", fd = fd, ret = ret);
        ret
    }

    /// `ungetc`. The pushed byte is pre-corrupted at the rewound offset so the
    /// next read, which corrupts it again, yields exactly `c`.
    pub fn unread_char<S, F>(&self, stream: &mut S, c: c_int, real: F) -> c_int
    where
        S: RawStream,
        F: FnOnce(&mut S, c_int) -> c_int,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream, c);
        };
        let mut session = slot.lock();
        if c == EOF || !session.mode.corrupts_on_read() {
            let ret = real(stream, c);
            log_stream_debug!("ungetc", fd = fd, c = c, ret = ret);
            return ret;
        }

        session.advance_position(-1);
        let mut byte = [c as u8];
        self.dispatch(&session, &mut byte);
        let ret = real(stream, byte[0] as c_int);
        let ret = if ret == EOF {
            session.advance_position(1);
            EOF
        } else {
            (c as u8) as c_int
        };
        log_stream_debug!("ungetc", fd = fd, c = c, ret = ret);
        ret
    }

    /// `fread`.
    ///
    /// # Safety
    /// `ptr` must be valid for `size * nmemb` bytes, as for `fread` itself.
    pub unsafe fn read_block<S, F>(
        &self,
        stream: &mut S,
        ptr: *mut c_void,
        size: usize,
        nmemb: usize,
        real: F,
    ) -> usize
    where
        S: RawStream,
        F: FnOnce(&mut S) -> usize,
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };

        let ret = match self.mode {
            CapabilityMode::Differential => {
                self.read_block_differential(&slot, stream, ptr as *mut u8, size, nmemb, real)
            }
            CapabilityMode::CharacterReplay if size > 0 && nmemb > 0 => {
                // An overflowing request is bounded by the end of the stream
                // long before the saturated count.
                let total = size.saturating_mul(nmemb);
                let mut done = 0usize;
                while done < total {
                    match self.replay_char(&slot, stream) {
                        Some(b) => {
                            *(ptr as *mut u8).add(done) = b;
                            done += 1;
                        }
                        None => break,
                    }
                }
                done / size
            }
            _ => {
                let _guard = slot.lock();
                real(stream)
            }
        };
        log_stream_debug!(
            "fread",
            fd = fd,
            ptr = ptr as usize,
            size = size,
            nmemb = nmemb,
            ret = ret
        );
        ret
    }

    unsafe fn read_block_differential<S, F>(
        &self,
        slot: &SessionSlot,
        stream: &mut S,
        ptr: *mut u8,
        size: usize,
        nmemb: usize,
        real: F,
    ) -> usize
    where
        S: RawStream,
        F: FnOnce(&mut S) -> usize,
    {
        let mut session = slot.lock();
        let before = stream.tell();
        let ret = real(stream);
        let after = stream.tell();

        let capacity = size.saturating_mul(nmemb);
        // A non-seekable stream reports no usable cursor; the element count
        // is then the best available signal, even though it misses the bytes
        // of a trailing partial element.
        let reconciled = before >= 0 && after > 0;
        let len = if reconciled {
            let cap = i64::try_from(capacity).unwrap_or(i64::MAX);
            (after - before).clamp(0, cap) as usize
        } else {
            ret.saturating_mul(size).min(capacity)
        };

        if len > 0 && !ptr.is_null() {
            let window = std::slice::from_raw_parts_mut(ptr, len);
            self.dispatch(&session, window);
        }
        if reconciled {
            session.set_position(after);
        } else {
            session.advance_position(len as i64);
        }
        ret
    }

    // ------------------------------------------------------------------
    // Buffer refill (BSD libcs)
    // ------------------------------------------------------------------

    /// `__srefill`. `window` reports the freshly filled buffer (`_p`, `_r`).
    ///
    /// This runs nested inside other real calls (a block read refilling its
    /// buffer) whose wrapper already holds the descriptor section; in that
    /// case the section is reused rather than taken again.
    ///
    /// # Safety
    /// `window` must describe memory valid for writes of the reported length.
    pub unsafe fn refill<S, F, W>(&self, stream: &mut S, real: F, window: W) -> c_int
    where
        S: RawStream,
        F: FnOnce(&mut S) -> c_int,
        W: FnOnce(&mut S) -> (*mut u8, usize),
    {
        let fd = stream.fd();
        let Some(slot) = self.watched(fd) else {
            return real(stream);
        };

        let nested = slot.is_held_by_current_thread();
        let mut guard = if nested { None } else { Some(slot.lock()) };
        let ret = real(stream);
        if ret == EOF || self.mode != CapabilityMode::RefillHook {
            if !nested {
                log_stream_debug!("__srefill", fd = fd, ret = ret, filled = 0);
            }
            return ret;
        }

        let newpos = stream.descriptor_offset();
        let session: &mut Session = match guard.as_mut() {
            Some(g) => &mut **g,
            // SAFETY: this thread owns the section and the outer wrapper holds
            // no borrow of the session across the real call.
            None => slot.data_unchecked(),
        };
        let (p, r) = window(stream);
        if newpos != -1 {
            session.set_position(newpos - r as i64);
        }
        if r > 0 && !p.is_null() {
            self.dispatch(session, std::slice::from_raw_parts_mut(p, r));
            session.advance_position(r as i64);
        }
        if !nested {
            log_stream_debug!("__srefill", fd = fd, ret = ret, filled = r);
        }
        ret
    }
}
