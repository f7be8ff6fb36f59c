//! Test doubles for exercising the interceptor without a preloaded library.
//!
//! - `MemStream`: an in-memory stream with stdio-like read, pushback and seek
//!   semantics, seekable or pipe-like
//! - `RecordingFuzzer`: an engine that records every window it is handed
//!
//! # Usage
//!
//! ```ignore
//! use zzuf_stream::testing::{armed_interceptor, MemStream};
//! use zzuf_stream::CapabilityMode;
//!
//! let zz = armed_interceptor(CapabilityMode::Differential, 1, 0.01);
//! let mut s = MemStream::seekable(3, b"payload".to_vec());
//! zz.sessions().register(3, zz.mode());
//! let c = zz.read_char(&mut s, |s| s.fgetc());
//! ```

use crate::engine::{FuzzEngine, XorFuzzer};
use crate::interceptor::Interceptor;
use crate::mode::CapabilityMode;
use crate::policy::PatternPolicy;
use crate::stream::{RawStream, EOF};
use libc::c_int;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// In-memory stream.
#[derive(Debug, Clone)]
pub struct MemStream {
    fd: c_int,
    data: Vec<u8>,
    pos: usize,
    pushback: Vec<u8>,
    seekable: bool,
    eof: bool,
    error: bool,
    /// Successful reads left before a read error is injected.
    fail_after: Option<usize>,
}

impl MemStream {
    pub fn seekable(fd: c_int, data: Vec<u8>) -> Self {
        Self {
            fd,
            data,
            pos: 0,
            pushback: Vec::new(),
            seekable: true,
            eof: false,
            error: false,
            fail_after: None,
        }
    }

    /// A stream whose cursor cannot be queried or moved.
    pub fn pipe(fd: c_int, data: Vec<u8>) -> Self {
        Self {
            seekable: false,
            ..Self::seekable(fd, data)
        }
    }

    /// Make the next character read fail with the error indicator set.
    pub fn fail_next_read(&mut self) {
        self.fail_after = Some(0);
    }

    /// Let `reads` more characters through, then fail the next read.
    pub fn fail_read_after(&mut self, reads: usize) {
        self.fail_after = Some(reads);
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn fgetc(&mut self) -> c_int {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                self.error = true;
                return EOF;
            }
            Some(n) => self.fail_after = Some(n - 1),
            None => {}
        }
        if let Some(b) = self.pushback.pop() {
            return b as c_int;
        }
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b as c_int
            }
            None => {
                self.eof = true;
                EOF
            }
        }
    }

    pub fn fread(&mut self, buf: &mut [u8], size: usize, nmemb: usize) -> usize {
        let total = size.saturating_mul(nmemb).min(buf.len());
        if total == 0 {
            return 0;
        }
        let mut done = 0;
        while done < total {
            let c = self.fgetc();
            if c == EOF {
                break;
            }
            buf[done] = c as u8;
            done += 1;
        }
        done / size
    }

    pub fn ungetc(&mut self, c: c_int) -> c_int {
        if c == EOF {
            return EOF;
        }
        self.pushback.push(c as u8);
        self.eof = false;
        (c as u8) as c_int
    }

    pub fn fseek(&mut self, offset: i64, whence: c_int) -> c_int {
        if !self.seekable {
            return -1;
        }
        let base = match whence {
            libc::SEEK_SET => 0,
            libc::SEEK_CUR => self.tell(),
            libc::SEEK_END => self.data.len() as i64,
            _ => return -1,
        };
        let target = base + offset;
        if target < 0 {
            return -1;
        }
        self.pos = target as usize;
        self.pushback.clear();
        self.eof = false;
        0
    }

    pub fn rewind(&mut self) {
        self.fseek(0, libc::SEEK_SET);
        self.error = false;
    }
}

impl RawStream for MemStream {
    fn fd(&self) -> c_int {
        self.fd
    }

    fn getc(&mut self) -> c_int {
        self.fgetc()
    }

    fn error(&mut self) -> bool {
        self.error
    }

    fn eof(&mut self) -> bool {
        self.eof
    }

    fn tell(&mut self) -> i64 {
        if !self.seekable {
            return -1;
        }
        self.pos as i64 - self.pushback.len() as i64
    }

    fn descriptor_offset(&mut self) -> i64 {
        if self.seekable {
            self.pos as i64
        } else {
            -1
        }
    }
}

/// A window handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteWindow {
    pub fd: c_int,
    pub offset: i64,
    pub len: usize,
}

/// Records every window, then delegates to an inner engine.
pub struct RecordingFuzzer<E = XorFuzzer> {
    inner: E,
    windows: Mutex<Vec<ByteWindow>>,
}

impl RecordingFuzzer<XorFuzzer> {
    pub fn new(seed: u32, ratio: f64) -> Self {
        Self::wrap(XorFuzzer::new(seed, ratio))
    }
}

impl<E: FuzzEngine> RecordingFuzzer<E> {
    pub fn wrap(inner: E) -> Self {
        Self {
            inner,
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn windows(&self) -> Vec<ByteWindow> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times each logical offset of `fd` was corrupted.
    pub fn coverage(&self, fd: c_int) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for w in self.windows().into_iter().filter(|w| w.fd == fd) {
            for off in w.offset..w.offset + w.len as i64 {
                *counts.entry(off).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl<E: FuzzEngine> FuzzEngine for RecordingFuzzer<E> {
    fn corrupt(&self, fd: c_int, offset: i64, buf: &mut [u8]) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ByteWindow {
                fd,
                offset,
                len: buf.len(),
            });
        self.inner.corrupt(fd, offset, buf);
    }
}

/// An armed interceptor that watches every opened path and records windows.
pub fn armed_interceptor(
    mode: CapabilityMode,
    seed: u32,
    ratio: f64,
) -> Interceptor<RecordingFuzzer, PatternPolicy> {
    let zz = Interceptor::new(
        mode,
        RecordingFuzzer::new(seed, ratio),
        PatternPolicy::watch_all(),
    );
    zz.arm();
    zz
}

/// Run `f` under a subscriber that records every event, and return the
/// formatted output.
#[cfg(test)]
pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let out = Capture::default();
    let writer = out.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = out.0.lock().unwrap_or_else(PoisonError::into_inner).clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
