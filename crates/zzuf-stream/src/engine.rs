//! Corruption engines.
//!
//! The interception layer never decides what to corrupt; it only hands each
//! freshly produced byte window to a [`FuzzEngine`] together with the
//! window's logical offset.

use libc::c_int;

/// A deterministic byte-mutation function.
///
/// Implementations must be pure in (descriptor, offset, seed) and must be an
/// involution: corrupting the same window twice at the same offset restores
/// the input. `ungetc` relies on this to push back a byte that re-reads as
/// the same corrupted value.
pub trait FuzzEngine: Send + Sync {
    fn corrupt(&self, fd: c_int, offset: i64, buf: &mut [u8]);
}

impl<E: FuzzEngine + ?Sized> FuzzEngine for std::sync::Arc<E> {
    fn corrupt(&self, fd: c_int, offset: i64, buf: &mut [u8]) {
        (**self).corrupt(fd, offset, buf)
    }
}

pub const CHUNK_BYTES: usize = 1024;
const CHUNK_BITS: usize = CHUNK_BYTES * 8;

/// Default engine: XOR masks keyed by (seed, chunk index).
///
/// The logical stream is cut into 1 KiB chunks. Each chunk gets
/// `round(ratio * 8192)` bit flips at positions drawn from a keyed blake3
/// XOF. The descriptor does not enter the key, so the same file fuzzes the
/// same way whichever descriptor reads it.
pub struct XorFuzzer {
    key: [u8; 32],
    flips_per_chunk: usize,
}

impl XorFuzzer {
    pub fn new(seed: u32, ratio: f64) -> Self {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            key: blake3::derive_key("zzuf-rs xor fuzzer v1", &seed.to_le_bytes()),
            flips_per_chunk: (ratio * CHUNK_BITS as f64).round() as usize,
        }
    }

    pub fn flips_per_chunk(&self) -> usize {
        self.flips_per_chunk
    }

    fn chunk_mask(&self, chunk: i64, mask: &mut [u8; CHUNK_BYTES]) {
        mask.fill(0);
        if self.flips_per_chunk == 0 {
            return;
        }
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(&chunk.to_le_bytes());
        let mut xof = hasher.finalize_xof();
        let mut word = [0u8; 4];
        for _ in 0..self.flips_per_chunk {
            xof.fill(&mut word);
            let bit = u32::from_le_bytes(word) as usize % CHUNK_BITS;
            mask[bit / 8] ^= 1 << (bit % 8);
        }
    }
}

impl FuzzEngine for XorFuzzer {
    fn corrupt(&self, _fd: c_int, offset: i64, buf: &mut [u8]) {
        if self.flips_per_chunk == 0 || buf.is_empty() {
            return;
        }
        let chunk_len = CHUNK_BYTES as i64;
        let mut mask = [0u8; CHUNK_BYTES];
        let mut done = 0usize;
        while done < buf.len() {
            let pos = offset.wrapping_add(done as i64);
            let chunk = pos.div_euclid(chunk_len);
            let start = pos.rem_euclid(chunk_len) as usize;
            let n = (CHUNK_BYTES - start).min(buf.len() - done);
            self.chunk_mask(chunk, &mut mask);
            for (b, m) in buf[done..done + n].iter_mut().zip(&mask[start..start + n]) {
                *b ^= *m;
            }
            done += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ratio_is_identity() {
        let f = XorFuzzer::new(1, 0.0);
        let mut buf = *b"hello world";
        f.corrupt(3, 0, &mut buf);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn corruption_is_an_involution() {
        let f = XorFuzzer::new(7, 0.05);
        let original: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        let mut buf = original.clone();
        f.corrupt(3, 100, &mut buf);
        assert_ne!(buf, original);
        f.corrupt(3, 100, &mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn split_windows_match_one_window() {
        let f = XorFuzzer::new(42, 0.1);
        let mut whole = vec![0u8; 2500];
        f.corrupt(3, 500, &mut whole);

        let mut pieces = vec![0u8; 2500];
        let (a, rest) = pieces.split_at_mut(1);
        let (b, c) = rest.split_at_mut(1100);
        f.corrupt(3, 500, a);
        f.corrupt(3, 501, b);
        f.corrupt(3, 1601, c);
        assert_eq!(whole, pieces);
    }

    #[test]
    fn seed_changes_the_mask() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        XorFuzzer::new(1, 0.5).corrupt(3, 0, &mut a);
        XorFuzzer::new(2, 0.5).corrupt(3, 0, &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn negative_offsets_are_stable() {
        let f = XorFuzzer::new(9, 0.5);
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        f.corrupt(3, -2, &mut a);
        f.corrupt(3, -2, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn full_ratio_flip_count() {
        assert_eq!(XorFuzzer::new(0, 1.0).flips_per_chunk(), CHUNK_BITS);
        assert_eq!(XorFuzzer::new(0, 0.004).flips_per_chunk(), 33);
        assert_eq!(XorFuzzer::new(0, f64::NAN).flips_per_chunk(), 0);
    }
}
