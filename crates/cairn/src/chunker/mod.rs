//! Content-defined chunking
//!
//! Splits a byte stream into variable-sized chunks using a Rabin rolling
//! hash over a sliding window. A chunk boundary is declared at the first
//! offset past the minimum size where the low bits of the fingerprint are
//! all zero, so boundaries depend on content alone: identical data produces
//! identical chunks no matter where it sits in a file. Every chunk is named
//! by the SHA-256 digest of its bytes, which is what makes deduplication
//! work downstream.

use std::io::{self, ErrorKind, Read};

use bytes::Bytes;

use crate::id::Id;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;

/// Irreducible polynomial of degree 53 over GF(2), used for the rolling
/// fingerprint. Must never change for a repository: boundaries (and with
/// them deduplication) depend on it.
const POLYNOMIAL: u64 = 0x3DA3358B4DC173;

/// Read buffer size for the underlying stream
const BUF_SIZE: usize = 64 * KIB;

/// Errors reported when constructing chunker parameters
#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    #[error("window size must not be zero")]
    ZeroWindow,
    #[error("minimum chunk size {min} exceeds maximum {max}")]
    MinAboveMax { min: usize, max: usize },
    #[error("mask bits must be between 1 and 32, got {0}")]
    BadMaskBits(u32),
}

/// Degree of a polynomial over GF(2), -1 for the zero polynomial
fn deg(p: u64) -> i32 {
    63 - p.leading_zeros() as i32
}

/// Remainder of polynomial division over GF(2)
fn pol_mod(mut value: u64, p: u64) -> u64 {
    let dp = deg(p);
    while deg(value) >= dp {
        value ^= p << (deg(value) - dp);
    }
    value
}

/// Append one byte to a fingerprint, reducing modulo `p`
fn append_byte(fingerprint: u64, b: u8, p: u64) -> u64 {
    pol_mod((fingerprint << 8) | b as u64, p)
}

/// Immutable chunking configuration.
///
/// Constructed once when a repository is opened and handed to every
/// [`Chunker`]; there is no process-wide chunking state. The parameters must
/// stay stable for the lifetime of a repository, otherwise previously stored
/// chunks stop matching and deduplication degrades to nothing.
///
/// The precomputed tables implement the rolling update: `out_table` removes
/// the influence of the byte leaving the window, `mod_table` folds the
/// fingerprint's high byte back in during reduction.
#[derive(Clone)]
pub struct ChunkerParams {
    window_size: usize,
    min_size: usize,
    max_size: usize,
    mask_bits: u32,
    split_mask: u64,
    poly_shift: u32,
    out_table: [u64; 256],
    mod_table: [u64; 256],
}

impl ChunkerParams {
    /// Build parameters, precomputing the rolling hash tables.
    ///
    /// `mask_bits` selects the average chunk size: a boundary fires when the
    /// low `mask_bits` bits of the fingerprint are zero, so 20 bits yields
    /// roughly 1 MiB chunks.
    pub fn new(
        window_size: usize,
        min_size: usize,
        max_size: usize,
        mask_bits: u32,
    ) -> Result<Self, ChunkerError> {
        if window_size == 0 {
            return Err(ChunkerError::ZeroWindow);
        }
        if min_size > max_size {
            return Err(ChunkerError::MinAboveMax {
                min: min_size,
                max: max_size,
            });
        }
        if mask_bits == 0 || mask_bits > 32 {
            return Err(ChunkerError::BadMaskBits(mask_bits));
        }

        let k = deg(POLYNOMIAL);

        let mut out_table = [0u64; 256];
        for (b, entry) in out_table.iter_mut().enumerate() {
            // Influence of byte b once it has been shifted across the whole
            // window: XORing this removes it from the fingerprint.
            let mut fingerprint = append_byte(0, b as u8, POLYNOMIAL);
            for _ in 0..window_size - 1 {
                fingerprint = append_byte(fingerprint, 0, POLYNOMIAL);
            }
            *entry = fingerprint;
        }

        let mut mod_table = [0u64; 256];
        for (b, entry) in mod_table.iter_mut().enumerate() {
            let shifted = (b as u64) << k;
            *entry = pol_mod(shifted, POLYNOMIAL) | shifted;
        }

        Ok(ChunkerParams {
            window_size,
            min_size,
            max_size,
            mask_bits,
            split_mask: (1u64 << mask_bits) - 1,
            poly_shift: (k - 8) as u32,
            out_table,
            mod_table,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn mask_bits(&self) -> u32 {
        self.mask_bits
    }
}

impl Default for ChunkerParams {
    /// 64-byte window, 512 KiB minimum, 8 MiB maximum, ~1 MiB average
    fn default() -> Self {
        ChunkerParams::new(64, 512 * KIB, 8 * MIB, 20).expect("default parameters are valid")
    }
}

impl std::fmt::Debug for ChunkerParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkerParams")
            .field("window_size", &self.window_size)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("mask_bits", &self.mask_bits)
            .finish()
    }
}

/// One content-defined chunk of an input stream
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Offset of the first byte within the input
    pub start: u64,
    /// Number of bytes in the chunk
    pub length: usize,
    /// SHA-256 digest of the chunk bytes (the plaintext id)
    pub digest: Id,
    /// The chunk bytes themselves
    pub data: Bytes,
}

/// A one-shot content-defined splitter over a byte stream.
///
/// Yields a finite sequence of [`Chunk`]s whose concatenation is exactly the
/// input. The rolling state is re-seeded identically at the start of every
/// chunk, so boundary positions are a function of the content alone. The
/// sequence is not restartable; create a new chunker per input.
pub struct Chunker<R> {
    params: ChunkerParams,
    reader: R,

    buf: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
    eof: bool,

    window: Vec<u8>,
    wpos: usize,
    fingerprint: u64,

    // absolute offset in the input, and bytes in the current chunk
    pos: u64,
    start: u64,
    count: usize,
    chunk_data: Vec<u8>,
}

impl<R: Read> Chunker<R> {
    pub fn new(params: &ChunkerParams, reader: R) -> Self {
        let mut chunker = Chunker {
            params: params.clone(),
            reader,
            buf: vec![0; BUF_SIZE],
            buf_pos: 0,
            buf_len: 0,
            eof: false,
            window: vec![0; params.window_size],
            wpos: 0,
            fingerprint: 0,
            pos: 0,
            start: 0,
            count: 0,
            chunk_data: Vec::new(),
        };
        chunker.reset_fingerprint();
        chunker
    }

    /// Produce the next chunk, or `None` once the input is exhausted.
    ///
    /// The final chunk collects whatever trails the last boundary and may be
    /// shorter than the configured minimum size. Empty input yields no
    /// chunks at all.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        loop {
            if self.buf_pos >= self.buf_len {
                if !self.fill_buf()? {
                    if self.count > 0 {
                        return Ok(Some(self.take_chunk()));
                    }
                    return Ok(None);
                }
            }

            while self.buf_pos < self.buf_len {
                let b = self.buf[self.buf_pos];
                self.buf_pos += 1;

                self.slide(b);
                self.chunk_data.push(b);
                self.count += 1;
                self.pos += 1;

                let at_boundary = self.count >= self.params.min_size
                    && self.fingerprint & self.params.split_mask == 0;
                if at_boundary || self.count >= self.params.max_size {
                    return Ok(Some(self.take_chunk()));
                }
            }
        }
    }

    /// Refill the read buffer; false at end of input
    fn fill_buf(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        loop {
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.buf_pos = 0;
                    self.buf_len = n;
                    return Ok(true);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn take_chunk(&mut self) -> Chunk {
        let data = Bytes::from(std::mem::take(&mut self.chunk_data));
        let chunk = Chunk {
            start: self.start,
            length: data.len(),
            digest: Id::digest(&data),
            data,
        };

        self.start = self.pos;
        self.count = 0;
        self.reset_fingerprint();

        chunk
    }

    /// Re-seed the rolling state: zeroed window, then a single one byte slid
    /// in so the fingerprint cannot sit at zero and fire a boundary
    /// immediately. Every chunk starts from this exact state.
    fn reset_fingerprint(&mut self) {
        self.window.fill(0);
        self.wpos = 0;
        self.fingerprint = 0;
        self.slide(1);
    }

    fn slide(&mut self, b: u8) {
        let out = self.window[self.wpos] as usize;
        self.window[self.wpos] = b;
        self.fingerprint ^= self.params.out_table[out];
        self.wpos += 1;
        if self.wpos >= self.window.len() {
            self.wpos = 0;
        }

        // append b: the mod table keeps the fingerprint fully reduced, so
        // the high byte used as the table index is always below 256
        let index = (self.fingerprint >> self.params.poly_shift) as usize;
        self.fingerprint <<= 8;
        self.fingerprint |= b as u64;
        self.fingerprint ^= self.params.mod_table[index];
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
