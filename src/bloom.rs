//! Token bloom filter fronting the search path, plus the peer-negotiated
//! TTH bloom export.
//!
//! The token filter ingests every 5-byte window of each lowercased indexed
//! name. A query term shorter than the window is always "maybe present";
//! otherwise every window of the term must be set. A matching term is a
//! substring of some indexed name, so its windows are a subset of that
//! name's windows; the filter can never produce a false negative for a
//! term that would match. Both sides of that contract live in this module.
//!
//! The filter is rebuilt wholesale after every refresh swap and never
//! mutated incrementally, so bits from removed files do not linger.

use crate::types::Tth;

/// Window width in bytes. Matches the narrowest query atom the filter can
/// reject; shorter atoms bypass the filter.
const WINDOW: usize = 5;

/// Target bits per ingested window when sizing a fresh filter.
const BITS_PER_TOKEN: usize = 10;

const MIN_BITS: usize = 1 << 10;

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// FNV-1a over a byte window.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

// ---------------------------------------------------------------------------
// Query tokenization
// ---------------------------------------------------------------------------

/// Split a query string into the lowercased atoms the search walk and the
/// bloom prefilter both consume.
pub fn search_tokens(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Token filter
// ---------------------------------------------------------------------------

/// Membership oracle over hashed name windows; fast negative for search.
pub struct BloomTokenFilter {
    bits: Vec<u64>,
    nbits: usize,
    ingested: usize,
}

impl BloomTokenFilter {
    /// An empty filter sized for roughly `token_estimate` windows.
    pub fn with_estimate(token_estimate: usize) -> Self {
        let nbits = (token_estimate * BITS_PER_TOKEN).next_power_of_two().max(MIN_BITS);
        Self { bits: vec![0u64; nbits / 64], nbits, ingested: 0 }
    }

    fn set(&mut self, pos: u64) {
        let idx = (pos as usize) & (self.nbits - 1);
        self.bits[idx / 64] |= 1 << (idx % 64);
    }

    fn get(&self, pos: u64) -> bool {
        let idx = (pos as usize) & (self.nbits - 1);
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }

    /// Ingest a file or directory name. Lowercases internally.
    pub fn add_name(&mut self, name: &str) {
        let lower = name.to_lowercase();
        let bytes = lower.as_bytes();
        if bytes.len() < WINDOW {
            return;
        }
        for w in bytes.windows(WINDOW) {
            self.set(fnv1a(w));
            self.ingested += 1;
        }
    }

    /// May any indexed name contain `term` as a substring? Never a false
    /// negative for terms produced by [`search_tokens`].
    pub fn might_contain(&self, term: &str) -> bool {
        let bytes = term.as_bytes();
        if bytes.len() < WINDOW {
            return true;
        }
        bytes.windows(WINDOW).all(|w| self.get(fnv1a(w)))
    }

    /// Prefilter for a whole query: false as soon as one atom cannot occur.
    pub fn might_contain_all<S: AsRef<str>>(&self, terms: &[S]) -> bool {
        terms.iter().all(|t| self.might_contain(t.as_ref()))
    }

    /// Human-readable fill statistics for diagnostics.
    pub fn stats(&self) -> String {
        let set: u32 = self.bits.iter().map(|w| w.count_ones()).sum();
        format!(
            "bloom: {} bits, {} set ({:.1}%), {} windows ingested",
            self.nbits,
            set,
            set as f64 * 100.0 / self.nbits as f64,
            self.ingested
        )
    }
}

impl Default for BloomTokenFilter {
    fn default() -> Self {
        Self::with_estimate(0)
    }
}

// ---------------------------------------------------------------------------
// TTH bloom export
// ---------------------------------------------------------------------------

/// Serialize a bloom over shared TTH values at peer-negotiated parameters:
/// `m` bits, `k` probes per TTH, probe positions read from the TTH bytes at
/// stride `h`. Returned as `m / 8` bytes, little-endian bit order.
///
/// `m` must be a nonzero multiple of 8; violations yield an empty vector
/// (the transport layer rejects the request upstream).
pub fn encode_tth_bloom<'a, I>(tths: I, k: usize, m: usize, h: usize) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Tth>,
{
    if m == 0 || m % 8 != 0 || k == 0 {
        return Vec::new();
    }
    let mut out = vec![0u8; m / 8];
    for tth in tths {
        let bytes = tth.as_bytes();
        for i in 0..k {
            // Read an 8-byte window starting at i*h, wrapping over the root.
            let mut word = [0u8; 8];
            for (j, slot) in word.iter_mut().enumerate() {
                *slot = bytes[(i * h.max(1) + j) % bytes.len()];
            }
            let pos = (u64::from_le_bytes(word) % m as u64) as usize;
            out[pos / 8] |= 1 << (pos % 8);
        }
    }
    out
}
