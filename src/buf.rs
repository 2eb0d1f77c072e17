//! Fixed-capacity packet buffer with a movable head pointer.
//!
//! Mirrors the original teaching lab's `buf_t`: a single contiguous
//! `[u8; BUF_MAX_LEN]` store with the live region addressed by `data` (an
//! offset into the store) and `len`. `init` positions `data` at a small
//! fixed headroom reserve, just enough for the deepest header-push chain
//! any one buffer instance sees between clones (IP + Ethernet, 34 bytes,
//! rounded up for slack) — the rest of the capacity stays tailroom, so a
//! buffer built with little content can still grow via `append`/
//! `add_padding` (rx_buf/tx_buf, Ethernet minimum-frame padding) without a
//! `compact()` first.

use crate::types::{Ipv4Addr, NetError};

/// Total backing capacity: big enough to hold a full pre-fragmentation
/// datagram (the largest UDP payload this crate will accept, plus its
/// UDP/IP/Ethernet headers) plus slack.
pub const BUF_MAX_LEN: usize = 4096;

/// Fixed headroom `init` reserves in front of the live region for later
/// `add_header` calls, capped by whatever the content itself doesn't
/// already occupy.
const HEADER_RESERVE: usize = 64;

/// Maximum IP payload size before `ip_out` must fragment.
pub const ETHERNET_MAX_TRANSPORT_UNIT: usize = 1500;

/// Minimum Ethernet frame payload; shorter frames are zero-padded on send.
pub const ETHERNET_MIN_TRANSPORT_UNIT: usize = 46;

/// A fixed-capacity, movable-head packet buffer.
///
/// Invariants: `data <= BUF_MAX_LEN`, `data + len <= BUF_MAX_LEN`.
pub struct Buf {
    store: [u8; BUF_MAX_LEN],
    data: usize,
    len: usize,
}

impl Buf {
    /// A zeroed buffer with nothing live in it.
    pub const fn empty() -> Self {
        Self {
            store: [0u8; BUF_MAX_LEN],
            data: BUF_MAX_LEN,
            len: 0,
        }
    }

    /// Reset to `n` live bytes (zeroed content), positioning `data` at
    /// [`HEADER_RESERVE`] (or less, if `n` leaves no room for the full
    /// reserve) so later `add_header` calls have room to prepend into while
    /// `append`/`add_padding` still have the remaining capacity as tailroom.
    pub fn init(&mut self, n: usize) {
        debug_assert!(n <= BUF_MAX_LEN);
        self.data = HEADER_RESERVE.min(BUF_MAX_LEN - n);
        self.len = n;
        self.store[self.data..self.data + n].fill(0);
    }

    /// Build a live buffer by copying `src` in, positioned as `init` would.
    pub fn from_slice(src: &[u8]) -> Self {
        let mut buf = Self::empty();
        buf.init(src.len());
        buf.as_mut_slice().copy_from_slice(src);
        buf
    }

    /// Number of live bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The live region.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.store[self.data..self.data + self.len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.store[self.data..self.data + self.len]
    }

    /// Prepend `k` header bytes, extending the live region backward.
    /// Fails if there isn't enough headroom.
    pub fn add_header(&mut self, k: usize) -> Result<(), NetError> {
        if self.data < k {
            return Err(NetError::NoBufferSpace);
        }
        self.data -= k;
        self.len += k;
        Ok(())
    }

    /// Strip `k` header bytes from the front of the live region.
    ///
    /// Returns `true` when the live region has drifted far enough toward the
    /// end of the store that a caller doing repeated incremental reads
    /// (e.g. `tcp_read`) should compact back to the front before the next
    /// `add_padding`/append runs out of tailroom.
    pub fn remove_header(&mut self, k: usize) -> bool {
        debug_assert!(k <= self.len);
        self.data += k;
        self.len -= k;
        self.data + self.len >= BUF_MAX_LEN
    }

    /// Strip `k` bytes from the tail (IP padding removal).
    pub fn remove_padding(&mut self, k: usize) {
        debug_assert!(k <= self.len);
        self.len -= k;
    }

    /// Append `k` zeroed bytes to the tail (Ethernet minimum-frame padding).
    /// Fails if the store has no tailroom left.
    pub fn add_padding(&mut self, k: usize) -> Result<(), NetError> {
        if self.data + self.len + k > BUF_MAX_LEN {
            return Err(NetError::NoBufferSpace);
        }
        let start = self.data + self.len;
        self.store[start..start + k].fill(0);
        self.len += k;
        Ok(())
    }

    /// Append `src` verbatim to the tail.
    pub fn append(&mut self, src: &[u8]) -> Result<(), NetError> {
        self.add_padding(src.len())?;
        let start = self.data + self.len - src.len();
        self.store[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Slide the live region back to the very front of the store, reclaiming
    /// maximal tailroom. Called when `remove_header`/`remove_padding` signal
    /// (or the caller otherwise knows) the tail is getting close to the end.
    pub fn compact(&mut self) {
        if self.data == 0 {
            return;
        }
        self.store.copy_within(self.data..self.data + self.len, 0);
        self.data = 0;
    }
}

impl Clone for Buf {
    fn clone(&self) -> Self {
        let mut out = Self::empty();
        out.init(self.len);
        out.as_mut_slice().copy_from_slice(self.as_slice());
        out
    }
}

// =============================================================================
// Checksum helpers — one's-complement Internet checksum (RFC 1071).
// =============================================================================

/// Accumulate the one's-complement sum over a byte slice. Caller folds via
/// [`fold_checksum`] once all contributing regions (header + pseudo-header,
/// if any) have been summed.
pub fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([chunk[0], chunk[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Fold a 32-bit running sum down into a 16-bit one's-complement checksum.
pub fn fold_checksum(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Compute the checksum of `data` in one call (used for IP header and ICMP,
/// which have no pseudo-header).
pub fn checksum16(data: &[u8]) -> u16 {
    fold_checksum(ones_complement_sum(data))
}

/// Sum the UDP/TCP pseudo-header (src, dst, zero, protocol, length) into `sum`.
pub fn add_pseudo_header(sum: &mut u32, src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, l4_len: usize) {
    *sum = sum.wrapping_add(ones_complement_sum(src.as_bytes()));
    *sum = sum.wrapping_add(ones_complement_sum(dst.as_bytes()));
    *sum = sum.wrapping_add(protocol as u32);
    *sum = sum.wrapping_add(l4_len as u32);
}

#[cfg(test)]
#[path = "buf_tests.rs"]
mod buf_tests;
