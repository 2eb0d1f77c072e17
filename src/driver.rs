//! The boundary between this stack and the raw frame transport.
//!
//! Unlike the kernel driver registry this crate was grounded on (which
//! serves many concurrently-polled NICs behind `&self` + interior
//! mutability), this stack drives exactly one interface from one thread, so
//! the collaborator is a plain `&mut self` trait monomorphized into `Stack`
//! rather than a `dyn NetDevice` behind a lock.

/// Raw Ethernet frame transport. One frame in, one frame out, no blocking.
pub trait EthernetDriver {
    /// Transmit one fully-framed Ethernet frame (header already prepended).
    fn send(&mut self, frame: &[u8]);

    /// Non-blocking receive: copy at most one waiting frame into `into`,
    /// returning the number of bytes written. Returns `0` if nothing is
    /// ready.
    fn recv(&mut self, into: &mut [u8]) -> usize;
}

/// Monotonic time source, used only for ARP table/pending-send aging.
pub trait Clock {
    fn now_secs(&self) -> u64;
}
