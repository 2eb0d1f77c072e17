//! UDP (RFC 768): pseudo-header checksum, port-keyed dispatch, ICMP
//! port-unreachable when no handler is registered.

use log::trace;

use crate::buf::{add_pseudo_header, fold_checksum, ones_complement_sum, Buf};
use crate::types::{IpProtocol, Ipv4Addr, Port};

pub const UDP_HEADER_LEN: usize = 8;

fn pseudo_checksum(segment: &[u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> u16 {
    let mut sum = 0u32;
    add_pseudo_header(&mut sum, src_ip, dst_ip, IpProtocol::Udp.as_u8(), segment.len());
    sum = sum.wrapping_add(ones_complement_sum(segment));
    let csum = fold_checksum(sum);
    if csum == 0 { 0xFFFF } else { csum }
}

pub enum UdpInAction {
    /// Malformed or checksum-invalid; drop silently.
    None,
    /// Deliver to the registered handler. `buf` has had the UDP header stripped.
    Deliver { src_port: Port, dst_port: Port },
    /// No handler registered for `dst_port`. `buf` is left untouched (UDP
    /// header still in place, not stripped); the caller must re-expose the
    /// IP header via `buf.add_header(IPV4_HEADER_LEN)` — still physically
    /// present just behind the current head — before passing it to
    /// `icmp::unreachable`, matching the original's "push the IP header
    /// back on" shortcut rather than reconstructing it from scratch.
    PortUnreachable,
}

/// `buf` holds the UDP segment (post IP-header-strip). `ip_header` is the 20
/// raw bytes of the IP header that preceded it, needed both for the checksum
/// pseudo-header and to rebuild the unreachable payload on a miss.
pub fn udp_in(buf: &mut Buf, src_ip: Ipv4Addr, local_ip: Ipv4Addr, has_handler: impl FnOnce(Port) -> bool) -> UdpInAction {
    if buf.len() < UDP_HEADER_LEN {
        trace!("udp: drop short segment ({} bytes)", buf.len());
        return UdpInAction::None;
    }

    let saved_checksum = u16::from_be_bytes([buf.as_slice()[6], buf.as_slice()[7]]);
    buf.as_mut_slice()[6] = 0;
    buf.as_mut_slice()[7] = 0;
    let recomputed = pseudo_checksum(buf.as_slice(), src_ip, local_ip);
    buf.as_mut_slice()[6..8].copy_from_slice(&saved_checksum.to_be_bytes());
    if saved_checksum != recomputed {
        trace!("udp: drop bad checksum");
        return UdpInAction::None;
    }

    let dst_port = Port(u16::from_be_bytes([buf.as_slice()[2], buf.as_slice()[3]]));
    if !has_handler(dst_port) {
        trace!("udp: drop no handler for port {dst_port}");
        return UdpInAction::PortUnreachable;
    }

    let src_port = Port(u16::from_be_bytes([buf.as_slice()[0], buf.as_slice()[1]]));
    buf.remove_header(UDP_HEADER_LEN);
    UdpInAction::Deliver { src_port, dst_port }
}

/// Prepend the UDP header (with checksum) to `payload`, producing a segment
/// ready for `ip_out`.
pub fn udp_out(payload: &Buf, src_port: Port, local_ip: Ipv4Addr, dst_ip: Ipv4Addr, dst_port: Port) -> Buf {
    let mut out = payload.clone();
    let udp_len = (UDP_HEADER_LEN + out.len()) as u16;
    out.add_header(UDP_HEADER_LEN)
        .expect("udp header push overflowed buffer capacity");
    {
        let hdr = out.as_mut_slice();
        hdr[0..2].copy_from_slice(&src_port.as_u16().to_be_bytes());
        hdr[2..4].copy_from_slice(&dst_port.as_u16().to_be_bytes());
        hdr[4..6].copy_from_slice(&udp_len.to_be_bytes());
        hdr[6..8].copy_from_slice(&0u16.to_be_bytes());
    }
    let csum = pseudo_checksum(out.as_slice(), local_ip, dst_ip);
    out.as_mut_slice()[6..8].copy_from_slice(&csum.to_be_bytes());
    out
}

#[cfg(test)]
#[path = "udp_tests.rs"]
mod udp_tests;
