//! ICMPv4: echo request/reply and destination-unreachable.

use log::trace;

use crate::buf::{checksum16, Buf};
use crate::ipv4::IPV4_HEADER_LEN;
use crate::types::Ipv4Addr;

const ICMP_HEADER_LEN: usize = 8;
const TYPE_ECHO_REPLY: u8 = 0;
const TYPE_ECHO_REQUEST: u8 = 8;
const TYPE_UNREACHABLE: u8 = 3;

#[derive(Clone, Copy)]
pub enum UnreachableCode {
    ProtocolUnreachable = 2,
    PortUnreachable = 3,
}

/// `buf` holds the ICMP message (post IP-header-strip). If it is a valid
/// echo request, build the echo reply into `buf` in place and report the
/// destination to send it to; otherwise drop.
pub fn icmp_in(buf: &mut Buf, src_ip: Ipv4Addr) -> Option<Ipv4Addr> {
    if buf.len() < ICMP_HEADER_LEN {
        trace!("icmp: drop short message ({} bytes)", buf.len());
        return None;
    }
    let icmp_type = buf.as_slice()[0];
    let code = buf.as_slice()[1];
    if icmp_type != TYPE_ECHO_REQUEST || code != 0 {
        trace!("icmp: drop non-echo-request type={icmp_type} code={code}");
        return None;
    }

    {
        let msg = buf.as_mut_slice();
        msg[0] = TYPE_ECHO_REPLY;
        msg[2] = 0;
        msg[3] = 0;
    }
    let csum = checksum16(buf.as_slice());
    buf.as_mut_slice()[2..4].copy_from_slice(&csum.to_be_bytes());
    Some(src_ip)
}

/// Build a destination-unreachable message whose payload is the offending
/// IP header plus its first 8 bytes. `recv_buf` must still hold that header
/// (the caller must not have stripped it).
pub fn unreachable(recv_buf: &Buf, code: UnreachableCode) -> Buf {
    let copy_len = (IPV4_HEADER_LEN + 8).min(recv_buf.len());
    let mut out = Buf::from_slice(&recv_buf.as_slice()[..copy_len]);
    out.add_header(ICMP_HEADER_LEN)
        .expect("icmp header push overflowed buffer capacity");
    {
        let hdr = out.as_mut_slice();
        hdr[0] = TYPE_UNREACHABLE;
        hdr[1] = code as u8;
        hdr[2] = 0;
        hdr[3] = 0;
        hdr[4..8].fill(0);
    }
    let csum = checksum16(out.as_slice());
    out.as_mut_slice()[2..4].copy_from_slice(&csum.to_be_bytes());
    out
}

#[cfg(test)]
#[path = "icmp_tests.rs"]
mod icmp_tests;
