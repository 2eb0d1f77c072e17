//! IPv4 (RFC 791 subset): no options, 20-byte header, fragmentation on send
//! only (no reassembly on receive).

use log::trace;

use crate::buf::{checksum16, Buf};
use crate::types::{IpProtocol, Ipv4Addr};

pub const IPV4_HEADER_LEN: usize = 20;

/// Default TTL stamped on datagrams this crate originates, used by callers
/// that build a [`crate::StackConfig`] without an explicit override.
pub const IP_DEFAULT_TTL: u8 = 64;
const IP_VERSION_4: u8 = 4;
const FLAG_MF: u16 = 0x2000;

pub enum IpInAction {
    /// Drop silently (malformed, wrong destination, bad checksum).
    None,
    /// Header validated and stripped; `buf` now holds the L4 segment.
    Deliver { protocol: IpProtocol, src_ip: Ipv4Addr },
    /// Unrecognized protocol number; `buf` is left untouched (header + payload
    /// intact) so the caller can build an ICMP protocol-unreachable from it.
    Unreachable { src_ip: Ipv4Addr },
}

/// Validate and (for recognized protocols) strip a received IPv4 datagram.
pub fn ip_in(buf: &mut Buf, local_ip: Ipv4Addr) -> IpInAction {
    if buf.len() < IPV4_HEADER_LEN {
        trace!("ipv4: drop short packet ({} bytes)", buf.len());
        return IpInAction::None;
    }

    let (version, total_len, src_ip, dst_ip, protocol_raw) = {
        let hdr = buf.as_slice();
        let version = hdr[0] >> 4;
        let total_len = u16::from_be_bytes([hdr[2], hdr[3]]) as usize;
        let src_ip = Ipv4Addr([hdr[12], hdr[13], hdr[14], hdr[15]]);
        let dst_ip = Ipv4Addr([hdr[16], hdr[17], hdr[18], hdr[19]]);
        (version, total_len, src_ip, dst_ip, hdr[9])
    };

    if version != IP_VERSION_4 || total_len > buf.len() {
        trace!("ipv4: drop bad version/length");
        return IpInAction::None;
    }

    {
        let hdr = buf.as_mut_slice();
        let saved = u16::from_be_bytes([hdr[10], hdr[11]]);
        hdr[10] = 0;
        hdr[11] = 0;
        let recomputed = checksum16(&hdr[..IPV4_HEADER_LEN]);
        hdr[10] = (saved >> 8) as u8;
        hdr[11] = (saved & 0xff) as u8;
        if saved != recomputed {
            trace!("ipv4: drop bad checksum");
            return IpInAction::None;
        }
    }

    if dst_ip != local_ip {
        trace!("ipv4: drop wrong destination {dst_ip}");
        return IpInAction::None;
    }

    if buf.len() > total_len {
        buf.remove_padding(buf.len() - total_len);
    }

    match IpProtocol::from_u8(protocol_raw) {
        Some(protocol) => {
            buf.remove_header(IPV4_HEADER_LEN);
            IpInAction::Deliver { protocol, src_ip }
        }
        None => IpInAction::Unreachable { src_ip },
    }
}

fn write_header(
    out: &mut Buf,
    payload_len: usize,
    local_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: IpProtocol,
    id: u16,
    frag_offset_units: u16,
    more_fragments: bool,
    ttl: u8,
) {
    out.add_header(IPV4_HEADER_LEN)
        .expect("ip header push overflowed buffer capacity");
    let total_len = (IPV4_HEADER_LEN + payload_len) as u16;
    let flags_frag = if more_fragments {
        FLAG_MF | frag_offset_units
    } else {
        frag_offset_units
    };
    {
        let hdr = out.as_mut_slice();
        hdr[0] = (IP_VERSION_4 << 4) | 5;
        hdr[1] = 0;
        hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        hdr[4..6].copy_from_slice(&id.to_be_bytes());
        hdr[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        hdr[8] = ttl;
        hdr[9] = protocol.as_u8();
        hdr[10..12].copy_from_slice(&0u16.to_be_bytes());
        hdr[12..16].copy_from_slice(local_ip.as_bytes());
        hdr[16..20].copy_from_slice(dst_ip.as_bytes());
    }
    let csum = checksum16(&out.as_slice()[..IPV4_HEADER_LEN]);
    out.as_mut_slice()[10..12].copy_from_slice(&csum.to_be_bytes());
}

/// Fragment `payload` (already containing the L4 segment, no IP header yet)
/// into one or more fully IP-framed datagrams ready for ARP/Ethernet egress.
/// All fragments of one datagram share `id`; `next_id` is advanced by exactly
/// one regardless of how many fragments were produced. `mtu` bounds each
/// fragment's IP payload; `ttl` is stamped into every fragment's header.
pub fn ip_out(
    payload: &Buf,
    local_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: IpProtocol,
    next_id: &mut u16,
    mtu: u16,
    ttl: u8,
) -> Vec<Buf> {
    let id = *next_id;
    *next_id = next_id.wrapping_add(1);
    let fragment_payload_len = (mtu as usize).saturating_sub(IPV4_HEADER_LEN);

    if payload.len() <= fragment_payload_len {
        let mut out = payload.clone();
        write_header(&mut out, out.len(), local_ip, dst_ip, protocol, id, 0, false, ttl);
        return vec![out];
    }

    let mut fragments = Vec::new();
    let data = payload.as_slice();
    let mut offset = 0usize;
    while offset < data.len() {
        let chunk_len = (data.len() - offset).min(fragment_payload_len);
        let more = offset + chunk_len < data.len();
        let mut frag = Buf::from_slice(&data[offset..offset + chunk_len]);
        write_header(
            &mut frag,
            chunk_len,
            local_ip,
            dst_ip,
            protocol,
            id,
            (offset / 8) as u16,
            more,
            ttl,
        );
        fragments.push(frag);
        offset += chunk_len;
    }
    fragments
}

#[cfg(test)]
#[path = "ipv4_tests.rs"]
mod ipv4_tests;
