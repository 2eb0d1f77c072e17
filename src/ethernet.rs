//! Ethernet II framing: 14-byte header (dst MAC, src MAC, big-endian
//! EtherType), dispatch by EtherType, minimum-frame zero padding on send.

use log::{debug, trace};

use crate::buf::{Buf, ETHERNET_MIN_TRANSPORT_UNIT};
use crate::types::{EtherType, MacAddr};

pub const ETH_HEADER_LEN: usize = 14;

/// Strip the Ethernet header and hand the payload to the caller along with
/// the parsed EtherType and source MAC, or `None` if the frame is too short
/// or the EtherType is unrecognized.
pub fn ethernet_in(buf: &mut Buf) -> Option<(EtherType, MacAddr)> {
    if buf.len() < ETH_HEADER_LEN {
        trace!("ethernet: drop short frame ({} bytes)", buf.len());
        return None;
    }
    let hdr = buf.as_slice();
    let mut src = [0u8; 6];
    src.copy_from_slice(&hdr[6..12]);
    let ethertype_raw = u16::from_be_bytes([hdr[12], hdr[13]]);
    let Some(ethertype) = EtherType::from_u16(ethertype_raw) else {
        trace!("ethernet: drop unknown ethertype 0x{ethertype_raw:04x}");
        return None;
    };
    buf.remove_header(ETH_HEADER_LEN);
    Some((ethertype, MacAddr(src)))
}

/// Prepend the 14-byte Ethernet header and hand the frame to the driver.
/// Pads the payload to [`ETHERNET_MIN_TRANSPORT_UNIT`] first if it is short.
pub fn ethernet_out(
    buf: &mut Buf,
    local_mac: MacAddr,
    dst_mac: MacAddr,
    protocol: EtherType,
    send: impl FnOnce(&[u8]),
) {
    if buf.len() < ETHERNET_MIN_TRANSPORT_UNIT {
        let pad = ETHERNET_MIN_TRANSPORT_UNIT - buf.len();
        // padding failure here would mean a stack bug (buffer far oversized already)
        buf.add_padding(pad).expect("ethernet padding overflowed buffer capacity");
    }
    buf.add_header(ETH_HEADER_LEN)
        .expect("ethernet header push overflowed buffer capacity");
    {
        let hdr = buf.as_mut_slice();
        hdr[0..6].copy_from_slice(dst_mac.as_bytes());
        hdr[6..12].copy_from_slice(local_mac.as_bytes());
        hdr[12..14].copy_from_slice(&protocol.as_u16().to_be_bytes());
    }
    debug!("ethernet: tx {} bytes to {dst_mac} proto={protocol}", buf.len());
    send(buf.as_slice());
}

impl std::fmt::Display for EtherType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Arp => write!(f, "ARP"),
        }
    }
}

#[cfg(test)]
#[path = "ethernet_tests.rs"]
mod ethernet_tests;
