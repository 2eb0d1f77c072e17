use super::*;
use crate::buf::ETHERNET_MAX_TRANSPORT_UNIT;
use crate::types::IpProtocol;

const LOCAL_IP: Ipv4Addr = Ipv4Addr([192, 168, 1, 1]);
const PEER_IP: Ipv4Addr = Ipv4Addr([192, 168, 1, 2]);
const MTU: u16 = ETHERNET_MAX_TRANSPORT_UNIT as u16;

fn datagram(payload: &[u8], dst: Ipv4Addr, protocol: IpProtocol) -> Buf {
    let payload_buf = Buf::from_slice(payload);
    let mut id = 0u16;
    let mut frags = ip_out(&payload_buf, LOCAL_IP, dst, protocol, &mut id, MTU, IP_DEFAULT_TTL);
    assert_eq!(frags.len(), 1);
    frags.remove(0)
}

#[test]
fn drops_short_packet() {
    let mut buf = Buf::empty();
    buf.init(5);
    assert!(matches!(ip_in(&mut buf, LOCAL_IP), IpInAction::None));
}

#[test]
fn round_trips_through_out_and_in() {
    let mut buf = datagram(b"hello", LOCAL_IP, IpProtocol::Udp);
    match ip_in(&mut buf, LOCAL_IP) {
        IpInAction::Deliver { protocol, src_ip } => {
            assert_eq!(protocol, IpProtocol::Udp);
            assert_eq!(src_ip, LOCAL_IP);
            assert_eq!(buf.as_slice(), b"hello");
        }
        _ => panic!("expected Deliver"),
    }
}

#[test]
fn wrong_destination_is_dropped() {
    let mut buf = datagram(b"hi", PEER_IP, IpProtocol::Udp);
    assert!(matches!(ip_in(&mut buf, LOCAL_IP), IpInAction::None));
}

#[test]
fn bad_checksum_is_dropped() {
    let mut buf = datagram(b"hi", LOCAL_IP, IpProtocol::Udp);
    buf.as_mut_slice()[10] ^= 0xff;
    assert!(matches!(ip_in(&mut buf, LOCAL_IP), IpInAction::None));
}

#[test]
fn unknown_protocol_reports_unreachable_without_stripping() {
    let payload = Buf::from_slice(b"xx");
    let mut id = 0u16;
    let mut frags = ip_out(&payload, LOCAL_IP, LOCAL_IP, IpProtocol::Icmp, &mut id, MTU, IP_DEFAULT_TTL);
    let mut buf = frags.remove(0);
    // Overwrite the protocol byte with something unrecognized after framing.
    buf.as_mut_slice()[9] = 253;
    let saved_csum_zeroed = {
        let hdr = buf.as_mut_slice();
        hdr[10] = 0;
        hdr[11] = 0;
        let c = checksum16(&hdr[..IPV4_HEADER_LEN]);
        hdr[10..12].copy_from_slice(&c.to_be_bytes());
        c
    };
    let _ = saved_csum_zeroed;
    let len_before = buf.len();
    match ip_in(&mut buf, LOCAL_IP) {
        IpInAction::Unreachable { src_ip } => assert_eq!(src_ip, LOCAL_IP),
        _ => panic!("expected Unreachable"),
    }
    assert_eq!(buf.len(), len_before, "buffer must be left intact for icmp_unreachable");
}

#[test]
fn large_payload_fragments_into_1480_byte_chunks_sharing_one_id() {
    let payload = vec![0x42u8; 3000];
    let payload_buf = Buf::from_slice(&payload);
    let mut id = 5u16;
    let frags = ip_out(&payload_buf, LOCAL_IP, PEER_IP, IpProtocol::Udp, &mut id, MTU, IP_DEFAULT_TTL);
    assert_eq!(frags.len(), 3);
    assert_eq!(id, 6, "id advances exactly once per datagram, not per fragment");

    let ids: Vec<u16> = frags
        .iter()
        .map(|f| u16::from_be_bytes([f.as_slice()[4], f.as_slice()[5]]))
        .collect();
    assert!(ids.iter().all(|&i| i == 5));

    let mf_flags: Vec<bool> = frags
        .iter()
        .map(|f| u16::from_be_bytes([f.as_slice()[6], f.as_slice()[7]]) & 0x2000 != 0)
        .collect();
    assert_eq!(mf_flags, vec![true, true, false]);

    let offsets: Vec<u16> = frags
        .iter()
        .map(|f| u16::from_be_bytes([f.as_slice()[6], f.as_slice()[7]]) & 0x1fff)
        .collect();
    assert_eq!(offsets, vec![0, 185, 370]);
}

#[test]
fn small_payload_is_sent_unfragmented() {
    let payload = vec![0x1u8; 100];
    let payload_buf = Buf::from_slice(&payload);
    let mut id = 0u16;
    let frags = ip_out(&payload_buf, LOCAL_IP, PEER_IP, IpProtocol::Udp, &mut id, MTU, IP_DEFAULT_TTL);
    assert_eq!(frags.len(), 1);
    assert_eq!(frags[0].len(), IPV4_HEADER_LEN + 100);
}
