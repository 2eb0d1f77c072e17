use super::*;
use crate::buf::Buf;

const LOCAL_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 1]);
const PEER_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 2]);
const PEER_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

fn request_packet(target_ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = Buf::empty();
    build_packet(&mut buf, true, PEER_IP, PEER_MAC, target_ip, MacAddr::ZERO);
    buf.as_slice().to_vec()
}

#[test]
fn drops_short_packet() {
    let mut state = ArpState::new();
    assert!(matches!(state.arp_in(&[0u8; 10], 0, LOCAL_IP), ArpAction::None));
}

#[test]
fn request_addressed_to_us_triggers_reply() {
    let mut state = ArpState::new();
    let pkt = request_packet(LOCAL_IP);
    match state.arp_in(&pkt, 0, LOCAL_IP) {
        ArpAction::SendReply { dst_ip, dst_mac } => {
            assert_eq!(dst_ip, PEER_IP);
            assert_eq!(dst_mac, PEER_MAC);
        }
        _ => panic!("expected SendReply"),
    }
    assert_eq!(state.lookup(PEER_IP), Some(PEER_MAC));
}

#[test]
fn request_addressed_elsewhere_is_learned_but_not_replied() {
    let mut state = ArpState::new();
    let pkt = request_packet(Ipv4Addr([10, 0, 0, 99]));
    assert!(matches!(state.arp_in(&pkt, 0, LOCAL_IP), ArpAction::None));
    assert_eq!(state.lookup(PEER_IP), Some(PEER_MAC));
}

#[test]
fn any_arriving_packet_flushes_pending_send_for_sender() {
    let mut state = ArpState::new();
    let mut buf = Buf::empty();
    buf.init(4);
    buf.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
    assert!(matches!(
        state.arp_out(buf, PEER_IP, 0, 60, 1),
        ArpAction::SendRequest { .. }
    ));

    // Even a REQUEST (not just a REPLY) from the pending IP flushes it.
    let pkt = request_packet(Ipv4Addr([10, 0, 0, 99]));
    match state.arp_in(&pkt, 0, LOCAL_IP) {
        ArpAction::FlushPending { buf, dst_mac } => {
            assert_eq!(dst_mac, PEER_MAC);
            assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        }
        _ => panic!("expected FlushPending"),
    }
}

#[test]
fn arp_out_hit_returns_buffer_immediately() {
    let mut state = ArpState::new();
    // seed the table via a learned packet
    let pkt = request_packet(Ipv4Addr([10, 0, 0, 99]));
    state.arp_in(&pkt, 0, LOCAL_IP);

    let mut buf = Buf::empty();
    buf.init(2);
    match state.arp_out(buf, PEER_IP, 0, 60, 1) {
        ArpAction::FlushPending { dst_mac, .. } => assert_eq!(dst_mac, PEER_MAC),
        _ => panic!("expected immediate FlushPending on cache hit"),
    }
}

#[test]
fn arp_out_miss_twice_drops_second_send() {
    let mut state = ArpState::new();
    let mut first = Buf::empty();
    first.init(1);
    assert!(matches!(
        state.arp_out(first, PEER_IP, 0, 60, 60),
        ArpAction::SendRequest { .. }
    ));

    let mut second = Buf::empty();
    second.init(1);
    assert!(matches!(state.arp_out(second, PEER_IP, 1, 60, 60), ArpAction::None));
}

#[test]
fn pending_entry_ages_out_and_allows_retry() {
    let mut state = ArpState::new();
    let mut first = Buf::empty();
    first.init(1);
    state.arp_out(first, PEER_IP, 0, 60, 5);

    let mut second = Buf::empty();
    second.init(1);
    assert!(matches!(
        state.arp_out(second, PEER_IP, 10, 60, 5),
        ArpAction::SendRequest { .. }
    ));
}

#[test]
fn table_entry_ages_out() {
    let mut state = ArpState::new();
    let pkt = request_packet(Ipv4Addr([10, 0, 0, 99]));
    state.arp_in(&pkt, 0, LOCAL_IP);
    assert_eq!(state.lookup(PEER_IP), Some(PEER_MAC));

    let mut buf = Buf::empty();
    buf.init(1);
    // arp_out's aging pass runs with now far past the timeout
    state.arp_out(buf, PEER_IP, 1000, 60, 60);
    assert_eq!(state.lookup(PEER_IP), None);
}
