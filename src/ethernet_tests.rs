use super::*;

#[test]
fn drops_short_frame() {
    let mut buf = Buf::empty();
    buf.init(10);
    assert!(ethernet_in(&mut buf).is_none());
}

#[test]
fn drops_unknown_ethertype() {
    let mut buf = Buf::empty();
    buf.init(ETH_HEADER_LEN);
    buf.as_mut_slice()[12..14].copy_from_slice(&0x86ddu16.to_be_bytes());
    assert!(ethernet_in(&mut buf).is_none());
}

#[test]
fn parses_header_and_strips_it() {
    let mut buf = Buf::empty();
    buf.init(ETH_HEADER_LEN + 4);
    {
        let hdr = buf.as_mut_slice();
        hdr[0..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        hdr[6..12].copy_from_slice(&[0xaa; 6]);
        hdr[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        hdr[14..18].copy_from_slice(&[9, 9, 9, 9]);
    }
    let (ethertype, src) = ethernet_in(&mut buf).unwrap();
    assert_eq!(ethertype, EtherType::Ipv4);
    assert_eq!(src, MacAddr([0xaa; 6]));
    assert_eq!(buf.as_slice(), &[9, 9, 9, 9]);
}

#[test]
fn pads_short_payload_to_minimum_frame() {
    let mut buf = Buf::empty();
    buf.init(4);
    let mut sent = Vec::new();
    ethernet_out(
        &mut buf,
        MacAddr([1; 6]),
        MacAddr::BROADCAST,
        EtherType::Arp,
        |frame| sent = frame.to_vec(),
    );
    assert_eq!(sent.len(), ETH_HEADER_LEN + ETHERNET_MIN_TRANSPORT_UNIT);
}
