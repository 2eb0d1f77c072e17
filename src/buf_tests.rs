use super::*;

#[test]
fn init_sets_len_and_leaves_tailroom() {
    let mut buf = Buf::empty();
    buf.init(100);
    assert_eq!(buf.len(), 100);
    assert_eq!(buf.as_slice().len(), 100);
    buf.append(&[1, 2, 3]).expect("tailroom left for growth after init");
}

#[test]
fn add_header_then_remove_header_round_trips() {
    let mut buf = Buf::empty();
    buf.init(10);
    buf.as_mut_slice().copy_from_slice(&[7u8; 10]);
    buf.add_header(20).unwrap();
    assert_eq!(buf.len(), 30);
    buf.remove_header(20);
    assert_eq!(buf.len(), 10);
    assert_eq!(buf.as_slice(), &[7u8; 10]);
}

#[test]
fn add_header_fails_when_headroom_exhausted() {
    let mut buf = Buf::empty();
    buf.init(BUF_MAX_LEN);
    assert!(buf.add_header(1).is_err());
}

#[test]
fn padding_add_and_remove() {
    let mut buf = Buf::empty();
    buf.init(10);
    buf.add_padding(36).unwrap();
    assert_eq!(buf.len(), 46);
    buf.remove_padding(36);
    assert_eq!(buf.len(), 10);
}

#[test]
fn append_extends_tail_with_data() {
    let mut buf = Buf::empty();
    buf.init(4);
    buf.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
    buf.append(&[5, 6]).unwrap();
    assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn compact_slides_live_region_to_front() {
    let mut buf = Buf::empty();
    buf.init(10);
    buf.as_mut_slice().copy_from_slice(&[9u8; 10]);
    buf.compact();
    assert_eq!(buf.as_slice(), &[9u8; 10]);
}

#[test]
fn checksum_of_zeroed_header_is_all_ones_complement() {
    // All-zero data sums to zero, whose one's complement is 0xFFFF.
    let data = [0u8; 20];
    assert_eq!(checksum16(&data), 0xFFFF);
}

#[test]
fn checksum_validates_by_save_zero_recompute_compare_restore() {
    let mut header = [0x45u8, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06, 0, 0, 0xac, 0x10, 0x0a, 0x63, 0xac, 0x10, 0x0a, 0x0c];
    let csum = checksum16(&header);
    header[10] = (csum >> 8) as u8;
    header[11] = (csum & 0xff) as u8;

    // validate: save, zero, recompute, compare, restore
    let saved = u16::from_be_bytes([header[10], header[11]]);
    header[10] = 0;
    header[11] = 0;
    let recomputed = checksum16(&header);
    assert_eq!(saved, recomputed);
    header[10] = (saved >> 8) as u8;
    header[11] = (saved & 0xff) as u8;
}
