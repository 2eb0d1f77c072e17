//! Server-side TCP engine (RFC 793 subset): passive open only, no options,
//! no retransmission timers or congestion control — cumulative ACK and two
//! distinct close paths (locally-initiated and peer-initiated).
//!
//! `tcp_in` never touches the connection table itself: `Stack::poll` looks
//! the connection up (or creates a fresh LISTEN one) using [`peek_ports`]
//! and passes a plain `&mut Connection` in, the same split `arp.rs` uses to
//! keep state-machine code free of driver/table aliasing concerns.

use std::fmt;

use bitflags::bitflags;
use log::{debug, trace};

use crate::buf::{add_pseudo_header, fold_checksum, ones_complement_sum, Buf};
use crate::types::{IpProtocol, Ipv4Addr, Port};

pub const TCP_HEADER_LEN: usize = 20;

/// Largest payload `write_to_buf` will ever copy into one segment: the
/// buffer's full capacity minus the TCP header `tcp_send` still has to push
/// onto the same buffer afterward.
const MAX_SEGMENT_PAYLOAD: usize = crate::buf::BUF_MAX_LEN - TCP_HEADER_LEN;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct TcpFlags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const PSH = 0b0000_1000;
        const ACK = 0b0001_0000;
        const URG = 0b0010_0000;
    }
}

/// Opaque handle to a connection, held by application code. Carries no
/// reference into `Stack`'s connection table, so there is nothing for the
/// borrow checker to alias against when a handler callback needs to call
/// back into `Stack` (e.g. `Stack::tcp_write`) from within its own dispatch.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub(crate) remote_ip: Ipv4Addr,
    pub(crate) remote_port: Port,
    pub(crate) local_port: Port,
}

impl fmt::Debug for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local:{} <- {}:{}", self.local_port, self.remote_ip, self.remote_port)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnState {
    Listen,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    LastAck,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TcpEvent {
    Connected,
    DataRecv,
    Closed,
}

pub struct Connection {
    pub state: ConnState,
    pub remote_ip: Ipv4Addr,
    pub remote_port: Port,
    pub local_port: Port,
    pub unack_seq: u32,
    pub next_seq: u32,
    pub ack: u32,
    pub remote_win: u16,
    pub rx_buf: Buf,
    pub tx_buf: Buf,
}

impl Connection {
    pub fn new_listen(remote_ip: Ipv4Addr, remote_port: Port, local_port: Port) -> Self {
        Self {
            state: ConnState::Listen,
            remote_ip,
            remote_port,
            local_port,
            unack_seq: 0,
            next_seq: 0,
            ack: 0,
            remote_win: 0,
            rx_buf: Buf::empty(),
            tx_buf: Buf::empty(),
        }
    }

    pub fn id(&self) -> ConnId {
        ConnId {
            remote_ip: self.remote_ip,
            remote_port: self.remote_port,
            local_port: self.local_port,
        }
    }

    /// Release buffers and drop back to unused LISTEN bookkeeping. The
    /// caller decides separately whether to also remove the table entry —
    /// see the `tcp_close(port)` discussion in DESIGN.md.
    fn release(&mut self) {
        self.rx_buf = Buf::empty();
        self.tx_buf = Buf::empty();
        self.state = ConnState::Listen;
    }
}

fn tcp_checksum(segment: &[u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> u16 {
    let mut sum = 0u32;
    add_pseudo_header(&mut sum, src_ip, dst_ip, IpProtocol::Tcp.as_u8(), segment.len());
    sum = sum.wrapping_add(ones_complement_sum(segment));
    fold_checksum(sum)
}

/// Read the source/destination ports out of a not-yet-validated segment,
/// for connection-table lookup before full processing. Returns `None` if
/// the segment is too short to even hold a header.
pub fn peek_ports(buf: &Buf) -> Option<(Port, Port)> {
    if buf.len() < TCP_HEADER_LEN {
        return None;
    }
    let hdr = buf.as_slice();
    Some((
        Port(u16::from_be_bytes([hdr[0], hdr[1]])),
        Port(u16::from_be_bytes([hdr[2], hdr[3]])),
    ))
}

/// Prepend the 20-byte TCP header to `buf` (currently holding only the
/// segment's payload) and fill in its checksum. The wire `seq` field names
/// the first byte of *this* segment's payload, i.e. `next_seq -
/// payload_len`; `next_seq` itself is then advanced by one extra if SYN or
/// FIN is set, since both consume a sequence number.
fn tcp_send(buf: &mut Buf, connect: &mut Connection, flags: TcpFlags, local_ip: Ipv4Addr) {
    let payload_len = buf.len();
    buf.add_header(TCP_HEADER_LEN)
        .expect("tcp header push overflowed buffer capacity");
    let seq = connect.next_seq.wrapping_sub(payload_len as u32);
    {
        let hdr = buf.as_mut_slice();
        hdr[0..2].copy_from_slice(&connect.local_port.as_u16().to_be_bytes());
        hdr[2..4].copy_from_slice(&connect.remote_port.as_u16().to_be_bytes());
        hdr[4..8].copy_from_slice(&seq.to_be_bytes());
        hdr[8..12].copy_from_slice(&connect.ack.to_be_bytes());
        hdr[12] = 5 << 4;
        hdr[13] = flags.bits();
        hdr[14..16].copy_from_slice(&connect.remote_win.to_be_bytes());
        hdr[16..18].copy_from_slice(&0u16.to_be_bytes());
        hdr[18..20].copy_from_slice(&0u16.to_be_bytes());
    }
    let csum = tcp_checksum(buf.as_slice(), local_ip, connect.remote_ip);
    buf.as_mut_slice()[16..18].copy_from_slice(&csum.to_be_bytes());
    trace!("tcp: tx {flags:?} seq={seq} ack={}", connect.ack);

    if flags.intersects(TcpFlags::SYN | TcpFlags::FIN) {
        connect.next_seq = connect.next_seq.wrapping_add(1);
    }
}

/// Ship whatever unsent bytes `tx_buf` holds (bounded by the peer's
/// advertised window) into `out`, advancing `next_seq`.
fn write_to_buf(connect: &mut Connection, out: &mut Buf) {
    let sent = connect.next_seq.wrapping_sub(connect.unack_seq) as usize;
    let unsent = connect.tx_buf.len().saturating_sub(sent);
    let size = unsent.min(connect.remote_win as usize).min(MAX_SEGMENT_PAYLOAD);
    out.init(size);
    out.as_mut_slice()
        .copy_from_slice(&connect.tx_buf.as_slice()[sent..sent + size]);
    connect.next_seq = connect.next_seq.wrapping_add(size as u32);
}

/// Append `payload` to `rx_buf`, advancing `ack` by its length.
fn read_from_buf(connect: &mut Connection, payload: &[u8]) {
    connect
        .rx_buf
        .append(payload)
        .expect("rx_buf overflowed — application must drain via Stack::tcp_read before the window fills");
    connect.ack = connect.ack.wrapping_add(payload.len() as u32);
}

/// What `Stack::poll` must do as a result of processing one TCP segment.
pub enum TcpAction {
    None,
    /// Transmit `buf` (TCP header already built; still needs `ip_out`/
    /// `arp_out`/`ethernet_out` wrapping).
    Send(Buf),
    /// Invoke the handler registered for `conn_id`'s local port with
    /// `event`. For `DataRecv`, the caller must follow up with
    /// [`send_data_reply`] once the handler has had a chance to populate
    /// `tx_buf` — `tcp_in` itself never re-enters handler dispatch.
    Notify { conn_id: ConnId, event: TcpEvent },
}

/// Process one incoming, already-looked-up TCP segment. `buf` holds the
/// segment (header + payload) with the IP header already stripped; `src_ip`
/// is the sender. `isn` is a fresh random value to use as our side's initial
/// sequence number if this segment turns out to be the SYN that starts a
/// new connection (ignored otherwise) — callers draw it from a CSPRNG seeded
/// once at `Stack` construction, never reseeded per-connection.
pub fn tcp_in(buf: &mut Buf, src_ip: Ipv4Addr, local_ip: Ipv4Addr, connect: &mut Connection, isn: u32) -> Vec<TcpAction> {
    if buf.len() < TCP_HEADER_LEN {
        trace!("tcp: drop short segment ({} bytes)", buf.len());
        return vec![];
    }

    let saved_checksum = u16::from_be_bytes([buf.as_slice()[16], buf.as_slice()[17]]);
    buf.as_mut_slice()[16] = 0;
    buf.as_mut_slice()[17] = 0;
    let recomputed = tcp_checksum(buf.as_slice(), src_ip, local_ip);
    buf.as_mut_slice()[16..18].copy_from_slice(&saved_checksum.to_be_bytes());
    if saved_checksum != recomputed {
        trace!("tcp: drop bad checksum");
        return vec![];
    }

    let (seq_number, ack_number, window, flags) = {
        let hdr = buf.as_slice();
        (
            u32::from_be_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]),
            u32::from_be_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]),
            u16::from_be_bytes([hdr[14], hdr[15]]),
            TcpFlags::from_bits_truncate(hdr[13]),
        )
    };

    if connect.state == ConnState::Listen {
        return handle_listen(connect, seq_number, window, flags, local_ip, isn);
    }

    if seq_number != connect.ack {
        debug!("tcp: out-of-order segment from {src_ip}, resetting with ACK+SYN");
        let mut out = Buf::empty();
        out.init(0);
        tcp_send(&mut out, connect, TcpFlags::ACK | TcpFlags::SYN, local_ip);
        return vec![TcpAction::Send(out)];
    }

    if flags.contains(TcpFlags::RST) {
        connect.release();
        return vec![];
    }

    buf.remove_header(TCP_HEADER_LEN);

    match connect.state {
        ConnState::Listen => unreachable!("handled above"),
        ConnState::SynRcvd => handle_syn_rcvd(connect, flags),
        ConnState::Established => handle_established(connect, buf, flags, ack_number, local_ip),
        ConnState::FinWait1 => handle_fin_wait_1(connect, flags),
        ConnState::FinWait2 => handle_fin_wait_2(connect, flags, local_ip),
        ConnState::LastAck => handle_last_ack(connect, flags),
    }
}

fn handle_listen(
    connect: &mut Connection,
    seq_number: u32,
    window: u16,
    flags: TcpFlags,
    local_ip: Ipv4Addr,
    isn: u32,
) -> Vec<TcpAction> {
    if flags.contains(TcpFlags::RST) {
        return vec![];
    }

    if !flags.contains(TcpFlags::SYN) {
        debug!("tcp: non-SYN segment on a listening connection, resetting");
        connect.next_seq = 0;
        connect.ack = seq_number.wrapping_add(1);
        let mut out = Buf::empty();
        out.init(0);
        tcp_send(&mut out, connect, TcpFlags::ACK | TcpFlags::RST, local_ip);
        return vec![TcpAction::Send(out)];
    }

    connect.rx_buf.init(0);
    connect.tx_buf.init(0);
    connect.unack_seq = isn;
    connect.next_seq = isn;
    connect.ack = seq_number.wrapping_add(1);
    connect.remote_win = window;
    connect.state = ConnState::SynRcvd;
    let mut out = Buf::empty();
    out.init(0);
    tcp_send(&mut out, connect, TcpFlags::ACK | TcpFlags::SYN, local_ip);
    vec![TcpAction::Send(out)]
}

fn handle_syn_rcvd(connect: &mut Connection, flags: TcpFlags) -> Vec<TcpAction> {
    if !flags.contains(TcpFlags::ACK) {
        return vec![];
    }
    connect.unack_seq = connect.unack_seq.wrapping_add(1);
    connect.state = ConnState::Established;
    vec![TcpAction::Notify {
        conn_id: connect.id(),
        event: TcpEvent::Connected,
    }]
}

fn handle_established(
    connect: &mut Connection,
    buf: &Buf,
    flags: TcpFlags,
    ack_number: u32,
    local_ip: Ipv4Addr,
) -> Vec<TcpAction> {
    if !flags.contains(TcpFlags::ACK) && !flags.contains(TcpFlags::FIN) {
        return vec![];
    }

    if flags.contains(TcpFlags::ACK) && connect.unack_seq < ack_number && ack_number < connect.next_seq {
        let consumed = ack_number.wrapping_sub(connect.unack_seq) as usize;
        connect.tx_buf.remove_header(consumed);
        connect.unack_seq = ack_number;
    }

    read_from_buf(connect, buf.as_slice());

    if flags.contains(TcpFlags::FIN) {
        connect.state = ConnState::LastAck;
        connect.ack = connect.ack.wrapping_add(1);
        let mut out = Buf::empty();
        out.init(0);
        tcp_send(&mut out, connect, TcpFlags::ACK | TcpFlags::FIN, local_ip);
        return vec![TcpAction::Send(out)];
    }

    if !buf.is_empty() {
        return vec![TcpAction::Notify {
            conn_id: connect.id(),
            event: TcpEvent::DataRecv,
        }];
    }

    vec![]
}

/// After the handler has had a chance to write a reply into `tx_buf`
/// (following a `TcpEvent::DataRecv` notification), ship it back with an
/// ACK. Called by `Stack::poll` right after delivering the notification —
/// never from inside `tcp_in`, which must not re-enter handler dispatch.
pub fn send_data_reply(connect: &mut Connection, local_ip: Ipv4Addr) -> Buf {
    let mut out = Buf::empty();
    write_to_buf(connect, &mut out);
    tcp_send(&mut out, connect, TcpFlags::ACK, local_ip);
    out
}

fn handle_fin_wait_1(connect: &mut Connection, flags: TcpFlags) -> Vec<TcpAction> {
    if flags.contains(TcpFlags::FIN) && flags.contains(TcpFlags::ACK) {
        connect.release();
    } else if flags.contains(TcpFlags::ACK) {
        connect.state = ConnState::FinWait2;
    }
    vec![]
}

fn handle_fin_wait_2(connect: &mut Connection, flags: TcpFlags, local_ip: Ipv4Addr) -> Vec<TcpAction> {
    if !flags.contains(TcpFlags::FIN) {
        return vec![];
    }
    connect.ack = connect.ack.wrapping_add(1);
    let mut out = Buf::empty();
    out.init(0);
    tcp_send(&mut out, connect, TcpFlags::ACK, local_ip);
    connect.release();
    vec![TcpAction::Send(out)]
}

fn handle_last_ack(connect: &mut Connection, flags: TcpFlags) -> Vec<TcpAction> {
    if !flags.contains(TcpFlags::ACK) {
        return vec![];
    }
    let conn_id = connect.id();
    connect.release();
    vec![TcpAction::Notify {
        conn_id,
        event: TcpEvent::Closed,
    }]
}

/// Locally-initiated close (`Stack::tcp_close_connection`). If ESTABLISHED,
/// flushes `tx_buf` and sends FIN+ACK, moving to FIN_WAIT_1 to await the
/// peer's half; otherwise releases immediately. Either way, the caller still
/// decides whether to drop the table entry — see DESIGN.md.
pub fn connect_close(connect: &mut Connection, local_ip: Ipv4Addr) -> Option<Buf> {
    if connect.state == ConnState::Established {
        let mut out = Buf::empty();
        write_to_buf(connect, &mut out);
        tcp_send(&mut out, connect, TcpFlags::ACK | TcpFlags::FIN, local_ip);
        connect.state = ConnState::FinWait1;
        return Some(out);
    }
    connect.release();
    None
}

/// Copy up to `dst.len()` bytes from the front of `rx_buf`, compacting
/// afterward if removal left the live region needing a shift.
pub fn connect_read(connect: &mut Connection, dst: &mut [u8]) -> usize {
    let size = connect.rx_buf.len().min(dst.len());
    dst[..size].copy_from_slice(&connect.rx_buf.as_slice()[..size]);
    if connect.rx_buf.remove_header(size) {
        connect.rx_buf.compact();
    }
    size
}

/// Append `data` to `tx_buf` for the next `send_data_reply`/`connect_close`
/// to pick up. Refuses (returns 0) rather than exceed the peer's advertised
/// window against bytes already in flight.
///
/// If `tx_buf` has no room left, compacts it and ships its current contents
/// with an ACK right away (the returned `Buf`, still needing `ip_out`/
/// `arp_out`/`ethernet_out` wrapping), then refuses this call with 0 so the
/// caller retries once the peer's ACK has trimmed `tx_buf` back down.
pub fn connect_write(connect: &mut Connection, data: &[u8], local_ip: Ipv4Addr) -> (usize, Option<Buf>) {
    let outstanding = connect.next_seq.wrapping_sub(connect.unack_seq) as usize;
    if (outstanding + data.len()) as u32 >= connect.remote_win as u32 {
        return (0, None);
    }
    if connect.tx_buf.append(data).is_err() {
        connect.tx_buf.compact();
        let mut out = Buf::empty();
        write_to_buf(connect, &mut out);
        tcp_send(&mut out, connect, TcpFlags::ACK, local_ip);
        return (0, Some(out));
    }
    (data.len(), None)
}

#[cfg(test)]
#[path = "tcp_tests.rs"]
mod tcp_tests;
