//! Address Resolution Protocol (RFC 826), Ethernet/IPv4 only.
//!
//! Holds the IP→MAC resolution table and the one-pending-buffer-per-destination
//! queue that `ip_out`/`arp_out` feed while a lookup is in flight. Dispatch logic
//! lives here; actually sending bytes is left to the caller (`Stack::poll`),
//! which holds the driver: compute what to do here, then perform the one
//! side effect that needs `&mut` access to the shared transport there.

use std::collections::HashMap;

use log::{debug, trace};

use crate::buf::Buf;
use crate::types::{Ipv4Addr, MacAddr};

pub const ARP_PACKET_LEN: usize = 28;
const ARP_HW_ETHERNET: u16 = 1;
const ARP_PROTO_IPV4: u16 = 0x0800;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;

struct ArpEntry {
    mac: MacAddr,
    last_seen: u64,
}

struct PendingEntry {
    buf: Buf,
    queued_at: u64,
}

/// What `Stack::poll` must actually transmit as a result of processing one
/// ARP event. Kept separate from `ArpState` so the state machine here never
/// needs a driver reference.
pub enum ArpAction {
    None,
    /// A buffer that had been waiting for this resolution can now go out.
    FlushPending { buf: Buf, dst_mac: MacAddr },
    /// Reply to an ARP request addressed to us.
    SendReply { dst_ip: Ipv4Addr, dst_mac: MacAddr },
    /// No cached resolution and nothing already pending: broadcast a request.
    SendRequest { target_ip: Ipv4Addr },
}

pub struct ArpState {
    table: HashMap<Ipv4Addr, ArpEntry>,
    pending: HashMap<Ipv4Addr, PendingEntry>,
}

impl ArpState {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.table.get(&ip).map(|e| e.mac)
    }

    fn age_table(&mut self, now: u64, timeout_secs: u64) {
        self.table.retain(|_, e| now.saturating_sub(e.last_seen) < timeout_secs);
    }

    fn age_pending(&mut self, now: u64, min_interval_secs: u64) {
        self.pending
            .retain(|_, e| now.saturating_sub(e.queued_at) < min_interval_secs);
    }

    /// Parse and validate an incoming ARP packet, update the table
    /// unconditionally for the sender, and decide what (if anything) to send
    /// back. Any accepted ARP packet — request or reply — flushes a pending
    /// send queued for the sender's IP, not only replies; this mirrors the
    /// original lab's behaviour and depends on the queued packet having been
    /// destined for an address that was the subject of our own prior request.
    pub fn arp_in(&mut self, payload: &[u8], now: u64, local_ip: Ipv4Addr) -> ArpAction {
        if payload.len() < ARP_PACKET_LEN {
            trace!("arp: drop short packet ({} bytes)", payload.len());
            return ArpAction::None;
        }
        let hw_type = u16::from_be_bytes([payload[0], payload[1]]);
        let proto_type = u16::from_be_bytes([payload[2], payload[3]]);
        let hw_len = payload[4];
        let proto_len = payload[5];
        let opcode = u16::from_be_bytes([payload[6], payload[7]]);

        if hw_type != ARP_HW_ETHERNET
            || proto_type != ARP_PROTO_IPV4
            || hw_len != 6
            || proto_len != 4
            || (opcode != ARP_OP_REQUEST && opcode != ARP_OP_REPLY)
        {
            trace!("arp: drop malformed packet");
            return ArpAction::None;
        }

        let mut sender_mac = [0u8; 6];
        sender_mac.copy_from_slice(&payload[8..14]);
        let sender_mac = MacAddr(sender_mac);
        let sender_ip = Ipv4Addr([payload[14], payload[15], payload[16], payload[17]]);
        let target_ip = Ipv4Addr([payload[24], payload[25], payload[26], payload[27]]);

        self.table.insert(
            sender_ip,
            ArpEntry {
                mac: sender_mac,
                last_seen: now,
            },
        );
        debug!("arp: learned {sender_ip} -> {sender_mac}");

        if let Some(pending) = self.pending.remove(&sender_ip) {
            return ArpAction::FlushPending {
                buf: pending.buf,
                dst_mac: sender_mac,
            };
        }

        if opcode == ARP_OP_REQUEST && target_ip == local_ip {
            return ArpAction::SendReply {
                dst_ip: sender_ip,
                dst_mac: sender_mac,
            };
        }

        ArpAction::None
    }

    /// Resolve `dst_ip` for an outbound IP packet already built into `buf`.
    /// On a cache hit returns the buffer back immediately for transmission;
    /// on a miss it is queued (subject to the one-pending-per-destination
    /// rate limit) and a request is broadcast.
    pub fn arp_out(
        &mut self,
        buf: Buf,
        dst_ip: Ipv4Addr,
        now: u64,
        timeout_secs: u64,
        min_interval_secs: u64,
    ) -> ArpAction {
        self.age_table(now, timeout_secs);
        self.age_pending(now, min_interval_secs);

        if let Some(mac) = self.lookup(dst_ip) {
            return ArpAction::FlushPending { buf, dst_mac: mac };
        }

        if self.pending.contains_key(&dst_ip) {
            trace!("arp: drop send to {dst_ip}, resolution already pending");
            return ArpAction::None;
        }

        self.pending.insert(dst_ip, PendingEntry { buf, queued_at: now });
        ArpAction::SendRequest { target_ip: dst_ip }
    }
}

/// Build an ARP request or reply packet into `out`.
pub fn build_packet(
    out: &mut Buf,
    opcode_request: bool,
    local_ip: Ipv4Addr,
    local_mac: MacAddr,
    target_ip: Ipv4Addr,
    target_mac: MacAddr,
) {
    out.init(ARP_PACKET_LEN);
    let pkt = out.as_mut_slice();
    pkt[0..2].copy_from_slice(&ARP_HW_ETHERNET.to_be_bytes());
    pkt[2..4].copy_from_slice(&ARP_PROTO_IPV4.to_be_bytes());
    pkt[4] = 6;
    pkt[5] = 4;
    let opcode = if opcode_request { ARP_OP_REQUEST } else { ARP_OP_REPLY };
    pkt[6..8].copy_from_slice(&opcode.to_be_bytes());
    pkt[8..14].copy_from_slice(local_mac.as_bytes());
    pkt[14..18].copy_from_slice(local_ip.as_bytes());
    pkt[18..24].copy_from_slice(target_mac.as_bytes());
    pkt[24..28].copy_from_slice(target_ip.as_bytes());
}

#[cfg(test)]
#[path = "arp_tests.rs"]
mod arp_tests;
