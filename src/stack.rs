//! `Stack`: the single owner of the ARP table/pending map, the UDP/TCP
//! port handler tables, the TCP connection table, the per-interface
//! identity, and the IP datagram id counter, threaded by `&mut` through
//! the whole call chain instead of living as file-scope statics.
//!
//! `Stack` is generic over its two external collaborators, `D:
//! EthernetDriver` and `C: Clock`, monomorphized rather than boxed as
//! `dyn` — there is exactly one of each per stack and the indirection
//! would buy nothing.

use std::collections::HashMap;

use log::{info, warn};

use crate::arp::{self, ArpAction, ArpState};
use crate::buf::Buf;
use crate::driver::{Clock, EthernetDriver};
use crate::ethernet::{self, ETH_HEADER_LEN};
use crate::icmp::{self, UnreachableCode};
use crate::ipv4::{self, IpInAction, IPV4_HEADER_LEN};
use crate::tcp::{self, ConnId, ConnState, Connection, TcpAction, TcpEvent};
use crate::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr, NetError, Port};
use crate::udp::{self, UdpInAction, UDP_HEADER_LEN};

/// A registered UDP datagram handler. Takes `&mut Stack` so a reply (the
/// common echo/request-response shape) can be sent from inside the callback
/// via `Stack::udp_send` — there is no longer a bare global `udp_send` to
/// call once stack state lives inside a struct rather than file-scope
/// statics.
pub type UdpHandler<D, C> = Box<dyn FnMut(&mut Stack<D, C>, &[u8], Ipv4Addr, Port)>;

/// A registered TCP connection-event handler.
pub type TcpHandler<D, C> = Box<dyn FnMut(&mut Stack<D, C>, ConnId, TcpEvent)>;

/// Interface-level configuration, read-only after `Stack::new`. Collapsed
/// to the single directly-connected interface this stack supports — no
/// routing, no multi-device config list.
#[derive(Clone, Copy, Debug)]
pub struct StackConfig {
    pub net_if_ip: Ipv4Addr,
    pub net_if_mac: MacAddr,
    pub arp_timeout_secs: u64,
    pub arp_min_interval_secs: u64,
    /// Outbound MTU: the largest IP datagram `ip_out` will ship unfragmented.
    pub mtu: u16,
    /// TTL stamped into every IP header this stack originates.
    pub ip_default_ttl: u8,
}

/// Largest application payload `udp_send` will accept: total frame budget
/// minus Ethernet/IP/UDP headers. Larger requests are refused up front
/// rather than panicking deep inside `Buf::init`.
const MAX_UDP_PAYLOAD: usize = crate::buf::BUF_MAX_LEN - ETH_HEADER_LEN - IPV4_HEADER_LEN - UDP_HEADER_LEN;

pub struct Stack<D, C> {
    config: StackConfig,
    driver: D,
    clock: C,
    arp: ArpState,
    udp_handlers: HashMap<Port, UdpHandler<D, C>>,
    tcp_handlers: HashMap<Port, TcpHandler<D, C>>,
    connections: HashMap<ConnId, Connection>,
    next_ip_id: u16,
    rng_state: u64,
}

impl<D: EthernetDriver, C: Clock> Stack<D, C> {
    /// Construct a stack and send one gratuitous ARP request announcing our
    /// address. `rng_seed` seeds a small xorshift PRNG once, here at
    /// construction rather than reseeding from wall-clock seconds on every
    /// accepted connection as the original lab does: rapid connection setup
    /// under a coarse wall-clock seed would repeat ISNs, which this
    /// construction avoids while still only drawing a random 16-bit value.
    pub fn new(config: StackConfig, driver: D, clock: C, rng_seed: u64) -> Self {
        let mut stack = Self {
            config,
            driver,
            clock,
            arp: ArpState::new(),
            udp_handlers: HashMap::new(),
            tcp_handlers: HashMap::new(),
            connections: HashMap::new(),
            next_ip_id: 0,
            rng_state: if rng_seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { rng_seed },
        };
        stack.send_gratuitous_arp();
        stack
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.config.net_if_ip
    }

    pub fn local_mac(&self) -> MacAddr {
        self.config.net_if_mac
    }

    /// Look up a cached ARP resolution. Exposed mainly for diagnostics and
    /// tests; the stack itself never needs to ask this from the outside.
    pub fn arp_lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.arp.lookup(ip)
    }

    // =========================================================================
    // Top-level entry point
    // =========================================================================

    /// Attempt one frame ingress and run it to completion, including any
    /// egress it triggers. Returns `false` if the driver had nothing
    /// waiting. Nothing under this call ever calls `poll` again itself —
    /// that re-entry is confined to application-level blocking helpers
    /// (see `src/bin/http_file_server.rs`).
    pub fn poll(&mut self) -> bool {
        let mut raw = [0u8; crate::buf::BUF_MAX_LEN];
        let n = self.driver.recv(&mut raw);
        if n == 0 {
            return false;
        }
        let mut buf = Buf::from_slice(&raw[..n]);
        let Some((ethertype, _src_mac)) = ethernet::ethernet_in(&mut buf) else {
            return true;
        };
        match ethertype {
            EtherType::Arp => {
                let now = self.clock.now_secs();
                let action = self.arp.arp_in(buf.as_slice(), now, self.config.net_if_ip);
                self.apply_arp_action(action);
            }
            EtherType::Ipv4 => self.ip_dispatch(buf),
        }
        true
    }

    fn ip_dispatch(&mut self, mut buf: Buf) {
        match ipv4::ip_in(&mut buf, self.config.net_if_ip) {
            IpInAction::None => {}
            IpInAction::Deliver { protocol, src_ip } => match protocol {
                IpProtocol::Icmp => self.icmp_dispatch(buf, src_ip),
                IpProtocol::Udp => self.udp_dispatch(buf, src_ip),
                IpProtocol::Tcp => self.tcp_dispatch(buf, src_ip),
            },
            IpInAction::Unreachable { src_ip } => {
                let reply = icmp::unreachable(&buf, UnreachableCode::ProtocolUnreachable);
                self.emit(reply, src_ip, IpProtocol::Icmp);
            }
        }
    }

    fn icmp_dispatch(&mut self, mut buf: Buf, src_ip: Ipv4Addr) {
        if let Some(dst_ip) = icmp::icmp_in(&mut buf, src_ip) {
            self.emit(buf, dst_ip, IpProtocol::Icmp);
        }
    }

    fn udp_dispatch(&mut self, mut buf: Buf, src_ip: Ipv4Addr) {
        let local_ip = self.config.net_if_ip;
        let action = {
            let handlers = &self.udp_handlers;
            udp::udp_in(&mut buf, src_ip, local_ip, |port| handlers.contains_key(&port))
        };
        match action {
            UdpInAction::None => {}
            UdpInAction::Deliver { src_port, dst_port } => {
                if let Some(mut handler) = self.udp_handlers.remove(&dst_port) {
                    handler(self, buf.as_slice(), src_ip, src_port);
                    self.udp_handlers.insert(dst_port, handler);
                }
            }
            UdpInAction::PortUnreachable => {
                // The UDP header (8 bytes) is still in place, and the IP
                // header is still physically present in the store just
                // behind the current head (`ip_in` only moved the pointer
                // forward) — re-exposing it is a push, not a rebuild.
                buf.add_header(IPV4_HEADER_LEN)
                    .expect("ip header bytes still present behind the udp segment");
                let reply = icmp::unreachable(&buf, UnreachableCode::PortUnreachable);
                // Addressed to our own IP rather than the original sender,
                // matching the original lab's behaviour.
                self.emit(reply, local_ip, IpProtocol::Icmp);
            }
        }
    }

    fn tcp_dispatch(&mut self, mut buf: Buf, src_ip: Ipv4Addr) {
        let Some((src_port, dst_port)) = tcp::peek_ports(&buf) else {
            return;
        };
        if !self.tcp_handlers.contains_key(&dst_port) {
            return;
        }
        let conn_id = ConnId {
            remote_ip: src_ip,
            remote_port: src_port,
            local_port: dst_port,
        };
        let local_ip = self.config.net_if_ip;
        self.connections
            .entry(conn_id)
            .or_insert_with(|| Connection::new_listen(src_ip, src_port, dst_port));
        let isn = self.next_isn();

        let actions = {
            let connect = self.connections.get_mut(&conn_id).expect("just inserted above");
            tcp::tcp_in(&mut buf, src_ip, local_ip, connect, isn)
        };

        for action in actions {
            match action {
                TcpAction::None => {}
                TcpAction::Send(out) => self.emit(out, conn_id.remote_ip, IpProtocol::Tcp),
                TcpAction::Notify { conn_id, event } => self.dispatch_tcp_event(conn_id, event),
            }
        }

        // A connection is destroyed on return to LISTEN. Every close path
        // (RST while still LISTEN, the LAST_ACK and FIN_WAIT_2 completions)
        // ends with `Connection::release` setting the state back to
        // `Listen`; this is the one place that invariant is enforced
        // against the table.
        if matches!(self.connections.get(&conn_id).map(|c| c.state), Some(ConnState::Listen)) {
            self.connections.remove(&conn_id);
        }
    }

    fn dispatch_tcp_event(&mut self, conn_id: ConnId, event: TcpEvent) {
        if let Some(mut handler) = self.tcp_handlers.remove(&conn_id.local_port) {
            handler(self, conn_id, event);
            self.tcp_handlers.insert(conn_id.local_port, handler);
        }
        if event == TcpEvent::DataRecv {
            let local_ip = self.config.net_if_ip;
            if let Some(connect) = self.connections.get_mut(&conn_id) {
                let out = tcp::send_data_reply(connect, local_ip);
                self.emit(out, conn_id.remote_ip, IpProtocol::Tcp);
            }
        }
        if event == TcpEvent::Connected {
            info!("tcp: connection established {conn_id:?}");
        }
    }

    // =========================================================================
    // Egress plumbing: ip_out -> arp_out -> ethernet_out -> driver
    // =========================================================================

    fn emit(&mut self, payload: Buf, dst_ip: Ipv4Addr, protocol: IpProtocol) {
        let local_ip = self.config.net_if_ip;
        let fragments = ipv4::ip_out(
            &payload,
            local_ip,
            dst_ip,
            protocol,
            &mut self.next_ip_id,
            self.config.mtu,
            self.config.ip_default_ttl,
        );
        for frag in fragments {
            self.send_via_arp(frag, dst_ip);
        }
    }

    fn send_via_arp(&mut self, buf: Buf, dst_ip: Ipv4Addr) {
        let now = self.clock.now_secs();
        let action = self.arp.arp_out(
            buf,
            dst_ip,
            now,
            self.config.arp_timeout_secs,
            self.config.arp_min_interval_secs,
        );
        self.apply_arp_action(action);
    }

    fn apply_arp_action(&mut self, action: ArpAction) {
        match action {
            ArpAction::None => {}
            ArpAction::FlushPending { buf, dst_mac } => self.eth_send(buf, dst_mac, EtherType::Ipv4),
            ArpAction::SendReply { dst_ip, dst_mac } => {
                let mut out = Buf::empty();
                arp::build_packet(&mut out, false, self.config.net_if_ip, self.config.net_if_mac, dst_ip, dst_mac);
                self.eth_send(out, dst_mac, EtherType::Arp);
            }
            ArpAction::SendRequest { target_ip } => {
                let mut out = Buf::empty();
                arp::build_packet(
                    &mut out,
                    true,
                    self.config.net_if_ip,
                    self.config.net_if_mac,
                    target_ip,
                    MacAddr::ZERO,
                );
                self.eth_send(out, MacAddr::BROADCAST, EtherType::Arp);
            }
        }
    }

    fn eth_send(&mut self, mut buf: Buf, dst_mac: MacAddr, protocol: EtherType) {
        let local_mac = self.config.net_if_mac;
        let driver = &mut self.driver;
        ethernet::ethernet_out(&mut buf, local_mac, dst_mac, protocol, |frame| driver.send(frame));
    }

    fn send_gratuitous_arp(&mut self) {
        let mut out = Buf::empty();
        arp::build_packet(
            &mut out,
            true,
            self.config.net_if_ip,
            self.config.net_if_mac,
            self.config.net_if_ip,
            MacAddr::ZERO,
        );
        self.eth_send(out, MacAddr::BROADCAST, EtherType::Arp);
    }

    fn xorshift64(&mut self) -> u64 {
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        x
    }

    /// A fresh ISN for a newly-accepted connection. Only the low 16 bits
    /// are drawn, left in a `u32` field to match real sequence-number
    /// arithmetic.
    fn next_isn(&mut self) -> u32 {
        (self.xorshift64() & 0xFFFF) as u32
    }

    // =========================================================================
    // Application-facing surface
    // =========================================================================

    pub fn udp_open(
        &mut self,
        port: Port,
        handler: impl FnMut(&mut Stack<D, C>, &[u8], Ipv4Addr, Port) + 'static,
    ) -> Result<(), NetError> {
        if self.udp_handlers.contains_key(&port) {
            return Err(NetError::AddressInUse);
        }
        self.udp_handlers.insert(port, Box::new(handler));
        Ok(())
    }

    pub fn udp_close(&mut self, port: Port) {
        self.udp_handlers.remove(&port);
    }

    pub fn udp_send(&mut self, data: &[u8], src_port: Port, dst_ip: Ipv4Addr, dst_port: Port) -> Result<usize, NetError> {
        if data.len() > MAX_UDP_PAYLOAD {
            warn!("udp: refusing oversized send ({} > {MAX_UDP_PAYLOAD})", data.len());
            return Err(NetError::InvalidArgument);
        }
        let payload = Buf::from_slice(data);
        let local_ip = self.config.net_if_ip;
        let segment = udp::udp_out(&payload, src_port, local_ip, dst_ip, dst_port);
        self.emit(segment, dst_ip, IpProtocol::Udp);
        Ok(data.len())
    }

    pub fn tcp_open(
        &mut self,
        port: Port,
        handler: impl FnMut(&mut Stack<D, C>, ConnId, TcpEvent) + 'static,
    ) -> Result<(), NetError> {
        if self.tcp_handlers.contains_key(&port) {
            return Err(NetError::AddressInUse);
        }
        self.tcp_handlers.insert(port, Box::new(handler));
        Ok(())
    }

    /// Release every connection whose `local_port` matches, then deregister
    /// the handler.
    pub fn tcp_close(&mut self, port: Port) {
        self.connections.retain(|id, _| id.local_port != port);
        self.tcp_handlers.remove(&port);
    }

    pub fn tcp_read(&mut self, conn: ConnId, dst: &mut [u8]) -> usize {
        self.connections.get_mut(&conn).map(|c| tcp::connect_read(c, dst)).unwrap_or(0)
    }

    pub fn tcp_write(&mut self, conn: ConnId, data: &[u8]) -> Result<usize, NetError> {
        let local_ip = self.config.net_if_ip;
        let (written, flush) = match self.connections.get_mut(&conn) {
            Some(c) => tcp::connect_write(c, data, local_ip),
            None => return Err(NetError::Shutdown),
        };
        if let Some(out) = flush {
            self.emit(out, conn.remote_ip, IpProtocol::Tcp);
        }
        Ok(written)
    }

    pub fn tcp_close_connection(&mut self, conn: ConnId) {
        let local_ip = self.config.net_if_ip;
        if let Some(connect) = self.connections.get_mut(&conn) {
            if let Some(out) = tcp::connect_close(connect, local_ip) {
                self.emit(out, conn.remote_ip, IpProtocol::Tcp);
            }
        }
        if matches!(self.connections.get(&conn).map(|c| c.state), Some(ConnState::Listen)) {
            self.connections.remove(&conn);
        }
    }
}

#[cfg(test)]
#[path = "stack_tests.rs"]
mod stack_tests;
