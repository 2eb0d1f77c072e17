//! A user-space TCP/IP stack operating directly above a raw Ethernet frame
//! driver: ARP, IPv4 (with send-side fragmentation), ICMP echo and
//! unreachable, UDP, and a server-side TCP connection engine sufficient to
//! host an HTTP/1.0 file server.
//!
//! Layers are leaves-first: [`buf`] (the movable-head packet buffer) is
//! depended on by everything above it; [`arp`] and [`ethernet`] frame the
//! link layer; [`ipv4`] validates, fragments, and dispatches; [`icmp`],
//! [`udp`], and [`tcp`] are the three protocols IPv4 carries. [`stack`]
//! owns all of the above plus the application-facing surface
//! (`Stack::udp_open`/`tcp_open`/... ), generalizing the single set of
//! process-wide statics the original lab used into one struct threaded by
//! `&mut` reference. See `DESIGN.md` for the grounding of each module.

pub mod arp;
pub mod buf;
pub mod driver;
pub mod ethernet;
pub mod fifo;
pub mod icmp;
pub mod ipv4;
mod stack;
pub mod tcp;
pub mod types;
pub mod udp;

pub use driver::{Clock, EthernetDriver};
pub use fifo::ConnFifo;
pub use stack::{Stack, StackConfig, TcpHandler, UdpHandler};
pub use tcp::{ConnId, TcpEvent};
pub use types::{EtherType, IpProtocol, Ipv4Addr, MacAddr, NetError, Port};
