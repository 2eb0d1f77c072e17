//! Minimal HTTP/1.0 static file server, grounded in the original teaching
//! lab's `http.c`: a TCP connect handler drops newly-accepted connections
//! into a FIFO, an outer loop drains the FIFO one request at a time, and
//! `get_line`/`http_send` block by repeatedly polling the stack rather than
//! the OS — there is no OS socket underneath any of this, just a TAP device
//! and the frames this crate builds by hand.
//!
//! Usage: `http_file_server [tap-device] [doc-root] [port]`
//! (defaults: `tap0`, `./www`, `80`). Requires permission to open
//! `/dev/net/tun` (root, or `CAP_NET_ADMIN`) and a TAP device already
//! assigned the peer side of `10.0.0.1/24`.

use std::cell::RefCell;
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use slop_netstack::{
    Clock, ConnFifo, ConnId, EthernetDriver, Ipv4Addr, MacAddr, NetError, Port, Stack,
    StackConfig, TcpEvent,
};

const IFF_TAP: i16 = 0x0002;
const IFF_NO_PI: i16 = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

/// A TAP network device opened through the kernel's universal tun/tap
/// driver, read and written as raw Ethernet frames — the userland stand-in
/// for the NIC ring buffers the kernel driver registry talks to directly.
struct TapDriver {
    fd: RawFd,
}

impl TapDriver {
    fn open(name: &str) -> io::Result<Self> {
        let path = CString::new("/dev/net/tun").unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ifr_name = [0u8; libc::IFNAMSIZ];
        let name_bytes = name.as_bytes();
        if name_bytes.len() >= ifr_name.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tap device name too long"));
        }
        ifr_name[..name_bytes.len()].copy_from_slice(name_bytes);

        // struct ifreq is a union past the name field; we only ever need
        // the flags member, so a manually laid-out buffer sized to the
        // real struct (40 bytes on Linux) is simpler than binding the
        // whole union.
        let mut ifreq = [0u8; 40];
        ifreq[..libc::IFNAMSIZ].copy_from_slice(&ifr_name);
        ifreq[16..18].copy_from_slice(&(IFF_TAP | IFF_NO_PI).to_ne_bytes());

        let rc = unsafe { libc::ioctl(fd, TUNSETIFF, ifreq.as_mut_ptr()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

        Ok(Self { fd })
    }
}

impl EthernetDriver for TapDriver {
    fn send(&mut self, frame: &[u8]) {
        let n = unsafe { libc::write(self.fd, frame.as_ptr() as *const libc::c_void, frame.len()) };
        if n < 0 {
            warn!("tap: write failed: {}", io::Error::last_os_error());
        }
    }

    fn recv(&mut self, into: &mut [u8]) -> usize {
        let n = unsafe { libc::read(self.fd, into.as_mut_ptr() as *mut libc::c_void, into.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                warn!("tap: read failed: {err}");
            }
            return 0;
        }
        n as usize
    }
}

impl Drop for TapDriver {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

struct WallClock {
    start: Instant,
}

impl WallClock {
    fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for WallClock {
    fn now_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

fn parse_ipv4(s: &str) -> Ipv4Addr {
    let mut octets = [0u8; 4];
    for (i, part) in s.splitn(4, '.').enumerate() {
        octets[i] = part.parse().expect("malformed IPv4 address argument");
    }
    Ipv4Addr::from_bytes(octets)
}

/// Block until a full line (CRLF or LF terminated, the terminator
/// discarded) has been read from `conn`, or the connection goes idle for
/// too long. Mirrors the original's `get_line`: read a byte, if there is
/// nothing yet call `poll` and try again.
fn get_line<D: EthernetDriver, C: Clock>(stack: &mut Stack<D, C>, conn: ConnId, max_len: usize) -> Option<String> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    let mut idle_polls = 0u32;
    const MAX_IDLE_POLLS: u32 = 200_000;

    loop {
        let n = stack.tcp_read(conn, &mut byte);
        if n > 0 {
            idle_polls = 0;
            match byte[0] {
                b'\n' => break,
                b'\r' => {}
                c => {
                    if line.len() < max_len {
                        line.push(c);
                    }
                }
            }
            continue;
        }

        if !stack.poll() {
            idle_polls += 1;
            if idle_polls > MAX_IDLE_POLLS {
                return None;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }

    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Block until every byte of `data` has been accepted into the connection's
/// send window, polling in between refusals exactly as the original's
/// `http_send` does.
fn http_send<D: EthernetDriver, C: Clock>(stack: &mut Stack<D, C>, conn: ConnId, data: &[u8]) {
    let mut sent = 0usize;
    while sent < data.len() {
        match stack.tcp_write(conn, &data[sent..]) {
            Ok(n) => {
                sent += n;
                if n == 0 {
                    stack.poll();
                }
            }
            Err(NetError::Shutdown) => return,
            Err(err) => {
                error!("http: write failed: {err}");
                return;
            }
        }
    }
}

fn send_file<D: EthernetDriver, C: Clock>(stack: &mut Stack<D, C>, conn: ConnId, doc_root: &Path, url: &str) {
    let relative = if url == "/" { "/index.html" } else { url };
    let path = doc_root.join(relative.trim_start_matches('/'));

    match fs::read(&path) {
        Ok(body) => {
            http_send(stack, conn, b"HTTP/1.0 200 OK\r\n");
            http_send(stack, conn, b"Server: \r\n");
            http_send(stack, conn, b"Content-Type: \r\n");
            http_send(stack, conn, b"\r\n");
            http_send(stack, conn, &body);
        }
        Err(_) => {
            http_send(stack, conn, b"HTTP/1.0 404 NOT FOUND\r\n");
            http_send(stack, conn, b"Server: \r\n");
            http_send(stack, conn, b"Content-Type: text/html\r\n");
            http_send(stack, conn, b"\r\n");
            http_send(stack, conn, b"<HTML><TITLE>Not Found</TITLE>\r\n");
            http_send(stack, conn, b"The resource specified\r\n");
            http_send(stack, conn, b"is unavailable or nonexistent.\r\n");
            http_send(stack, conn, b"</BODY></HTML>\r\n");
        }
    }
}

fn serve_one<D: EthernetDriver, C: Clock>(stack: &mut Stack<D, C>, conn: ConnId, doc_root: &Path) {
    let Some(request_line) = get_line(stack, conn, 1023) else {
        stack.tcp_close_connection(conn);
        return;
    };

    let mut parts = request_line.split(' ');
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    if method == "GET" && !path.is_empty() {
        send_file(stack, conn, doc_root, path);
    }

    stack.tcp_close_connection(conn);
    info!("http: closed {conn:?}");
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let tap_name = args.next().unwrap_or_else(|| "tap0".to_string());
    let doc_root = args.next().unwrap_or_else(|| "./www".to_string());
    let port: u16 = args.next().map(|s| s.parse().expect("port must be numeric")).unwrap_or(80);

    let driver = TapDriver::open(&tap_name).unwrap_or_else(|err| {
        error!("failed to open tap device {tap_name}: {err}");
        std::process::exit(1);
    });

    let config = StackConfig {
        net_if_ip: parse_ipv4("10.0.0.1"),
        net_if_mac: MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
        arp_timeout_secs: 60,
        arp_min_interval_secs: 1,
        mtu: slop_netstack::buf::ETHERNET_MAX_TRANSPORT_UNIT as u16,
        ip_default_ttl: slop_netstack::ipv4::IP_DEFAULT_TTL,
    };
    let mut stack = Stack::new(config, driver, WallClock::new(), 0);

    let fifo = Rc::new(RefCell::new(ConnFifo::new()));
    let fifo_for_handler = fifo.clone();
    stack
        .tcp_open(Port::new(port), move |_stack, conn, event| match event {
            TcpEvent::Connected => {
                info!("http: connected {conn:?}");
                if !fifo_for_handler.borrow_mut().push(conn) {
                    warn!("http: connection backlog full, dropping {conn:?}");
                }
            }
            TcpEvent::DataRecv => {}
            TcpEvent::Closed => info!("http: peer closed {conn:?}"),
        })
        .expect("http port already in use");

    let doc_root = Path::new(&doc_root).to_path_buf();
    info!("http_file_server: serving {} on port {port} via {tap_name}", doc_root.display());

    loop {
        let had_frame = stack.poll();

        loop {
            let next = fifo.borrow_mut().pop();
            match next {
                Some(conn) => serve_one(&mut stack, conn, &doc_root),
                None => break,
            }
        }

        if !had_frame {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
