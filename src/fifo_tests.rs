use super::*;
use crate::types::{Ipv4Addr, Port};

fn conn(port: u16) -> ConnId {
    ConnId {
        remote_ip: Ipv4Addr([192, 168, 0, 1]),
        remote_port: Port(port),
        local_port: Port(80),
    }
}

#[test]
fn fifo_order_preserved() {
    let mut fifo = ConnFifo::new();
    assert!(fifo.push(conn(1)));
    assert!(fifo.push(conn(2)));
    assert!(fifo.push(conn(3)));
    assert_eq!(fifo.pop(), Some(conn(1)));
    assert_eq!(fifo.pop(), Some(conn(2)));
    assert_eq!(fifo.pop(), Some(conn(3)));
    assert_eq!(fifo.pop(), None);
}

#[test]
fn fifo_rejects_push_past_capacity() {
    let mut fifo = ConnFifo::new();
    for i in 0..CONN_FIFO_CAPACITY {
        assert!(fifo.push(conn(i as u16)));
    }
    assert!(!fifo.push(conn(999)));
    assert_eq!(fifo.len(), CONN_FIFO_CAPACITY);
}

#[test]
fn fifo_wraps_around_the_backing_array() {
    let mut fifo = ConnFifo::new();
    for i in 0..CONN_FIFO_CAPACITY {
        fifo.push(conn(i as u16));
    }
    for _ in 0..CONN_FIFO_CAPACITY / 2 {
        fifo.pop();
    }
    for i in 0..CONN_FIFO_CAPACITY / 2 {
        assert!(fifo.push(conn(1000 + i as u16)));
    }
    assert_eq!(fifo.len(), CONN_FIFO_CAPACITY);
}
