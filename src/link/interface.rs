//! Layer-2/3 glue: ARP resolution with cache and pending queues, frame encap/decap.
//!
//! Mirrors `NetworkInterface` from the original lab: `send_datagram` queues behind
//! ARP resolution, `recv_frame` learns from any ARP traffic it sees (not just
//! replies to our own requests), and `tick` drives three independent,
//! insertion-ordered expiry queues.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;

use crate::error::ConfigError;
use crate::link::wire::{
    ArpMessage, EthernetFrame, Ipv4Datagram, ARP_OPCODE_REPLY, ARP_OPCODE_REQUEST,
    ETHERNET_BROADCAST, ETHERTYPE_ARP, ETHERTYPE_IPV4,
};

const ARP_CACHE_EXPIRY_MS: u64 = 30_000;
const ARP_REQUEST_EXPIRY_MS: u64 = 5_000;
const PENDING_DATAGRAM_EXPIRY_MS: u64 = 5_000;

struct PendingDatagram {
    queued_at_ms: u64,
    datagram: Ipv4Datagram,
}

/// One network interface: an Ethernet/IPv4 address pair plus an output port.
///
/// The output port is a boxed `FnMut` rather than a generic parameter because a
/// [`crate::router::Router`] holds a heterogeneous collection of interfaces, each
/// closing over its own transmit destination (teacher's `shared_ptr<OutputPort>`
/// indirection, expressed as a trait object instead of a vtable).
pub struct NetworkInterface {
    name: String,
    ethernet_address: [u8; 6],
    ip_address: u32,
    transmit: Box<dyn FnMut(EthernetFrame)>,

    arp_cache: HashMap<u32, [u8; 6]>,
    arp_cache_queue: VecDeque<(u64, u32)>,
    arp_cache_refcount: HashMap<u32, u32>,

    arp_pending: HashSet<u32>,
    arp_pending_queue: VecDeque<(u64, u32)>,

    waiting_datagrams: HashMap<u32, Vec<PendingDatagram>>,
    datagrams_received: VecDeque<Ipv4Datagram>,

    current_time_ms: u64,
}

impl NetworkInterface {
    pub fn new(
        name: impl Into<String>,
        ethernet_address: [u8; 6],
        ip_address: u32,
        transmit: impl FnMut(EthernetFrame) + 'static,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyInterfaceName);
        }
        Ok(NetworkInterface {
            name,
            ethernet_address,
            ip_address,
            transmit: Box::new(transmit),
            arp_cache: HashMap::new(),
            arp_cache_queue: VecDeque::new(),
            arp_cache_refcount: HashMap::new(),
            arp_pending: HashSet::new(),
            arp_pending_queue: VecDeque::new(),
            waiting_datagrams: HashMap::new(),
            datagrams_received: VecDeque::new(),
            current_time_ms: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datagrams_received(&mut self) -> &mut VecDeque<Ipv4Datagram> {
        &mut self.datagrams_received
    }

    pub fn send_datagram(&mut self, dgram: Ipv4Datagram, next_hop_ip: u32) {
        if let Some(&eth) = self.arp_cache.get(&next_hop_ip) {
            self.emit_ipv4(eth, dgram);
            return;
        }

        self.waiting_datagrams.entry(next_hop_ip).or_default().push(PendingDatagram {
            queued_at_ms: self.current_time_ms,
            datagram: dgram,
        });

        if self.arp_pending.contains(&next_hop_ip) {
            return;
        }

        let request = ArpMessage {
            opcode: ARP_OPCODE_REQUEST,
            sender_ethernet: self.ethernet_address,
            sender_ip: self.ip_address,
            target_ethernet: [0; 6],
            target_ip: next_hop_ip,
        };
        (self.transmit)(EthernetFrame {
            dst: ETHERNET_BROADCAST,
            src: self.ethernet_address,
            ethertype: ETHERTYPE_ARP,
            payload: request.encode(),
        });
        self.arp_pending.insert(next_hop_ip);
        self.arp_pending_queue.push_back((self.current_time_ms, next_hop_ip));
    }

    pub fn recv_frame(&mut self, frame: EthernetFrame) {
        if frame.dst != self.ethernet_address && frame.dst != ETHERNET_BROADCAST {
            return;
        }
        match frame.ethertype {
            ETHERTYPE_IPV4 => match Ipv4Datagram::decode(&frame.payload) {
                Ok(dgram) => self.datagrams_received.push_back(dgram),
                Err(e) => trace!(error = %e, interface = %self.name, "dropping malformed ipv4 datagram"),
            },
            ETHERTYPE_ARP => match ArpMessage::decode(&frame.payload) {
                Ok(arp) => self.handle_arp(arp),
                Err(e) => trace!(error = %e, interface = %self.name, "dropping malformed arp message"),
            },
            _ => {}
        }
    }

    fn handle_arp(&mut self, arp: ArpMessage) {
        self.learn(arp.sender_ip, arp.sender_ethernet);

        if arp.opcode == ARP_OPCODE_REPLY {
            if let Some(pending) = self.waiting_datagrams.remove(&arp.sender_ip) {
                for entry in pending {
                    if self.current_time_ms.saturating_sub(entry.queued_at_ms) > PENDING_DATAGRAM_EXPIRY_MS {
                        continue;
                    }
                    self.emit_ipv4(arp.sender_ethernet, entry.datagram);
                }
            }
        } else if arp.opcode == ARP_OPCODE_REQUEST && arp.target_ip == self.ip_address {
            let reply = ArpMessage {
                opcode: ARP_OPCODE_REPLY,
                sender_ethernet: self.ethernet_address,
                sender_ip: self.ip_address,
                target_ethernet: arp.sender_ethernet,
                target_ip: arp.sender_ip,
            };
            (self.transmit)(EthernetFrame {
                dst: arp.sender_ethernet,
                src: self.ethernet_address,
                ethertype: ETHERTYPE_ARP,
                payload: reply.encode(),
            });
        }
    }

    fn learn(&mut self, ip: u32, ethernet: [u8; 6]) {
        self.arp_cache.insert(ip, ethernet);
        *self.arp_cache_refcount.entry(ip).or_insert(0) += 1;
        self.arp_cache_queue.push_back((self.current_time_ms, ip));
    }

    fn emit_ipv4(&mut self, dst: [u8; 6], dgram: Ipv4Datagram) {
        (self.transmit)(EthernetFrame {
            dst,
            src: self.ethernet_address,
            ethertype: ETHERTYPE_IPV4,
            payload: dgram.encode(),
        });
    }

    pub fn tick(&mut self, ms_since_last_tick: u64) {
        self.current_time_ms += ms_since_last_tick;

        while let Some(&(t, ip)) = self.arp_cache_queue.front() {
            if self.current_time_ms.saturating_sub(t) > ARP_CACHE_EXPIRY_MS {
                self.arp_cache_queue.pop_front();
                if let Some(cnt) = self.arp_cache_refcount.get_mut(&ip) {
                    *cnt -= 1;
                    if *cnt == 0 {
                        self.arp_cache_refcount.remove(&ip);
                        self.arp_cache.remove(&ip);
                    }
                }
            } else {
                break;
            }
        }

        while let Some(&(t, ip)) = self.arp_pending_queue.front() {
            if self.current_time_ms.saturating_sub(t) > ARP_REQUEST_EXPIRY_MS {
                self.arp_pending_queue.pop_front();
                self.arp_pending.remove(&ip);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn eth(n: u8) -> [u8; 6] {
        [0, 0, 0, 0, 0, n]
    }

    fn ip(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_be_bytes([a, b, c, d])
    }

    fn new_test_interface() -> (NetworkInterface, Rc<RefCell<Vec<EthernetFrame>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sent_clone = sent.clone();
        let iface =
            NetworkInterface::new("eth0", eth(1), ip(10, 0, 0, 1), move |f| sent_clone.borrow_mut().push(f))
                .unwrap();
        (iface, sent)
    }

    #[test]
    fn arp_resolution_flushes_pending_datagram() {
        let (mut iface, sent) = new_test_interface();
        let dst_ip = ip(10, 0, 0, 5);
        let dgram =
            Ipv4Datagram::new(64, etherparse::IpNumber::TCP, [10, 0, 0, 1], [10, 0, 0, 5], vec![1, 2, 3]).unwrap();
        iface.send_datagram(dgram, dst_ip);

        assert_eq!(sent.borrow().len(), 1);
        assert_eq!(sent.borrow()[0].ethertype, ETHERTYPE_ARP);
        sent.borrow_mut().clear();

        let reply = ArpMessage {
            opcode: ARP_OPCODE_REPLY,
            sender_ethernet: eth(5),
            sender_ip: dst_ip,
            target_ethernet: eth(1),
            target_ip: ip(10, 0, 0, 1),
        };
        iface.recv_frame(EthernetFrame {
            dst: eth(1),
            src: eth(5),
            ethertype: ETHERTYPE_ARP,
            payload: reply.encode(),
        });

        assert_eq!(sent.borrow().len(), 1);
        assert_eq!(sent.borrow()[0].dst, eth(5));
        assert_eq!(sent.borrow()[0].ethertype, ETHERTYPE_IPV4);
    }

    #[test]
    fn arp_cache_expires_after_30_seconds_and_requeries() {
        let (mut iface, sent) = new_test_interface();
        let target = ip(10, 0, 0, 5);
        let reply = ArpMessage {
            opcode: ARP_OPCODE_REPLY,
            sender_ethernet: eth(5),
            sender_ip: target,
            target_ethernet: eth(1),
            target_ip: ip(10, 0, 0, 1),
        };
        iface.recv_frame(EthernetFrame {
            dst: eth(1),
            src: eth(5),
            ethertype: ETHERTYPE_ARP,
            payload: reply.encode(),
        });
        assert!(iface.arp_cache.contains_key(&target));

        iface.tick(30_001);
        assert!(!iface.arp_cache.contains_key(&target));

        sent.borrow_mut().clear();
        let dgram =
            Ipv4Datagram::new(64, etherparse::IpNumber::TCP, [10, 0, 0, 1], [10, 0, 0, 5], vec![]).unwrap();
        iface.send_datagram(dgram, target);
        assert_eq!(sent.borrow()[0].ethertype, ETHERTYPE_ARP, "must re-query after cache expiry");
    }

    #[test]
    fn drops_frames_not_addressed_to_us() {
        let (mut iface, sent) = new_test_interface();
        iface.recv_frame(EthernetFrame {
            dst: eth(9),
            src: eth(2),
            ethertype: ETHERTYPE_ARP,
            payload: vec![],
        });
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn arp_request_for_our_ip_gets_a_reply() {
        let (mut iface, sent) = new_test_interface();
        let our_ip = ip(10, 0, 0, 1);
        let request = ArpMessage {
            opcode: ARP_OPCODE_REQUEST,
            sender_ethernet: eth(7),
            sender_ip: ip(10, 0, 0, 7),
            target_ethernet: [0; 6],
            target_ip: our_ip,
        };
        iface.recv_frame(EthernetFrame {
            dst: ETHERNET_BROADCAST,
            src: eth(7),
            ethertype: ETHERTYPE_ARP,
            payload: request.encode(),
        });
        assert_eq!(sent.borrow().len(), 1);
        assert_eq!(sent.borrow()[0].dst, eth(7));
    }
}
