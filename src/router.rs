//! Longest-prefix-match IPv4 forwarding across a router's owned interfaces.

use std::net::Ipv4Addr;

use tracing::debug;

use crate::link::interface::NetworkInterface;

#[derive(Debug, Clone, Copy)]
struct Route {
    prefix: u32,
    prefix_length: u8,
    next_hop: Option<u32>,
    interface_index: usize,
}

#[derive(Default)]
pub struct Router {
    interfaces: Vec<NetworkInterface>,
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            interfaces: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Add an interface, returning the index routes should refer to.
    pub fn add_interface(&mut self, interface: NetworkInterface) -> usize {
        self.interfaces.push(interface);
        self.interfaces.len() - 1
    }

    pub fn interface_mut(&mut self, index: usize) -> &mut NetworkInterface {
        &mut self.interfaces[index]
    }

    pub fn add_route(&mut self, prefix: u32, prefix_length: u8, next_hop: Option<u32>, interface_index: usize) {
        self.routes.push(Route {
            prefix,
            prefix_length,
            next_hop,
            interface_index,
        });
    }

    /// Index of the longest-prefix-matching route, first-inserted wins on ties.
    fn best_route(&self, dst: u32) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, route) in self.routes.iter().enumerate() {
            let matches = if route.prefix_length == 0 {
                true
            } else {
                let mask = (0xFFFF_FFFFu64 << (32 - route.prefix_length as u64)) as u32;
                (route.prefix & mask) == (dst & mask)
            };
            if !matches {
                continue;
            }
            match best {
                Some(b) if self.routes[b].prefix_length >= route.prefix_length => {}
                _ => best = Some(i),
            }
        }
        best
    }

    /// Drain every interface's received-datagram queue, forwarding what can be routed.
    pub fn route(&mut self) {
        for i in 0..self.interfaces.len() {
            loop {
                let Some(mut dgram) = self.interfaces[i].datagrams_received().pop_front() else {
                    break;
                };

                if dgram.ttl() <= 1 {
                    debug!(interface = %self.interfaces[i].name(), "dropping datagram with expired ttl");
                    continue;
                }

                let Some(route_idx) = self.best_route(dgram.destination()) else {
                    debug!(dst = %Ipv4Addr::from(dgram.destination()), "no matching route, dropping");
                    continue;
                };

                dgram.decrement_ttl_and_recompute_checksum();
                let route = self.routes[route_idx];
                let next_hop = route.next_hop.unwrap_or_else(|| dgram.destination());
                self.interfaces[route.interface_index].send_datagram(dgram, next_hop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::wire::{EthernetFrame, Ipv4Datagram};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_be_bytes([a, b, c, d])
    }

    fn new_interface(last_octet: u8) -> (NetworkInterface, Rc<RefCell<Vec<EthernetFrame>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let sent_clone = sent.clone();
        let iface = NetworkInterface::new(
            format!("eth{last_octet}"),
            [0, 0, 0, 0, 0, last_octet],
            ip(192, 168, 0, last_octet),
            move |f| sent_clone.borrow_mut().push(f),
        )
        .unwrap();
        (iface, sent)
    }

    fn inject(router: &mut Router, at_interface: usize, dst: u32, ttl: u8) {
        let dgram =
            Ipv4Datagram::new(ttl, etherparse::IpNumber::TCP, [192, 168, 0, 9], dst.to_be_bytes(), vec![]).unwrap();
        router.interface_mut(at_interface).datagrams_received().push_back(dgram);
    }

    #[test]
    fn longest_prefix_match_scenario_from_spec() {
        let (iface0, sent0) = new_interface(0);
        let (iface1, sent1) = new_interface(1);
        let (iface2, sent2) = new_interface(2);

        let mut router = Router::new();
        let i0 = router.add_interface(iface0);
        let i1 = router.add_interface(iface1);
        let i2 = router.add_interface(iface2);

        router.add_route(ip(10, 0, 0, 0), 8, None, i1);
        router.add_route(ip(10, 0, 0, 0), 16, None, i2);
        router.add_route(0, 0, None, i0);

        inject(&mut router, i0, ip(10, 0, 5, 7), 64);
        inject(&mut router, i0, ip(10, 1, 0, 1), 64);
        inject(&mut router, i0, ip(8, 8, 8, 8), 64);

        router.route();

        assert_eq!(sent2.borrow().len(), 1, "10.0.5.7 should match the /16 route");
        assert_eq!(sent1.borrow().len(), 1, "10.1.0.1 should match the /8 route");
        assert_eq!(sent0.borrow().len(), 1, "8.8.8.8 should fall through to the default route");
    }

    #[test]
    fn ttl_of_one_is_dropped_without_being_forwarded() {
        let (iface0, sent0) = new_interface(0);
        let mut router = Router::new();
        let i0 = router.add_interface(iface0);
        router.add_route(0, 0, None, i0);

        inject(&mut router, i0, ip(8, 8, 8, 8), 1);
        router.route();

        assert!(sent0.borrow().is_empty());
    }

    #[test]
    fn no_matching_route_is_dropped() {
        let (iface0, sent0) = new_interface(0);
        let mut router = Router::new();
        let i0 = router.add_interface(iface0);
        router.add_route(ip(10, 0, 0, 0), 8, None, i0);

        inject(&mut router, i0, ip(192, 168, 1, 1), 64);
        router.route();

        assert!(sent0.borrow().is_empty());
    }
}
