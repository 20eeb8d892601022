//! Translates between IP datagrams and Ethernet frames, resolving next-hop
//! MAC addresses with ARP. Queues datagrams awaiting resolution and
//! re-requests on cache miss with backoff, per
//! `examples/original_source/libsponge/network_interface.hh`.

use std::collections::{HashMap, VecDeque};

use super::arp::{ArpPacket, OP_REPLY, OP_REQUEST};
use super::ethernet::{EthernetFrame, MacAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4};

const MAX_RETX_WAITING_TIME: u64 = 5000;
const MAX_CACHE_TIME: u64 = 30000;

struct CacheEntry {
    mac: MacAddr,
    age_ms: u64,
}

#[derive(Default)]
struct PendingList {
    /// `None` until the first ARP request for this IP has been sent.
    ms_since_last_arp_request: Option<u64>,
    datagrams: VecDeque<Vec<u8>>,
}

pub struct NetworkInterface {
    ethernet_address: MacAddr,
    ip_address: u32,
    frames_out: VecDeque<EthernetFrame>,
    cache: HashMap<u32, CacheEntry>,
    pending: HashMap<u32, PendingList>,
}

impl NetworkInterface {
    pub fn new(ethernet_address: MacAddr, ip_address: u32) -> Self {
        NetworkInterface {
            ethernet_address,
            ip_address,
            frames_out: VecDeque::new(),
            cache: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn frames_out(&mut self) -> &mut VecDeque<EthernetFrame> {
        &mut self.frames_out
    }

    /// Encapsulates `dgram` into an Ethernet frame if `next_hop_ip`'s MAC
    /// is cached, otherwise queues it pending ARP resolution.
    pub fn send_datagram(&mut self, dgram: Vec<u8>, next_hop_ip: u32) {
        if let Some(entry) = self.cache.get(&next_hop_ip) {
            self.send_helper(entry.mac, dgram);
            return;
        }

        let send_request = {
            let list = self.pending.entry(next_hop_ip).or_default();
            list.datagrams.push_back(dgram);
            match list.ms_since_last_arp_request {
                None => true,
                Some(ms) => ms >= MAX_RETX_WAITING_TIME,
            }
        };
        if send_request {
            self.send_arp_request(next_hop_ip);
            self.pending.get_mut(&next_hop_ip).unwrap().ms_since_last_arp_request = Some(0);
        }
    }

    fn send_helper(&mut self, dst: MacAddr, dgram: Vec<u8>) {
        let frame = EthernetFrame::new(dst, self.ethernet_address, ETHERTYPE_IPV4, dgram);
        self.frames_out.push_back(frame);
    }

    fn send_arp_request(&mut self, ip_addr: u32) {
        let arp = ArpPacket::request(self.ethernet_address, self.ip_address, ip_addr);
        let frame = EthernetFrame::new(
            MacAddr::BROADCAST,
            self.ethernet_address,
            ETHERTYPE_ARP,
            arp.serialize(),
        );
        self.frames_out.push_back(frame);
    }

    /// Returns the parsed IPv4 datagram bytes if the frame is IPv4 and
    /// addressed to us; handles ARP internally and returns `None`.
    pub fn recv_frame(&mut self, frame: &EthernetFrame) -> Option<Vec<u8>> {
        if frame.dst != self.ethernet_address && frame.dst != MacAddr::BROADCAST {
            return None;
        }

        match frame.ethertype {
            ETHERTYPE_IPV4 => Some(frame.payload.clone()),
            ETHERTYPE_ARP => {
                let arp = ArpPacket::parse(&frame.payload).ok()?;
                match arp.opcode {
                    OP_REQUEST => {
                        self.cache_mapping(arp.sender_ip, arp.sender_mac);
                        if arp.target_ip == self.ip_address {
                            let reply = ArpPacket::reply(
                                self.ethernet_address,
                                self.ip_address,
                                arp.sender_mac,
                                arp.sender_ip,
                            );
                            let frame = EthernetFrame::new(
                                arp.sender_mac,
                                self.ethernet_address,
                                ETHERTYPE_ARP,
                                reply.serialize(),
                            );
                            self.frames_out.push_back(frame);
                        }
                        self.release_pending(arp.sender_ip);
                        None
                    }
                    OP_REPLY => {
                        self.cache_mapping(arp.sender_ip, arp.sender_mac);
                        self.release_pending(arp.sender_ip);
                        None
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn cache_mapping(&mut self, ip: u32, mac: MacAddr) {
        self.cache.insert(ip, CacheEntry { mac, age_ms: 0 });
    }

    fn release_pending(&mut self, ip: u32) {
        if let Some(list) = self.pending.remove(&ip) {
            for dgram in list.datagrams {
                self.send_helper(self.cache.get(&ip).unwrap().mac, dgram);
            }
        }
    }

    pub fn tick(&mut self, ms_since_last_tick: u64) {
        self.cache.retain(|_, entry| {
            entry.age_ms += ms_since_last_tick;
            entry.age_ms < MAX_CACHE_TIME
        });

        let stale: Vec<u32> = self
            .pending
            .iter_mut()
            .filter_map(|(&ip, list)| {
                let ms = list.ms_since_last_arp_request.get_or_insert(0);
                *ms += ms_since_last_tick;
                if *ms >= MAX_RETX_WAITING_TIME && !list.datagrams.is_empty() {
                    Some(ip)
                } else {
                    None
                }
            })
            .collect();
        for ip in stale {
            self.send_arp_request(ip);
            self.pending.get_mut(&ip).unwrap().ms_since_last_arp_request = Some(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface() -> NetworkInterface {
        NetworkInterface::new(MacAddr([2, 2, 2, 2, 2, 2]), 0x0a000001)
    }

    #[test]
    fn arp_coalescing_sends_one_request_for_two_datagrams() {
        let mut nic = iface();
        nic.send_datagram(vec![1, 2, 3], 0x0a000002);
        nic.send_datagram(vec![4, 5, 6], 0x0a000002);
        assert_eq!(nic.frames_out().len(), 1);
        assert_eq!(nic.frames_out().pop_front().unwrap().ethertype, ETHERTYPE_ARP);

        nic.tick(4999);
        assert!(nic.frames_out().is_empty());
    }

    #[test]
    fn arp_resolution_flushes_pending_in_fifo_order() {
        let mut nic = iface();
        nic.send_datagram(vec![1], 0x0a000002);
        nic.send_datagram(vec![2], 0x0a000002);
        nic.frames_out().clear();

        let reply = ArpPacket::reply(
            MacAddr([9, 9, 9, 9, 9, 9]),
            0x0a000002,
            MacAddr([2, 2, 2, 2, 2, 2]),
            0x0a000001,
        );
        let frame = EthernetFrame::new(
            MacAddr([2, 2, 2, 2, 2, 2]),
            MacAddr([9, 9, 9, 9, 9, 9]),
            ETHERTYPE_ARP,
            reply.serialize(),
        );
        assert!(nic.recv_frame(&frame).is_none());

        assert_eq!(nic.frames_out().len(), 2);
        let f1 = nic.frames_out().pop_front().unwrap();
        let f2 = nic.frames_out().pop_front().unwrap();
        assert_eq!(f1.payload, vec![1]);
        assert_eq!(f2.payload, vec![2]);
        assert_eq!(f1.dst, MacAddr([9, 9, 9, 9, 9, 9]));
    }

    #[test]
    fn cache_entry_expires_after_max_cache_time() {
        let mut nic = iface();
        nic.cache_mapping(0x0a000002, MacAddr([9; 6]));
        nic.tick(30000);
        assert!(nic.cache.get(&0x0a000002).is_none());
    }

    #[test]
    fn arp_request_learns_sender_and_replies() {
        let mut nic = iface();
        let req = ArpPacket::request(MacAddr([9, 9, 9, 9, 9, 9]), 0x0a000002, 0x0a000001);
        let frame = EthernetFrame::new(
            MacAddr::BROADCAST,
            MacAddr([9, 9, 9, 9, 9, 9]),
            ETHERTYPE_ARP,
            req.serialize(),
        );
        assert!(nic.recv_frame(&frame).is_none());
        assert_eq!(nic.frames_out().len(), 1);
        let reply_frame = nic.frames_out().pop_front().unwrap();
        assert_eq!(reply_frame.dst, MacAddr([9, 9, 9, 9, 9, 9]));
        let reply = ArpPacket::parse(&reply_frame.payload).unwrap();
        assert_eq!(reply.opcode, OP_REPLY);
    }

    #[test]
    fn ipv4_frame_to_other_mac_is_discarded() {
        let mut nic = iface();
        let frame = EthernetFrame::new(
            MacAddr([7; 6]),
            MacAddr([9; 6]),
            ETHERTYPE_IPV4,
            vec![1, 2, 3],
        );
        assert!(nic.recv_frame(&frame).is_none());
    }
}
