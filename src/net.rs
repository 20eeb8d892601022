//! Link layer: Ethernet/ARP codecs and the network interface that bridges
//! IP datagrams to Ethernet frames.

pub mod arp;
pub mod ethernet;
pub mod network_interface;
