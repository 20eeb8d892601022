//! TCP segment: header plus opaque payload, and the flags carried in the
//! header.

use std::net::Ipv4Addr;

use bitflags::bitflags;
use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, TcpHeader, TcpHeaderSlice};

use super::sequence::Wrap32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const SYN = 0b0001;
        const ACK = 0b0010;
        const FIN = 0b0100;
        const RST = 0b1000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegmentHeader {
    pub seqno: Wrap32,
    pub ackno: Wrap32,
    pub window: u16,
    pub flags: TcpFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub header: TcpSegmentHeader,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn syn(isn: Wrap32) -> Self {
        TcpSegment {
            header: TcpSegmentHeader {
                seqno: isn,
                ackno: Wrap32::new(0),
                window: 0,
                flags: TcpFlags::SYN,
            },
            payload: Vec::new(),
        }
    }

    pub fn empty(seqno: Wrap32) -> Self {
        TcpSegment {
            header: TcpSegmentHeader {
                seqno,
                ackno: Wrap32::new(0),
                window: 0,
                flags: TcpFlags::empty(),
            },
            payload: Vec::new(),
        }
    }

    pub fn with_payload(seqno: Wrap32, payload: Vec<u8>) -> Self {
        TcpSegment {
            header: TcpSegmentHeader {
                seqno,
                ackno: Wrap32::new(0),
                window: 0,
                flags: TcpFlags::empty(),
            },
            payload,
        }
    }

    /// `|payload| + SYN + FIN`.
    pub fn length_in_sequence_space(&self) -> u64 {
        self.payload.len() as u64
            + self.header.flags.contains(TcpFlags::SYN) as u64
            + self.header.flags.contains(TcpFlags::FIN) as u64
    }

    pub fn set_syn(&mut self, syn: bool) {
        self.header.flags.set(TcpFlags::SYN, syn);
    }

    pub fn set_fin(&mut self, fin: bool) {
        self.header.flags.set(TcpFlags::FIN, fin);
    }

    pub fn set_ack(&mut self, ack: bool, ackno: Wrap32, window: u16) {
        self.header.flags.set(TcpFlags::ACK, ack);
        if ack {
            self.header.ackno = ackno;
            self.header.window = window;
        }
    }

    pub fn set_rst(&mut self, rst: bool) {
        self.header.flags.set(TcpFlags::RST, rst);
    }

    /// Serializes this segment as a complete IPv4 packet (header + TCP
    /// header + payload), checksum included. `IpNumber::TCP` / TTL 64,
    /// matching the wire constants spec.md §6 leaves to the codec layer.
    pub fn to_ipv4_packet(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> Vec<u8> {
        const TTL: u8 = 64;

        let mut tcp = TcpHeader::new(src_port, dst_port, self.header.seqno.raw(), self.header.window);
        tcp.syn = self.header.flags.contains(TcpFlags::SYN);
        tcp.ack = self.header.flags.contains(TcpFlags::ACK);
        tcp.fin = self.header.flags.contains(TcpFlags::FIN);
        tcp.rst = self.header.flags.contains(TcpFlags::RST);
        tcp.acknowledgment_number = self.header.ackno.raw();

        let ip = Ipv4Header::new(
            (tcp.header_len() as usize + self.payload.len()) as u16,
            TTL,
            IpNumber::TCP,
            src_ip.octets(),
            dst_ip.octets(),
        )
        .expect("segment payload too large for a single IPv4 packet");

        tcp.checksum = tcp
            .calc_checksum_ipv4(&ip, &self.payload)
            .expect("failed to compute tcp checksum");

        let mut buf =
            Vec::with_capacity(ip.header_len() as usize + tcp.header_len() as usize + self.payload.len());
        ip.write(&mut buf).expect("ipv4 header write");
        tcp.write(&mut buf).expect("tcp header write");
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses a `TcpSegment` from a decoded IPv4 payload. Returns `None`
    /// if the bytes are not a well-formed TCP segment.
    pub fn from_ipv4_payload(data: &[u8]) -> Option<(Ipv4HeaderSlice<'_>, u16, u16, Self)> {
        let ip = Ipv4HeaderSlice::from_slice(data).ok()?;
        if ip.protocol() != IpNumber::TCP {
            return None;
        }
        let ip_len = ip.slice().len();
        let tcp = TcpHeaderSlice::from_slice(&data[ip_len..]).ok()?;
        let tcp_len = tcp.slice().len();
        let payload = data[ip_len + tcp_len..].to_vec();

        let mut flags = TcpFlags::empty();
        flags.set(TcpFlags::SYN, tcp.syn());
        flags.set(TcpFlags::ACK, tcp.ack());
        flags.set(TcpFlags::FIN, tcp.fin());
        flags.set(TcpFlags::RST, tcp.rst());

        let seg = TcpSegment {
            header: TcpSegmentHeader {
                seqno: Wrap32::new(tcp.sequence_number()),
                ackno: Wrap32::new(tcp.acknowledgment_number()),
                window: tcp.window_size(),
                flags,
            },
            payload,
        };
        Some((ip, tcp.source_port(), tcp.destination_port(), seg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_in_sequence_space_counts_syn_and_fin() {
        let mut seg = TcpSegment::with_payload(Wrap32::new(0), vec![1, 2, 3]);
        assert_eq!(seg.length_in_sequence_space(), 3);
        seg.set_syn(true);
        assert_eq!(seg.length_in_sequence_space(), 4);
        seg.set_fin(true);
        assert_eq!(seg.length_in_sequence_space(), 5);
    }

    #[test]
    fn empty_segment_has_zero_length() {
        let seg = TcpSegment::empty(Wrap32::new(42));
        assert_eq!(seg.length_in_sequence_space(), 0);
    }

    #[test]
    fn ipv4_packet_round_trips() {
        let mut seg = TcpSegment::with_payload(Wrap32::new(100), b"hi".to_vec());
        seg.set_ack(true, Wrap32::new(9000), 4096);

        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let bytes = seg.to_ipv4_packet(src, dst, 12345, 80);

        let (ip, src_port, dst_port, parsed) = TcpSegment::from_ipv4_payload(&bytes).unwrap();
        assert_eq!(ip.source_addr(), src);
        assert_eq!(ip.destination_addr(), dst);
        assert_eq!(src_port, 12345);
        assert_eq!(dst_port, 80);
        assert_eq!(parsed.header.seqno, Wrap32::new(100));
        assert_eq!(parsed.header.ackno, Wrap32::new(9000));
        assert_eq!(parsed.header.window, 4096);
        assert!(parsed.header.flags.contains(TcpFlags::ACK));
        assert_eq!(parsed.payload, b"hi");
    }
}
