//! Bit-exact Ethernet frame encode/decode: dst MAC, src MAC, ethertype,
//! payload.

use crate::tcp::error::Error;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

const HEADER_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);
}

#[derive(Debug, Clone)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16, payload: Vec<u8>) -> Self {
        EthernetFrame {
            dst,
            src,
            ethertype,
            payload,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < HEADER_LEN {
            return Err(Error::TruncatedEthernetFrame(data.len()));
        }
        let dst = MacAddr(data[0..6].try_into().unwrap());
        let src = MacAddr(data[6..12].try_into().unwrap());
        let ethertype = u16::from_be_bytes([data[12], data[13]]);
        let payload = data[HEADER_LEN..].to_vec();
        Ok(EthernetFrame {
            dst,
            src,
            ethertype,
            payload,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.dst.0);
        buf.extend_from_slice(&self.src.0);
        buf.extend_from_slice(&self.ethertype.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_bytes() {
        let frame = EthernetFrame::new(
            MacAddr::BROADCAST,
            MacAddr([1, 2, 3, 4, 5, 6]),
            ETHERTYPE_ARP,
            vec![9, 9, 9],
        );
        let bytes = frame.serialize();
        let parsed = EthernetFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.dst, MacAddr::BROADCAST);
        assert_eq!(parsed.src, MacAddr([1, 2, 3, 4, 5, 6]));
        assert_eq!(parsed.ethertype, ETHERTYPE_ARP);
        assert_eq!(parsed.payload, vec![9, 9, 9]);
    }

    #[test]
    fn rejects_truncated_frame() {
        assert!(EthernetFrame::parse(&[0u8; 10]).is_err());
    }
}
