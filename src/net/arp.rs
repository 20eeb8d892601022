//! ARP message: bit-exact 28-byte encode/decode for Ethernet/IPv4.

use super::ethernet::MacAddr;
use crate::tcp::error::Error;

const HW_ETHERNET: u16 = 1;
const PROTO_IPV4: u16 = 0x0800;
const HW_LEN: u8 = 6;
const PROTO_LEN: u8 = 4;

pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

const PACKET_LEN: usize = 28;

#[derive(Debug, Clone, Copy)]
pub struct ArpPacket {
    pub opcode: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: u32,
    pub target_mac: MacAddr,
    pub target_ip: u32,
}

impl ArpPacket {
    pub fn request(sender_mac: MacAddr, sender_ip: u32, target_ip: u32) -> Self {
        ArpPacket {
            opcode: OP_REQUEST,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply(sender_mac: MacAddr, sender_ip: u32, target_mac: MacAddr, target_ip: u32) -> Self {
        ArpPacket {
            opcode: OP_REPLY,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < PACKET_LEN {
            return Err(Error::TruncatedArpPacket(data.len()));
        }
        let hw_type = u16::from_be_bytes([data[0], data[1]]);
        let proto_type = u16::from_be_bytes([data[2], data[3]]);
        let hw_len = data[4];
        let proto_len = data[5];
        if hw_type != HW_ETHERNET || proto_type != PROTO_IPV4 || hw_len != HW_LEN || proto_len != PROTO_LEN {
            return Err(Error::UnsupportedArpAddressFamily);
        }
        let opcode = u16::from_be_bytes([data[6], data[7]]);
        let sender_mac = MacAddr(data[8..14].try_into().unwrap());
        let sender_ip = u32::from_be_bytes(data[14..18].try_into().unwrap());
        let target_mac = MacAddr(data[18..24].try_into().unwrap());
        let target_ip = u32::from_be_bytes(data[24..28].try_into().unwrap());
        Ok(ArpPacket {
            opcode,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_LEN);
        buf.extend_from_slice(&HW_ETHERNET.to_be_bytes());
        buf.extend_from_slice(&PROTO_IPV4.to_be_bytes());
        buf.push(HW_LEN);
        buf.push(PROTO_LEN);
        buf.extend_from_slice(&self.opcode.to_be_bytes());
        buf.extend_from_slice(&self.sender_mac.0);
        buf.extend_from_slice(&self.sender_ip.to_be_bytes());
        buf.extend_from_slice(&self.target_mac.0);
        buf.extend_from_slice(&self.target_ip.to_be_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = ArpPacket::request(MacAddr([1, 2, 3, 4, 5, 6]), 0x0a000001, 0x0a000002);
        let bytes = req.serialize();
        assert_eq!(bytes.len(), PACKET_LEN);
        let parsed = ArpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.opcode, OP_REQUEST);
        assert_eq!(parsed.sender_ip, 0x0a000001);
        assert_eq!(parsed.target_ip, 0x0a000002);
        assert_eq!(parsed.target_mac, MacAddr::ZERO);
    }

    #[test]
    fn rejects_wrong_hardware_type() {
        let mut bytes = ArpPacket::request(MacAddr([1; 6]), 1, 2).serialize();
        bytes[1] = 2; // corrupt hardware type
        assert!(ArpPacket::parse(&bytes).is_err());
    }
}
