//! Ethernet/ARP framing and IPv4 datagram encode/decode.
//!
//! Ethernet and ARP have no representation in `etherparse`, so they're hand-rolled
//! here in the same spirit as the teacher's direct byte-offset parsing in
//! `packet_loop`; IPv4 itself defers entirely to `etherparse::Ipv4Header`.

use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice};
use thiserror::Error;

pub const ETHERNET_BROADCAST: [u8; 6] = [0xff; 6];
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const ARP_OPCODE_REQUEST: u16 = 1;
pub const ARP_OPCODE_REPLY: u16 = 2;

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_HLEN: u8 = 6;
const ARP_PLEN: u8 = 4;
const ARP_MESSAGE_LEN: usize = 28;
const ETHERNET_HEADER_LEN: usize = 14;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame shorter than an Ethernet header")]
    FrameTooShort,
    #[error("ARP message malformed or unsupported hardware/protocol type")]
    MalformedArp,
    #[error("IPv4 datagram malformed: {0}")]
    MalformedIpv4(String),
}

/// An Ethernet II frame: 14-byte header plus an opaque payload.
#[derive(Debug, Clone)]
pub struct EthernetFrame {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ethertype: u16,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ETHERNET_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.dst);
        buf.extend_from_slice(&self.src);
        buf.extend_from_slice(&self.ethertype.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < ETHERNET_HEADER_LEN {
            return Err(ParseError::FrameTooShort);
        }
        let mut dst = [0u8; 6];
        dst.copy_from_slice(&bytes[0..6]);
        let mut src = [0u8; 6];
        src.copy_from_slice(&bytes[6..12]);
        let ethertype = u16::from_be_bytes([bytes[12], bytes[13]]);
        Ok(EthernetFrame {
            dst,
            src,
            ethertype,
            payload: bytes[ETHERNET_HEADER_LEN..].to_vec(),
        })
    }
}

/// A minimal ARP message: Ethernet/IPv4 only, standard field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpMessage {
    pub opcode: u16,
    pub sender_ethernet: [u8; 6],
    pub sender_ip: u32,
    pub target_ethernet: [u8; 6],
    pub target_ip: u32,
}

impl ArpMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ARP_MESSAGE_LEN);
        buf.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        buf.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        buf.push(ARP_HLEN);
        buf.push(ARP_PLEN);
        buf.extend_from_slice(&self.opcode.to_be_bytes());
        buf.extend_from_slice(&self.sender_ethernet);
        buf.extend_from_slice(&self.sender_ip.to_be_bytes());
        buf.extend_from_slice(&self.target_ethernet);
        buf.extend_from_slice(&self.target_ip.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < ARP_MESSAGE_LEN {
            return Err(ParseError::MalformedArp);
        }
        let htype = u16::from_be_bytes([bytes[0], bytes[1]]);
        let ptype = u16::from_be_bytes([bytes[2], bytes[3]]);
        if htype != ARP_HTYPE_ETHERNET
            || ptype != ARP_PTYPE_IPV4
            || bytes[4] != ARP_HLEN
            || bytes[5] != ARP_PLEN
        {
            return Err(ParseError::MalformedArp);
        }
        let opcode = u16::from_be_bytes([bytes[6], bytes[7]]);
        let mut sender_ethernet = [0u8; 6];
        sender_ethernet.copy_from_slice(&bytes[8..14]);
        let sender_ip = u32::from_be_bytes(bytes[14..18].try_into().unwrap());
        let mut target_ethernet = [0u8; 6];
        target_ethernet.copy_from_slice(&bytes[18..24]);
        let target_ip = u32::from_be_bytes(bytes[24..28].try_into().unwrap());
        Ok(ArpMessage {
            opcode,
            sender_ethernet,
            sender_ip,
            target_ethernet,
            target_ip,
        })
    }
}

/// An IPv4 datagram: an `etherparse` header plus its payload.
#[derive(Debug, Clone)]
pub struct Ipv4Datagram {
    pub header: Ipv4Header,
    pub payload: Vec<u8>,
}

impl Ipv4Datagram {
    pub fn new(
        ttl: u8,
        protocol: IpNumber,
        source: [u8; 4],
        destination: [u8; 4],
        payload: Vec<u8>,
    ) -> Result<Self, ParseError> {
        let header = Ipv4Header::new(payload.len(), ttl, protocol, source, destination)
            .map_err(|e| ParseError::MalformedIpv4(e.to_string()))?;
        Ok(Ipv4Datagram { header, payload })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let slice =
            Ipv4HeaderSlice::from_slice(bytes).map_err(|e| ParseError::MalformedIpv4(e.to_string()))?;
        let header_len = slice.slice().len();
        let header = slice.to_header();
        Ok(Ipv4Datagram {
            header,
            payload: bytes[header_len..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.header_len() + self.payload.len());
        self.header.write(&mut buf).expect("Vec<u8> writes are infallible");
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn destination(&self) -> u32 {
        u32::from_be_bytes(self.header.destination)
    }

    pub fn ttl(&self) -> u8 {
        self.header.time_to_live
    }

    /// Decrement TTL by one and recompute the header checksum. Caller must have
    /// already verified `ttl() > 1`.
    pub fn decrement_ttl_and_recompute_checksum(&mut self) {
        self.header.time_to_live -= 1;
        self.header.header_checksum = self.header.calc_header_checksum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_frame_round_trips() {
        let frame = EthernetFrame {
            dst: [1, 2, 3, 4, 5, 6],
            src: [6, 5, 4, 3, 2, 1],
            ethertype: ETHERTYPE_ARP,
            payload: vec![0xaa, 0xbb],
        };
        let decoded = EthernetFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.dst, frame.dst);
        assert_eq!(decoded.src, frame.src);
        assert_eq!(decoded.ethertype, frame.ethertype);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn arp_message_round_trips() {
        let arp = ArpMessage {
            opcode: ARP_OPCODE_REQUEST,
            sender_ethernet: [1; 6],
            sender_ip: 0x0a000001,
            target_ethernet: [0; 6],
            target_ip: 0x0a000002,
        };
        let decoded = ArpMessage::decode(&arp.encode()).unwrap();
        assert_eq!(decoded, arp);
    }

    #[test]
    fn arp_decode_rejects_short_buffers() {
        assert!(ArpMessage::decode(&[0u8; 4]).is_err());
    }

    #[test]
    fn ipv4_datagram_round_trips_and_checksum_changes_with_ttl() {
        let dgram = Ipv4Datagram::new(64, IpNumber::TCP, [10, 0, 0, 1], [10, 0, 0, 2], vec![1, 2, 3]).unwrap();
        let encoded = dgram.encode();
        let mut decoded = Ipv4Datagram::decode(&encoded).unwrap();
        assert_eq!(decoded.ttl(), 64);
        assert_eq!(decoded.destination(), u32::from_be_bytes([10, 0, 0, 2]));

        let checksum_before = decoded.header.header_checksum;
        decoded.decrement_ttl_and_recompute_checksum();
        assert_eq!(decoded.ttl(), 63);
        assert_ne!(decoded.header.header_checksum, checksum_before);
    }
}
