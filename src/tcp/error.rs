//! Failures that can occur at the seams of the stack: decoding bytes off
//! the wire, or talking to the TAP device. The core state machines
//! (sender/receiver/connection/network interface) never return `Result` —
//! per spec, they reject or flag-set silently — this type is only for the
//! codec and I/O layers around them.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("truncated ethernet frame: {0} bytes")]
    TruncatedEthernetFrame(usize),

    #[error("truncated arp packet: {0} bytes")]
    TruncatedArpPacket(usize),

    #[error("unsupported arp hardware/protocol type")]
    UnsupportedArpAddressFamily,

    #[error("tap device error: {0}")]
    Io(#[from] std::io::Error),
}
