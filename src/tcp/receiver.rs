//! The receiving half of a TCP connection: accepts segments, hands their
//! payload to the reassembler, and exposes the ackno/window to advertise
//! back to the peer.

use super::byte_stream::ByteStream;
use super::reassembler::Reassembler;
use super::segment::{TcpFlags, TcpSegment};
use super::sequence::Wrap32;

#[derive(Debug)]
pub struct TcpReceiver {
    reassembler: Reassembler,
    isn: Option<Wrap32>,
}

impl TcpReceiver {
    pub fn new(capacity: usize) -> Self {
        TcpReceiver {
            reassembler: Reassembler::new(ByteStream::new(capacity)),
            isn: None,
        }
    }

    pub fn segment_received(&mut self, seg: &TcpSegment) {
        let syn = seg.header.flags.contains(TcpFlags::SYN);
        let fin = seg.header.flags.contains(TcpFlags::FIN);

        let isn = match self.isn {
            None => {
                if !syn {
                    return;
                }
                self.isn = Some(seg.header.seqno);
                seg.header.seqno
            }
            Some(isn) => isn,
        };

        // Checkpoint is the absolute index right after the last byte this
        // receiver has assembled, shifted by 1 to account for the SYN
        // occupying absolute index 0.
        let checkpoint = self.reassembler.first_unassembled() + 1;
        let abs_seqno = seg.header.seqno.unwrap(isn, checkpoint);
        let stream_index = if syn { 0 } else { abs_seqno - 1 };

        self.reassembler.insert(stream_index, &seg.payload, fin);
    }

    pub fn ackno(&self) -> Option<Wrap32> {
        self.isn.map(|isn| {
            let mut absolute = self.reassembler.first_unassembled() + 1;
            if self.reassembler.output().input_ended() {
                absolute += 1;
            }
            Wrap32::wrap(absolute, isn)
        })
    }

    pub fn window_size(&self) -> u16 {
        self.reassembler
            .output()
            .remaining_capacity()
            .min(u16::MAX as usize) as u16
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }

    pub fn stream_out(&self) -> &ByteStream {
        self.reassembler.output()
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        self.reassembler.output_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::segment::TcpSegment;

    #[test]
    fn no_ackno_before_syn() {
        let r = TcpReceiver::new(100);
        assert!(r.ackno().is_none());
    }

    #[test]
    fn syn_sets_isn_and_ackno() {
        let mut r = TcpReceiver::new(100);
        let seg = TcpSegment::syn(Wrap32::new(5));
        r.segment_received(&seg);
        assert_eq!(r.ackno(), Some(Wrap32::new(6)));
    }

    #[test]
    fn data_after_syn_advances_ackno() {
        let mut r = TcpReceiver::new(100);
        r.segment_received(&TcpSegment::syn(Wrap32::new(0)));
        let seg = TcpSegment::with_payload(Wrap32::new(1), b"hello".to_vec());
        r.segment_received(&seg);
        assert_eq!(r.ackno(), Some(Wrap32::new(6)));
        assert_eq!(r.stream_out().buffer_size(), 5);
    }

    #[test]
    fn fin_advances_ackno_by_one_more_once_assembled() {
        let mut r = TcpReceiver::new(100);
        r.segment_received(&TcpSegment::syn(Wrap32::new(0)));
        let mut seg = TcpSegment::with_payload(Wrap32::new(1), b"hi".to_vec());
        seg.set_fin(true);
        r.segment_received(&seg);
        assert_eq!(r.ackno(), Some(Wrap32::new(4))); // SYN + "hi" + FIN
    }

    #[test]
    fn window_size_reflects_remaining_capacity() {
        let mut r = TcpReceiver::new(5);
        r.segment_received(&TcpSegment::syn(Wrap32::new(0)));
        assert_eq!(r.window_size(), 5);
        let seg = TcpSegment::with_payload(Wrap32::new(1), b"ab".to_vec());
        r.segment_received(&seg);
        assert_eq!(r.window_size(), 3);
    }
}
