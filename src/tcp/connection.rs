//! Full-duplex TCP endpoint: composes a sender and a receiver into the
//! complete connection lifecycle (handshake, established transfer, FIN
//! exchange, lingering close, reset).

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use super::config::Config;
use super::receiver::TcpReceiver;
use super::segment::{TcpFlags, TcpSegment};
use super::sender::TcpSender;
use super::sequence::Wrap32;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Tcp4Tuple {
    pub src: (Ipv4Addr, u16),
    pub dst: (Ipv4Addr, u16),
}

#[derive(Debug)]
pub struct TcpConnection {
    sender: TcpSender,
    receiver: TcpReceiver,
    cfg: Config,
    output: VecDeque<TcpSegment>,
    time_since_last_segment_received: u64,
    linger_after_streams_finish: bool,
    active: bool,
}

impl TcpConnection {
    pub fn new(capacity: usize, isn: Wrap32, cfg: Config) -> Self {
        TcpConnection {
            sender: TcpSender::new(capacity, isn, &cfg),
            receiver: TcpReceiver::new(capacity),
            cfg,
            output: VecDeque::new(),
            time_since_last_segment_received: 0,
            linger_after_streams_finish: true,
            active: true,
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn output(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.output
    }

    pub fn inbound_stream_ended(&self) -> bool {
        self.receiver.stream_out().input_ended()
    }

    /// The inbound (peer-to-us) byte stream, for a driver to drain into a
    /// caller's read buffer.
    pub fn receiver_stream(&self) -> &super::byte_stream::ByteStream {
        self.receiver.stream_out()
    }

    pub fn receiver_stream_mut(&mut self) -> &mut super::byte_stream::ByteStream {
        self.receiver.stream_out_mut()
    }

    /// Room left in the outbound byte stream for a caller's `write`.
    pub fn write_capacity(&mut self) -> usize {
        self.sender.stream_in().remaining_capacity()
    }

    pub fn connect(&mut self) {
        self.sender.fill_window();
        self.send_sender_segments();
    }

    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = self.sender.stream_in().write(data);
        self.sender.fill_window();
        self.send_sender_segments();
        n
    }

    pub fn end_input_stream(&mut self) {
        self.sender.stream_in().end_input();
        self.sender.fill_window();
        self.send_sender_segments();
    }

    pub fn tick(&mut self, ms: u64) {
        if !self.active {
            return;
        }
        self.time_since_last_segment_received += ms;
        self.sender.tick(ms);
        if self.sender.consecutive_retransmissions() > self.cfg.max_retx_attempts {
            self.unclean_shutdown();
        }
        self.send_sender_segments();
    }

    pub fn segment_received(&mut self, seg: &TcpSegment) {
        if !self.active {
            return;
        }
        self.time_since_last_segment_received = 0;

        let listen = self.receiver.ackno().is_none() && self.sender.next_seqno_absolute() == 0;
        if listen {
            if !seg.header.flags.contains(TcpFlags::SYN) {
                return;
            }
            self.receiver.segment_received(seg);
            self.connect();
            return;
        }

        let syn_sent = self.sender.bytes_in_flight() == self.sender.next_seqno_absolute()
            && self.receiver.ackno().is_none();
        if syn_sent {
            if !seg.payload.is_empty() {
                return;
            }
            if !seg.header.flags.contains(TcpFlags::ACK) {
                if seg.header.flags.contains(TcpFlags::SYN) {
                    self.receiver.segment_received(seg);
                    self.sender.send_empty_segment();
                    self.send_sender_segments();
                }
                return;
            }
            if seg.header.flags.contains(TcpFlags::RST) {
                self.sender.stream_in().set_error();
                self.receiver.stream_out_mut().set_error();
                self.active = false;
                return;
            }
        }

        self.receiver.segment_received(seg);
        self.sender
            .ack_received(seg.header.ackno, seg.header.window);

        if seg.length_in_sequence_space() > 0 && self.sender.output().is_empty() {
            self.sender.send_empty_segment();
        }

        if seg.header.flags.contains(TcpFlags::RST) {
            self.sender.send_empty_segment();
            self.unclean_shutdown();
            return;
        }

        self.send_sender_segments();
    }

    fn send_sender_segments(&mut self) {
        while let Some(mut seg) = self.sender.output().pop_front() {
            if let Some(ackno) = self.receiver.ackno() {
                seg.set_ack(true, ackno, self.receiver.window_size());
            }
            self.output.push_back(seg);
        }
        self.clean_shutdown_check();
    }

    fn clean_shutdown_check(&mut self) {
        if !self.receiver.stream_out().input_ended() {
            return;
        }
        if !self.sender.stream_in().eof() {
            self.linger_after_streams_finish = false;
            return;
        }
        if self.sender.bytes_in_flight() == 0
            && (!self.linger_after_streams_finish
                || self.time_since_last_segment_received >= 10 * self.cfg.rt_timeout)
        {
            self.active = false;
        }
    }

    fn unclean_shutdown(&mut self) {
        self.sender.stream_in().set_error();
        self.receiver.stream_out_mut().set_error();
        self.active = false;
        let mut seg = match self.sender.output().pop_front() {
            Some(seg) => seg,
            None => {
                self.sender.send_empty_segment();
                self.sender.output().pop_front().unwrap()
            }
        };
        if let Some(ackno) = self.receiver.ackno() {
            seg.set_ack(true, ackno, self.receiver.window_size());
        }
        seg.set_rst(true);
        self.output.push_back(seg);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.active {
            log::warn!("TcpConnection dropped while still active; sending RST");
            self.sender.send_empty_segment();
            self.unclean_shutdown();
        }
    }
}
