//! Driver glue: a background thread owns a TAP device, a `NetworkInterface`,
//! and a table of `TcpConnection`s, exposing blocking `std::io::{Read,
//! Write}` stream handles to callers — the "outer driver" spec.md §5 leaves
//! unspecified, kept in the teacher's `Mutex` + `Condvar` shape.

use std::{
    collections::{hash_map, HashMap, VecDeque},
    io,
    net::Ipv4Addr,
    os::fd::AsRawFd,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use nix::poll::{poll, PollFd, PollFlags};

mod net;
mod tcp;

use net::ethernet::EthernetFrame;
use net::network_interface::NetworkInterface;
use tcp::{
    segment::{TcpFlags, TcpSegment},
    sequence::Wrap32,
    state::Available,
    Tcp4Tuple, TcpConnection,
};

pub use net::ethernet::MacAddr;
pub use tcp::error::Error;
pub use tcp::Config;

const BUFFER_SIZE: usize = 1504;
const STREAM_CAPACITY: usize = 64 * 1024;
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Handle shared by the driver thread and every `Interface`/`TcpListener`/
/// `TcpStream` built on top of it.
type InterfaceHandle = Arc<InterfaceManager>;

struct InterfaceManager {
    manager: Mutex<ConnectionManager>,
    pending_var: Condvar,
    receive_var: Condvar,
}

/// Owns the network interface and every active connection; guarded by a
/// single mutex, exactly as the teacher's `ConnectionManager` guards its
/// single-TCB `Connection` table.
pub struct ConnectionManager {
    ip_address: Ipv4Addr,
    cfg: Config,
    nic: NetworkInterface,
    // Ports accepting new connections, and quads accepted but not yet
    // handed to a caller's `accept()`.
    pending: HashMap<u16, VecDeque<Tcp4Tuple>>,
    connections: HashMap<Tcp4Tuple, TcpConnection>,
    terminate: bool,
}

impl ConnectionManager {
    fn drain_outputs(&mut self) {
        let our_ip = self.ip_address;
        for (quad, conn) in self.connections.iter_mut() {
            while let Some(seg) = conn.output().pop_front() {
                let bytes = seg.to_ipv4_packet(our_ip, quad.src.0, quad.dst.1, quad.src.1);
                self.nic.send_datagram(bytes, quad.src.0.into());
            }
        }
    }

    fn availability(conn: &TcpConnection) -> Available {
        let mut avail = Available::empty();
        if !conn.receiver_stream().buffer_empty() || conn.receiver_stream().input_ended() || !conn.active() {
            avail |= Available::READ;
        }
        avail |= Available::WRITE;
        avail
    }
}

/// Struct that acts as an interface to the TCP implementation: it owns the
/// background thread that drives the TAP device, the network interface,
/// and every accepted connection.
pub struct Interface {
    ih: Option<InterfaceHandle>,
    jh: Option<thread::JoinHandle<io::Result<()>>>,
}

fn route_incoming(bytes: &[u8]) -> Option<(Tcp4Tuple, TcpSegment)> {
    let (ip, src_port, dst_port, seg) = TcpSegment::from_ipv4_payload(bytes)?;
    let quad = Tcp4Tuple {
        src: (ip.source_addr(), src_port),
        dst: (ip.destination_addr(), dst_port),
    };
    Some((quad, seg))
}

fn handle_segment(ih: &InterfaceHandle, quad: Tcp4Tuple, seg: TcpSegment) {
    let mut cm_guard = ih.manager.lock().unwrap();
    let cm = &mut *cm_guard;

    match cm.connections.entry(quad.clone()) {
        hash_map::Entry::Occupied(mut entry) => {
            let conn = entry.get_mut();
            conn.segment_received(&seg);
            let avail = ConnectionManager::availability(conn);
            cm.drain_outputs();
            drop(cm_guard);
            if avail.contains(Available::READ) {
                ih.receive_var.notify_all();
            }
        }
        hash_map::Entry::Vacant(e) => {
            // Listen only accepts a bare SYN (spec.md §4.3); anything else
            // aimed at an unknown quad is silently dropped (no listener, or
            // a stray/duplicate segment for a connection we've forgotten).
            if !seg.header.flags.contains(TcpFlags::SYN) {
                return;
            }
            let Some(pending) = cm.pending.get_mut(&quad.dst.1) else {
                return;
            };
            let isn = Wrap32::new(rand::random());
            let mut conn = TcpConnection::new(STREAM_CAPACITY, isn, cm.cfg);
            conn.segment_received(&seg);
            pending.push_back(quad.clone());
            e.insert(conn);
            cm.drain_outputs();
            drop(cm_guard);
            ih.pending_var.notify_all();
        }
    }
}

fn tick_all(ih: &InterfaceHandle, ms: u64) {
    let mut cm_guard = ih.manager.lock().unwrap();
    let cm = &mut *cm_guard;

    cm.nic.tick(ms);

    let mut notify_read = false;
    for conn in cm.connections.values_mut() {
        conn.tick(ms);
        if ConnectionManager::availability(conn).contains(Available::READ) {
            notify_read = true;
        }
    }
    cm.drain_outputs();
    drop(cm_guard);

    if notify_read {
        ih.receive_var.notify_all();
    }
}

fn packet_loop(tap: tun_tap::Iface, ih: InterfaceHandle) -> io::Result<()> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut last_tick = Instant::now();

    loop {
        if ih.manager.lock().unwrap().terminate {
            return Ok(());
        }

        let elapsed = last_tick.elapsed();
        if elapsed >= TICK_INTERVAL {
            tick_all(&ih, elapsed.as_millis() as u64);
            last_tick = Instant::now();
        }

        // Flush anything the network interface queued (ARP requests,
        // replies, pending-datagram releases) before blocking on input.
        loop {
            let frame = {
                let mut cm = ih.manager.lock().unwrap();
                cm.nic.frames_out().pop_front()
            };
            match frame {
                Some(frame) => {
                    tap.send(&frame.serialize())?;
                }
                None => break,
            }
        }

        let timeout_ms = (TICK_INTERVAL - last_tick.elapsed().min(TICK_INTERVAL)).as_millis() as i32;
        let mut pfd = [PollFd::new(tap.as_raw_fd(), PollFlags::POLLIN)];
        let ready = poll(&mut pfd[..], timeout_ms.max(1))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if ready == 0 {
            continue;
        }

        let nbytes = tap.recv(&mut buf)?;
        let Ok(frame) = EthernetFrame::parse(&buf[..nbytes]) else {
            continue;
        };

        let ip_bytes = {
            let mut cm = ih.manager.lock().unwrap();
            let decoded = cm.nic.recv_frame(&frame);
            // recv_frame may have queued ARP replies; flush them promptly.
            let flushed: Vec<EthernetFrame> = cm.nic.frames_out().drain(..).collect();
            drop(cm);
            for out in flushed {
                tap.send(&out.serialize())?;
            }
            decoded
        };

        let Some(ip_bytes) = ip_bytes else { continue };

        if let Some((quad, seg)) = route_incoming(&ip_bytes) {
            handle_segment(&ih, quad, seg);
        }
    }
}

impl Interface {
    /// Brings up a TAP device named `name`, bound to `ip_address`/
    /// `mac_address`, and spawns the background driver thread.
    pub fn new(name: &str, mac_address: MacAddr, ip_address: Ipv4Addr, cfg: Config) -> io::Result<Self> {
        let tap = tun_tap::Iface::without_packet_info(name, tun_tap::Mode::Tap)?;

        let manager = ConnectionManager {
            ip_address,
            cfg,
            nic: NetworkInterface::new(mac_address, ip_address.into()),
            pending: HashMap::new(),
            connections: HashMap::new(),
            terminate: false,
        };

        let ih: InterfaceHandle = Arc::new(InterfaceManager {
            manager: Mutex::new(manager),
            pending_var: Condvar::new(),
            receive_var: Condvar::new(),
        });

        let jh = {
            let ih = ih.clone();
            Some(thread::spawn(move || packet_loop(tap, ih)))
        };

        Ok(Interface { ih: Some(ih), jh })
    }

    pub fn bind(&mut self, port: u16) -> io::Result<TcpListener> {
        let mut cm = self.ih.as_mut().unwrap().manager.lock().unwrap();
        match cm.pending.entry(port) {
            hash_map::Entry::Vacant(v) => {
                v.insert(VecDeque::new());
            }
            hash_map::Entry::Occupied(_) => {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, "port in use"));
            }
        }
        drop(cm);
        Ok(TcpListener {
            ih: self.ih.as_mut().unwrap().clone(),
            port,
        })
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.ih.as_mut().unwrap().manager.lock().unwrap().terminate = true;
        drop(self.ih.take());
        self.jh
            .take()
            .expect("interface dropped twice")
            .join()
            .unwrap()
            .unwrap();
    }
}

pub struct TcpListener {
    ih: InterfaceHandle,
    port: u16,
}

impl TcpListener {
    pub fn accept(&mut self) -> io::Result<TcpStream> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            if let Some(quad) = cm
                .pending
                .get_mut(&self.port)
                .expect("port closed while listener is active")
                .pop_front()
            {
                return Ok(TcpStream {
                    ih: self.ih.clone(),
                    quad,
                });
            }
            cm = self.ih.pending_var.wait(cm).unwrap();
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        let mut cm = self.ih.manager.lock().unwrap();
        cm.pending.remove(&self.port);
    }
}

pub struct TcpStream {
    ih: InterfaceHandle,
    quad: Tcp4Tuple,
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            let conn = cm
                .connections
                .get_mut(&self.quad)
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))?;

            if !conn.receiver_stream().buffer_empty() {
                let data = conn.receiver_stream_mut().read(buf.len());
                buf[..data.len()].copy_from_slice(&data);
                return Ok(data.len());
            }
            let stream = conn.receiver_stream();
            if stream.eof() || stream.error() || !conn.active() {
                return Ok(0);
            }

            cm = self.ih.receive_var.wait(cm).unwrap();
        }
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();
        let conn = cm
            .connections
            .get_mut(&self.quad)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))?;

        let n = conn.write(buf);
        cm.drain_outputs();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TcpStream {
    /// Ends the outbound half of the stream (emits our FIN once window
    /// permits).
    pub fn shutdown(&self, _how: std::net::Shutdown) -> io::Result<()> {
        let mut cm = self.ih.manager.lock().unwrap();
        if let Some(conn) = cm.connections.get_mut(&self.quad) {
            conn.end_input_stream();
        }
        cm.drain_outputs();
        Ok(())
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        let mut cm = self.ih.manager.lock().unwrap();
        if let Some(conn) = cm.connections.get_mut(&self.quad) {
            conn.end_input_stream();
        }
        cm.drain_outputs();
    }
}
