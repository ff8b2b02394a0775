//! A minimal blocking `TcpStream`, active-open only: wires a [`TcpSender`]/[`TcpReceiver`]
//! pair to a TUN device via a background polling thread, generalizing the teacher's
//! `Interface`/`TcpListener`/`TcpStream` trio down to the single client connection
//! `webget` needs.

use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, TcpHeader, TcpHeaderSlice};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use rand::Rng;
use tracing::{trace, warn};

use crate::byte_stream::ByteStream;
use crate::error::ConnectError;
use crate::reassembler::Reassembler;
use crate::tcp::config::TcpConfig;
use crate::tcp::message::{TcpReceiverMessage, TcpSenderMessage};
use crate::tcp::receiver::TcpReceiver;
use crate::tcp::sender::{SenderState, TcpSender};
use crate::wrap32::Wrap32;

const STREAM_CAPACITY: usize = 64 * 1024;
const CONNECT_TIMEOUT_MS: u64 = 10_000;
const POLL_TIMEOUT_MS: u16 = 100;

bitflags! {
    /// Read/write readiness, reported to whatever drives a poll loop over this stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Available: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

struct ConnectionState {
    sender: TcpSender,
    receiver: TcpReceiver,
    stop: bool,
}

struct Shared {
    state: Mutex<ConnectionState>,
    readable: Condvar,
    established: Condvar,
}

pub struct TcpStream {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TcpStream {
    /// Open a TUN device named `interface_name` and actively open a connection from
    /// `local_ip` to `peer_ip:peer_port`, blocking until established or refused.
    pub fn connect(
        interface_name: &str,
        local_ip: Ipv4Addr,
        peer_ip: Ipv4Addr,
        peer_port: u16,
    ) -> Result<Self, ConnectError> {
        let nic = tun_tap::Iface::without_packet_info(interface_name, tun_tap::Mode::Tun)?;
        let local_port: u16 = rand::thread_rng().gen_range(49152..65535);
        let local = local_ip.octets();
        let peer = peer_ip.octets();

        let state = ConnectionState {
            sender: TcpSender::new(ByteStream::new(STREAM_CAPACITY), TcpConfig::new()),
            receiver: TcpReceiver::new(Reassembler::new(ByteStream::new(STREAM_CAPACITY))),
            stop: false,
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            readable: Condvar::new(),
            established: Condvar::new(),
        });

        {
            let mut guard = shared.state.lock().unwrap();
            let mut outbound = vec![];
            guard.sender.push(|m| outbound.push(m));
            for m in &outbound {
                let ack = guard.receiver.send();
                send_segment(&nic, local, peer, local_port, peer_port, m, &ack)?;
            }
        }

        let worker_shared = shared.clone();
        let worker = thread::spawn(move || run_worker(nic, worker_shared, local, peer, local_port, peer_port));

        let mut guard = shared.state.lock().unwrap();
        let deadline = Instant::now() + Duration::from_millis(CONNECT_TIMEOUT_MS);
        loop {
            match guard.sender.state() {
                SenderState::Established => break,
                SenderState::Reset => {
                    guard.stop = true;
                    drop(guard);
                    return Err(ConnectError::Reset);
                }
                _ => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                guard.stop = true;
                drop(guard);
                return Err(ConnectError::Timeout(peer_ip));
            }
            let (next_guard, timeout_result) = shared.established.wait_timeout(guard, remaining).unwrap();
            guard = next_guard;
            if timeout_result.timed_out() && guard.sender.state() != SenderState::Established {
                guard.stop = true;
                drop(guard);
                return Err(ConnectError::Timeout(peer_ip));
            }
        }
        drop(guard);

        Ok(TcpStream {
            shared,
            worker: Some(worker),
        })
    }

    pub fn available(&self) -> Available {
        let mut guard = self.shared.state.lock().unwrap();
        let mut avail = Available::empty();
        if guard.receiver.reassembler().output().reader().bytes_buffered() > 0 {
            avail |= Available::READ;
        }
        if guard.sender.input().writer().available_capacity() > 0 {
            avail |= Available::WRITE;
        }
        avail
    }

    pub fn shutdown_write(&self) {
        let mut guard = self.shared.state.lock().unwrap();
        guard.sender.input().writer().close();
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.shared.state.lock().unwrap();
        loop {
            let output = guard.receiver.reassembler().output();
            if output.reader().bytes_buffered() > 0 {
                let n = output.reader().peek().len().min(buf.len());
                buf[..n].copy_from_slice(&output.reader().peek()[..n]);
                output.reader().pop(n);
                return Ok(n);
            }
            if output.reader().is_finished() || output.reader().has_error() {
                return Ok(0);
            }
            guard = self.shared.readable.wait(guard).unwrap();
        }
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.shared.state.lock().unwrap();
        let input = guard.sender.input();
        if input.has_error() {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset the connection"));
        }
        let before = input.writer().available_capacity();
        if before == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "send buffer full"));
        }
        input.writer().push(buf);
        Ok(before - input.writer().available_capacity())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.state.lock().unwrap();
            guard.sender.input().writer().close();
        }
        // Best-effort: give the worker one round trip to flush the FIN before we yank it.
        thread::sleep(Duration::from_millis(2 * POLL_TIMEOUT_MS as u64));
        {
            let mut guard = self.shared.state.lock().unwrap();
            guard.stop = true;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(nic: tun_tap::Iface, shared: Arc<Shared>, local: [u8; 4], peer: [u8; 4], local_port: u16, peer_port: u16) {
    let raw_fd = nic.as_raw_fd();
    let mut buf = [0u8; 2048];
    let mut last_tick = Instant::now();

    loop {
        let borrowed_fd = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        let mut fds = [PollFd::new(borrowed_fd, PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS));

        if matches!(ready, Ok(n) if n > 0) {
            if let Ok(nbytes) = nic.recv(&mut buf) {
                let mut guard = shared.state.lock().unwrap();
                handle_inbound(&buf[..nbytes], &mut guard);
                drop(guard);
                shared.readable.notify_all();
                shared.established.notify_all();
            }
        }

        let elapsed = last_tick.elapsed().as_millis() as u64;
        last_tick = Instant::now();

        let mut guard = shared.state.lock().unwrap();
        if guard.stop {
            break;
        }
        let mut outbound = vec![];
        guard.sender.tick(elapsed, |m| outbound.push(m));
        guard.sender.push(|m| outbound.push(m));
        for m in &outbound {
            let ack = guard.receiver.send();
            if let Err(e) = send_segment(&nic, local, peer, local_port, peer_port, m, &ack) {
                warn!(error = %e, "failed to write outbound segment to tun device");
            }
        }
        drop(guard);
        if !outbound.is_empty() {
            shared.established.notify_all();
        }
    }
}

fn handle_inbound(bytes: &[u8], state: &mut ConnectionState) {
    let Ok(ip) = Ipv4HeaderSlice::from_slice(bytes) else {
        trace!("dropping non-ipv4 or malformed packet from tun device");
        return;
    };
    if ip.protocol() != IpNumber::TCP {
        return;
    }
    let ip_header_len = ip.slice().len();
    let Ok(tcp) = TcpHeaderSlice::from_slice(&bytes[ip_header_len..]) else {
        trace!("dropping malformed tcp segment");
        return;
    };
    let tcp_header_len = tcp.slice().len();
    let payload = bytes[ip_header_len + tcp_header_len..].to_vec();

    state.receiver.receive(TcpSenderMessage {
        seqno: Wrap32::new(tcp.sequence_number()),
        syn: tcp.syn(),
        payload,
        fin: tcp.fin(),
        rst: tcp.rst(),
    });

    state.sender.receive(&TcpReceiverMessage {
        ackno: tcp.ack().then(|| Wrap32::new(tcp.acknowledgment_number())),
        window_size: tcp.window_size(),
        rst: tcp.rst(),
    });
}

fn send_segment(
    nic: &tun_tap::Iface,
    local: [u8; 4],
    peer: [u8; 4],
    local_port: u16,
    peer_port: u16,
    out: &TcpSenderMessage,
    ack: &TcpReceiverMessage,
) -> io::Result<()> {
    let mut tcp = TcpHeader::new(local_port, peer_port, out.seqno.raw_value(), ack.window_size);
    tcp.syn = out.syn;
    tcp.fin = out.fin;
    tcp.rst = out.rst || ack.rst;
    if let Some(ackno) = ack.ackno {
        tcp.ack = true;
        tcp.acknowledgment_number = ackno.raw_value();
    }

    let ip = Ipv4Header::new(out.payload.len(), 64, IpNumber::TCP, local, peer)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    tcp.checksum = tcp
        .calc_checksum_ipv4(&ip, &out.payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let mut packet = Vec::with_capacity(ip.header_len() + tcp.header_len() as usize + out.payload.len());
    ip.write(&mut packet).expect("Vec<u8> writes are infallible");
    tcp.write(&mut packet).expect("Vec<u8> writes are infallible");
    packet.extend_from_slice(&out.payload);

    nic.send(&packet)?;
    Ok(())
}
