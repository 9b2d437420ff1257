//! The bus node: one daemon thread owning the registry, pipes, scheduler,
//! and reliable tracker, driven by wire traffic and handle requests.
//!
//! Handles talk to the daemon over a channel; the daemon is the single
//! writer for all shared protocol state. The receive path never blocks on
//! anything but the wire poll itself — per-packet work is buffering and
//! counter updates, with application processing deferred to subscriber
//! channels.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use jacbus_frame::{
    join, split, CommandKind, Frame, FrameFlags, Packet, SERVICE_INDEX_ACK, SERVICE_INDEX_CONTROL,
};
use jacbus_spec::{
    AnnounceFlags, ControlCmd, PackFormat, PackValue, ANNOUNCE_FORMAT,
    COMMAND_NOT_IMPLEMENTED_FORMAT, RELIABLE_COMMANDS_FORMAT, RESTART_COUNTER_MASK, SystemCmd,
};
use jacbus_transport::{TransportError, Wire};

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::pipe::{FeedOutcome, PipeDirection, PipeManager, ReadOutcome};
use crate::registry::{AnnounceOutcome, Registry};
use crate::reliable::ReliableTracker;
use crate::scheduler::{AckTrack, Outbound, Scheduler, TxOutcome};
use crate::stats::BusStats;

/// A packet routed to its service, delivered to subscribers.
#[derive(Debug, Clone)]
pub struct RoutedPacket {
    /// Sender (reports) or target (commands).
    pub device_id: u64,
    pub service_index: u8,
    /// Announced class of the addressed service; `Some(0)` for control.
    pub service_class: Option<u32>,
    pub service_command: u16,
    pub payload: Bytes,
    /// Direction bit from the carrying frame.
    pub is_command: bool,
}

/// One announced service in a [`DeviceSnapshot`].
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub index: u8,
    pub class: u32,
    pub cached_registers: usize,
}

/// Point-in-time view of a registry entry.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub device_id: u64,
    pub restart_counter: u8,
    pub services: Vec<ServiceSnapshot>,
    /// Time since the last announce.
    pub age: Duration,
    pub announce_count: u64,
}

enum Op {
    Send {
        target: u64,
        packet: Packet,
        reply: Sender<Result<()>>,
    },
    Report {
        packet: Packet,
        reply: Sender<Result<()>>,
    },
    SendReliable {
        target: u64,
        packet: Packet,
        seed: u32,
        reply: Sender<Result<()>>,
    },
    Subscribe {
        tx: Sender<RoutedPacket>,
    },
    OpenPipe {
        peer: u64,
        service_index: u8,
        direction: PipeDirection,
        reply: Sender<Result<u8>>,
    },
    BindPipe {
        port: u8,
        peer: u64,
        service_index: u8,
        direction: PipeDirection,
        reply: Sender<Result<()>>,
    },
    WritePipe {
        port: u8,
        bytes: Bytes,
        reply: Sender<Result<()>>,
    },
    ReadPipe {
        port: u8,
        reply: Sender<ReadOutcome>,
    },
    ClosePipe {
        port: u8,
        reply: Sender<Result<()>>,
    },
    RegisterValue {
        device_id: u64,
        service_index: u8,
        code: u16,
        reply: Sender<Option<Bytes>>,
    },
    Devices {
        reply: Sender<Vec<DeviceSnapshot>>,
    },
    Stats {
        reply: Sender<BusStats>,
    },
    Shutdown,
}

/// Entry point: spawn a bus node on a wire.
pub struct Bus;

impl Bus {
    /// Start the daemon thread and return its handle.
    pub fn spawn(config: BusConfig, wire: Box<dyn Wire>) -> Result<BusHandle> {
        let (ops_tx, ops_rx) = mpsc::channel();
        let device_id = config.device_id;
        let daemon = Daemon::new(config, wire, ops_rx)?;
        let thread = std::thread::Builder::new()
            .name(format!("jacbus-{device_id:016x}"))
            .spawn(move || daemon.run())
            .map_err(|e| BusError::Transport(TransportError::Io(e)))?;

        Ok(BusHandle {
            ops: ops_tx,
            thread: Some(thread),
            device_id,
        })
    }
}

/// Caller-facing side of a bus node; cheap to use from any thread via clone
/// of its channel-backed operations.
pub struct BusHandle {
    ops: Sender<Op>,
    thread: Option<JoinHandle<()>>,
    device_id: u64,
}

impl BusHandle {
    /// This node's device identifier.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Send one command packet to a device; returns once the frame left the
    /// wire (or failed its retry budget).
    pub fn send(&self, target: u64, packet: Packet) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::Send {
                target,
                packet,
                reply: tx,
            })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)?
    }

    /// Emit a report from one of this node's services (server side: register
    /// values, events, command responses).
    pub fn send_report(&self, packet: Packet) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::Report { packet, reply: tx })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)?
    }

    /// Convenience: send `command` with `payload` to a service index.
    pub fn send_to(
        &self,
        target: u64,
        service_index: u8,
        command: u16,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.send(target, Packet::new(service_index, command, payload))
    }

    /// Issue a `set register` command.
    pub fn set_register(
        &self,
        target: u64,
        service_index: u8,
        register: u16,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        self.send(target, Packet::set_register(service_index, register, value))
    }

    /// Issue a `get register` command; the value arrives as a report (see
    /// [`subscribe`](Self::subscribe)) and lands in the register cache.
    pub fn get_register(&self, target: u64, service_index: u8, register: u16) -> Result<()> {
        self.send(target, Packet::get_register(service_index, register))
    }

    /// Send a seed-wrapped command with acknowledgement and retries.
    ///
    /// Blocks until the ack arrives or the retry budget is exhausted
    /// (`AckTimeout`). The receiver applies a given seed at most once, so
    /// resends cannot double-apply the command.
    pub fn send_reliable(&self, target: u64, packet: Packet, seed: u32) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::SendReliable {
                target,
                packet,
                seed,
                reply: tx,
            })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)?
    }

    /// Receive every packet routed by this node.
    pub fn subscribe(&self) -> Receiver<RoutedPacket> {
        let (tx, rx) = mpsc::channel();
        let _ = self.ops.send(Op::Subscribe { tx });
        rx
    }

    /// Open a pipe and allocate its port (consumer side).
    pub fn open_pipe(&self, peer: u64, service_index: u8, direction: PipeDirection) -> Result<u8> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::OpenPipe {
                peer,
                service_index,
                direction,
                reply: tx,
            })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)?
    }

    /// Bind a peer-allocated port (producer side).
    pub fn bind_pipe(
        &self,
        port: u8,
        peer: u64,
        service_index: u8,
        direction: PipeDirection,
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::BindPipe {
                port,
                peer,
                service_index,
                direction,
                reply: tx,
            })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)?
    }

    /// Queue bytes on an open command pipe. Fails with `PipeFull` when the
    /// bounded buffer is at capacity — data is never silently dropped.
    pub fn pipe_write(&self, port: u8, bytes: impl Into<Bytes>) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::WritePipe {
                port,
                bytes: bytes.into(),
                reply: tx,
            })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)?
    }

    /// Lazily iterate chunks received on a pipe; ends when the pipe closes.
    pub fn pipe_read(&self, port: u8) -> PipeReader {
        PipeReader {
            ops: self.ops.clone(),
            port,
            poll: Duration::from_millis(5),
        }
    }

    /// Close a pipe; buffered outbound data drains first.
    pub fn pipe_close(&self, port: u8) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::ClosePipe { port, reply: tx })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)?
    }

    /// Last cached value of a remote register, if a report has been seen.
    pub fn register_value(
        &self,
        device_id: u64,
        service_index: u8,
        code: u16,
    ) -> Result<Option<Bytes>> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::RegisterValue {
                device_id,
                service_index,
                code,
                reply: tx,
            })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)
    }

    /// Snapshot of every live device.
    pub fn devices(&self) -> Result<Vec<DeviceSnapshot>> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::Devices { reply: tx })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)
    }

    /// Snapshot of the diagnostics counters.
    pub fn stats(&self) -> Result<BusStats> {
        let (tx, rx) = mpsc::channel();
        self.ops
            .send(Op::Stats { reply: tx })
            .map_err(|_| BusError::Closed)?;
        rx.recv().map_err(|_| BusError::Closed)
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        let _ = self.ops.send(Op::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Blocking iterator over one pipe's received chunks.
pub struct PipeReader {
    ops: Sender<Op>,
    port: u8,
    poll: Duration,
}

impl Iterator for PipeReader {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            let (tx, rx) = mpsc::channel();
            self.ops
                .send(Op::ReadPipe {
                    port: self.port,
                    reply: tx,
                })
                .ok()?;
            match rx.recv().ok()? {
                ReadOutcome::Chunk(bytes) => return Some(bytes),
                ReadOutcome::Empty => std::thread::sleep(self.poll),
                ReadOutcome::Closed => return None,
            }
        }
    }
}

struct Daemon {
    cfg: BusConfig,
    wire: Box<dyn Wire>,
    ops: Receiver<Op>,
    registry: Registry,
    pipes: PipeManager,
    scheduler: Scheduler,
    reliable: ReliableTracker,
    stats: BusStats,
    subscribers: Vec<Sender<RoutedPacket>>,
    announce_fmt: PackFormat,
    cni_fmt: PackFormat,
    seed_fmt: PackFormat,
    last_announce: Option<Instant>,
    reports_since_announce: u8,
    restart_counter: u8,
}

impl Daemon {
    fn new(cfg: BusConfig, wire: Box<dyn Wire>, ops: Receiver<Op>) -> Result<Self> {
        let pipes = PipeManager::new(cfg.pipe_capacity, cfg.pipe_idle_timeout);
        Ok(Self {
            cfg,
            wire,
            ops,
            registry: Registry::new(),
            pipes,
            scheduler: Scheduler::new(),
            reliable: ReliableTracker::new(),
            stats: BusStats::default(),
            subscribers: Vec::new(),
            announce_fmt: PackFormat::parse(ANNOUNCE_FORMAT)?,
            cni_fmt: PackFormat::parse(COMMAND_NOT_IMPLEMENTED_FORMAT)?,
            seed_fmt: PackFormat::parse(RELIABLE_COMMANDS_FORMAT)?,
            last_announce: None,
            reports_since_announce: 0,
            restart_counter: 1,
        })
    }

    fn run(mut self) {
        debug!(device = %format_args!("{:#018x}", self.cfg.device_id), "bus daemon up");
        loop {
            match self.wire.recv_timeout(self.cfg.poll_interval) {
                Ok(Some(bytes)) => self.on_wire(&bytes),
                Ok(None) => {}
                Err(TransportError::Closed) => {
                    warn!("wire closed, bus daemon stopping");
                    break;
                }
                Err(err) => warn!(%err, "wire receive failed"),
            }

            loop {
                match self.ops.try_recv() {
                    Ok(Op::Shutdown) => return,
                    Ok(op) => self.on_op(op),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            let now = Instant::now();
            self.maybe_announce(now);

            for frame in self.reliable.poll(now, &self.cfg) {
                self.scheduler.enqueue(Outbound::untracked(frame));
            }

            for chunk in self.pipes.flush(now) {
                let packet = Packet::new(chunk.service_index, chunk.command, chunk.payload);
                self.enqueue_frame(chunk.peer, FrameFlags::COMMAND, &[packet], None, None);
            }

            while let Some(outcome) = self.scheduler.poll(self.wire.as_mut(), &self.cfg, now) {
                match outcome {
                    TxOutcome::Sent(outbound) => {
                        self.stats.frames_sent += 1;
                        self.reports_since_announce = self.reports_since_announce.wrapping_add(1);
                        if let Some(track) = outbound.ack {
                            self.reliable
                                .track(track.crc, outbound.bytes, track.target, track.reply, now);
                        } else if let Some(reply) = outbound.reply {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    TxOutcome::Dropped(outbound, retries) => {
                        let err = BusError::TransmitFailed { retries };
                        if let Some(track) = outbound.ack {
                            let _ = track.reply.send(Err(err));
                        } else if let Some(reply) = outbound.reply {
                            let _ = reply.send(Err(err));
                        }
                    }
                    TxOutcome::Collided => {
                        self.stats.collisions += 1;
                        break; // back-off timer pending; nothing more this tick
                    }
                }
            }

            for device_id in self.registry.evict_silent(now, self.cfg.lost_timeout()) {
                self.stats.devices_evicted += 1;
                self.pipes.drop_for_peer(device_id);
                self.reliable.cancel_for(device_id);
            }
            self.pipes.sweep(now);
        }
    }

    // ---- receive path -------------------------------------------------

    fn on_wire(&mut self, bytes: &[u8]) {
        self.stats.frames_received += 1;
        let frame = match Frame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(jacbus_frame::FrameError::CrcMismatch { .. }) => {
                self.stats.crc_errors += 1;
                return;
            }
            Err(jacbus_frame::FrameError::TooShort { .. }) => {
                self.stats.frames_too_short += 1;
                return;
            }
            Err(_) => {
                self.stats.length_mismatches += 1;
                return;
            }
        };
        // The stored CRC doubles as the frame's identity for acks.
        let frame_crc = u16::from_le_bytes([bytes[1], bytes[2]]);

        if frame.flags.is_command() {
            self.on_command_frame(&frame, frame_crc);
        } else {
            self.on_report_frame(&frame);
        }
    }

    fn on_command_frame(&mut self, frame: &Frame, frame_crc: u16) {
        if frame.device_id != self.cfg.device_id {
            return; // addressed elsewhere
        }

        if frame.flags.contains(FrameFlags::ACK_REQUESTED) {
            let ack = Packet::new(SERVICE_INDEX_ACK, frame_crc, Bytes::new());
            self.enqueue_frame(self.cfg.device_id, FrameFlags::empty(), &[ack], None, None);
            self.stats.acks_sent += 1;
        }

        let mut duplicate_seed = false;
        let packets: Vec<_> = split(frame).collect();
        for packet in packets {
            let packet = match packet {
                Ok(packet) => packet,
                Err(_) => {
                    self.stats.length_mismatches += 1;
                    return;
                }
            };

            if packet.service_index == SERVICE_INDEX_CONTROL
                && packet.service_command == ControlCmd::ReliableCommands as u16
            {
                duplicate_seed = !self.check_reliable_seed(&packet);
                continue;
            }
            if duplicate_seed {
                // Remainder of a frame already applied under this seed.
                continue;
            }
            self.dispatch_command(packet, frame_crc);
        }
    }

    fn check_reliable_seed(&mut self, packet: &Packet) -> bool {
        let seed = match self.seed_fmt.decode(&packet.payload) {
            Ok(values) => match values.first() {
                Some(PackValue::Unsigned(seed)) => *seed as u32,
                _ => return true,
            },
            Err(_) => return true,
        };
        if self.reliable.check_seed(seed) {
            true
        } else {
            trace!(seed = %format_args!("{seed:#010x}"), "duplicate seed dropped");
            self.stats.duplicate_seeds += 1;
            false
        }
    }

    fn dispatch_command(&mut self, packet: Packet, frame_crc: u16) {
        if packet.kind() == CommandKind::Pipe {
            self.feed_pipe(&packet);
            return;
        }

        match packet.service_index {
            SERVICE_INDEX_CONTROL => self.on_control_command(packet, frame_crc),
            index if (index as usize) <= self.cfg.services.len() => {
                let class = self.cfg.services[index as usize - 1];
                self.deliver(RoutedPacket {
                    device_id: self.cfg.device_id,
                    service_index: index,
                    service_class: Some(class),
                    service_command: packet.service_command,
                    payload: packet.payload,
                    is_command: true,
                });
            }
            index => {
                trace!(index, "command for unknown service index dropped");
                self.stats.unroutable_packets += 1;
            }
        }
    }

    fn on_control_command(&mut self, packet: Packet, frame_crc: u16) {
        let known_action = matches!(
            packet.service_command,
            x if x == ControlCmd::Services as u16
                || x == ControlCmd::Noop as u16
                || x == ControlCmd::Identify as u16
                || x == ControlCmd::Reset as u16
                || x == ControlCmd::FloodPing as u16
                || x == ControlCmd::SetStatusLight as u16
                || x == ControlCmd::Proxy as u16
        );

        match packet.service_command {
            x if x == ControlCmd::Services as u16 => {
                // Induce an immediate announce report.
                self.last_announce = None;
            }
            x if x == ControlCmd::Noop as u16 => {}
            _ if known_action || packet.kind() != CommandKind::Action => {
                self.deliver(RoutedPacket {
                    device_id: self.cfg.device_id,
                    service_index: SERVICE_INDEX_CONTROL,
                    service_class: Some(jacbus_spec::SRV_CONTROL),
                    service_command: packet.service_command,
                    payload: packet.payload,
                    is_command: true,
                });
            }
            _ => {
                // A control action we do not implement.
                if let Ok(payload) = self.cni_fmt.encode(&[
                    PackValue::Unsigned(packet.service_command as u64),
                    PackValue::Unsigned(frame_crc as u64),
                ]) {
                    let report = Packet::new(
                        SERVICE_INDEX_CONTROL,
                        SystemCmd::CommandNotImplemented as u16,
                        payload,
                    );
                    self.enqueue_frame(
                        self.cfg.device_id,
                        FrameFlags::empty(),
                        &[report],
                        None,
                        None,
                    );
                }
            }
        }
    }

    fn on_report_frame(&mut self, frame: &Frame) {
        if frame.device_id == self.cfg.device_id {
            return; // our own traffic reflected back
        }

        let packets: Vec<_> = split(frame).collect();
        for packet in packets {
            let packet = match packet {
                Ok(packet) => packet,
                Err(_) => {
                    self.stats.length_mismatches += 1;
                    return;
                }
            };

            if packet.service_index == SERVICE_INDEX_ACK {
                self.reliable.on_ack(packet.service_command);
                continue;
            }

            if packet.kind() == CommandKind::Pipe {
                self.feed_pipe(&packet);
                continue;
            }

            if packet.service_index == SERVICE_INDEX_CONTROL
                && packet.service_command == ControlCmd::Services as u16
            {
                self.on_announce(frame.device_id, &packet);
                // Announces are routine; subscribers still see them below.
            }

            if packet.kind() == CommandKind::GetRegister {
                // A register report: cache the value under its code.
                if let Some(register) = packet.register() {
                    self.registry.cache_report(
                        frame.device_id,
                        packet.service_index,
                        register,
                        packet.payload.clone(),
                    );
                }
            }

            let class = self
                .registry
                .route(frame.device_id, packet.service_index);
            if class.is_none() && packet.service_index != SERVICE_INDEX_CONTROL {
                self.stats.unroutable_packets += 1;
                continue;
            }
            self.deliver(RoutedPacket {
                device_id: frame.device_id,
                service_index: packet.service_index,
                service_class: class.or(Some(jacbus_spec::SRV_CONTROL)),
                service_command: packet.service_command,
                payload: packet.payload,
                is_command: false,
            });
        }
    }

    fn on_announce(&mut self, device_id: u64, packet: &Packet) {
        let Ok(values) = self.announce_fmt.decode(&packet.payload) else {
            self.stats.length_mismatches += 1;
            return;
        };
        let (Some(PackValue::Unsigned(flags)), Some(PackValue::Array(classes))) =
            (values.first(), values.get(2))
        else {
            return;
        };
        let classes: Vec<u32> = classes
            .iter()
            .filter_map(|value| match value {
                PackValue::Unsigned(class) => Some(*class as u32),
                _ => None,
            })
            .collect();

        let outcome =
            self.registry
                .on_announce(device_id, *flags as u16, &classes, Instant::now());
        if outcome == AnnounceOutcome::Restarted {
            // Fail-safe reset: forget everything owned by that device.
            self.pipes.drop_for_peer(device_id);
            self.reliable.cancel_for(device_id);
        }
    }

    fn feed_pipe(&mut self, packet: &Packet) {
        let port = crate::pipe::pipe_port(packet.service_command);
        let counter = crate::pipe::pipe_counter(packet.service_command);
        match self
            .pipes
            .feed(port, counter, packet.payload.clone(), Instant::now())
        {
            FeedOutcome::Overflow => self.stats.pipe_overflows += 1,
            FeedOutcome::Accepted | FeedOutcome::Ignored => {}
        }
    }

    fn deliver(&mut self, packet: RoutedPacket) {
        self.subscribers.retain(|tx| tx.send(packet.clone()).is_ok());
    }

    // ---- send path ----------------------------------------------------

    fn enqueue_frame(
        &mut self,
        device_id: u64,
        flags: FrameFlags,
        packets: &[Packet],
        reply: Option<Sender<Result<()>>>,
        ack_reply: Option<Sender<Result<()>>>,
    ) {
        let frame = match join(device_id, flags, packets) {
            Ok(frame) => frame,
            Err(err) => {
                let err = BusError::Frame(err);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                } else if let Some(reply) = ack_reply {
                    let _ = reply.send(Err(err));
                }
                return;
            }
        };
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = BusError::Frame(err);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                } else if let Some(reply) = ack_reply {
                    let _ = reply.send(Err(err));
                }
                return;
            }
        };
        let crc = u16::from_le_bytes([bytes[1], bytes[2]]);

        self.scheduler.enqueue(Outbound {
            bytes,
            reply,
            ack: ack_reply.map(|reply| AckTrack {
                crc,
                target: device_id,
                reply,
            }),
        });
    }

    fn maybe_announce(&mut self, now: Instant) {
        let due = match self.last_announce {
            None => true,
            Some(at) => now.duration_since(at) >= self.cfg.announce_interval,
        };
        if !due {
            return;
        }
        self.last_announce = Some(now);

        let mut flags = AnnounceFlags::SUPPORTS_ACK
            | AnnounceFlags::SUPPORTS_FRAMES
            | AnnounceFlags::SUPPORTS_RELIABLE_COMMANDS;
        if self.cfg.is_client() {
            flags |= AnnounceFlags::IS_CLIENT;
        }
        let flags_word =
            flags.bits() | (self.restart_counter as u16 & RESTART_COUNTER_MASK);

        let classes: Vec<PackValue> = self
            .cfg
            .services
            .iter()
            .map(|&class| PackValue::Unsigned(class as u64))
            .collect();
        let values = [
            PackValue::Unsigned(flags_word as u64),
            PackValue::Unsigned(self.reports_since_announce as u64),
            PackValue::Array(classes),
        ];
        let Ok(payload) = self.announce_fmt.encode(&values) else {
            return;
        };
        self.reports_since_announce = 0;

        let announce = Packet::new(
            SERVICE_INDEX_CONTROL,
            ControlCmd::Services as u16,
            payload,
        );
        self.enqueue_frame(
            self.cfg.device_id,
            FrameFlags::empty(),
            &[announce],
            None,
            None,
        );
    }

    // ---- handle operations --------------------------------------------

    fn on_op(&mut self, op: Op) {
        match op {
            Op::Send {
                target,
                packet,
                reply,
            } => {
                self.enqueue_frame(target, FrameFlags::COMMAND, &[packet], Some(reply), None);
            }
            Op::Report { packet, reply } => {
                self.enqueue_frame(
                    self.cfg.device_id,
                    FrameFlags::empty(),
                    &[packet],
                    Some(reply),
                    None,
                );
            }
            Op::SendReliable {
                target,
                packet,
                seed,
                reply,
            } => {
                let Ok(seed_payload) = self
                    .seed_fmt
                    .encode(&[PackValue::Unsigned(seed as u64)])
                else {
                    let _ = reply.send(Err(BusError::Spec(jacbus_spec::SpecError::Arity {
                        expected: 1,
                        got: 0,
                    })));
                    return;
                };
                let wrapper = Packet::new(
                    SERVICE_INDEX_CONTROL,
                    ControlCmd::ReliableCommands as u16,
                    seed_payload,
                );
                self.enqueue_frame(
                    target,
                    FrameFlags::COMMAND | FrameFlags::ACK_REQUESTED,
                    &[wrapper, packet],
                    None,
                    Some(reply),
                );
            }
            Op::Subscribe { tx } => self.subscribers.push(tx),
            Op::OpenPipe {
                peer,
                service_index,
                direction,
                reply,
            } => {
                let _ = reply.send(self.pipes.open(peer, service_index, direction, Instant::now()));
            }
            Op::BindPipe {
                port,
                peer,
                service_index,
                direction,
                reply,
            } => {
                let _ = reply.send(self.pipes.bind(
                    port,
                    peer,
                    service_index,
                    direction,
                    Instant::now(),
                ));
            }
            Op::WritePipe { port, bytes, reply } => {
                let _ = reply.send(self.pipes.write(port, bytes, Instant::now()));
            }
            Op::ReadPipe { port, reply } => {
                let _ = reply.send(self.pipes.read(port));
            }
            Op::ClosePipe { port, reply } => {
                let _ = reply.send(self.pipes.close(port));
            }
            Op::RegisterValue {
                device_id,
                service_index,
                code,
                reply,
            } => {
                let value = self
                    .registry
                    .device(device_id)
                    .and_then(|device| device.service(service_index))
                    .and_then(|service| service.register(code).cloned());
                let _ = reply.send(value);
            }
            Op::Devices { reply } => {
                let now = Instant::now();
                let snapshots = self
                    .registry
                    .devices()
                    .map(|device| DeviceSnapshot {
                        device_id: device.device_id,
                        restart_counter: device.restart_counter,
                        services: device
                            .services()
                            .iter()
                            .map(|service| ServiceSnapshot {
                                index: service.index,
                                class: service.class,
                                cached_registers: service.cached_registers(),
                            })
                            .collect(),
                        age: now.duration_since(device.last_seen),
                        announce_count: device.announce_count,
                    })
                    .collect();
                let _ = reply.send(snapshots);
            }
            Op::Stats { reply } => {
                let _ = reply.send(self.stats.clone());
            }
            // Shutdown is consumed by the run loop before dispatch.
            Op::Shutdown => {}
        }
    }
}
