//! Two-node scenarios over an in-memory bus medium.

use std::time::{Duration, Instant};

use bytes::Bytes;

use jacbus_bus::{Bus, BusConfig, BusHandle, PipeDirection};
use jacbus_frame::{CommandKind, Packet};
use jacbus_spec::services::SRV_LED_STRIP;
use jacbus_spec::{SystemCmd, SystemReg};
use jacbus_transport::LoopbackBus;

const DEV_A: u64 = 0x0a0a_0a0a_0a0a_0a0a;
const DEV_B: u64 = 0x0b0b_0b0b_0b0b_0b0b;

const ANNOUNCE: Duration = Duration::from_millis(40);

fn fast(cfg: BusConfig) -> BusConfig {
    let mut cfg = cfg.with_announce_interval(ANNOUNCE);
    cfg.poll_interval = Duration::from_millis(1);
    cfg.min_gap = Duration::from_millis(1);
    cfg.ack_timeout = Duration::from_millis(50);
    cfg
}

/// Client node A plus server node B hosting one led_strip service.
fn two_nodes(bus: &LoopbackBus) -> (BusHandle, BusHandle) {
    let a = Bus::spawn(fast(BusConfig::new(DEV_A)), Box::new(bus.tap())).expect("node a");
    let b = Bus::spawn(
        fast(BusConfig::new(DEV_B).with_services(&[SRV_LED_STRIP])),
        Box::new(bus.tap()),
    )
    .expect("node b");
    (a, b)
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn announces_populate_the_registry() {
    let bus = LoopbackBus::new();
    let (a, _b) = two_nodes(&bus);

    assert!(
        wait_until(Duration::from_secs(2), || {
            a.devices()
                .unwrap()
                .iter()
                .any(|d| d.device_id == DEV_B && d.services.len() == 2)
        }),
        "node a should learn node b from its announce"
    );

    let devices = a.devices().unwrap();
    let b_entry = devices.iter().find(|d| d.device_id == DEV_B).unwrap();
    assert_eq!(b_entry.services[0].class, 0, "index 0 is control");
    assert_eq!(b_entry.services[1].class, SRV_LED_STRIP);
}

#[test]
fn intensity_set_is_observed_exactly_once() {
    let bus = LoopbackBus::new();
    let (a, b) = two_nodes(&bus);
    let b_packets = b.subscribe();

    assert!(wait_until(Duration::from_secs(2), || {
        a.devices().unwrap().iter().any(|d| d.device_id == DEV_B)
    }));

    a.set_register(
        DEV_B,
        1,
        SystemReg::Intensity as u16,
        500u32.to_le_bytes().to_vec(),
    )
    .expect("set should transmit");

    // Collect everything node B's service sees for a while.
    std::thread::sleep(Duration::from_millis(300));
    let seen: Vec<_> = b_packets.try_iter().collect();

    let sets: Vec<_> = seen
        .iter()
        .filter(|p| {
            p.service_index == 1
                && p.kind_is_set()
                && p.payload.as_ref() == 500u32.to_le_bytes()
        })
        .collect();
    assert_eq!(sets.len(), 1, "exactly one register set observed: {seen:?}");

    // No spurious CommandNotImplemented came back from node B.
    let a_stats = a.stats().unwrap();
    assert_eq!(a_stats.crc_errors, 0);
    let b_stats = b.stats().unwrap();
    assert_eq!(b_stats.unroutable_packets, 0);
}

trait KindIsSet {
    fn kind_is_set(&self) -> bool;
}

impl KindIsSet for jacbus_bus::RoutedPacket {
    fn kind_is_set(&self) -> bool {
        self.service_command & 0xf000 == SystemCmd::SetRegister as u16
    }
}

#[test]
fn no_command_not_implemented_for_an_implemented_register() {
    let bus = LoopbackBus::new();
    let (a, _b) = two_nodes(&bus);
    let a_packets = a.subscribe();

    assert!(wait_until(Duration::from_secs(2), || {
        a.devices().unwrap().iter().any(|d| d.device_id == DEV_B)
    }));

    a.set_register(DEV_B, 1, SystemReg::Intensity as u16, vec![0xf4, 1, 0, 0])
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let cni: Vec<_> = a_packets
        .try_iter()
        .filter(|p| {
            p.device_id == DEV_B
                && p.service_command == SystemCmd::CommandNotImplemented as u16
        })
        .collect();
    assert!(cni.is_empty(), "spurious CommandNotImplemented: {cni:?}");
}

#[test]
fn reliable_duplicate_seed_applies_once_but_acks_both() {
    let bus = LoopbackBus::new();
    let (a, b) = two_nodes(&bus);
    let b_packets = b.subscribe();

    assert!(wait_until(Duration::from_secs(2), || {
        a.devices().unwrap().iter().any(|d| d.device_id == DEV_B)
    }));

    let packet = Packet::set_register(1, SystemReg::Intensity as u16, vec![1, 0, 0, 0]);
    let seed = 0x5eed_cafe;

    a.send_reliable(DEV_B, packet.clone(), seed)
        .expect("first reliable send acked");
    // Resending the same seed must still be acked, but not re-applied.
    a.send_reliable(DEV_B, packet, seed)
        .expect("duplicate reliable send acked");

    std::thread::sleep(Duration::from_millis(300));
    let applied = b_packets
        .try_iter()
        .filter(|p| p.service_index == 1 && p.kind_is_set())
        .count();
    assert_eq!(applied, 1, "same seed applied at most once");

    let b_stats = b.stats().unwrap();
    assert!(b_stats.duplicate_seeds >= 1);
    assert!(b_stats.acks_sent >= 2);
}

#[test]
fn collisions_are_retried_transparently() {
    let bus = LoopbackBus::new();
    let (a, b) = two_nodes(&bus);
    let b_packets = b.subscribe();

    assert!(wait_until(Duration::from_secs(2), || {
        a.devices().unwrap().iter().any(|d| d.device_id == DEV_B)
    }));

    bus.inject_collisions(2);
    a.send_to(DEV_B, 1, 0x0081, Bytes::from_static(b"run"))
        .expect("send should survive two collisions");

    assert!(
        wait_until(Duration::from_secs(2), || {
            b_packets
                .try_iter()
                .any(|p| p.service_command == 0x0081 && p.payload.as_ref() == b"run")
        }),
        "command should arrive after back-off"
    );
}

#[test]
fn get_register_report_lands_in_the_cache() {
    let bus = LoopbackBus::new();
    let (a, b) = two_nodes(&bus);
    let b_packets = b.subscribe();

    assert!(wait_until(Duration::from_secs(2), || {
        a.devices().unwrap().iter().any(|d| d.device_id == DEV_B)
    }));

    // Node B's application answers get-register commands for its service.
    let b_server = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            let Ok(packet) = b_packets.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };
            if packet.is_command
                && packet.service_index == 1
                && packet.service_command == SystemCmd::GetRegister as u16 | 0x0001
            {
                b.send_report(Packet::new(
                    1,
                    packet.service_command,
                    vec![0x2c, 0x01, 0x00, 0x00], // 300
                ))
                .unwrap();
                break;
            }
        }
        b
    });

    a.get_register(DEV_B, 1, 0x0001).unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            a.register_value(DEV_B, 1, 0x0001)
                .unwrap()
                .is_some_and(|v| v.as_ref() == [0x2c, 0x01, 0x00, 0x00])
        }),
        "register report should be cached"
    );

    let _b = b_server.join().unwrap();
}

#[test]
fn silent_device_is_evicted_after_three_intervals() {
    let bus = LoopbackBus::new();
    let (a, b) = two_nodes(&bus);

    assert!(wait_until(Duration::from_secs(2), || {
        a.devices().unwrap().iter().any(|d| d.device_id == DEV_B)
    }));

    drop(b); // node B goes silent

    assert!(
        wait_until(Duration::from_secs(3), || {
            a.devices().unwrap().iter().all(|d| d.device_id != DEV_B)
        }),
        "device should be evicted after announce silence"
    );
    assert!(a.stats().unwrap().devices_evicted >= 1);
}

#[test]
fn pipe_transfer_is_ordered_and_terminates_on_close() {
    let bus = LoopbackBus::new();
    let (a, b) = two_nodes(&bus);

    assert!(wait_until(Duration::from_secs(2), || {
        a.devices().unwrap().iter().any(|d| d.device_id == DEV_B)
    }));

    // Consumer A allocates the port; producer B binds it.
    let port = a.open_pipe(DEV_B, 0, PipeDirection::Report).unwrap();
    b.bind_pipe(port, DEV_A, 0, PipeDirection::Command).unwrap();

    b.pipe_write(port, Bytes::from_static(b"alpha")).unwrap();
    b.pipe_write(port, Bytes::from_static(b"beta")).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    b.pipe_write(port, Bytes::from_static(b"gamma")).unwrap();
    b.pipe_close(port).unwrap();

    let chunks: Vec<Bytes> = a.pipe_read(port).collect();
    assert_eq!(chunks, vec![
        Bytes::from_static(b"alpha"),
        Bytes::from_static(b"beta"),
        Bytes::from_static(b"gamma"),
    ]);
}

#[test]
fn pipe_chunks_are_classified_as_pipe_commands() {
    // The 0x3000 page stays out of the register space.
    let chunk = jacbus_bus::pipe::pipe_command(5, 0);
    assert_eq!(CommandKind::of(chunk), CommandKind::Pipe);
    assert_ne!(chunk & 0xf000, SystemCmd::GetRegister as u16);
    assert_ne!(chunk & 0xf000, SystemCmd::SetRegister as u16);
}
