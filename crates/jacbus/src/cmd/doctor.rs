use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use jacbus_bus::{Bus, BusConfig, PipeDirection};
use jacbus_frame::Packet;
use jacbus_spec::services::SRV_PROTO_TEST;
use jacbus_spec::SystemReg;
use jacbus_transport::LoopbackBus;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

const HEALTH_CHECK_FAILED: i32 = 30;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

/// Self-test: two nodes on an in-process loopback medium exercise announce,
/// register traffic, collision back-off, reliable dedup, and a pipe transfer.
pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = match run_checks() {
        Ok(checks) => checks,
        Err(detail) => vec![CheckResult {
            name: "setup",
            status: CheckStatus::Fail,
            detail,
        }],
    };

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn run_checks() -> Result<Vec<CheckResult>, String> {
    const DEV_A: u64 = 0xd0c7_0000_0000_000a;
    const DEV_B: u64 = 0xd0c7_0000_0000_000b;

    let medium = LoopbackBus::new();
    let mut cfg_a = BusConfig::new(DEV_A).with_announce_interval(Duration::from_millis(40));
    cfg_a.poll_interval = Duration::from_millis(1);
    let mut cfg_b = BusConfig::new(DEV_B)
        .with_services(&[SRV_PROTO_TEST])
        .with_announce_interval(Duration::from_millis(40));
    cfg_b.poll_interval = Duration::from_millis(1);

    let a = Bus::spawn(cfg_a, Box::new(medium.tap())).map_err(|e| e.to_string())?;
    let b = Bus::spawn(cfg_b, Box::new(medium.tap())).map_err(|e| e.to_string())?;
    let b_packets = b.subscribe();

    let mut checks = Vec::new();

    // Announce discovery.
    let discovered = wait(Duration::from_secs(2), || {
        a.devices()
            .map(|devices| devices.iter().any(|d| d.device_id == DEV_B))
            .unwrap_or(false)
    });
    checks.push(check("announce_discovery", discovered, || {
        format!("{} devices known", a.devices().map(|d| d.len()).unwrap_or(0))
    }));

    // Register set delivered.
    let sent = a
        .set_register(DEV_B, 1, SystemReg::Value as u16, vec![42, 0, 0, 0])
        .is_ok();
    let observed = sent
        && wait(Duration::from_secs(2), || {
            b_packets
                .try_iter()
                .any(|p| p.is_command && p.payload.as_ref() == [42, 0, 0, 0])
        });
    checks.push(check("register_set", observed, || "value 42 observed".into()));

    // Collision back-off.
    medium.inject_collisions(2);
    let retried = a
        .send_to(DEV_B, 1, 0x0081, Bytes::from_static(b"x"))
        .is_ok();
    checks.push(check("collision_backoff", retried, || {
        "send survived injected collisions".into()
    }));

    // Reliable dedup: same seed twice, applied once.
    let p = Packet::set_register(1, SystemReg::Intensity as u16, vec![7, 0, 0, 0]);
    let reliable_ok =
        a.send_reliable(DEV_B, p.clone(), 0xd0c7_5eed).is_ok()
            && a.send_reliable(DEV_B, p, 0xd0c7_5eed).is_ok();
    std::thread::sleep(Duration::from_millis(200));
    let applied = b_packets
        .try_iter()
        .filter(|p| p.is_command && p.payload.as_ref() == [7, 0, 0, 0])
        .count();
    checks.push(check("reliable_dedup", reliable_ok && applied == 1, || {
        format!("applied {applied} time(s)")
    }));

    // Pipe transfer with close.
    let pipe_ok = (|| {
        let port = a.open_pipe(DEV_B, 0, PipeDirection::Report).ok()?;
        b.bind_pipe(port, DEV_A, 0, PipeDirection::Command).ok()?;
        b.pipe_write(port, Bytes::from_static(b"stream")).ok()?;
        b.pipe_close(port).ok()?;
        let chunks: Vec<Bytes> = a.pipe_read(port).collect();
        (chunks.len() == 1 && chunks[0].as_ref() == b"stream").then_some(())
    })()
    .is_some();
    checks.push(check("pipe_transfer", pipe_ok, || "1 chunk, clean close".into()));

    Ok(checks)
}

fn check(name: &'static str, passed: bool, detail: impl FnOnce() -> String) -> CheckResult {
    CheckResult {
        name,
        status: if passed {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        },
        detail: detail(),
    }
}

fn wait(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("jacbus doctor\n");
            for c in &output.checks {
                let status = match c.status {
                    CheckStatus::Pass => "pass",
                    CheckStatus::Fail => "FAIL",
                };
                println!("  [{status:>4}] {:<20} {}", c.name, c.detail);
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
    }
}
