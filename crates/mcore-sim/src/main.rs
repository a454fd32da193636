//! mcore-sim - boot the scheduler on the host and run demo workloads
//!
//! ```text
//! mcore-sim [config.json]
//! ```
//!
//! Workloads:
//! - **pingpong**: two threads on different cores bounce a notify
//! - **sleepers**: threads sleeping 100/50/150 ms wake in expiry order
//! - **ring**: a producer streams sequence numbers through a small IPC ring
//!
//! A metrics snapshot is printed as JSON on stdout before shutdown.

mod logger;

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mcore_hal::{StdHal, HAL};
use mcore_kernel::{KernelError, ProcessId, System, SystemConfig, ThreadId};

const PING_ROUNDS: u64 = 1000;
const RING_ITEMS: u64 = 10_000;
const WORKLOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn load_config() -> Result<SystemConfig, String> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read {}: {}", path, e))?;
            SystemConfig::from_json(&json).map_err(|e| format!("{}: {}", path, e))
        }
        None => Ok(SystemConfig::default()),
    }
}

fn wait_all(system: &System, workload: &str, tids: &[ThreadId]) -> Result<(), KernelError> {
    for &tid in tids {
        if !system.wait_for_thread(tid, WORKLOAD_TIMEOUT)? {
            log::error!("{}: thread {} did not finish", workload, tid);
            return Err(KernelError::InvalidState);
        }
    }
    Ok(())
}

fn pingpong(system: &System, pid: ProcessId) -> Result<(), KernelError> {
    let ping = system.create_notify();
    let pong = system.create_notify();
    let last = system.core_count().saturating_sub(1);

    let ponger = system.spawn_thread_on(pid, "ponger", 0, move |ctx| {
        for _ in 0..PING_ROUNDS {
            if ctx.wait_for_notify(ping).is_err() || ctx.signal_notify(pong, 1).is_err() {
                return;
            }
        }
    })?;

    let started = Instant::now();
    let pinger = system.spawn_thread_on(pid, "pinger", last, move |ctx| {
        for _ in 0..PING_ROUNDS {
            if ctx.signal_notify(ping, 1).is_err() || ctx.wait_for_notify(pong).is_err() {
                return;
            }
        }
    })?;

    wait_all(system, "pingpong", &[ponger, pinger])?;
    let elapsed = started.elapsed();
    log::info!(
        "pingpong: {} rounds between cores 0 and {} in {:?} ({} ns/round)",
        PING_ROUNDS,
        last,
        elapsed,
        elapsed.as_nanos() / u128::from(PING_ROUNDS)
    );
    Ok(())
}

fn sleepers(system: &System, pid: ProcessId) -> Result<(), KernelError> {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut tids = Vec::new();

    for ms in [100u64, 50, 150] {
        let order = order.clone();
        tids.push(system.spawn_thread(pid, "sleeper", move |ctx| {
            ctx.sleep(ms);
            if let Ok(mut order) = order.lock() {
                order.push(ms);
            }
        })?);
    }

    wait_all(system, "sleepers", &tids)?;
    let order = order.lock().map(|o| o.clone()).unwrap_or_default();
    log::info!("sleepers: woke in order {:?}", order);
    if order != [50, 100, 150] {
        log::error!("sleepers: expected [50, 100, 150]");
        return Err(KernelError::InvalidState);
    }
    Ok(())
}

fn ring(system: &System, pid: ProcessId) -> Result<(), KernelError> {
    let ring = system.create_ring(8, 16)?;
    let checksum = Arc::new(Mutex::new((0u64, true)));
    let consumer_core = system.core_count().saturating_sub(1);

    let tx = ring.clone();
    let producer = system.spawn_thread_on(pid, "producer", 0, move |ctx| {
        for seq in 0..RING_ITEMS {
            if let Err(e) = tx.produce_wait(ctx, &seq.to_le_bytes()) {
                log::warn!("ring: producer stopped: {}", e);
                return;
            }
        }
    })?;

    let rx = ring.clone();
    let sum = checksum.clone();
    let consumer = system.spawn_thread_on(pid, "consumer", consumer_core, move |ctx| {
        let mut expected = 0u64;
        let mut in_order = true;
        for _ in 0..RING_ITEMS {
            let Ok(entry) = rx.consume(ctx) else { return };
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&entry.data()[..8]);
            let seq = u64::from_le_bytes(bytes);
            in_order &= seq == expected;
            expected += 1;
        }
        if let Ok(mut sum) = sum.lock() {
            *sum = (expected, in_order);
        }
    })?;

    wait_all(system, "ring", &[producer, consumer])?;
    let (received, in_order) = checksum.lock().map(|c| *c).unwrap_or((0, false));
    log::info!("ring: {} items received, in order: {}", received, in_order);
    if received != RING_ITEMS || !in_order {
        return Err(KernelError::InvalidState);
    }
    Ok(())
}

fn run(system: &System) -> Result<(), KernelError> {
    let pid = system.register_process("demo");
    pingpong(system, pid)?;
    sleepers(system, pid)?;
    ring(system, pid)?;

    let violations = system.check_exclusivity();
    for v in &violations {
        log::error!("{}: {}", v.invariant, v.description);
    }
    if !violations.is_empty() {
        return Err(KernelError::InvalidState);
    }
    if !system.verify_transitions() {
        log::error!("transition log hash chain broken");
        return Err(KernelError::InvalidState);
    }
    Ok(())
}

fn main() -> ExitCode {
    let hal: Arc<dyn HAL> = Arc::new(StdHal::new());

    let config = match load_config() {
        Ok(config) => config,
        Err(msg) => {
            hal.debug_write(&format!("mcore-sim: {}", msg));
            return ExitCode::FAILURE;
        }
    };
    if let Ok(level) = config.level_filter() {
        logger::init(hal.clone(), level);
    }

    let system = match System::boot(config, hal) {
        Ok(system) => system,
        Err(e) => {
            log::error!("boot failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&system);
    println!("{}", system.metrics().to_json());
    system.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("workload failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
