//! Whole-system tests: real core agents and real host threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mcore_hal::{StdHal, TestHal};
use mcore_kernel::{
    KernelError, ProcessId, SysEventType, SysStatus, System, SystemConfig, ThreadState,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn boot(cores: u32) -> System {
    System::boot(
        SystemConfig {
            cores,
            ..SystemConfig::default()
        },
        Arc::new(StdHal::new()),
    )
    .unwrap()
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn test_boot_and_shutdown_idle_system() {
    let system = boot(2);
    assert_eq!(system.core_count(), 2);
    for core in 0..2 {
        assert_eq!(system.run_list(core).unwrap().len(), 1);
    }
    system.shutdown();
    assert!(system.is_shut_down());
    system.shutdown();
}

#[test]
fn test_invalid_config_rejected() {
    let result = System::boot(
        SystemConfig {
            cores: 0,
            ..SystemConfig::default()
        },
        Arc::new(StdHal::new()),
    );
    assert!(matches!(result, Err(KernelError::InvalidConfig)));
}

#[test]
fn test_thread_runs_and_exits() {
    let system = boot(2);
    let pid = system.register_process("app");
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    let tid = system
        .spawn_thread(pid, "worker", move |_ctx| flag.store(true, Ordering::SeqCst))
        .unwrap();

    assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(system.thread_state(tid), Some(ThreadState::Dead));

    let requests = system.requests_of(tid);
    assert_eq!(requests.len(), 1);
    assert!(matches!(
        requests[0].event_type,
        SysEventType::Request { syscall_num: 1, .. }
    ));
    assert_eq!(
        system.syslog().iter().filter(|e| e.thread == tid).count(),
        2
    );

    let history = system.history_of(tid);
    assert_eq!(history.first().map(|t| t.from), Some(ThreadState::Inception));
    assert_eq!(history.last().map(|t| t.to), Some(ThreadState::Dead));
    assert!(system.verify_transitions());
}

#[test]
fn test_spawn_errors() {
    let system = System::boot(
        SystemConfig {
            cores: 1,
            max_threads: 1,
            ..SystemConfig::default()
        },
        Arc::new(StdHal::new()),
    )
    .unwrap();
    let pid = system.register_process("app");
    let gate = system.create_notify();

    assert_eq!(
        system.spawn_thread(ProcessId(99), "ghost", |_| {}).unwrap_err(),
        KernelError::ProcessNotFound
    );
    assert_eq!(
        system.spawn_thread_on(pid, "far", 7, |_| {}).unwrap_err(),
        KernelError::InvalidCore
    );

    let waiter = system
        .spawn_thread(pid, "waiter", move |ctx| {
            let _ = ctx.wait_for_notify(gate);
        })
        .unwrap();
    assert_eq!(
        system.spawn_thread(pid, "extra", |_| {}).unwrap_err(),
        KernelError::ThreadLimit
    );

    system.signal_notify(gate, 1).unwrap();
    assert!(system.wait_for_thread(waiter, TIMEOUT).unwrap());

    system.shutdown();
    assert_eq!(
        system.spawn_thread(pid, "late", |_| {}).unwrap_err(),
        KernelError::ShutDown
    );
}

#[test]
fn test_dead_threads_leave_registry() {
    let system = System::boot(
        SystemConfig {
            cores: 2,
            max_threads: 2,
            ..SystemConfig::default()
        },
        Arc::new(StdHal::new()),
    )
    .unwrap();
    let pid = system.register_process("app");

    // Far more threads than the limit, one at a time
    let mut finished = Vec::new();
    for _ in 0..10 {
        let tid = system.spawn_thread(pid, "short", |_| {}).unwrap();
        assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
        finished.push(tid);
    }

    assert!(wait_until(|| system.metrics().live_threads == 0));
    for tid in finished {
        assert!(system.thread(tid).is_none());
        assert_eq!(system.thread_state(tid), Some(ThreadState::Dead));
        assert!(system.wait_for_thread(tid, Duration::ZERO).unwrap());
    }

    assert_eq!(system.thread_state(9999), None);
    assert_eq!(
        system.wait_for_thread(9999, Duration::ZERO),
        Err(KernelError::ThreadNotFound)
    );
    system.shutdown();
}

#[test]
fn test_ping_pong_across_cores() {
    const ROUNDS: u64 = 200;
    let system = boot(2);
    let pid = system.register_process("pingpong");
    let ping = system.create_notify();
    let pong = system.create_notify();
    let rounds = Arc::new(AtomicU64::new(0));

    let counter = rounds.clone();
    let a = system
        .spawn_thread_on(pid, "ponger", 0, move |ctx| {
            for _ in 0..ROUNDS {
                ctx.wait_for_notify(ping).unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.signal_notify(pong, 1).unwrap();
            }
        })
        .unwrap();
    let b = system
        .spawn_thread_on(pid, "pinger", 1, move |ctx| {
            for _ in 0..ROUNDS {
                ctx.signal_notify(ping, 1).unwrap();
                ctx.wait_for_notify(pong).unwrap();
            }
        })
        .unwrap();

    assert!(system.wait_for_thread(a, TIMEOUT).unwrap());
    assert!(system.wait_for_thread(b, TIMEOUT).unwrap());
    assert_eq!(rounds.load(Ordering::SeqCst), ROUNDS);

    let syscalls: u64 = (0..2).map(|c| system.core_stats(c).unwrap().syscalls).sum();
    assert!(syscalls >= 4 * ROUNDS);
}

#[test]
fn test_kernel_signals_accumulate_then_drain() {
    let system = boot(1);
    let pid = system.register_process("app");
    let notify = system.create_notify();

    assert_eq!(system.signal_notify(notify, 0b001).unwrap(), 0b001);
    assert_eq!(system.signal_notify(notify, 0b100).unwrap(), 0b101);

    let seen = Arc::new(AtomicU64::new(0));
    let out = seen.clone();
    let tid = system
        .spawn_thread(pid, "drain", move |ctx| {
            out.store(ctx.wait_for_notify(notify).unwrap(), Ordering::SeqCst);
        })
        .unwrap();

    assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
    assert_eq!(seen.load(Ordering::SeqCst), 0b101);
    assert_eq!(system.notify(notify).unwrap().data(), 0);
}

#[test]
fn test_kernel_signal_releases_parked_waiter() {
    let system = boot(2);
    let pid = system.register_process("app");
    let notify = system.create_notify();
    let seen = Arc::new(AtomicU64::new(0));

    let out = seen.clone();
    let tid = system
        .spawn_thread_on(pid, "waiter", 1, move |ctx| {
            out.store(ctx.wait_for_notify(notify).unwrap(), Ordering::SeqCst);
        })
        .unwrap();

    assert!(wait_until(|| system.thread_state(tid) == Some(ThreadState::WaitingOnNotify)));
    assert_eq!(system.notify(notify).unwrap().waiter_ids(), vec![tid]);

    assert_eq!(system.signal_notify(notify, 0x42).unwrap(), 0x42);
    assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
    assert_eq!(seen.load(Ordering::SeqCst), 0x42);
}

#[test]
fn test_invalid_handle_reported_to_thread() {
    let system = boot(1);
    let pid = system.register_process("app");
    let status = Arc::new(Mutex::new(None));

    let out = status.clone();
    let tid = system
        .spawn_thread(pid, "bad", move |ctx| {
            *out.lock().unwrap() = ctx.signal_notify(mcore_kernel::NotifyHandle(999), 1).err();
        })
        .unwrap();

    assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
    assert_eq!(*status.lock().unwrap(), Some(SysStatus::InvalidHandle));
}

#[test]
fn test_sleepers_wake_in_expiry_order() {
    let system = boot(2);
    let pid = system.register_process("sleepers");
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tids = Vec::new();
    for ms in [100u64, 50, 150] {
        let out = order.clone();
        tids.push(
            system
                .spawn_thread(pid, "sleeper", move |ctx| {
                    ctx.sleep(ms);
                    out.lock().unwrap().push(ms);
                })
                .unwrap(),
        );
    }

    for tid in tids {
        assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
    }
    assert_eq!(*order.lock().unwrap(), vec![50, 100, 150]);
}

#[test]
fn test_sleep_ordering_with_manual_time() {
    let hal = Arc::new(TestHal::new());
    let system = System::boot(
        SystemConfig {
            cores: 1,
            ..SystemConfig::default()
        },
        hal.clone(),
    )
    .unwrap();
    let pid = system.register_process("sleepers");
    let order = Arc::new(Mutex::new(Vec::new()));

    for ms in [100u64, 50, 150] {
        let out = order.clone();
        system
            .spawn_thread(pid, "sleeper", move |ctx| {
                ctx.sleep(ms);
                out.lock().unwrap().push(ms);
            })
            .unwrap();
    }
    assert!(wait_until(|| system.sleeping_threads().len() == 3));
    assert_eq!(hal.armed_timer_count(), 1);

    for expected in [vec![50], vec![50, 100], vec![50, 100, 150]] {
        for _ in 0..50 {
            hal.fire_timers();
        }
        assert!(wait_until(|| *order.lock().unwrap() == expected));
    }

    assert!(wait_until(|| hal.armed_timer_count() == 0));
    assert_eq!(system.core_stats(0).unwrap().ticks, 150);
}

#[test]
fn test_ring_stream_preserves_order() {
    const ITEMS: u32 = 500;
    let system = boot(2);
    let pid = system.register_process("ring");
    let ring = system.create_ring(4, 4).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));

    let tx = ring.clone();
    let producer = system
        .spawn_thread_on(pid, "producer", 0, move |ctx| {
            for i in 0..ITEMS {
                tx.produce_wait(ctx, &i.to_le_bytes()).unwrap();
            }
        })
        .unwrap();

    let rx = ring.clone();
    let out = received.clone();
    let consumer = system
        .spawn_thread_on(pid, "consumer", 1, move |ctx| {
            for _ in 0..ITEMS {
                let entry = rx.consume(ctx).unwrap();
                let bytes: [u8; 4] = entry.data()[..4].try_into().unwrap();
                out.lock().unwrap().push(u32::from_le_bytes(bytes));
            }
        })
        .unwrap();

    assert!(system.wait_for_thread(producer, TIMEOUT).unwrap());
    assert!(system.wait_for_thread(consumer, TIMEOUT).unwrap());
    assert_eq!(*received.lock().unwrap(), (0..ITEMS).collect::<Vec<_>>());
    assert!(ring.is_empty());
}

#[test]
fn test_ring_consumer_blocks_until_kernel_produce() {
    let system = boot(1);
    let pid = system.register_process("ring");
    let ring = system.create_ring(8, 2).unwrap();
    let got = Arc::new(Mutex::new(Vec::new()));

    let rx = ring.clone();
    let out = got.clone();
    let consumer = system
        .spawn_thread(pid, "consumer", move |ctx| {
            let entry = rx.consume(ctx).unwrap();
            out.lock().unwrap().extend_from_slice(&entry.data()[..5]);
        })
        .unwrap();

    assert!(wait_until(|| system.thread_state(consumer) == Some(ThreadState::RecvBlocked)));
    ring.produce(&system, b"hello").unwrap();

    assert!(system.wait_for_thread(consumer, TIMEOUT).unwrap());
    assert_eq!(&*got.lock().unwrap(), b"hello");
}

#[test]
fn test_ring_geometry_rejected() {
    let system = boot(1);
    assert_eq!(
        system.create_ring(0, 4).unwrap_err(),
        KernelError::InvalidRingGeometry
    );
    assert_eq!(
        system.create_ring(4, 0).unwrap_err(),
        KernelError::InvalidRingGeometry
    );
}

#[test]
fn test_compute_threads_are_preempted() {
    let system = System::boot(
        SystemConfig {
            cores: 1,
            quantum_ms: 2,
            ..SystemConfig::default()
        },
        Arc::new(StdHal::new()),
    )
    .unwrap();
    let pid = system.register_process("compute");
    let stop = Arc::new(AtomicBool::new(false));
    let counters = [Arc::new(AtomicU64::new(0)), Arc::new(AtomicU64::new(0))];

    let mut tids = Vec::new();
    for counter in &counters {
        let counter = counter.clone();
        let stop = stop.clone();
        tids.push(
            system
                .spawn_thread_on(pid, "spin", 0, move |ctx| {
                    while !stop.load(Ordering::SeqCst) {
                        if !ctx.checkpoint() {
                            return;
                        }
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                })
                .unwrap(),
        );
    }

    assert!(wait_until(|| counters
        .iter()
        .all(|c| c.load(Ordering::Relaxed) > 0)));
    stop.store(true, Ordering::SeqCst);
    for tid in tids {
        assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
    }
    assert!(system.core_stats(0).unwrap().preemptions > 0);
}

#[test]
fn test_suspend_and_resume_thread() {
    let system = boot(1);
    let pid = system.register_process("app");
    let stop = Arc::new(AtomicBool::new(false));
    let count = Arc::new(AtomicU64::new(0));

    let (flag, counter) = (stop.clone(), count.clone());
    let tid = system
        .spawn_thread(pid, "spin", move |ctx| {
            while !flag.load(Ordering::SeqCst) {
                if !ctx.checkpoint() {
                    return;
                }
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();

    assert!(wait_until(|| count.load(Ordering::Relaxed) > 0));
    system.suspend_thread(tid).unwrap();
    assert!(wait_until(|| system.thread_state(tid) == Some(ThreadState::Suspended)));
    assert_eq!(system.suspend_thread(tid), Err(KernelError::InvalidState));

    std::thread::sleep(Duration::from_millis(20));
    let frozen = count.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::Relaxed), frozen);

    system.resume_thread(tid).unwrap();
    assert!(wait_until(|| count.load(Ordering::Relaxed) > frozen));

    stop.store(true, Ordering::SeqCst);
    assert!(system.wait_for_thread(tid, TIMEOUT).unwrap());
}

#[test]
fn test_exclusivity_and_shutdown_release() {
    let system = boot(2);
    let pid = system.register_process("blocked");
    let notify = system.create_notify();
    let ring = system.create_ring(4, 2).unwrap();
    let statuses = Arc::new(Mutex::new(Vec::new()));

    let mut tids = Vec::new();
    for _ in 0..2 {
        let out = statuses.clone();
        tids.push(
            system
                .spawn_thread(pid, "waiter", move |ctx| {
                    let result = ctx.wait_for_notify(notify);
                    out.lock().unwrap().push(result.err());
                })
                .unwrap(),
        );
    }
    for _ in 0..2 {
        tids.push(
            system
                .spawn_thread(pid, "sleeper", |ctx| ctx.sleep(60_000))
                .unwrap(),
        );
    }
    let rx = ring.clone();
    let out = statuses.clone();
    tids.push(
        system
            .spawn_thread(pid, "consumer", move |ctx| {
                out.lock().unwrap().push(rx.consume(ctx).err().map(|_| SysStatus::Shutdown));
            })
            .unwrap(),
    );

    assert!(wait_until(|| {
        let placement = system.placement();
        placement.sleeping.len() == 2
            && placement.wait_lists.iter().map(|(_, w)| w.len()).sum::<usize>() == 3
    }));
    assert!(system.check_exclusivity().is_empty());
    let metrics = system.metrics();
    assert_eq!(metrics.sleeping, 2);
    assert_eq!(metrics.blocked, 3);
    assert_eq!(metrics.live_threads, 5);

    system.shutdown();
    for tid in &tids {
        assert!(system.wait_for_thread(*tid, TIMEOUT).unwrap());
        assert_eq!(system.thread_state(*tid), Some(ThreadState::Dead));
    }
    assert!(wait_until(|| statuses.lock().unwrap().len() == 3));
    assert!(statuses
        .lock()
        .unwrap()
        .iter()
        .all(|s| *s == Some(SysStatus::Shutdown)));
    assert!(system.sleeping_threads().is_empty());
}

#[test]
fn test_user_ici_delivery() {
    let system = boot(2);
    let before = system.core_stats(1).unwrap().icis_handled;
    system.send_ici(1, 0x100, 7).unwrap();
    system.send_ici(1, 0x101, 8).unwrap();
    assert!(wait_until(|| system.core_stats(1).unwrap().icis_handled == before + 2));
    assert_eq!(system.send_ici(1, 0x02, 0), Err(KernelError::InvalidState));
    assert_eq!(system.send_ici(5, 0x100, 0), Err(KernelError::InvalidCore));
}
