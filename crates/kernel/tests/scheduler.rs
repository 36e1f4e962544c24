// Scheduler behavior tests, driven against the process table the
// way the per-CPU loop drives it: select, run the choice for a
// tick ending in a timer preemption (or whatever the hook did to
// it), then account to the discipline that ran. Context switching
// itself is machine-only; everything the disciplines decide is
// exercised here.

use std::collections::HashMap;

use kernel::mlfq::qhead;
use kernel::param::{BARRIER, BOOSTINTERVAL, NPROC, QSIZE, RESERVE, ta};
use kernel::proc::{FREE_HEAD, ProcState, ProcTable, ProcType, RUN_HEAD, SLEEP_HEAD};

fn spawn(t: &mut ProcTable) -> usize {
    let p = t.alloc_slot().expect("out of slots");
    t.make_runnable(p);
    p
}

// One scheduler iteration. The hook runs while the chosen process
// is RUNNING and may suspend it (sleep) or reshape it
// (set_cpu_share); if it is still RUNNING afterwards the tick
// ends in a timer preemption.
fn tick_with<F>(t: &mut ProcTable, mut hook: F) -> Option<usize>
where
    F: FnMut(&mut ProcTable, usize),
{
    let p = t.select();
    if let Some(p) = p {
        if t.procs[p].state == ProcState::RUNNABLE {
            if t.procs[p].ptype == ProcType::STRIDE {
                t.links.add(p, RUN_HEAD);
            }
            t.procs[p].state = ProcState::RUNNING;

            hook(t, p);

            if t.procs[p].state == ProcState::RUNNING {
                // timer preemption, i.e. yield
                if t.procs[p].ptype == ProcType::STRIDE {
                    t.links.del(p);
                }
                t.procs[p].state = ProcState::RUNNABLE;
            }
            if t.procs[p].ptype == ProcType::MLFQ {
                t.mlfq_logic(p);
            }
        }
    }
    t.stride_logic(p);
    p
}

fn tick(t: &mut ProcTable) -> Option<usize> {
    tick_with(t, |_, _| {})
}

// Structural audit: every live process in exactly one place,
// ticket conservation, the RESERVE floor, heap order, pin
// validity, sleep channels.
fn audit(t: &ProcTable) {
    let mut membership: HashMap<usize, usize> = HashMap::new();
    let mut on_free: HashMap<usize, usize> = HashMap::new();

    for l in 0..QSIZE {
        for n in t.links.iter(qhead(l)) {
            *membership.entry(n).or_default() += 1;
        }
    }
    for n in t.links.iter(RUN_HEAD) {
        *membership.entry(n).or_default() += 1;
    }
    for n in t.links.iter(SLEEP_HEAD) {
        *membership.entry(n).or_default() += 1;
    }
    for i in 1..=t.stride.len() {
        *membership.entry(t.stride.at(i)).or_default() += 1;
    }
    for n in t.links.iter(FREE_HEAD) {
        *on_free.entry(n).or_default() += 1;
    }

    let mut reserved = 0;
    for (p, pr) in t.procs.iter().enumerate() {
        let m = membership.get(&p).copied().unwrap_or(0);
        let f = on_free.get(&p).copied().unwrap_or(0);
        match pr.state {
            ProcState::UNUSED => {
                assert_eq!((m, f), (0, 1), "unused proc {p} misplaced");
            }
            ProcState::EMBRYO | ProcState::ZOMBIE => {
                assert_eq!((m, f), (0, 0), "proc {p} in {:?} misplaced", pr.state);
            }
            ProcState::RUNNABLE | ProcState::RUNNING | ProcState::SLEEPING => {
                assert_eq!((m, f), (1, 0), "live proc {p} in {} structures", m);
            }
        }
        if pr.state == ProcState::SLEEPING {
            assert_ne!(pr.chan, 0, "sleeping proc {p} without a channel");
        }
        if pr.ptype == ProcType::STRIDE
            && pr.state != ProcState::UNUSED
            && pr.state != ProcState::ZOMBIE
        {
            reserved += pr.tickets;
        }
    }

    assert_eq!(t.mlfq.tickets + reserved, 100, "tickets leaked");
    assert!(t.mlfq.tickets >= RESERVE, "reserve floor breached");

    for i in 2..=t.stride.len() {
        assert!(
            t.procs[t.stride.at(i / 2)].pass <= t.procs[t.stride.at(i)].pass,
            "heap order broken at {i}"
        );
    }

    for l in 0..QSIZE {
        let pin = t.mlfq.pin(l);
        assert!(
            pin == qhead(l) || t.links.iter(qhead(l)).any(|n| n == pin),
            "pin of level {l} dangles"
        );
    }
}

#[test]
fn lone_cpu_hog_descends_the_levels() {
    let mut t = ProcTable::new();
    let p = spawn(&mut t);

    for _ in 0..ta(0) {
        assert_eq!(tick(&mut t), Some(p));
    }
    assert_eq!(t.procs[p].privlevel, 1);
    assert_eq!(t.procs[p].ticks, 0);
    audit(&t);

    for _ in 0..ta(1) {
        assert_eq!(tick(&mut t), Some(p));
    }
    assert_eq!(t.procs[p].privlevel, 2);
    assert_eq!(t.procs[p].ticks, 0);
    audit(&t);
}

#[test]
fn boost_returns_everyone_to_the_top() {
    let mut t = ProcTable::new();
    let p = spawn(&mut t);

    // ride down to the base level, then on until the boost hits.
    for n in 1..=BOOSTINTERVAL {
        tick(&mut t);
        if n < BOOSTINTERVAL {
            assert!(t.procs[p].privlevel > 0 || n < ta(0));
        }
    }
    assert_eq!(t.procs[p].privlevel, 0);
    assert_eq!(t.procs[p].ticks, 0);
    audit(&t);
}

#[test]
fn reserved_share_gets_its_proportion() {
    let mut t = ProcTable::new();
    let a = spawn(&mut t);
    let _b = spawn(&mut t);

    // a reserves 20% while it is on the CPU.
    let chosen = tick_with(&mut t, |t, p| {
        if p == a {
            t.set_share(p, 20).unwrap();
        }
    });
    assert_eq!(chosen, Some(a));
    assert_eq!(t.procs[a].ptype, ProcType::STRIDE);
    audit(&t);

    let mut a_ticks = 0;
    for _ in 0..1000 {
        if tick(&mut t) == Some(a) {
            a_ticks += 1;
        }
    }
    assert!(
        (198..=202).contains(&a_ticks),
        "20% share ran {a_ticks}/1000 ticks"
    );
    audit(&t);
}

#[test]
fn reservation_respects_the_mlfq_floor() {
    let mut t = ProcTable::new();
    let a = spawn(&mut t);
    let b = spawn(&mut t);

    // a takes 70 while running.
    tick_with(&mut t, |t, p| {
        if p == a {
            t.set_share(p, 70).unwrap();
        }
    });
    assert_eq!(t.mlfq.tickets, 30);

    // 15 more would leave the queues with 15 < RESERVE.
    assert!(t.set_share(b, 15).is_err());
    assert_eq!(t.procs[b].ptype, ProcType::MLFQ);
    assert_eq!(t.mlfq.tickets, 30);
    audit(&t);

    // 10 fits exactly; wait for b's next turn on the CPU.
    while t.procs[b].ptype == ProcType::MLFQ {
        tick_with(&mut t, |t, p| {
            if p == b {
                t.set_share(p, 10).unwrap();
            }
        });
    }
    assert_eq!(t.procs[b].ptype, ProcType::STRIDE);
    assert_eq!(t.mlfq.tickets, 20);
    audit(&t);

    // out-of-range shares never pass the argument check.
    assert!(t.set_share(b, 0).is_err());
    assert!(t.set_share(b, 100 - RESERVE + 1).is_err());
}

#[test]
fn repeating_a_reservation_changes_nothing() {
    let mut t = ProcTable::new();
    let a = spawn(&mut t);

    tick_with(&mut t, |t, p| {
        t.set_share(p, 20).unwrap();
        assert_eq!(t.mlfq.tickets, 80);
        // same share again: the old tickets are part of the
        // budget, so this is a no-op.
        t.set_share(p, 20).unwrap();
        assert_eq!(t.mlfq.tickets, 80);
        assert_eq!(t.procs[p].tickets, 20);
    });
    let _ = a;
    audit(&t);
}

#[test]
fn sleep_and_wakeup_move_between_the_right_structures() {
    let mut t = ProcTable::new();
    let a = spawn(&mut t);
    let b = spawn(&mut t);
    const CHAN: usize = 0xABC;

    // park b so only a consumes CPU, then demote a once so its
    // recorded level is 1.
    t.suspend(b, CHAN + 1);
    for _ in 0..ta(0) {
        assert_eq!(tick(&mut t), Some(a));
    }
    assert_eq!(t.procs[a].privlevel, 1);

    tick_with(&mut t, |t, p| {
        assert_eq!(p, a);
        t.suspend(p, CHAN);
    });
    assert_eq!(t.procs[a].state, ProcState::SLEEPING);
    assert!(t.links.iter(SLEEP_HEAD).any(|n| n == a));
    assert_eq!(t.procs[a].chan, CHAN);
    audit(&t);

    // a wakeup on another channel is not for us.
    t.wakeup1(CHAN + 2);
    assert_eq!(t.procs[a].state, ProcState::SLEEPING);

    t.wakeup1(CHAN);
    assert_eq!(t.procs[a].state, ProcState::RUNNABLE);
    // back at the tail of its recorded level.
    assert!(t.links.iter(qhead(1)).any(|n| n == a));
    // sleep() clears the channel once the sleeper resumes.
    t.procs[a].chan = 0;
    audit(&t);
}

#[test]
fn waking_stride_sleeper_rejoins_at_the_frontier() {
    let mut t = ProcTable::new();
    let a = spawn(&mut t);
    let _b = spawn(&mut t);

    tick_with(&mut t, |t, p| {
        if p == a {
            t.set_share(p, 20).unwrap();
        }
    });

    // put a to sleep, then let the MLFQ side run far ahead.
    let mut slept = false;
    while !slept {
        tick_with(&mut t, |t, p| {
            if p == a {
                t.suspend(p, 0xDEF);
                slept = true;
            }
        });
    }
    let stale = t.procs[a].pass;
    for _ in 0..50 {
        tick(&mut t);
    }
    assert!(t.mlfq.pass > stale);

    t.wakeup1(0xDEF);
    t.procs[a].chan = 0;
    assert_eq!(t.procs[a].state, ProcState::RUNNABLE);
    // no banked credit from the stale pass: it owes at least the
    // current frontier.
    assert!(t.procs[a].pass >= stale);
    assert_eq!(t.procs[a].pass, t.frontier());
    audit(&t);

    // and it still converges to its share afterwards.
    let mut a_ticks = 0;
    for _ in 0..500 {
        if tick(&mut t) == Some(a) {
            a_ticks += 1;
        }
    }
    assert!((95..=105).contains(&a_ticks), "ran {a_ticks}/500");
}

#[test]
fn kill_wakes_a_sleeper_into_runnable() {
    let mut t = ProcTable::new();
    let a = spawn(&mut t);
    let pid = t.procs[a].pid;

    tick_with(&mut t, |t, p| {
        t.suspend(p, 0x123);
    });
    assert_eq!(t.procs[a].state, ProcState::SLEEPING);

    t.kill1(pid).unwrap();
    assert!(t.procs[a].killed);
    assert_eq!(t.procs[a].state, ProcState::RUNNABLE);
    assert!(t.links.iter(qhead(0)).any(|n| n == a));
    audit(&t);

    // no such pid.
    assert!(t.kill1(31337).is_err());
}

#[test]
fn pass_clocks_renormalize_before_overflow() {
    let mut t = ProcTable::new();
    let a = spawn(&mut t);
    let _chosen = tick_with(&mut t, |t, p| {
        if p == a {
            t.set_share(p, 20).unwrap();
        }
    });

    // park a stride sleeper with a small pass, then push the MLFQ
    // clock over the barrier.
    let mut slept = false;
    while !slept {
        tick_with(&mut t, |t, p| {
            if p == a {
                t.suspend(p, 0x777);
                slept = true;
            }
        });
    }
    let m = spawn(&mut t);
    t.mlfq.pass = BARRIER + 1;

    assert_eq!(tick(&mut t), Some(m));
    assert!(t.mlfq.pass < BARRIER, "clock did not renormalize");
    // the sleeper saturated at zero rather than wrapping.
    assert_eq!(t.procs[a].pass, 0);
    audit(&t);
}

#[test]
fn embryo_belongs_to_nothing_until_runnable() {
    let mut t = ProcTable::new();
    let p = t.alloc_slot().unwrap();
    assert_eq!(t.procs[p].state, ProcState::EMBRYO);
    assert!(t.procs[p].pid > 0);
    audit(&t);

    t.make_runnable(p);
    assert!(t.links.iter(qhead(0)).any(|n| n == p));
    audit(&t);

    // a slot whose kernel-stack allocation failed goes straight
    // back from EMBRYO to the free list, identity scrubbed.
    let q = t.alloc_slot().unwrap();
    let pid = t.procs[q].pid;
    t.release_slot(q);
    assert_eq!(t.procs[q].state, ProcState::UNUSED);
    assert_eq!(t.procs[q].pid, 0);
    assert!(t.kill1(pid).is_err());
    audit(&t);
}

#[test]
fn table_exhaustion_and_reuse() {
    let mut t = ProcTable::new();
    let mut all = Vec::new();
    for _ in 0..NPROC {
        all.push(t.alloc_slot().unwrap());
    }
    assert!(t.alloc_slot().is_none());

    t.release_slot(all[0]);
    let again = t.alloc_slot().unwrap();
    assert_eq!(again, all[0]);
    // pids are never recycled.
    assert_eq!(t.procs[again].pid, NPROC + 1);
}
