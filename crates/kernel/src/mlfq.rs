// Multi-level feedback queue with per-level rotation pins.
//
// QSIZE FIFO queues, level 0 highest. Processes of type MLFQ live
// in the queue of their privlevel for the whole of RUNNABLE and
// RUNNING; selection rotates within a level via the pin, a cursor
// naming the node the next scan starts from. The pin has to
// survive dequeues (demotion, sleep, exit) and the boost splice,
// so every structural operation fixes it up here.

use crate::list::Links;
use crate::param::{BOOSTINTERVAL, NPROC, QSIZE, ta, tq};
use crate::proc::{NLINK, Proc, ProcState, ProcType, SLEEP_HEAD};

// queue head sentinels live in the shared link arena right after
// the process nodes.
pub const fn qhead(level: usize) -> usize {
    NPROC + level
}

#[derive(Debug)]
pub struct Mlfq {
    // share not reserved by any stride process; 100 at boot.
    pub tickets: usize,
    // virtual time of the MLFQ side as a whole.
    pub pass: usize,
    // global tick count, drives the periodic boost.
    pub ticks: usize,
    pin: [usize; QSIZE],
}

impl Mlfq {
    pub const fn new() -> Self {
        let mut pin = [0; QSIZE];
        let mut l = 0;
        while l < QSIZE {
            pin[l] = qhead(l);
            l += 1;
        }
        Self {
            tickets: 100,
            pass: 0,
            ticks: 0,
            pin,
        }
    }

    pub fn pin(&self, level: usize) -> usize {
        self.pin[level]
    }

    pub fn enqueue(&mut self, links: &mut Links<NLINK>, level: usize, p: usize) {
        links.add_tail(p, qhead(level));
    }

    // remove p from its level. A pin pointing at p moves on to the
    // next node so the rotation does not restart at the head.
    pub fn dequeue(&mut self, links: &mut Links<NLINK>, level: usize, p: usize) {
        if self.pin[level] == p {
            self.pin[level] = links.next(p);
        }
        links.del(p);
    }

    // splice level src onto the tail of level dst, preserving both
    // in-queue order and the src cursor: if dst was empty its pin
    // takes over src's (unless src's pin was parked on its own
    // head), and src's pin returns to its now-empty head.
    pub fn concat(&mut self, links: &mut Links<NLINK>, src: usize, dst: usize) {
        if links.is_empty(qhead(dst)) && self.pin[src] != qhead(src) {
            self.pin[dst] = self.pin[src];
        }
        self.pin[src] = qhead(src);
        links.bulk_move_tail(qhead(src), qhead(dst));
    }

    // pick the next MLFQ process: highest level first, rotating
    // from the pin and skipping anything not RUNNABLE. The pin is
    // left on the chosen node.
    pub fn select(&mut self, links: &Links<NLINK>, procs: &[Proc; NPROC]) -> Option<usize> {
        for l in 0..QSIZE {
            let q = qhead(l);
            let start = self.pin[l];
            let mut itr = start;
            loop {
                if itr != q && procs[itr].state == ProcState::RUNNABLE {
                    self.pin[l] = itr;
                    return Some(itr);
                }
                itr = links.next(itr);
                if itr == start {
                    break;
                }
            }
        }
        None
    }

    // per-tick accounting for the MLFQ process that just left the
    // CPU, then the periodic boost.
    pub fn logic(&mut self, links: &mut Links<NLINK>, procs: &mut [Proc; NPROC], p: usize) {
        let baselevel = QSIZE - 1;

        self.ticks += 1;
        match procs[p].state {
            ProcState::RUNNABLE => {
                procs[p].ticks += 1;
                let level = procs[p].privlevel;
                if level < baselevel && procs[p].ticks % ta(level) == 0 {
                    // allotment used up: demote one level.
                    self.dequeue(links, level, p);
                    procs[p].privlevel += 1;
                    let next = procs[p].privlevel;
                    self.enqueue(links, next, p);
                    procs[p].ticks = 0;
                } else if procs[p].ticks % tq(level) == 0 {
                    // quantum used up: rotate within the level.
                    self.pin[level] = links.next(p);
                }
            }
            ProcState::SLEEPING => {
                let level = procs[p].privlevel;
                if level < baselevel && procs[p].ticks >= ta(level) {
                    procs[p].privlevel += 1;
                    procs[p].ticks = 0;
                } else {
                    // forget the partial quantum so a short sleep
                    // does not bank credit against the next one.
                    procs[p].ticks = procs[p].ticks / tq(level) * tq(level);
                }
            }
            ProcState::ZOMBIE => {}
            _ => panic!("mlfq wrong state"),
        }

        if self.ticks % BOOSTINTERVAL == 0 {
            self.boost(links, procs);
        }
    }

    // priority boost: everything comes back to level 0 with a
    // fresh allotment. RUNNABLE/RUNNING processes are spliced up
    // queue by queue, which keeps same-level FIFO order; sleepers
    // are fixed in place on the sleep list and will enqueue at
    // level 0 when they wake.
    fn boost(&mut self, links: &mut Links<NLINK>, procs: &mut [Proc; NPROC]) {
        for l in 1..QSIZE {
            let q = qhead(l);
            let mut itr = links.next(q);
            while itr != q {
                procs[itr].privlevel = 0;
                procs[itr].ticks = 0;
                itr = links.next(itr);
            }
            self.concat(links, l, 0);
        }
        let mut itr = links.next(SLEEP_HEAD);
        while itr != SLEEP_HEAD {
            if procs[itr].ptype == ProcType::MLFQ {
                procs[itr].privlevel = 0;
                procs[itr].ticks = 0;
            }
            itr = links.next(itr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Mlfq, Links<NLINK>, [Proc; NPROC]) {
        let mut links: Links<NLINK> = Links::new();
        for l in 0..QSIZE {
            links.init_head(qhead(l));
        }
        links.init_head(SLEEP_HEAD);
        (Mlfq::new(), links, [const { Proc::new() }; NPROC])
    }

    fn runnable(procs: &mut [Proc; NPROC], p: usize) {
        procs[p].state = ProcState::RUNNABLE;
    }

    #[test]
    fn select_rotates_within_a_level() {
        let (mut q, mut links, mut procs) = setup();
        for p in 0..3 {
            runnable(&mut procs, p);
            q.enqueue(&mut links, 0, p);
        }

        // fresh queue: pin is on the head, first enqueued wins.
        assert_eq!(q.select(&links, &procs), Some(0));
        // simulate a consumed quantum: pin moves past 0.
        q.pin[0] = links.next(0);
        assert_eq!(q.select(&links, &procs), Some(1));
        q.pin[0] = links.next(1);
        assert_eq!(q.select(&links, &procs), Some(2));
        q.pin[0] = links.next(2);
        // wraps around the head back to 0.
        assert_eq!(q.select(&links, &procs), Some(0));
    }

    #[test]
    fn select_skips_non_runnable_and_lower_levels() {
        let (mut q, mut links, mut procs) = setup();
        runnable(&mut procs, 0);
        q.enqueue(&mut links, 1, 0);
        procs[1].state = ProcState::SLEEPING;
        // sleeping process parked in a queue must be skipped.
        q.enqueue(&mut links, 0, 1);

        assert_eq!(q.select(&links, &procs), Some(0));

        procs[0].state = ProcState::SLEEPING;
        assert_eq!(q.select(&links, &procs), None);
    }

    #[test]
    fn dequeue_moves_the_pin_off_the_victim() {
        let (mut q, mut links, mut procs) = setup();
        for p in 0..2 {
            runnable(&mut procs, p);
            q.enqueue(&mut links, 0, p);
        }
        assert_eq!(q.select(&links, &procs), Some(0));
        assert_eq!(q.pin(0), 0);

        q.dequeue(&mut links, 0, 0);
        assert_eq!(q.pin(0), 1);
        assert_eq!(q.select(&links, &procs), Some(1));
    }

    #[test]
    fn demotion_after_allotment() {
        let (mut q, mut links, mut procs) = setup();
        runnable(&mut procs, 0);
        q.enqueue(&mut links, 0, 0);

        for tick in 1..=ta(0) {
            q.logic(&mut links, &mut procs, 0);
            if tick < ta(0) {
                assert_eq!(procs[0].privlevel, 0);
            }
        }
        assert_eq!(procs[0].privlevel, 1);
        assert_eq!(procs[0].ticks, 0);
        assert!(links.iter(qhead(1)).any(|n| n == 0));
        assert!(!links.iter(qhead(0)).any(|n| n == 0));
    }

    #[test]
    fn sleep_rounds_partial_quantum_down() {
        let (mut q, mut links, mut procs) = setup();
        procs[0].state = ProcState::SLEEPING;
        procs[0].privlevel = 2;
        procs[0].ticks = 3;
        links.add(0, SLEEP_HEAD);

        // tq(2) = 4, so 3 partial ticks are forgotten.
        q.logic(&mut links, &mut procs, 0);
        assert_eq!(procs[0].ticks, 0);
        assert_eq!(procs[0].privlevel, 2);
    }

    #[test]
    fn boost_resets_everyone_to_level_zero() {
        let (mut q, mut links, mut procs) = setup();
        runnable(&mut procs, 0);
        procs[0].privlevel = 1;
        procs[0].ticks = 7;
        q.enqueue(&mut links, 1, 0);
        runnable(&mut procs, 1);
        q.enqueue(&mut links, 0, 1);
        procs[2].state = ProcState::SLEEPING;
        procs[2].privlevel = 2;
        procs[2].ticks = 2;
        links.add(2, SLEEP_HEAD);

        q.ticks = BOOSTINTERVAL - 1;
        q.logic(&mut links, &mut procs, 1);

        assert_eq!(procs[0].privlevel, 0);
        assert_eq!(procs[0].ticks, 0);
        assert_eq!(procs[2].privlevel, 0);
        assert_eq!(procs[2].ticks, 0);
        // level-0 order: old level-0 content first, then boosted.
        let order: std::vec::Vec<usize> = links.iter(qhead(0)).collect();
        assert_eq!(order, [1, 0]);
        assert!(links.is_empty(qhead(1)));
    }

    #[test]
    fn concat_hands_the_pin_to_an_empty_destination() {
        let (mut q, mut links, mut procs) = setup();
        for p in 0..2 {
            runnable(&mut procs, p);
            q.enqueue(&mut links, 1, p);
        }
        // rotation in level 1 had advanced to node 1.
        q.pin[1] = 1;

        q.concat(&mut links, 1, 0);
        assert_eq!(q.pin(0), 1);
        assert_eq!(q.pin(1), qhead(1));
        assert_eq!(q.select(&links, &procs), Some(1));
    }
}
