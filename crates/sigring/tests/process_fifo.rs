//! Delivery and blocking properties across real processes.
//!
//! Blocking participants are always forked children: a fresh child is
//! single-threaded, so the mask/register/unlock/suspend protocol runs exactly
//! as deployed. The parent only takes non-blocking paths (try variants,
//! status polling, and dequeues of a queue known to be non-empty) and reaps
//! children with waitpid. Children run allocation-free code between `fork`
//! and `_exit`.

use std::time::{Duration, Instant};

use sigring::{Fifo, FifoStatus, SharedRegion};

fn fork_child<F: FnOnce() -> i32>(body: F) -> libc::pid_t {
    // SAFETY: the child runs signal-safe queue operations and _exits without
    // returning into the test harness.
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        let code = body();
        // SAFETY: leave without unwinding.
        unsafe { libc::_exit(code) };
    }
    pid
}

fn wait_child(pid: libc::pid_t) -> i32 {
    let mut status = 0;
    // SAFETY: reaping our own child.
    let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(rc, pid, "waitpid failed");
    assert!(libc::WIFEXITED(status), "child did not exit cleanly");
    libc::WEXITSTATUS(status)
}

fn child_is_running(pid: libc::pid_t) -> bool {
    let mut status = 0;
    // SAFETY: WNOHANG probe of our own child.
    unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) == 0 }
}

/// Poll the queue status until `cond` holds, or kill `pid` and fail.
fn await_status<const CAP: usize>(
    fifo: &Fifo<'_, CAP>,
    pid: libc::pid_t,
    cond: impl Fn(&FifoStatus) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = fifo.status();
        if cond(&status) {
            return;
        }
        if Instant::now() > deadline {
            // SAFETY: cleaning up a child this test forked.
            unsafe { libc::kill(pid, libc::SIGKILL) };
            wait_child(pid);
            panic!("timed out waiting for queue status, last: {}", status);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn single_producer_stream_is_fifo() {
    const ITEMS: u64 = 200;

    let region = SharedRegion::anonymous(Fifo::<8>::region_size()).unwrap();
    let fifo = Fifo::<8>::init(&region).unwrap();

    let writer = fork_child(|| {
        for word in 0..ITEMS {
            if fifo.enqueue(word).is_err() {
                return 1;
            }
        }
        0
    });

    let reader = fork_child(|| {
        for expected in 0..ITEMS {
            match fifo.dequeue() {
                Ok(word) if word == expected => {}
                _ => return 1,
            }
        }
        0
    });

    assert_eq!(wait_child(writer), 0);
    assert_eq!(wait_child(reader), 0);
    assert!(fifo.is_empty());
}

/// The capacity-bound scenario: with capacity 4, a producer enqueues
/// 0,1,2,3,4 and must block on the fifth word until the consumer performs
/// one dequeue; afterwards the queue holds exactly {1,2,3,4}.
#[test]
fn enqueue_at_capacity_blocks_until_dequeue() {
    let region = SharedRegion::anonymous(Fifo::<4>::region_size()).unwrap();
    let fifo = Fifo::<4>::init(&region).unwrap();

    let producer = fork_child(|| {
        for word in 0..=4 {
            if fifo.enqueue(word).is_err() {
                return 1;
            }
        }
        0
    });

    // The producer fills the ring and parks on the fifth enqueue.
    await_status(&fifo, producer, |s| s.len == 4 && s.waiters == 1);
    assert!(child_is_running(producer), "enqueue completed past capacity");

    assert_eq!(fifo.dequeue().unwrap(), 0);

    // One dequeue is all the producer needed.
    assert_eq!(wait_child(producer), 0);

    let status = fifo.status();
    assert_eq!(status.len, 4);
    for expected in 1..=4 {
        assert_eq!(fifo.try_dequeue(), Some(expected));
    }
    assert_eq!(fifo.try_dequeue(), None);
}

/// With capacity 1, a producer blocked on full must unblock after a single
/// dequeue: the wake sent while the producer sits between unlock and suspend
/// must not be lost.
#[test]
fn no_lost_wakeup_at_capacity_one() {
    let region = SharedRegion::anonymous(Fifo::<1>::region_size()).unwrap();
    let fifo = Fifo::<1>::init(&region).unwrap();

    let producer = fork_child(|| {
        if fifo.enqueue(7).is_err() {
            return 1;
        }
        if fifo.enqueue(8).is_err() {
            return 1;
        }
        0
    });

    await_status(&fifo, producer, |s| s.len == 1 && s.waiters == 1);

    assert_eq!(fifo.dequeue().unwrap(), 7);
    assert_eq!(wait_child(producer), 0);
    assert_eq!(fifo.try_dequeue(), Some(8));
}

/// W writers, one reader: every writer's substream must arrive gapless and
/// in order, regardless of cross-writer interleaving.
#[test]
fn multi_writer_streams_stay_ordered() {
    const WRITERS: usize = 4;
    const ITEMS: u64 = 1000;
    const SEQ_BITS: u32 = 24;
    const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

    let region = SharedRegion::anonymous(Fifo::<16>::region_size()).unwrap();
    let fifo = Fifo::<16>::init(&region).unwrap();

    let mut writers = Vec::with_capacity(WRITERS);
    for writer in 0..WRITERS as u64 {
        let fifo = &fifo;
        writers.push(fork_child(move || {
            for seq in 0..ITEMS {
                if fifo.enqueue((writer << SEQ_BITS) | seq).is_err() {
                    return 1;
                }
            }
            0
        }));
    }

    let reader = fork_child(|| {
        let mut expected = [0u64; WRITERS];
        for _ in 0..WRITERS as u64 * ITEMS {
            let word = match fifo.dequeue() {
                Ok(word) => word,
                Err(_) => return 1,
            };
            let writer = (word >> SEQ_BITS) as usize;
            if writer >= WRITERS {
                return 2;
            }
            if word & SEQ_MASK != expected[writer] {
                return 3;
            }
            expected[writer] += 1;
        }
        for done in expected {
            if done != ITEMS {
                return 4;
            }
        }
        0
    });

    for writer in writers {
        assert_eq!(wait_child(writer), 0);
    }
    assert_eq!(wait_child(reader), 0);
    assert!(fifo.is_empty());
}
