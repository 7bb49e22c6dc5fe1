//! Delivery check: W writer processes, one reader, per-writer sequences.
//!
//! Each data word packs the writer id into the high bits and a 24-bit
//! sequence number into the low bits; the reader checks that every writer's
//! substream arrives gapless and in order. The packing is a harness
//! convention only; the queue moves opaque words.

use sigring::{Fifo, SharedRegion};

/// Ring capacity used by the harness queue.
const CAPACITY: usize = 1024;

/// The low 24 bits of a word carry the sequence number.
const SEQ_BITS: u32 = 24;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

/// Writers are bounded by the wait-list capacity.
const MAX_WRITERS: u32 = sigring::MAX_WAITERS as u32;
const MAX_ITEMS: u32 = SEQ_MASK as u32;

pub fn run(writers: u32, items: u32) -> bool {
    let writers = if writers > MAX_WRITERS {
        tracing::warn!(writers, cap = MAX_WRITERS, "too many writers; capping");
        MAX_WRITERS
    } else {
        writers
    };
    let items = if items > MAX_ITEMS {
        tracing::warn!(items, cap = MAX_ITEMS, "too many items per writer; capping");
        MAX_ITEMS
    } else {
        items
    };

    tracing::info!(writers, items, "starting delivery check");

    let region = SharedRegion::anonymous(Fifo::<CAPACITY>::region_size())
        .expect("failed to map shared region");
    let fifo = Fifo::<CAPACITY>::init(&region).expect("queue init failed");

    let mut writer_pids = Vec::with_capacity(writers as usize);
    for writer in 0..writers as u64 {
        // SAFETY: the child enqueues its stream and _exits.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            for seq in 0..items as u64 {
                let word = (writer << SEQ_BITS) | seq;
                if fifo.enqueue(word).is_err() {
                    // SAFETY: child exit paths never unwind.
                    unsafe { libc::_exit(2) };
                }
            }
            tracing::info!(writer, "writer stream complete");
            unsafe { libc::_exit(0) };
        }
        writer_pids.push(pid);
    }

    // SAFETY: the reader drains the queue, reports, and _exits.
    let reader_pid = unsafe { libc::fork() };
    assert!(reader_pid >= 0, "fork failed");
    if reader_pid == 0 {
        let failed = read_and_verify(&fifo, writers, items);
        unsafe { libc::_exit(failed as i32) };
    }

    let mut passed = true;
    for pid in writer_pids {
        if wait_child(pid) != 0 {
            tracing::error!(pid, "writer exited with failure");
            passed = false;
        }
    }
    let failed_streams = wait_child(reader_pid);
    if failed_streams != 0 {
        tracing::error!(failed_streams, "reader reported failed streams");
        passed = false;
    }

    let status = fifo.status();
    if passed {
        tracing::info!(%status, "all streams passed");
    } else {
        tracing::error!(%status, "delivery check failed");
    }
    passed
}

/// Drain `writers * items` words, tracking the next expected sequence number
/// per writer. A stream that goes out of order is flagged and skipped from
/// then on, the way a wedged stream should not hide later ones. Returns the
/// number of failed streams.
fn read_and_verify(fifo: &Fifo<'_, CAPACITY>, writers: u32, items: u32) -> u8 {
    // -1 flags a stream that has already delivered out of sequence.
    let mut expected = [0i64; MAX_WRITERS as usize];
    let total = writers as u64 * items as u64;

    for _ in 0..total {
        let word = match fifo.dequeue() {
            Ok(word) => word,
            Err(e) => {
                tracing::error!(error = %e, "dequeue failed");
                return u8::MAX;
            }
        };
        let writer = (word >> SEQ_BITS) as usize;
        if writer >= writers as usize {
            tracing::error!(writer, "word carries an unknown writer id");
            return u8::MAX;
        }
        let seq = (word & SEQ_MASK) as i64;
        if expected[writer] < 0 {
            continue;
        }
        if seq != expected[writer] {
            tracing::error!(
                writer,
                expected = expected[writer],
                got = seq,
                "out-of-sequence word"
            );
            expected[writer] = -1;
        } else {
            expected[writer] += 1;
            if expected[writer] == items as i64 {
                tracing::info!(writer, "reader stream complete");
            }
        }
    }

    let mut failed = 0u8;
    for (writer, progress) in expected.iter().enumerate().take(writers as usize) {
        if *progress == items as i64 {
            tracing::info!(writer, "stream pass");
        } else if *progress < 0 {
            tracing::error!(writer, "stream fail: out of order");
            failed += 1;
        } else {
            tracing::error!(writer, received = *progress, "stream fail: missing words");
            failed += 1;
        }
    }
    failed
}

fn wait_child(pid: libc::pid_t) -> i32 {
    let mut status = 0;
    // SAFETY: reaping our own child.
    let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(rc, pid, "waitpid failed");
    if !libc::WIFEXITED(status) {
        tracing::error!(pid, "child did not exit cleanly");
        return -1;
    }
    libc::WEXITSTATUS(status)
}
