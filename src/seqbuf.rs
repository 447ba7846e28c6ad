//! Receiver-side reordering ([`SeqBuf`]) and transmitter-side retransmit
//! cache ([`TxSeqBuf`]).

use std::{cmp::Ordering, sync::Arc};

use bytes::Bytes;
use codec::seq;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{Notify, mpsc},
    time::{Duration, Instant},
};

struct Entry {
    seq: u16,
    data: Bytes,
    added_at: Instant,
}

struct Inner {
    entries: Vec<Entry>,
    locked_by_invalid_seq: bool,
    locked_at: Instant,
    already_returned_first: bool,
    last_returned_seq: u16,
    requested_retransmit: bool,
    last_requested_range: (u16, u16),
    ignore_missing_until_enabled: bool,
    ignore_missing_until_seq: u16,
}

impl Inner {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            locked_by_invalid_seq: false,
            locked_at: Instant::now(),
            already_returned_first: false,
            last_returned_seq: 0,
            requested_retransmit: false,
            last_requested_range: (0, 0),
            ignore_missing_until_enabled: false,
            ignore_missing_until_seq: 0,
        }
    }
}

/// What the watcher loop should do after one pass over the buffer.
enum Poll {
    /// An entry is ready for delivery.
    Deliver(u16, Bytes),
    /// Nothing is ready yet; retry after this long.
    WaitFor(Duration),
    /// The buffer holds nothing at all right now.
    Idle,
    /// A gap just opened; ask the stream to request a retransmit.
    RequestRetransmit(u16, u16),
}

const MAX_RETRANSMIT_GAP: u32 = 50;

/// Receiver-side jitter buffer: holds arriving entries for `jitter_window`
/// before delivering them in ascending logical sequence order, locking on a
/// detected gap and asking the stream to request a retransmit.
#[derive(Clone)]
pub struct SeqBuf {
    inner: Arc<RwLock<Inner>>,
    notify: Arc<Notify>,
    max_seq_num: u32,
    max_seq_diff: u32,
    jitter_window: Duration,
    retransmit_tx: mpsc::UnboundedSender<(u16, u16)>,
}

impl SeqBuf {
    /// Spawns the watcher task and returns the buffer handle plus the
    /// delivery and retransmit-request channels the stream should drain.
    pub fn spawn(
        max_seq_num: u32,
        max_seq_diff: u32,
        jitter_window: Duration,
    ) -> (Self, mpsc::Receiver<(u16, Bytes)>, mpsc::UnboundedReceiver<(u16, u16)>) {
        let (entry_tx, entry_rx) = mpsc::channel(256);
        let (retransmit_tx, retransmit_rx) = mpsc::unbounded_channel();

        let buf = Self {
            inner: Arc::new(RwLock::new(Inner::new())),
            notify: Arc::new(Notify::new()),
            max_seq_num,
            max_seq_diff,
            jitter_window,
            retransmit_tx,
        };

        tokio::spawn(buf.clone().watch(entry_tx));
        (buf, entry_rx, retransmit_rx)
    }

    /// Accepts a newly received datagram payload at `seq`. Duplicates are
    /// dropped silently.
    pub fn add(&self, seq_num: u16, data: Bytes) {
        let mut inner = self.inner.write();

        if inner.entries.is_empty() {
            inner.entries.push(Entry {
                seq: seq_num,
                data,
                added_at: Instant::now(),
            });
            drop(inner);
            self.notify.notify_one();
            return;
        }

        if inner.entries[0].seq == seq_num {
            return;
        }

        let mut insert_at = None;
        if self.compare(seq_num, inner.entries[0].seq) == Ordering::Greater {
            insert_at = Some(0);
        } else {
            for i in 1..inner.entries.len() {
                if inner.entries[i].seq == seq_num {
                    return;
                }
                if self.compare(seq_num, inner.entries[i].seq) == Ordering::Greater {
                    insert_at = Some(i);
                    break;
                }
            }
        }

        let entry = Entry {
            seq: seq_num,
            data,
            added_at: Instant::now(),
        };
        match insert_at {
            Some(i) => inner.entries.insert(i, entry),
            None => inner.entries.push(entry),
        }

        drop(inner);
        self.notify.notify_one();
    }

    fn compare(&self, a: u16, b: u16) -> Ordering {
        seq::compare(a, b, self.max_seq_num, self.max_seq_diff)
    }

    fn got_retransmit_range(&self, inner: &Inner) -> bool {
        // Entries are stored newest-first (front = highest seq, back =
        // lowest), so walking back-to-front visits `start, start+1, …, end`.
        // Stops as soon as `end` is reached, regardless of what sits beyond
        // it toward the front (e.g. the anchor entry that triggered the lock).
        let (start, end) = inner.last_requested_range;
        let mut want = start;
        for entry in inner.entries.iter().rev() {
            if entry.seq != want {
                return false;
            }
            if want == end {
                return true;
            }
            want = seq::inc(want, self.max_seq_num);
        }
        false
    }

    fn poll_once(&self) -> Poll {
        let mut inner = self.inner.write();

        if inner.entries.is_empty() {
            return Poll::Idle;
        }

        let last_seq = inner.entries.last().unwrap().seq;

        if inner.already_returned_first {
            if inner.locked_by_invalid_seq {
                if inner.requested_retransmit && self.got_retransmit_range(&inner) {
                    inner.locked_by_invalid_seq = false;
                } else {
                    let elapsed = inner.locked_at.elapsed();
                    if elapsed < self.jitter_window {
                        return Poll::WaitFor(self.jitter_window - elapsed);
                    }

                    inner.locked_by_invalid_seq = false;
                    if inner.requested_retransmit {
                        let (start, end) = inner.last_requested_range;
                        inner.ignore_missing_until_seq = end;
                        inner.ignore_missing_until_enabled = true;
                        log::debug!("{}", crate::error::Error::GapUnrecoverable { seq: start });
                    }

                    // Lock just timed out: deliver this entry directly, same
                    // as the reference implementation, without re-running the
                    // gap check below.
                    return self.deliver(&mut inner, last_seq);
                }
            } else {
                if self.compare(last_seq, inner.last_returned_seq) != Ordering::Greater {
                    inner.entries.pop();
                    return Poll::Idle;
                }

                if inner.ignore_missing_until_enabled {
                    if self.compare(last_seq, inner.ignore_missing_until_seq) == Ordering::Greater {
                        inner.ignore_missing_until_enabled = false;
                    }
                } else {
                    let expected = seq::inc(inner.last_returned_seq, self.max_seq_num);
                    if last_seq != expected {
                        inner.locked_by_invalid_seq = true;
                        inner.locked_at = Instant::now();
                        inner.requested_retransmit = false;
                        inner.ignore_missing_until_enabled = false;

                        let range = (expected, seq::dec(last_seq, self.max_seq_num));
                        inner.last_requested_range = range;

                        let gap = seq::diff(range.1, range.0, self.max_seq_num) + 1;
                        if gap <= MAX_RETRANSMIT_GAP {
                            inner.requested_retransmit = true;
                            return Poll::RequestRetransmit(range.0, range.1);
                        }

                        return Poll::WaitFor(self.jitter_window);
                    }
                }
            }
        }

        self.deliver(&mut inner, last_seq)
    }

    /// Delivers the last (oldest) entry once its jitter window has elapsed.
    fn deliver(&self, inner: &mut Inner, last_seq: u16) -> Poll {
        let elapsed = inner.entries.last().unwrap().added_at.elapsed();
        if elapsed < self.jitter_window {
            return Poll::WaitFor(self.jitter_window - elapsed);
        }

        inner.last_returned_seq = last_seq;
        inner.already_returned_first = true;
        let entry = inner.entries.pop().unwrap();
        Poll::Deliver(entry.seq, entry.data)
    }

    async fn watch(self, entry_tx: mpsc::Sender<(u16, Bytes)>) {
        loop {
            match self.poll_once() {
                Poll::Deliver(seq_num, data) => {
                    if entry_tx.send((seq_num, data)).await.is_err() {
                        return;
                    }
                }
                Poll::RequestRetransmit(start, end) => {
                    let _ = self.retransmit_tx.send((start, end));
                }
                Poll::WaitFor(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                Poll::Idle => {
                    self.notify.notified().await;
                }
            }
        }
    }
}

struct TxEntry {
    seq: u16,
    data: Bytes,
    added_at: Instant,
}

/// Transmitter-side retention ring, serving the peer's retransmit requests.
pub struct TxSeqBuf {
    entries: Mutex<Vec<TxEntry>>,
    retx_keep: Duration,
}

impl TxSeqBuf {
    pub fn new(retx_keep: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            retx_keep,
        }
    }

    pub fn add(&self, seq_num: u16, data: Bytes) {
        let mut entries = self.entries.lock();
        entries.push(TxEntry {
            seq: seq_num,
            data,
            added_at: Instant::now(),
        });
        self.evict(&mut entries);
    }

    pub fn get(&self, seq_num: u16) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        self.evict(&mut entries);
        entries.iter().rev().find(|e| e.seq == seq_num).map(|e| e.data.clone())
    }

    fn evict(&self, entries: &mut Vec<TxEntry>) {
        let keep = self.retx_keep;
        entries.retain(|e| e.added_at.elapsed() < keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delivers_in_order_with_no_gap() {
        let (buf, mut rx, _retx_rx) = SeqBuf::spawn(seq::MAX_SEQ_NUM, 0, Duration::from_millis(100));

        buf.add(100, Bytes::from_static(b"a"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await, Some((100, Bytes::from_static(b"a"))));

        buf.add(101, Bytes::from_static(b"b"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await, Some((101, Bytes::from_static(b"b"))));
    }

    #[tokio::test(start_paused = true)]
    async fn single_packet_gap_recovers_on_retransmit() {
        let (buf, mut rx, mut retx_rx) = SeqBuf::spawn(seq::MAX_SEQ_NUM, 0, Duration::from_millis(100));

        buf.add(100, Bytes::from_static(b"100"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().0, 100);

        buf.add(101, Bytes::from_static(b"101"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().0, 101);

        buf.add(103, Bytes::from_static(b"103"));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(retx_rx.recv().await, Some((102, 102)));

        buf.add(102, Bytes::from_static(b"102"));
        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(rx.recv().await.unwrap().0, 102);
        assert_eq!(rx.recv().await.unwrap().0, 103);
    }

    #[tokio::test(start_paused = true)]
    async fn multi_packet_gap_recovers_on_ranged_retransmit() {
        let (buf, mut rx, mut retx_rx) = SeqBuf::spawn(seq::MAX_SEQ_NUM, 0, Duration::from_millis(100));

        buf.add(100, Bytes::from_static(b"100"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().0, 100);

        buf.add(105, Bytes::from_static(b"105"));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(retx_rx.recv().await, Some((101, 104)));

        // The whole gap arrives out of order before the lock expires; the
        // buffer must recognize the full [101, 104] range is now present and
        // resume ordered delivery instead of waiting out the lock.
        buf.add(103, Bytes::from_static(b"103"));
        buf.add(101, Bytes::from_static(b"101"));
        buf.add(104, Bytes::from_static(b"104"));
        buf.add(102, Bytes::from_static(b"102"));
        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(rx.recv().await.unwrap().0, 101);
        assert_eq!(rx.recv().await.unwrap().0, 102);
        assert_eq!(rx.recv().await.unwrap().0, 103);
        assert_eq!(rx.recv().await.unwrap().0, 104);
        assert_eq!(rx.recv().await.unwrap().0, 105);
        assert!(retx_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gap_timeout_sets_ignore_missing_until() {
        let (buf, mut rx, mut retx_rx) = SeqBuf::spawn(seq::MAX_SEQ_NUM, 0, Duration::from_millis(100));

        buf.add(100, Bytes::from_static(b"100"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().0, 100);

        buf.add(101, Bytes::from_static(b"101"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().0, 101);

        buf.add(103, Bytes::from_static(b"103"));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(retx_rx.recv().await, Some((102, 102)));

        // No retransmit arrives; lock expires after jitter_window.
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await.unwrap().0, 103);

        buf.add(104, Bytes::from_static(b"104"));
        buf.add(105, Bytes::from_static(b"105"));
        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(rx.recv().await.unwrap().0, 104);
        assert_eq!(rx.recv().await.unwrap().0, 105);
        assert!(retx_rx.try_recv().is_err());
    }

    #[test]
    fn tx_seq_buf_round_trip() {
        let buf = TxSeqBuf::new(Duration::from_secs(1));
        buf.add(1, Bytes::from_static(b"one"));
        buf.add(2, Bytes::from_static(b"two"));
        assert_eq!(buf.get(1), Some(Bytes::from_static(b"one")));
        assert_eq!(buf.get(2), Some(Bytes::from_static(b"two")));
        assert_eq!(buf.get(3), None);
    }
}
