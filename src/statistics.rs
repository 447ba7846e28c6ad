use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::RwLock;

/// Which stream a statistics report applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Control,
    Serial,
    Audio,
}

/// The type of information passed through a [`StatisticsReporter`].
#[derive(Debug, Clone, Copy)]
pub enum Stat {
    ReceivedBytes(usize),
    SendBytes(usize),
    ReceivedPkts(usize),
    SendPkts(usize),
    Retransmitted(usize),
    Lost(usize),
}

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-stream running counters.
#[derive(Default)]
pub struct Counts<T> {
    pub received_bytes: T,
    pub send_bytes: T,
    pub received_pkts: T,
    pub send_pkts: T,
    pub retransmitted: T,
    pub lost: T,
}

impl<T: Number> Counts<T> {
    pub fn add(&self, payload: &Stat) {
        match payload {
            Stat::ReceivedBytes(v) => self.received_bytes.add(*v),
            Stat::SendBytes(v) => self.send_bytes.add(*v),
            Stat::ReceivedPkts(v) => self.received_pkts.add(*v),
            Stat::SendPkts(v) => self.send_pkts.add(*v),
            Stat::Retransmitted(v) => self.retransmitted.add(*v),
            Stat::Lost(v) => self.lost.add(*v),
        }
    }
}

/// Snapshot of one stream's counters, suitable for a status line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub received_bytes: usize,
    pub send_bytes: usize,
    pub received_pkts: usize,
    pub send_pkts: usize,
    pub retransmitted: usize,
    pub lost: usize,
    pub rtt_micros: u64,
}

struct StreamCounters {
    counts: Counts<Count>,
    rtt_micros: AtomicU64,
}

impl Default for StreamCounters {
    fn default() -> Self {
        Self {
            counts: Counts::default(),
            rtt_micros: AtomicU64::new(0),
        }
    }
}

/// Cross-stream statistics, shared behind an `Arc` by the control, serial and
/// audio streams and polled by the (external) status-line consumer.
#[derive(Clone)]
pub struct Statistics(Arc<RwLock<[StreamCounters; 3]>>);

impl Default for Statistics {
    fn default() -> Self {
        Self(Arc::new(RwLock::new([
            StreamCounters::default(),
            StreamCounters::default(),
            StreamCounters::default(),
        ])))
    }
}

fn index(stream: Stream) -> usize {
    match stream {
        Stream::Control => 0,
        Stream::Serial => 1,
        Stream::Audio => 2,
    }
}

impl Statistics {
    pub fn get_reporter(&self, stream: Stream) -> StatisticsReporter {
        StatisticsReporter {
            table: self.0.clone(),
            stream,
        }
    }

    pub fn set_rtt(&self, stream: Stream, rtt_micros: u64) {
        self.0.read()[index(stream)]
            .rtt_micros
            .store(rtt_micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self, stream: Stream) -> Snapshot {
        let guard = self.0.read();
        let counters = &guard[index(stream)];
        Snapshot {
            received_bytes: counters.counts.received_bytes.get(),
            send_bytes: counters.counts.send_bytes.get(),
            received_pkts: counters.counts.received_pkts.get(),
            send_pkts: counters.counts.send_pkts.get(),
            retransmitted: counters.counts.retransmitted.get(),
            lost: counters.counts.lost.get(),
            rtt_micros: counters.rtt_micros.load(Ordering::Relaxed),
        }
    }
}

/// Held by each stream; reports update the shared [`Statistics`] table.
#[derive(Clone)]
pub struct StatisticsReporter {
    table: Arc<RwLock<[StreamCounters; 3]>>,
    stream: Stream,
}

impl StatisticsReporter {
    pub fn send(&self, reports: &[Stat]) {
        let guard = self.table.read();
        let counters = &guard[index(self.stream)];
        for item in reports {
            counters.counts.add(item);
        }
    }
}
