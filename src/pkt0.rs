//! Tracked-idle sequence space and retransmit serving.
//!
//! All tracked sends (idles and any stream payload routed through
//! [`Pkt0::send_tracked`]) share one sequence counter, guarded by a single
//! mutex so the wire order matches the seq order.

use bytes::Bytes;
use codec::packet;
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::Duration};

use crate::{
    error::Error,
    seqbuf::TxSeqBuf,
    statistics::{Stat, StatisticsReporter},
};

const ACTIVE_IDLE_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_BACKOFF_AFTER: Duration = Duration::from_secs(1);
const IDLE_BACKOFF_INTERVAL: Duration = Duration::from_secs(1);

struct State {
    send_seq: u16,
    last_tracked_sent_at: tokio::time::Instant,
}

/// Tracked-idle channel: periodic idle packets to keep the seq space alive,
/// plus the retransmit-cache bookkeeping that serves the peer's requests.
pub struct Pkt0 {
    state: Mutex<State>,
    local_sid: u32,
    remote_sid: u32,
    tx_buf: TxSeqBuf,
    send_tx: mpsc::Sender<Bytes>,
    stats: StatisticsReporter,
}

impl Pkt0 {
    pub fn new(
        local_sid: u32,
        remote_sid: u32,
        retx_keep: Duration,
        send_tx: mpsc::Sender<Bytes>,
        stats: StatisticsReporter,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                send_seq: 1,
                last_tracked_sent_at: tokio::time::Instant::now(),
            }),
            local_sid,
            remote_sid,
            tx_buf: TxSeqBuf::new(retx_keep),
            send_tx,
            stats,
        }
    }

    /// Sends `packet` (with a freshly assigned seq written into bytes 6..8)
    /// under the send-seq lock, retaining it in the retransmit cache.
    pub async fn send_tracked(&self, mut packet_bytes: Bytes, is_idle: bool) -> Result<(), Error> {
        let seq = {
            let mut state = self.state.lock();
            let seq = state.send_seq;

            let mut buf = bytes::BytesMut::from(&packet_bytes[..]);
            buf[6..8].copy_from_slice(&seq.to_le_bytes());
            packet_bytes = buf.freeze();

            self.tx_buf.add(seq, packet_bytes.clone());
            state.send_seq = state.send_seq.wrapping_add(1);
            if !is_idle {
                state.last_tracked_sent_at = tokio::time::Instant::now();
            }
            seq
        };
        let _ = seq;

        self.send_tx
            .send(packet_bytes)
            .await
            .map_err(|_| Error::Fatal("pkt0 send channel closed".into()))?;
        self.stats.send(&[Stat::SendPkts(1)]);
        Ok(())
    }

    /// Sends a tracked idle packet.
    pub async fn send_idle(&self) -> Result<(), Error> {
        let placeholder = packet::build_pkt0_idle(self.local_sid, self.remote_sid, 0).freeze();
        self.send_tracked(placeholder, true).await
    }

    /// Sends an untracked idle carrying an explicit sequence, used to answer
    /// a retransmit request for a seq no longer held in the cache.
    async fn send_untracked_idle(&self, seq: u16) -> Result<(), Error> {
        let pkt = packet::build_pkt0_idle(self.local_sid, self.remote_sid, seq).freeze();
        self.send_tx
            .send(pkt)
            .await
            .map_err(|_| Error::Fatal("pkt0 send channel closed".into()))?;
        self.stats.send(&[Stat::SendPkts(1), Stat::Retransmitted(1)]);
        Ok(())
    }

    async fn serve_seq(&self, seq: u16) -> Result<(), Error> {
        match self.tx_buf.get(seq) {
            Some(data) => {
                for _ in 0..2 {
                    self.send_tx
                        .send(data.clone())
                        .await
                        .map_err(|_| Error::Fatal("pkt0 send channel closed".into()))?;
                }
                self.stats.send(&[Stat::SendPkts(2), Stat::Retransmitted(1)]);
            }
            None => {
                for _ in 0..2 {
                    self.send_untracked_idle(seq).await?;
                }
            }
        }
        Ok(())
    }

    /// Serves a peer retransmit request (single seq or ranged), resending the
    /// cached bytes twice per seq, or an untracked idle if the cache has
    /// already evicted it.
    pub async fn handle_retx(&self, data: &[u8]) -> Result<(), Error> {
        if packet::is_pkt0_retx_one(data) {
            let seq = packet::parse_pkt0_retx_one_seq(data)?;
            return self.serve_seq(seq).await;
        }

        if packet::is_pkt0_retx_range(data) {
            for (start, end) in packet::parse_pkt0_retx_ranges(data)? {
                let width = codec::seq::diff(end, start, codec::seq::MAX_SEQ_NUM) + 1;
                if width as usize > u16::MAX as usize {
                    continue;
                }

                let mut seq = start;
                loop {
                    self.serve_seq(seq).await?;
                    if seq == end {
                        break;
                    }
                    seq = codec::seq::inc(seq, codec::seq::MAX_SEQ_NUM);
                }
            }
            return Ok(());
        }

        Err(Error::Desync("not a pkt0 retransmit request"))
    }

    /// Runs the periodic idle-sending loop: 100ms while tracked traffic is
    /// flowing, backing off to 1s after a second of inactivity.
    pub async fn run(&self) -> Result<(), Error> {
        loop {
            let idle_for = self.state.lock().last_tracked_sent_at.elapsed();
            let interval = if idle_for > IDLE_BACKOFF_AFTER {
                IDLE_BACKOFF_INTERVAL
            } else {
                ACTIVE_IDLE_INTERVAL
            };

            tokio::time::sleep(interval).await;
            self.send_idle().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stats_reporter() -> StatisticsReporter {
        crate::statistics::Statistics::default().get_reporter(crate::statistics::Stream::Control)
    }

    #[tokio::test]
    async fn tracked_send_assigns_ascending_seq() {
        let (tx, mut rx) = mpsc::channel(8);
        let pkt0 = Pkt0::new(1, 2, Duration::from_secs(1), tx, test_stats_reporter());

        pkt0.send_idle().await.unwrap();
        pkt0.send_idle().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(packet::seq_of(&first), 1);
        assert_eq!(packet::seq_of(&second), 2);
    }

    #[tokio::test]
    async fn retransmit_one_seq_sends_two_copies() {
        let (tx, mut rx) = mpsc::channel(16);
        let pkt0 = Pkt0::new(1, 2, Duration::from_secs(1), tx, test_stats_reporter());

        for _ in 0..10 {
            pkt0.send_idle().await.unwrap();
        }
        for _ in 0..10 {
            rx.recv().await.unwrap();
        }

        let request = packet::build_pkt0_retx_one(1, 2, 5).freeze();
        pkt0.handle_retx(&request).await.unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(packet::seq_of(&a), 5);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn retransmit_range_sends_two_copies_each_in_order() {
        let (tx, mut rx) = mpsc::channel(32);
        let pkt0 = Pkt0::new(1, 2, Duration::from_secs(1), tx, test_stats_reporter());

        for _ in 0..10 {
            pkt0.send_idle().await.unwrap();
        }
        for _ in 0..10 {
            rx.recv().await.unwrap();
        }

        let request = packet::build_pkt0_retx_range(1, 2, &[(3, 7)]).freeze();
        pkt0.handle_retx(&request).await.unwrap();

        let mut seqs = Vec::new();
        for _ in 0..10 {
            seqs.push(packet::seq_of(&rx.recv().await.unwrap()));
        }
        assert_eq!(seqs, vec![3, 3, 4, 4, 5, 5, 6, 6, 7, 7]);
    }
}
