//! Keepalive/ping engine: periodic liveness probing, RTT estimation, and
//! echoing peer-originated pings.

use bytes::Bytes;
use codec::packet;
use parking_lot::Mutex;
use rand::RngCore;
use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};

use crate::{
    error::Error,
    statistics::{Stat, StatisticsReporter},
};

const PING_TIMEOUT: Duration = Duration::from_secs(3);

struct State {
    send_seq: u16,
    inner_send_seq: u16,
    last_confirmed_seq: u16,
    last_send_at: Instant,
    last_reply_at: Instant,
    rtt: Duration,
    started: bool,
}

/// Bidirectional keepalive. Send a ping at `ping_interval`, expect a reply
/// within [`PING_TIMEOUT`]; echo pings the peer sends us once started.
pub struct Pkt7 {
    state: Mutex<State>,
    local_sid: u32,
    remote_sid: u32,
    ping_interval: Duration,
    send_tx: mpsc::Sender<Bytes>,
    stats: StatisticsReporter,
}

impl Pkt7 {
    pub fn new(
        local_sid: u32,
        remote_sid: u32,
        first_seq: u16,
        ping_interval: Duration,
        send_tx: mpsc::Sender<Bytes>,
        stats: StatisticsReporter,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                send_seq: first_seq,
                inner_send_seq: 0x8304,
                last_confirmed_seq: first_seq.wrapping_sub(1),
                last_send_at: Instant::now(),
                last_reply_at: Instant::now(),
                rtt: Duration::ZERO,
                started: false,
            }),
            local_sid,
            remote_sid,
            ping_interval,
            send_tx,
            stats,
        }
    }

    /// Marks keepalive as started: from this point on, peer-originated pings
    /// are echoed and ping replies are timed out.
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.started = true;
        state.last_reply_at = Instant::now();
    }

    pub fn rtt(&self) -> Duration {
        self.state.lock().rtt
    }

    /// Sends one ping, advancing the send sequence and the reply-token counter.
    pub async fn send_ping(&self) -> Result<(), Error> {
        let pkt = {
            let mut state = self.state.lock();
            let random_byte = (rand::rng().next_u32() & 0xFF) as u8;
            let token = packet::build_reply_token(random_byte, state.inner_send_seq);
            state.inner_send_seq = state.inner_send_seq.wrapping_add(1);

            let seq = state.send_seq;
            let pkt = packet::build_pkt7(self.local_sid, self.remote_sid, seq, None, Some(token));

            state.send_seq = state.send_seq.wrapping_add(1);
            state.last_send_at = Instant::now();
            pkt
        };

        self.send_tx
            .send(pkt.freeze())
            .await
            .map_err(|_| Error::Fatal("pkt7 send channel closed".into()))?;
        self.stats.send(&[Stat::SendPkts(1)]);
        Ok(())
    }

    /// Handles an inbound pkt7 datagram: either answers a peer ping, or
    /// records a reply to our own ping (updating RTT and loss accounting).
    pub async fn handle(&self, data: &[u8]) -> Result<(), Error> {
        if !packet::is_pkt7(data) {
            return Err(Error::Desync("not a pkt7 packet"));
        }

        let got_seq = packet::seq_of(data);

        if packet::pkt7_is_request(data) {
            let started = self.state.lock().started;
            if started {
                let token: [u8; 4] = data[17..21].try_into().unwrap();
                let pkt = packet::build_pkt7(self.local_sid, self.remote_sid, got_seq, Some(token), None);
                self.send_tx
                    .send(pkt.freeze())
                    .await
                    .map_err(|_| Error::Fatal("pkt7 send channel closed".into()))?;
                self.stats.send(&[Stat::SendPkts(1)]);
            }
            return Ok(());
        }

        let mut state = self.state.lock();
        let since_send = state.last_send_at.elapsed();
        state.rtt = (state.rtt + since_send) / 2;
        if state.started {
            state.last_reply_at = Instant::now();
        }

        let expected = state.last_confirmed_seq.wrapping_add(1);
        if expected != got_seq && got_seq != state.last_confirmed_seq {
            let missing = got_seq.wrapping_sub(expected) as usize;
            drop(state);
            self.stats.send(&[Stat::Lost(missing)]);
            state = self.state.lock();
        }
        state.last_confirmed_seq = got_seq;

        Ok(())
    }

    /// Runs the periodic ping loop. Returns an error if a reply is not seen
    /// within [`PING_TIMEOUT`] of the last one, once keepalive has started.
    pub async fn run(&self) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(self.ping_interval);
        loop {
            ticker.tick().await;
            self.send_ping().await?;

            let state = self.state.lock();
            if state.started && state.last_reply_at.elapsed() > PING_TIMEOUT {
                return Err(Error::PeerUnreachable("ping timeout"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_peer_ping_only_after_start() {
        let (tx, mut rx) = mpsc::channel(8);
        let pkt7 = Pkt7::new(1, 2, 1, Duration::from_millis(100), tx, test_stats_reporter());

        let mut request = vec![0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x1c, 0x0e];
        request.extend_from_slice(&2u32.to_be_bytes());
        request.extend_from_slice(&1u32.to_be_bytes());
        request.extend_from_slice(&[0x00, 0x57, 0x2b, 0x12, 0x00]);

        pkt7.handle(&request).await.unwrap();
        assert!(rx.try_recv().is_err());

        pkt7.start();
        pkt7.handle(&request).await.unwrap();
        let reply = rx.try_recv().unwrap();
        assert_eq!(&reply[17..21], &[0x57, 0x2b, 0x12, 0x00]);
        assert!(!packet::pkt7_is_request(&reply));
    }

    fn test_stats_reporter() -> StatisticsReporter {
        crate::statistics::Statistics::default().get_reporter(crate::statistics::Stream::Control)
    }
}
