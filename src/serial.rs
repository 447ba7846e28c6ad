//! Serial stream: carries CAT bytes to and from the radio's virtual serial
//! port, framed one-or-more CAT frames per UDP packet.

use std::sync::Arc;

use codec::{packet, serial};
use tokio::time::{self, Duration, Instant};

use crate::{
    error::Error,
    session::{StreamParams, StreamRig},
    sinks::CatSink,
    statistics::Statistics,
};

/// A CAT frame starts at `0xFE 0xFE` and terminates at the first `0xFC`/`0xFD`.
const FRAME_START: [u8; 2] = [0xFE, 0xFE];
const MAX_FRAME: usize = 80;
const FRAME_STALL: Duration = Duration::from_millis(100);
const OUTBOUND_POLL: Duration = Duration::from_millis(20);

/// Collects bytes from the local CAT sink into complete frames, resetting on
/// a stall so a wedged radio doesn't wedge the framer too.
struct Framer {
    buf: Vec<u8>,
    started_at: Option<Instant>,
}

impl Framer {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            started_at: None,
        }
    }

    /// Feeds outbound bytes polled from the local sink, returning any
    /// complete frames produced along the way.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &b in bytes {
            if self.buf.is_empty() {
                if b == FRAME_START[0] {
                    self.buf.push(b);
                    self.started_at = Some(Instant::now());
                }
                continue;
            }

            self.buf.push(b);

            if b == 0xFC || b == 0xFD {
                frames.push(std::mem::take(&mut self.buf));
                self.started_at = None;
                continue;
            }

            if self.buf.len() >= MAX_FRAME {
                self.buf.clear();
                self.started_at = None;
            }
        }
        frames
    }

    /// Resets an in-progress frame that has stalled for longer than
    /// [`FRAME_STALL`] since it started.
    fn check_stall(&mut self) {
        if let Some(started_at) = self.started_at
            && started_at.elapsed() > FRAME_STALL
        {
            self.buf.clear();
            self.started_at = None;
        }
    }
}

pub struct SerialStream {
    rig: StreamRig,
    cat_sink: Arc<dyn CatSink>,
    inner_send_seq: u16,
}

impl SerialStream {
    /// Handshakes the serial session and sends the `0xc0` open frame.
    pub async fn open(params: StreamParams, stats: &Statistics, cat_sink: Arc<dyn CatSink>) -> Result<Self, Error> {
        let rig = StreamRig::open(params, stats).await?;
        let open_frame = serial::build_serial_open(rig.session.local_sid(), rig.session.remote_sid()).freeze();
        rig.pkt0.send_tracked(open_frame, false).await?;
        rig.pkt7.start();

        Ok(Self {
            rig,
            cat_sink,
            inner_send_seq: 0,
        })
    }

    /// Runs the serial stream until a fatal error, sending the close frame
    /// on the way out.
    pub async fn run(&mut self) -> Result<(), Error> {
        let result = self.run_loop().await;

        let close_frame =
            serial::build_serial_close(self.rig.session.local_sid(), self.rig.session.remote_sid()).freeze();
        if let Err(e) = self.rig.pkt0.send_tracked(close_frame, false).await {
            log::debug!("serial/close frame send failed: {e}");
        }

        result
    }

    async fn run_loop(&mut self) -> Result<(), Error> {
        let mut framer = Framer::new();
        let mut poll_ticker = time::interval(OUTBOUND_POLL);

        loop {
            tokio::select! {
                result = &mut self.rig.pkt7_task => {
                    return result.unwrap_or_else(|_| Err(Error::Fatal("serial pkt7 task panicked".into())));
                }
                result = &mut self.rig.pkt0_task => {
                    return result.unwrap_or_else(|_| Err(Error::Fatal("serial pkt0 task panicked".into())));
                }
                data = self.rig.payload_rx.recv() => {
                    match data {
                        Some(data) if packet::is_pkt5(&data) => return Err(Error::PeerDisconnected),
                        Some(data) => self.rig.seqbuf.add(packet::seq_of(&data), data),
                        None => return Err(Error::Fatal("serial payload channel closed".into())),
                    }
                }
                entry = self.rig.delivered_rx.recv() => {
                    match entry {
                        Some((_, data)) => self.handle_inbound(&data)?,
                        None => return Err(Error::Fatal("serial delivery channel closed".into())),
                    }
                }
                _ = poll_ticker.tick() => {
                    framer.check_stall();
                    self.poll_outbound(&mut framer).await?;
                }
            }
        }
    }

    fn handle_inbound(&self, data: &[u8]) -> Result<(), Error> {
        if !serial::is_serial_data(data) {
            return Ok(());
        }
        let (_inner_seq, cat_bytes) = serial::parse_serial_data(data)?;
        self.cat_sink.on_received(cat_bytes)
    }

    pub async fn close(self) {
        self.rig.close().await
    }

    async fn poll_outbound(&mut self, framer: &mut Framer) -> Result<(), Error> {
        let pending = self.cat_sink.poll_outbound()?;
        if pending.is_empty() {
            return Ok(());
        }

        for frame in framer.feed(&pending) {
            let packet = serial::build_serial_data(
                self.rig.session.local_sid(),
                self.rig.session.remote_sid(),
                self.inner_send_seq,
                &frame,
            )
            .freeze();
            self.inner_send_seq = self.inner_send_seq.wrapping_add(1);
            self.rig.pkt0.send_tracked(packet, false).await?;
        }

        Ok(())
    }
}
