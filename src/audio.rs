//! Audio stream: fragments outbound PCM into part-A/part-B packets, reorders
//! and reassembles inbound ones, and suppresses silence in both directions.

use std::sync::Arc;

use codec::{audio, packet};
use tokio::time::{self, Duration, Instant};

use crate::{
    error::Error,
    session::{StreamParams, StreamRig},
    sinks::{PcmSink, PcmSource},
    statistics::Statistics,
};

const FRAME_INTERVAL: Duration = Duration::from_millis(20);
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AudioStream {
    rig: StreamRig,
    pcm_source: Arc<dyn PcmSource>,
    pcm_sink: Arc<dyn PcmSink>,
    audio_send_seq: u16,
    /// Part A of a downlink frame, waiting on its matching part B.
    pending_part_a: Option<Vec<u8>>,
    last_downlink_at: Instant,
}

impl AudioStream {
    pub async fn open(
        params: StreamParams,
        stats: &Statistics,
        pcm_source: Arc<dyn PcmSource>,
        pcm_sink: Arc<dyn PcmSink>,
    ) -> Result<Self, Error> {
        let rig = StreamRig::open(params, stats).await?;
        rig.pkt7.start();

        Ok(Self {
            rig,
            pcm_source,
            pcm_sink,
            audio_send_seq: 1,
            pending_part_a: None,
            last_downlink_at: Instant::now(),
        })
    }

    /// Runs the audio stream until a fatal error or an inactivity timeout.
    pub async fn run(&mut self) -> Result<(), Error> {
        let mut frame_ticker = time::interval(FRAME_INTERVAL);

        loop {
            tokio::select! {
                result = &mut self.rig.pkt7_task => {
                    return result.unwrap_or_else(|_| Err(Error::Fatal("audio pkt7 task panicked".into())));
                }
                result = &mut self.rig.pkt0_task => {
                    return result.unwrap_or_else(|_| Err(Error::Fatal("audio pkt0 task panicked".into())));
                }
                data = self.rig.payload_rx.recv() => {
                    match data {
                        Some(data) if packet::is_pkt5(&data) => return Err(Error::PeerDisconnected),
                        Some(data) => self.rig.seqbuf.add(packet::seq_of(&data), data),
                        None => return Err(Error::Fatal("audio payload channel closed".into())),
                    }
                }
                entry = self.rig.delivered_rx.recv() => {
                    match entry {
                        Some((_, data)) => self.handle_downlink(&data)?,
                        None => return Err(Error::Fatal("audio delivery channel closed".into())),
                    }
                }
                _ = frame_ticker.tick() => {
                    self.send_uplink_frame().await?;
                    if self.last_downlink_at.elapsed() > INACTIVITY_TIMEOUT {
                        return Err(Error::PeerUnreachable("audio inactivity timeout"));
                    }
                }
            }
        }
    }

    pub async fn close(self) {
        self.rig.close().await
    }

    fn handle_downlink(&mut self, data: &[u8]) -> Result<(), Error> {
        let (_seq, payload) = match audio::parse(data) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(()),
        };

        self.last_downlink_at = Instant::now();

        match audio::classify(data) {
            Some(audio::AudioPart::A) => {
                self.pending_part_a = Some(payload.to_vec());
            }
            Some(audio::AudioPart::B) => {
                let Some(mut pcm) = self.pending_part_a.take() else {
                    log::debug!("audio/part B without a matching part A, dropping");
                    return Ok(());
                };
                pcm.extend_from_slice(payload);
                if pcm.len() != audio::PCM_FRAME_LEN {
                    log::debug!("audio/reassembled frame has the wrong length, dropping");
                    return Ok(());
                }
                self.pcm_sink.push_frame(pcm.try_into().expect("checked length above"));
            }
            None => {}
        }

        Ok(())
    }

    async fn send_uplink_frame(&mut self) -> Result<(), Error> {
        let Some(pcm) = self.pcm_source.next_frame() else {
            return Ok(());
        };
        if audio::is_silence(&pcm) {
            return Ok(());
        }

        let audio_seq_a = self.audio_send_seq;
        let audio_seq_b = self.audio_send_seq.wrapping_add(1);
        self.audio_send_seq = self.audio_send_seq.wrapping_add(2);

        let (part_a, part_b) = audio::build_uplink_frame(
            self.rig.session.local_sid(),
            self.rig.session.remote_sid(),
            (0, 0),
            (audio_seq_a, audio_seq_b),
            &pcm,
        );

        self.rig.pkt0.send_tracked(part_a.freeze(), false).await?;
        self.rig.pkt0.send_tracked(part_b.freeze(), false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSource;
    impl PcmSource for NullSource {
        fn next_frame(&self) -> Option<[u8; audio::PCM_FRAME_LEN]> {
            None
        }
    }

    struct CollectingSink {
        frames: parking_lot::Mutex<Vec<[u8; audio::PCM_FRAME_LEN]>>,
    }
    impl PcmSink for CollectingSink {
        fn push_frame(&self, frame: [u8; audio::PCM_FRAME_LEN]) {
            self.frames.lock().push(frame);
        }
    }

    #[test]
    fn sinks_and_sources_compile_against_the_traits() {
        let source: Arc<dyn PcmSource> = Arc::new(NullSource);
        assert!(source.next_frame().is_none());

        let sink = CollectingSink {
            frames: parking_lot::Mutex::new(Vec::new()),
        };
        sink.push_frame([1u8; audio::PCM_FRAME_LEN]);
        assert_eq!(sink.frames.lock().len(), 1);
    }
}
