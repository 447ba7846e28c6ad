//! Engine library: wire framing lives in the `codec` crate; this crate turns
//! it into running sessions against a radio.

pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod pkt0;
pub mod pkt7;
pub mod seqbuf;
pub mod serial;
pub mod session;
pub mod sinks;
pub mod statistics;
pub mod supervisor;

use std::sync::Arc;

use config::Config;
use sinks::{CatSink, PcmSink, PcmSource};
use statistics::Statistics;
use supervisor::Supervisor;

/// Runs the engine against `config` forever, handing CAT bytes and PCM audio
/// to the given collaborators. Never returns under normal operation; the
/// binary entry point is expected to run this as the whole of `main`.
pub async fn startup(
    config: Arc<Config>,
    cat_sink: Arc<dyn CatSink>,
    pcm_source: Arc<dyn PcmSource>,
    pcm_sink: Arc<dyn PcmSink>,
) -> ! {
    let stats = Statistics::default();
    let supervisor = Supervisor::new(config.clone(), stats.clone(), cat_sink, pcm_source, pcm_sink);

    tokio::spawn(status_log_loop(config, stats));

    supervisor.run().await
}

async fn status_log_loop(config: Arc<Config>, stats: Statistics) {
    let mut ticker = tokio::time::interval(config.timing.status_log_interval());
    loop {
        ticker.tick().await;
        for stream in [statistics::Stream::Control, statistics::Stream::Serial, statistics::Stream::Audio] {
            let snap = stats.snapshot(stream);
            log::info!(
                "{stream:?}: rx {}B/{}pkt tx {}B/{}pkt retx {} lost {} rtt {}us",
                snap.received_bytes,
                snap.received_pkts,
                snap.send_bytes,
                snap.send_pkts,
                snap.retransmitted,
                snap.lost,
                snap.rtt_micros,
            );
        }
    }
}
