//! Connection supervisor: brings the three streams up together, tears them
//! down in a fixed order on any failure, and retries with backoff.

use std::sync::Arc;

use tokio::time::{self, Duration};

use crate::{
    audio::AudioStream,
    config::Config,
    control::ControlStream,
    error::Error,
    serial::SerialStream,
    session::StreamParams,
    sinks::{CatSink, PcmSink, PcmSource},
    statistics::{Statistics, Stream as StatStream},
};

const RETRY_WAIT: Duration = Duration::from_secs(1);
const RETRY_BACKOFF: Duration = Duration::from_secs(65);
const BACKOFF_AFTER_FAILURES: u32 = 5;

pub struct Supervisor {
    config: Arc<Config>,
    stats: Statistics,
    cat_sink: Arc<dyn CatSink>,
    pcm_source: Arc<dyn PcmSource>,
    pcm_sink: Arc<dyn PcmSink>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        stats: Statistics,
        cat_sink: Arc<dyn CatSink>,
        pcm_source: Arc<dyn PcmSource>,
        pcm_sink: Arc<dyn PcmSink>,
    ) -> Self {
        Self {
            config,
            stats,
            cat_sink,
            pcm_source,
            pcm_sink,
        }
    }

    /// Runs sessions back to back forever, backing off after repeated
    /// consecutive failures and reconnecting immediately on a peer-initiated
    /// disconnect.
    pub async fn run(&self) -> ! {
        let mut consecutive_failures = 0u32;

        loop {
            match self.run_session().await {
                Ok(()) => unreachable!("a session ends only by returning an error"),
                Err(e) => {
                    log::warn!("session ended: {e}");

                    if e.requires_immediate_retry() {
                        consecutive_failures = 0;
                        continue;
                    }

                    consecutive_failures += 1;
                    let wait = if consecutive_failures > BACKOFF_AFTER_FAILURES {
                        RETRY_BACKOFF
                    } else {
                        RETRY_WAIT
                    };
                    log::info!("reconnecting in {wait:?} (failure {consecutive_failures})");
                    time::sleep(wait).await;
                }
            }
        }
    }

    async fn run_session(&self) -> Result<(), Error> {
        let timing = &self.config.timing;
        let radio_host = self.config.radio.host;

        let mut control = ControlStream::open(
            StreamParams {
                name: "control",
                radio_host,
                port: self.config.radio.control_port,
                jitter_window: timing.jitter_window_control(),
                max_seq_diff: u16::MAX as u32 / 2,
                retx_keep: timing.jitter_window_control() * timing.retx_keep_multiplier,
                ping_interval: timing.ping_interval(),
                first_seq: 1,
                stat_stream: StatStream::Control,
            },
            &self.stats,
            &self.config.auth.username,
            &self.config.auth.password,
            self.config.radio.cat_address,
            timing.handshake_timeout(),
        )
        .await?;
        log::info!("control stream up");

        let mut serial = SerialStream::open(
            StreamParams {
                name: "serial",
                radio_host,
                port: self.config.radio.serial_port,
                jitter_window: timing.jitter_window_control(),
                max_seq_diff: u16::MAX as u32 / 2,
                retx_keep: timing.jitter_window_control() * timing.retx_keep_multiplier,
                ping_interval: timing.ping_interval(),
                first_seq: 1,
                stat_stream: StatStream::Serial,
            },
            &self.stats,
            self.cat_sink.clone(),
        )
        .await?;
        log::info!("serial stream up");

        let mut audio = AudioStream::open(
            StreamParams {
                name: "audio",
                radio_host,
                port: self.config.radio.audio_port,
                jitter_window: timing.jitter_window_audio(),
                max_seq_diff: u16::MAX as u32 / 2,
                retx_keep: timing.jitter_window_audio() * timing.retx_keep_multiplier,
                ping_interval: timing.ping_interval(),
                first_seq: 1,
                stat_stream: StatStream::Audio,
            },
            &self.stats,
            self.pcm_source.clone(),
            self.pcm_sink.clone(),
        )
        .await?;
        log::info!("audio stream up");

        if let Some(cmd) = &self.config.local.exec_on_connect {
            run_exec_on_connect(cmd);
        }

        let result = tokio::select! {
            r = control.run() => r,
            r = serial.run() => r,
            r = audio.run() => r,
        };

        audio.close().await;
        serial.close().await;
        control.close().await;

        result
    }
}

fn run_exec_on_connect(cmd: &str) {
    match std::process::Command::new("sh").arg("-c").arg(cmd).spawn() {
        Ok(_) => log::debug!("exec-on-connect launched: {cmd}"),
        Err(e) => log::warn!("exec-on-connect failed to launch: {e}"),
    }
}

// `run_session`'s handshake/teardown ordering is exercised per-stream in
// `control.rs`/`serial.rs`/`audio.rs`; staging all three here would mean
// three fake radios sharing the retry/backoff loop above, which doesn't add
// coverage over those per-stream tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_on_connect_runs_without_blocking() {
        let marker = std::env::temp_dir().join(format!("catlink-test-marker-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);

        run_exec_on_connect(&format!("touch {}", marker.display()));

        let deadline = time::Instant::now() + Duration::from_secs(2);
        while time::Instant::now() < deadline && !marker.exists() {
            time::sleep(Duration::from_millis(20)).await;
        }
        assert!(marker.exists(), "exec-on-connect command never ran");
        let _ = std::fs::remove_file(&marker);
    }

    #[test]
    fn exec_on_connect_with_an_unusable_command_does_not_panic() {
        run_exec_on_connect("this-command-does-not-exist-xyz");
    }
}
