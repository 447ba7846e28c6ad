#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use catlink::{
    config::Config,
    error::Error,
    sinks::{CatSink, PcmSink, PcmSource},
};

/// Stands in for the pty/TCP-shim and audio-device collaborators this engine
/// hands off to; a real frontend embeds this library and supplies its own.
struct NoopCollaborator;

impl CatSink for NoopCollaborator {
    fn on_received(&self, _data: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn poll_outbound(&self) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }
}

impl PcmSource for NoopCollaborator {
    fn next_frame(&self) -> Option<[u8; codec::audio::PCM_FRAME_LEN]> {
        None
    }
}

impl PcmSink for NoopCollaborator {
    fn push_frame(&self, _frame: [u8; codec::audio::PCM_FRAME_LEN]) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    let collaborator = Arc::new(NoopCollaborator);
    catlink::startup(config, collaborator.clone(), collaborator.clone(), collaborator).await
}
