//! External collaborator traits.
//!
//! These are the seams at which the engine hands off to code outside its own
//! scope: a local CAT byte stream, a local PCM audio device.
//! Implementations live in the embedding application. Mirrors the shape of
//! a handler trait called synchronously from the engine's own tasks; an
//! implementation that needs to cross into async code bridges through its
//! own channel, the same way a caller of a synchronous handler would.

use codec::audio::PCM_FRAME_LEN;

use crate::error::Error;

/// Byte-stream duplex carrying CAT bytes to and from a local consumer (a
/// virtual serial device, a TCP shim, or a test double).
pub trait CatSink: Send + Sync {
    /// Delivers CAT bytes received from the radio to the local consumer.
    fn on_received(&self, data: &[u8]) -> Result<(), Error>;

    /// Polls for CAT bytes the local consumer wants sent to the radio.
    /// Returns an empty vec if nothing is pending.
    fn poll_outbound(&self) -> Result<Vec<u8>, Error>;
}

/// Producer of outbound 20ms, 48kHz mono PCM frames.
pub trait PcmSource: Send + Sync {
    /// Returns the next frame to transmit, or `None` if no new audio is
    /// available for this tick (treated as silence and not transmitted).
    fn next_frame(&self) -> Option<[u8; PCM_FRAME_LEN]>;
}

/// Consumer of inbound 20ms, 48kHz mono PCM frames.
pub trait PcmSink: Send + Sync {
    fn push_frame(&self, frame: [u8; PCM_FRAME_LEN]);
}
