//! VAD Port

use crate::session::SessionContext;
use crate::CoreError;

/// Per-frame voice activity verdict.
///
/// Segment transitions are computed by the detector so `segment_end` can
/// never fire without a preceding `segment_start` on the same stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VadVerdict {
    /// The frame (window-voted) contains voice.
    pub is_voice: bool,
    /// Silence-to-voice transition on this frame.
    pub segment_start: bool,
    /// The silence window elapsed and the segment closed on this frame.
    pub segment_end: bool,
}

/// Voice activity detection over encoded audio frames.
///
/// Implementations are process singletons; per-session detector state is
/// keyed internally by session id and released via [`VadPort::release`].
/// Detectors update the context's segment flags (`client_have_voice`,
/// `client_voice_stop`) and activity time as a side effect, mirroring how
/// downstream segmentation consumes them.
pub trait VadPort: Send + Sync {
    /// Run detection over one frame.
    fn detect(&self, context: &SessionContext, frame: &[u8]) -> Result<VadVerdict, CoreError>;

    /// Drop per-session detector state.
    fn release(&self, session_id: &str);
}
