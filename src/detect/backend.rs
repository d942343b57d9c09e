use anyhow::Result;

use crate::detect::result::Candidate;
use crate::frame::Frame;

/// Plate detector trait.
///
/// This is the boundary to the opaque recognition model: a frame goes in, zero
/// or more `(text, region)` candidates come out. Nothing about the candidates
/// is trusted; text validation happens downstream in `plate`.
///
/// A detector instance is owned by exactly one inference worker thread.
pub trait PlateDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    ///
    /// An error means "no usable output for this frame"; callers treat it as an
    /// empty candidate list and keep going.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Candidate>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
