//! Progress callbacks for interactive front-ends.

use nodecounter_shared::RunReport;

/// Progress callback for reporting run status.
pub trait RunProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called each time a batch finishes, whatever its outcome.
    fn batch_finished(&self, finished: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl RunProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn batch_finished(&self, _finished: usize, _total: usize) {}
    fn done(&self, _report: &RunReport) {}
}
