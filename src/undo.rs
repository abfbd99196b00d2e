//! Pausing the editor's undo history while the simulation mutates the net.

/// The editor's undo/redo store, as far as the controller needs it.
///
/// Every `pause_undo` is followed by exactly one `resume_undo`.
pub trait UndoTracker: Send + Sync {
    fn pause_undo(&self);
    fn resume_undo(&self);
}

/// For hosts without an undo history.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUndoTracker;

impl UndoTracker for NoopUndoTracker {
    fn pause_undo(&self) {}
    fn resume_undo(&self) {}
}

/// Keeps undo tracking paused until dropped, including when the owning
/// future is dropped mid-run.
#[must_use = "undo tracking resumes as soon as the pause is dropped"]
pub struct UndoPause<'a> {
    tracker: &'a dyn UndoTracker,
}

impl<'a> UndoPause<'a> {
    pub fn new(tracker: &'a dyn UndoTracker) -> Self {
        tracker.pause_undo();
        Self { tracker }
    }
}

impl Drop for UndoPause<'_> {
    fn drop(&mut self) {
        self.tracker.resume_undo();
    }
}
