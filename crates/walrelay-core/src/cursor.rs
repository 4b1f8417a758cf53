/// Position state of one replication session.
///
/// `last_acknowledged <= last_applied` holds after every operation. Both
/// positions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCursor {
    last_applied: u64,
    last_acknowledged: u64,
}

impl SessionCursor {
    /// Start a cursor at the resolved resume point.
    ///
    /// Everything before `start` is already confirmed upstream, so both
    /// positions begin there.
    pub fn new(start: u64) -> Self {
        Self {
            last_applied: start,
            last_acknowledged: start,
        }
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn last_acknowledged(&self) -> u64 {
        self.last_acknowledged
    }

    /// Record that everything up to `position` was handed off.
    ///
    /// Returns whether the applied position moved.
    pub fn advance_applied(&mut self, position: u64) -> bool {
        if position > self.last_applied {
            self.last_applied = position;
            true
        } else {
            false
        }
    }

    /// Record that the applied position was reported upstream, returning it.
    pub fn acknowledge(&mut self) -> u64 {
        self.last_acknowledged = self.last_applied;
        self.last_acknowledged
    }

    /// Work handed off but not yet confirmed upstream.
    pub fn pending(&self) -> u64 {
        self.last_applied - self.last_acknowledged
    }
}
