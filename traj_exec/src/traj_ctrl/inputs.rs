//! Latest-value input mailbox
//!
//! Pose and path sources may run in a different thread to the control loop. They push updates
//! into an [`InputMailbox`], which keeps only the newest value of each input. The control loop
//! takes a snapshot at the start of each cycle, so updates arriving mid-cycle are coalesced and
//! used from the next cycle onwards.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{loc::RobotState, path::Path};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Shared holder of the latest robot state and path.
///
/// Cloning the mailbox gives another handle to the same inputs.
#[derive(Clone, Default)]
pub struct InputMailbox {
    latest: Arc<Mutex<LatestInputs>>,
}

/// Copy of the mailbox contents at one instant.
///
/// Each input is tagged with a version which increases every time a new value is pushed.
#[derive(Clone, Debug, Default)]
pub struct InputSnapshot {
    pub state: Option<(u64, RobotState)>,
    pub path: Option<(u64, Arc<Path>)>,
}

#[derive(Default)]
struct LatestInputs {
    state: Option<(u64, RobotState)>,
    path: Option<(u64, Arc<Path>)>,
    version: u64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl InputMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest robot state.
    pub fn push_state(&self, state: RobotState) {
        let mut latest = self.lock();
        latest.version += 1;
        latest.state = Some((latest.version, state));
    }

    /// Replace the latest path.
    pub fn push_path(&self, path: Path) {
        self.push_shared_path(Arc::new(path));
    }

    /// Replace the latest path with an already shared one.
    pub fn push_shared_path(&self, path: Arc<Path>) {
        let mut latest = self.lock();
        latest.version += 1;
        latest.path = Some((latest.version, path));
    }

    /// Take a copy of the latest inputs.
    pub fn snapshot(&self) -> InputSnapshot {
        let latest = self.lock();

        InputSnapshot {
            state: latest.state,
            path: latest.path.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LatestInputs> {
        // The inputs are plain values which are always replaced whole, so a panic in another
        // holder cannot leave them half-written.
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
