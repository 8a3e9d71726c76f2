//! Lifecycle states for worker leases and worker connection records.
//!
//! Each enum variant's discriminant is the SMALLINT stored in the
//! database. The serialized (wire) form is the variant name, which is
//! what the browser client displays in its `worker-state` indicator.

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Map a database status ID back to the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// State of a worker lease.
    WorkerState {
        /// Lease created by the relay; no process has claimed it yet.
        Queued = 1,
        /// Process connected and idle.
        Running = 2,
        /// Process executing notebook cells.
        Busy = 3,
        Unknown = 4,
        MaxRunTimeReached = 5,
        MaxIdleTimeReached = 6,
        /// Process is preparing its kernel environment.
        InstallPackages = 7,
    }
}

define_status_enum! {
    /// State of a worker connection usage record.
    SessionState {
        Running = 1,
        Stopped = 2,
    }
}

/// States in which a lease counts as a live worker for its session.
pub const ACTIVE_STATES: [WorkerState; 3] =
    [WorkerState::Queued, WorkerState::Running, WorkerState::Busy];

impl WorkerState {
    /// Whether this state counts as a live worker (see [`ACTIVE_STATES`]).
    pub fn is_active(self) -> bool {
        ACTIVE_STATES.contains(&self)
    }
}
