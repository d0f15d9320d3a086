//! Zero-downtime bulk refresh of the Local Store.
//!
//! The inactive instance is cleared and loaded from a [`BulkSource`] while the
//! active one keeps serving. Staging is verified against the source manifest,
//! then serving traffic is repointed in one step. The previous instance stays
//! intact so the cutover can be rolled back until the next refresh begins.
//!
//! ```text
//! STEADY --begin_refresh--> REFRESHING --load/verify--> REFRESHING
//!    ^                          |                           |
//!    +-------abort/failure------+                        cutover
//!    ^                                                      |
//!    +---------------------- CUTTING_OVER <-----------------+
//! ```

mod coordinator;
mod error;
mod health;
mod source;

pub use coordinator::{
    CutoverReport, LoadReport, Phase, RefreshOptions, UpdateCoordinator, UpdateEvent,
    VerificationReport, UPDATE_ACTOR,
};
pub use error::{BulkSourceError, CutoverError, UpdateError, UpdateResult, VerificationError};
pub use health::{HealthCheck, RowCountHealthCheck};
pub use source::{BulkSnapshot, BulkSource, JsonFileBulkSource, Manifest, StaticBulkSource};
