//! Core domain models.
//!
//! Schedules, the runs they launch, and the status vocabularies shared by both.

pub mod runs;
pub mod schedules;
pub mod status;

pub use runs::*;
pub use schedules::*;
pub use status::*;
