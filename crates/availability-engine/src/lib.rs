//! # availability-engine
//!
//! Working-hours availability for AI calendar agents.
//!
//! Given the busy intervals of a calendar and a working-hours policy, the
//! engine computes the free slots inside a requested range. Every timestamp
//! carries an explicit UTC offset and working hours are read in an explicit
//! `chrono-tz` timezone; nothing here looks at the host's local time.
//!
//! ## Modules
//!
//! - [`interval`] — `TimeInterval`, the half-open `[start, end)` value type
//! - [`policy`] — `WorkingHoursPolicy` (daily hours, weekdays, timezone)
//! - [`freebusy`] — Merge busy intervals and compute free slots
//! - [`lookup`] — Which intervals contain a given instant
//! - [`dst`] — Resolving wall-clock times across DST transitions
//! - [`error`] — Error types

pub mod dst;
pub mod error;
pub mod freebusy;
pub mod interval;
pub mod lookup;
pub mod policy;

pub use dst::{localize, DstPolicy};
pub use error::EngineError;
pub use freebusy::{
    compute_free_slots, compute_free_slots_with_min_duration, first_free_slot, merge_busy,
    FreeSlot,
};
pub use interval::TimeInterval;
pub use lookup::intervals_at;
pub use policy::{WorkingHoursPolicy, WORKDAYS};
