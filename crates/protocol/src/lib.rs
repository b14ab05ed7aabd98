//! Wire types for the otpgate control surface.
//!
//! This crate contains the serde-serializable types exchanged between the
//! control surface and its polling clients. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Stable: Changes only when the wire contract changes
//!
//! The session state machine and its rules live in the `otpgate` crate,
//! which converts its domain types into these shapes.

pub mod attempt;
pub mod envelope;
pub mod types;

pub use attempt::*;
pub use envelope::*;
pub use types::*;
