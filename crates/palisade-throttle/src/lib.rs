//! # Palisade Throttle
//!
//! The throttle decision engine and usage-event publisher.
//!
//! This crate provides:
//! - The throttle data holder: remote decisions, blocking conditions, and
//!   custom-policy key templates pushed by the control plane
//! - Local hard-limit and subscription-burst gates
//! - The throttling filter with its fixed level priority order
//! - Throttle event construction
//! - The asynchronous publisher: worker pool, keyed connection pools, and
//!   the binary wire codec for the remote counting service

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod data;
pub mod event;
pub mod filter;
pub mod local;
pub mod publish;

pub use data::ThrottleDataHolder;
pub use event::ThrottleEvent;
pub use filter::ThrottleFilter;
pub use local::LocalGates;
pub use publish::{EventSink, Publisher};
