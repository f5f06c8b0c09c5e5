//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is shared by everything that suspends during a
//! run: retry delays, timeout waits and health-check intervals all race
//! against it, so an abort unwinds at the next suspension point.

mod token;

pub use token::{sleep_or_abort, CancellationToken};
