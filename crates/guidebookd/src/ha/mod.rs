//! Home Assistant REST API access.
//!
//! One client per house; the [`HomeAssistant`] trait is the seam that
//! keeps the proxy's dispatch logic testable without a live instance.

pub mod client;
pub mod models;

pub use client::{HaError, HaRestClient, HomeAssistant};
pub use models::{EntityState, ForecastKind};
