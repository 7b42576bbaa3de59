//! Testing utilities and helpers
//!
//! Available to this crate's own tests and, through the `test-utils`
//! feature, to downstream crates:
//! - **[`fixtures`]**: canned client config, ID-token claims and token sets
//! - **[`mocks`]**: mock token endpoint, HTTP transport, store and observer

pub mod fixtures;
pub mod mocks;

pub use mocks::{
    ExchangeCall, FailingStore, MockTokenEndpoint, MockTransport, RecordingObserver,
};
