//! Topic handling module
//!
//! Filter matching against concrete topics plus validation of filters and
//! topics before they reach the registry or the transport.

pub mod error;
pub mod filter_matcher;

#[cfg(test)]
mod filter_matcher_tests;

pub use error::{TopicError, TopicResult, limits, validation};
pub use filter_matcher::matches;
