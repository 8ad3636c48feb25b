//! Test utilities for billing.
//!
//! This module provides:
//! - A scriptable mock billing channel that records every call
//! - A mock merchant backend with configurable product lists and verdicts
//! - Fixtures for products, offers and purchases
//!
//! ## Usage
//!
//! ```rust,ignore
//! use playbill_lib::test_utils::{MockBackend, MockBillingChannel, TestFixtures};
//!
//! let channel = MockBillingChannel::new();
//! channel.add_product(TestFixtures::subscription("sub.a", &[("p1", None, "tok-p1")]));
//! channel.fail_next_connects(2);
//!
//! let backend = MockBackend::new().with_subscriptions(&["sub.a"]);
//! ```

mod fixtures;
mod mock_backend;
mod mock_channel;

pub use fixtures::TestFixtures;
pub use mock_backend::{MockBackend, StaticVerifier, ValidationCall};
pub use mock_channel::{LaunchCall, MockBillingChannel};
