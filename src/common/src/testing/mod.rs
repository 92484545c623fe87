//! Test utilities for tablesweep.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_account("primary")
//!     .page_size(10)
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
