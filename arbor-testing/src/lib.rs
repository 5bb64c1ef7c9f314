//! Testing utilities for Arbor handler trees and bundles.
//!
//! - [`RecordingLeaf`] - leaf action that records each call
//! - [`StaticAuthorizer`] - caller -> grants table
//! - [`RequestBuilder`] - fluent request contexts
//! - [`BundleFixture`] - temporary bundle directories
//! - [`FnInitializer`] - closure-backed bundle initializers
//!
//! ```
//! use arbor_core::{Handler, Registry, Router};
//! use arbor_testing::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let leaf = RecordingLeaf::new();
//! let registry = Arc::new(Registry::new());
//! registry
//!     .add("/widgets/select", Handler::leaf("select", leaf.clone()).grant("widget_select").build())
//!     .unwrap();
//!
//! let authorizer = StaticAuthorizer::new().grant("admin", ["widget_select"]);
//! let router = Router::new(registry, Arc::new(authorizer));
//!
//! let mut ctx = RequestBuilder::new("/widgets/select").caller("admin").build().unwrap();
//! router.dispatch(&mut ctx).await.unwrap();
//! assert_eq!(leaf.call_count(), 1);
//! # });
//! ```

pub mod fixture;
pub mod initializer;
pub mod mock;
pub mod request;

pub use fixture::{BundleFixture, BundleSpec};
pub use initializer::FnInitializer;
pub use mock::{RecordedCall, RecordingLeaf, StaticAuthorizer};
pub use request::RequestBuilder;
