//! Unit tests - Structural properties of compiled trees and front-end checks
//!
//! These tests need no fixture data; they inspect trees produced by the
//! binder and rewriter passes directly.

mod dsl_tests;
mod tree_property_tests;
