//! Idiom transforms: independent rewrite rules that replace recognized
//! low-level constructs with higher-level equivalents preserving semantics.
//!
//! Each transform either declines (the normal outcome) or performs one or
//! more indivisible rewrites, announcing each through the stepper first.
//!
//! # Module Structure
//!
//! - `query`: query-expression reconstruction from operator chains, plus the
//!   degenerate-query normalization pass that depends on it
//! - `named_args`: evaluation-order-preserving named-argument introduction

pub mod named_args;
pub mod query;

pub use query::{QueryNormalization, QueryReconstruction};
