//! # Engine Module
//!
//! Stateful orchestration of spectrum calculations: configuration snapshots, the two
//! cached calculators and their lifecycle, progress reporting and engine errors.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Parameter files, calculator settings and the cache key
//! - **Powder Tensors** ([`powder`]) - Mean-square displacement tensors per k-point and atom
//! - **Structure Factor** ([`spowder`]) - The semi-empirical powder S(Q, ω) calculator
//! - **State Tracking** ([`state`]) - The cache-check / load / compute lifecycle
//! - **Progress Monitoring** ([`progress`]) - Optional, one-way progress notifications
//! - **Error Handling** ([`error`]) - Engine-level error aggregation
//!
//! Both calculators snapshot their parameters at construction and never mutate their
//! inputs. Per-task work runs on a bounded worker pool and is merged in a fixed order,
//! so results do not depend on the number of threads.

pub mod config;
pub mod error;
pub mod powder;
pub mod progress;
pub mod spowder;
pub mod state;
