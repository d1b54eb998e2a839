//! Provides persistence for vibrational input data and computed intermediates.
//!
//! [`document`] reads and writes the versioned JSON form of
//! [`AbinsData`](crate::core::models::abins_data::AbinsData) through the [`traits`]
//! interface. [`cache`] implements the structured, hash/parameter-keyed cache that lets
//! the calculators skip expensive recomputation when nothing relevant has changed.

pub mod cache;
pub mod document;
pub mod traits;
