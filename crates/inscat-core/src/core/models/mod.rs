//! Provides the validated data model for one vibrational calculation and its derived
//! quantities.
//!
//! Ownership is strictly tree-shaped: [`AbinsData`](abins_data::AbinsData) owns exactly one
//! [`AtomsData`](atoms::AtomsData) and one [`KpointsData`](kpoints::KpointsData), while
//! [`PowderData`](powder::PowderData) and [`SData`](sdata::SData) are value objects with
//! no back-references. All types validate their invariants at construction and are
//! immutable afterwards.

pub mod abins_data;
pub mod atoms;
pub mod elements;
pub mod error;
pub mod kpoints;
pub mod powder;
pub mod sdata;
