//! Fitting of Buckingham and core-shell interatomic potentials to reference
//! forces and stresses.
//!
//! A fit draws structure subsets from a [`crate::core::domain::TrainingPool`], maps
//! candidate vectors onto a [`crate::core::potential::PotentialSpec`] through the label
//! vocabulary in [`crate::core::labels`], scores them with the chi-squared objective in
//! [`crate::engine::objective`] and searches the bounded parameter box with
//! [`crate::solvers::de::DifferentialEvolution`].

pub mod core;
pub mod engine;
pub mod fit;
pub mod interface;
pub mod solvers;
