//! Units of measure and the conversion graph between them.
//!
//! Quantities recorded in different units ("case" vs "unit" vs "kg") are made
//! comparable through configured [`UnitEquivalence`] edges. A tenant's edges are
//! flattened once into a [`ConversionGraph`] (all-pairs multipliers per
//! connected chain) and cached per tenant in a [`ConversionCache`].

pub mod cache;
pub mod error;
pub mod graph;
pub mod unit;

pub use cache::ConversionCache;
pub use error::ConversionError;
pub use graph::{ConversionGraph, ConversionPolicy, Converter, DEFAULT_MAX_CHAIN_DEPTH};
pub use unit::{Unit, UnitEquivalence};
