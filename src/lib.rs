//! Image classifiers trained with a center loss term, so that the 2-D embeddings of the classes
//! become visually separable.

#[macro_use]
extern crate derive_new;

pub mod checkpoint;
pub mod cli;
pub mod data;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod training;
pub mod visualize;

pub use error::{Error, Result};
