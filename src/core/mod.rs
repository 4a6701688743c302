pub mod codec;
pub mod domain;
pub mod error;
pub mod labels;
pub mod potential;
pub mod random;
pub mod sampling;
