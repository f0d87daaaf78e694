pub mod change;
pub mod entity;
pub mod error;
pub mod query;
pub mod ring;
pub mod sampler;
