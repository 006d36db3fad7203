pub mod builder;
pub mod types;

pub use builder::{ArbitrageGraph, GraphView, PoolUpdate};
pub use types::EdgeData;
