pub mod config;
pub mod propagator;
pub mod sync;
