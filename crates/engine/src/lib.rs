pub mod classifier;
pub mod registry;
pub mod resolver;
