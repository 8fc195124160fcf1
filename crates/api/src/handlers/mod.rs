pub mod checkpoints;
pub mod generate;
pub mod permissions;
pub mod queue;
pub mod workers;
