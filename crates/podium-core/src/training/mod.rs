//! Training backends.

mod command_trainer;

pub use command_trainer::{read_results_csv, CommandTrainer};
