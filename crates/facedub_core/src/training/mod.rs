pub mod checkpoint;
pub mod eval;
pub mod finetune;
pub mod loss;
pub mod trainer;

pub use eval::EvalReporter;
pub use trainer::DubbingTrainer;
