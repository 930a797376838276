pub mod encoder;
pub mod keys;
pub mod pipeline;
pub mod run;

pub use pipeline::{CapturePipeline, RunOutcome};
pub use run::RunProgress;
