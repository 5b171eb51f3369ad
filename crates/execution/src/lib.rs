pub mod paper;
pub mod sim;

pub use paper::PaperExecutor;
pub use sim::ExecutionModel;
