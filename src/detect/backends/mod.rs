pub mod process;
pub mod stub;

pub use process::ProcessDetector;
pub use stub::StubDetector;
