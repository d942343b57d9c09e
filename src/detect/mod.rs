mod backend;
mod backends;
mod registry;
mod result;

pub use backend::PlateDetector;
pub use backends::{ProcessDetector, StubDetector};
pub use registry::DetectorRegistry;
pub use result::{Candidate, Region};
