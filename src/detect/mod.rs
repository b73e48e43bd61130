mod backend;
mod backends;
pub mod classes;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendRegistry, SharedDetector};
pub use result::{non_max_suppression, BoundingBox, Detection};
