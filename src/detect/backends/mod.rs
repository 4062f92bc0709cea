pub mod haar;
#[cfg(feature = "backend-opencv")]
pub mod opencv;
pub mod stub;

pub use haar::HaarBackend;
#[cfg(feature = "backend-opencv")]
pub use self::opencv::OpenCvBackend;
pub use stub::StubBackend;
