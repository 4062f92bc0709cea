mod backend;
mod backends;
mod cascade;
mod cascade_xml;
mod grouping;
mod integral;
mod result;

use anyhow::{anyhow, Result};

use crate::config::{DetectorBackendKind, DetectorSettings};

pub use backend::{
    DetectorParams, FaceDetector, DEFAULT_MIN_NEIGHBORS, DEFAULT_MIN_SIZE, DEFAULT_SCALE_FACTOR,
};
#[cfg(feature = "backend-opencv")]
pub use backends::OpenCvBackend;
pub use backends::{HaarBackend, StubBackend};
pub use cascade::{CascadeModel, CascadeStage, HaarStump, WeightedRect};
pub use result::FaceBox;

/// Build the configured detector backend.
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn FaceDetector>> {
    let mut detector: Box<dyn FaceDetector> = match settings.backend {
        DetectorBackendKind::Haar => {
            let path = settings
                .cascade_path
                .as_ref()
                .ok_or_else(|| anyhow!("haar detector requires a cascade model path"))?;
            Box::new(HaarBackend::from_path(path, settings.params)?)
        }
        #[cfg(feature = "backend-opencv")]
        DetectorBackendKind::OpenCv => {
            let path = settings
                .cascade_path
                .as_ref()
                .ok_or_else(|| anyhow!("opencv detector requires a cascade XML path"))?;
            Box::new(OpenCvBackend::new(path, settings.params)?)
        }
        #[cfg(not(feature = "backend-opencv"))]
        DetectorBackendKind::OpenCv => {
            return Err(anyhow!(
                "opencv detector requires the backend-opencv feature"
            ))
        }
        DetectorBackendKind::Stub => Box::new(StubBackend::new()),
    };
    detector.warm_up()?;
    log::info!("face detector ready: {}", detector.name());
    Ok(detector)
}
