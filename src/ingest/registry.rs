use crate::ingest::{CameraDriver, CameraId};

/// A camera that opened and streamed a frame during the last probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDescriptor {
    pub id: CameraId,
    pub label: String,
}

impl CameraDescriptor {
    pub fn new(id: CameraId) -> Self {
        Self {
            id,
            label: format!("Camera {}", id),
        }
    }
}

/// Discovers usable cameras by probing device indices.
///
/// Only the most recent result is remembered, and only so that a session start
/// can be checked against it. Every `enumerate` call probes the hardware again.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    last: Vec<CameraDescriptor>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe indices `0..max_probe` in ascending order.
    ///
    /// An index counts only if it opens *and* yields a frame. Each probe handle is
    /// dropped before the next index is tried. `active` names a camera already held
    /// by a running session: it cannot be reopened, so it is listed without a probe.
    pub fn enumerate(
        &mut self,
        driver: &mut dyn CameraDriver,
        max_probe: u32,
        active: Option<CameraId>,
    ) -> Vec<CameraDescriptor> {
        let mut found = Vec::new();
        for index in 0..max_probe {
            if Some(index) == active || probe(driver, index) {
                found.push(CameraDescriptor::new(index));
            }
        }
        log::info!(
            "camera probe ({} driver, {} indices): {} streaming",
            driver.name(),
            max_probe,
            found.len()
        );
        self.last = found.clone();
        found
    }

    /// Result of the most recent enumeration.
    pub fn last(&self) -> &[CameraDescriptor] {
        &self.last
    }

    pub fn contains(&self, id: CameraId) -> bool {
        self.last.iter().any(|camera| camera.id == id)
    }
}

fn probe(driver: &mut dyn CameraDriver, index: CameraId) -> bool {
    let mut device = match driver.open(index) {
        Ok(device) => device,
        Err(err) => {
            log::debug!("probe {}: not openable: {:#}", index, err);
            return false;
        }
    };
    let streams = match device.read() {
        Ok(Some(_)) => true,
        Ok(None) => {
            log::debug!("probe {}: opened but produced no frame", index);
            false
        }
        Err(err) => {
            log::debug!("probe {}: read failed: {:#}", index, err);
            false
        }
    };
    drop(device);
    streams
}
