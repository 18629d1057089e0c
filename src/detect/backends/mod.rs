use anyhow::Result;

use crate::config::{BackendKind, SecuritySettings};
use crate::detect::backend::DetectorBackend;

pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Build the configured detector backend.
pub fn build(settings: &SecuritySettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend {
        BackendKind::Stub => Ok(Box::new(StubBackend::new())),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => Ok(Box::new(TractBackend::load(settings)?)),
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(anyhow::anyhow!(
            "detector backend 'tract' requires the backend-tract feature"
        )),
    }
}
