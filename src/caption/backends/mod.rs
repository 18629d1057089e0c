use anyhow::Result;

use crate::caption::model::CaptionModel;
use crate::config::{BackendKind, CaptionSettings};

pub mod summary;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use summary::SceneSummaryModel;
#[cfg(feature = "backend-tract")]
pub use tract::TractCaptionModel;

/// Build the configured caption model.
pub fn build(settings: &CaptionSettings) -> Result<Box<dyn CaptionModel>> {
    match settings.backend {
        BackendKind::Stub => Ok(Box::new(SceneSummaryModel::new())),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => Ok(Box::new(TractCaptionModel::load(settings)?)),
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(anyhow::anyhow!(
            "caption backend 'tract' requires the backend-tract feature"
        )),
    }
}
