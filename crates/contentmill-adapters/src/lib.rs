//! HTTP implementations of the collaborator traits.
//!
//! Each collaborator is a JSON service reached at the URL configured under
//! `collaborators` in the system config.

mod error;
pub mod http;

pub use error::AdapterError;
pub use http::{HttpGenerator, HttpPublisher, HttpRenderer};

use contentmill_config::CollaboratorConfig;
use contentmill_core::collaborator::{Generator, Publisher, Renderer};
use std::sync::Arc;

/// The three collaborators, ready to hand to the pipeline.
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub renderer: Arc<dyn Renderer>,
    pub publisher: Arc<dyn Publisher>,
}

impl Collaborators {
    pub fn from_config(config: &CollaboratorConfig) -> Result<Self, AdapterError> {
        let generator = config
            .generator
            .clone()
            .ok_or(AdapterError::NotConfigured("generator"))?;
        let renderer = config
            .renderer
            .clone()
            .ok_or(AdapterError::NotConfigured("renderer"))?;
        let publisher = config
            .publisher
            .clone()
            .ok_or(AdapterError::NotConfigured("publisher"))?;

        Ok(Self {
            generator: Arc::new(HttpGenerator::new(generator)),
            renderer: Arc::new(HttpRenderer::new(renderer)),
            publisher: Arc::new(HttpPublisher::new(publisher)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_missing_endpoint_is_reported() {
        let config = CollaboratorConfig {
            generator: Some(Url::parse("http://localhost:8001/generate").unwrap()),
            renderer: None,
            publisher: Some(Url::parse("http://localhost:8003/publish").unwrap()),
        };

        let err = Collaborators::from_config(&config).err().unwrap();
        assert!(matches!(err, AdapterError::NotConfigured("renderer")));
    }
}
