use contentmill_core::{Error, Stage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("no {0} endpoint configured")]
    NotConfigured(&'static str),
}

impl AdapterError {
    /// Every transport or protocol problem is a collaborator failure of
    /// the stage that made the call.
    pub fn into_stage_error(self, stage: Stage) -> Error {
        Error::collaborator(stage, self.to_string())
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::Parse(err.to_string())
        } else {
            AdapterError::Request(err.to_string())
        }
    }
}
