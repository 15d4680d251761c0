//! External collaborators the pipeline drives: text generation, rendering
//! and publishing. Only their contracts live here; implementations are in
//! `contentmill-adapters`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::history::GenerationRecord;
use crate::item::{MediaFormat, Payload};
use crate::Result;

/// What the generator is asked to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContext {
    pub channel: String,
    pub format: MediaFormat,
    pub topic: Option<String>,
    /// 1-based attempt number within the fitness loop.
    pub attempt: u32,
    /// Rejection reason of the previous attempt, if any.
    pub previous_rejection: Option<String>,
}

/// Text returned by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
    pub classification: Option<String>,
}

/// Produces quote or script text.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        context: &PromptContext,
        recent: &[GenerationRecord],
    ) -> Result<GeneratedText>;
}

/// Input to one render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub payload: Payload,
    pub format: MediaFormat,
    /// Template or visual variant name.
    pub template: Option<String>,
    pub output_path: PathBuf,
}

/// Result of a render; only success and the output path matter to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderOutcome {
    Rendered { path: String },
    Failed { error: String },
}

/// Turns a template and payload into an image or video file.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(&self, request: RenderRequest) -> Result<RenderOutcome>;
}

/// Credentials for the publishing account.
#[derive(Clone, Serialize, Deserialize)]
pub struct PublishCredentials {
    pub account_id: String,
    pub access_token: String,
}

impl fmt::Debug for PublishCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishCredentials")
            .field("account_id", &self.account_id)
            .field("access_token", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PublishOutcome {
    Published { external_id: String },
    Rejected { error: String },
}

/// Posts a publicly reachable asset to the social platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(
        &self,
        credentials: &PublishCredentials,
        asset_url: &str,
        caption: &str,
    ) -> Result<PublishOutcome>;
}
