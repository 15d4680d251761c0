//! JSON-over-HTTP clients for the three collaborators.

use async_trait::async_trait;
use contentmill_core::collaborator::{
    GeneratedText, Generator, PromptContext, PublishCredentials, PublishOutcome, Publisher,
    RenderOutcome, RenderRequest, Renderer,
};
use contentmill_core::history::GenerationRecord;
use contentmill_core::{MediaFormat, Payload, Result, Stage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::AdapterError;

/// Most recent history entries sent along with a prompt.
const PROMPT_HISTORY_LIMIT: usize = 50;

fn client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("contentmill/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    body: &B,
) -> std::result::Result<R, AdapterError> {
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::Api {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json()
        .await
        .map_err(|e| AdapterError::Parse(e.to_string()))
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    channel: &'a str,
    format: MediaFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_rejection: Option<&'a str>,
    /// Recent texts the model should avoid repeating.
    recent: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    text: String,
    #[serde(default)]
    classification: Option<String>,
}

/// Calls a text-generation service.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpGenerator {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: client(Duration::from_secs(60)),
            endpoint,
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn generate(
        &self,
        context: &PromptContext,
        recent: &[GenerationRecord],
    ) -> Result<GeneratedText> {
        let body = GenerateBody {
            channel: &context.channel,
            format: context.format,
            topic: context.topic.as_deref(),
            attempt: context.attempt,
            previous_rejection: context.previous_rejection.as_deref(),
            recent: recent
                .iter()
                .rev()
                .take(PROMPT_HISTORY_LIMIT)
                .map(|r| r.text.as_str())
                .collect(),
        };

        debug!(endpoint = %self.endpoint, attempt = context.attempt, "requesting text");
        let reply: GenerateReply = post_json(self.client.post(self.endpoint.clone()), &body)
            .await
            .map_err(|e| e.into_stage_error(Stage::Content))?;

        Ok(GeneratedText {
            text: reply.text,
            classification: reply.classification,
        })
    }
}

#[derive(Debug, Serialize)]
struct RenderBody<'a> {
    payload: &'a Payload,
    format: MediaFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a str>,
    output_path: String,
}

/// `{"success": true, "path": ...}` or `{"success": false, "error": ...}`.
#[derive(Debug, Deserialize)]
struct StatusReply {
    success: bool,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, alias = "externalId")]
    external_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StatusReply {
    fn error_or(&self, fallback: &str) -> String {
        self.error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

fn render_outcome(reply: StatusReply, requested_path: String) -> RenderOutcome {
    if reply.success {
        RenderOutcome::Rendered {
            path: reply.path.unwrap_or(requested_path),
        }
    } else {
        RenderOutcome::Failed {
            error: reply.error_or("renderer reported failure without detail"),
        }
    }
}

fn publish_outcome(reply: StatusReply) -> PublishOutcome {
    match (reply.success, reply.external_id.clone()) {
        (true, Some(external_id)) => PublishOutcome::Published { external_id },
        (true, None) => PublishOutcome::Rejected {
            error: "publisher reported success without an id".to_string(),
        },
        (false, _) => PublishOutcome::Rejected {
            error: reply.error_or("publisher rejected the post without detail"),
        },
    }
}

/// Calls a rendering service. Renders are slow, hence the long timeout.
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRenderer {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: client(Duration::from_secs(900)),
            endpoint,
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn render(&self, request: RenderRequest) -> Result<RenderOutcome> {
        let output_path = request.output_path.display().to_string();
        let body = RenderBody {
            payload: &request.payload,
            format: request.format,
            template: request.template.as_deref(),
            output_path: output_path.clone(),
        };

        let reply: StatusReply = post_json(self.client.post(self.endpoint.clone()), &body)
            .await
            .map_err(|e| e.into_stage_error(Stage::Render))?;
        Ok(render_outcome(reply, output_path))
    }
}

#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    account_id: &'a str,
    asset_url: &'a str,
    caption: &'a str,
}

/// Calls a publishing gateway with a bearer token.
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPublisher {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: client(Duration::from_secs(120)),
            endpoint,
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn publish(
        &self,
        credentials: &PublishCredentials,
        asset_url: &str,
        caption: &str,
    ) -> Result<PublishOutcome> {
        let body = PublishBody {
            account_id: &credentials.account_id,
            asset_url,
            caption,
        };
        let request = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&credentials.access_token);

        let reply: StatusReply = post_json(request, &body)
            .await
            .map_err(|e| e.into_stage_error(Stage::Publish))?;
        Ok(publish_outcome(reply))
    }
}
