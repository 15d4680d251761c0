//! System configuration parsing.

use chrono::{FixedOffset, NaiveTime};
use contentmill_core::collaborator::PublishCredentials;
use contentmill_core::fitness::TemplateConstraints;
use contentmill_core::{MediaFormat, Stage};
use kdl::{KdlDocument, KdlNode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::nodes::*;
use crate::{ConfigError, ConfigResult};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "CONTENTMILL_CONFIG";

/// System-wide configuration.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Offset in which calendar days and publish windows are evaluated.
    pub timezone: FixedOffset,
    pub schedule: ScheduleConfig,
    pub variants: VariantConfig,
    pub generation: GenerationConfig,
    pub template: TemplateConstraints,
    pub render: RenderConfig,
    pub workers: WorkerConfig,
    pub publish: PublishConfig,
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub channel: String,
    /// Items per day.
    pub count: usize,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    /// Formats alternated by slot index.
    pub formats: Vec<MediaFormat>,
    /// Local time of the daily scheduling run.
    pub run_at: NaiveTime,
    pub sweep_interval: Duration,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VariantConfig {
    pub candidates: Vec<String>,
    /// A variant may be chosen at most this many times in a row.
    pub max_consecutive: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_attempts: u32,
    /// Rolling window of history consulted for similarity.
    pub history_days: u32,
    pub similarity_threshold: f64,
    /// Local texts used when the generator fails.
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub lock_timeout: Duration,
    pub output_dir: PathBuf,
    /// Base URL under which `output_dir` is publicly served.
    pub public_base_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub content: usize,
    pub render: usize,
    pub publish: usize,
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub account_id: Option<String>,
    /// Name of the environment variable holding the access token.
    pub access_token_env: String,
}

#[derive(Debug, Clone, Default)]
pub struct CollaboratorConfig {
    pub generator: Option<Url>,
    pub renderer: Option<Url>,
    pub publisher: Option<Url>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            channel: "default".to_string(),
            count: 4,
            window_start: hm(9, 0),
            window_end: hm(23, 0),
            formats: vec![MediaFormat::Image, MediaFormat::Video],
            run_at: hm(0, 5),
            sweep_interval: Duration::from_secs(60),
            topics: Vec::new(),
        }
    }
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            max_consecutive: 2,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            history_days: 60,
            similarity_threshold: 0.8,
            fallbacks: vec!["Small steps every day add up to big change.".to_string()],
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(600),
            output_dir: PathBuf::from("media"),
            public_base_url: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            content: Stage::Content.default_concurrency(),
            render: Stage::Render.default_concurrency(),
            publish: Stage::Publish.default_concurrency(),
        }
    }
}

impl WorkerConfig {
    pub fn for_stage(&self, stage: Stage) -> usize {
        match stage {
            Stage::Content => self.content,
            Stage::Render => self.render,
            Stage::Publish => self.publish,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            access_token_env: "CONTENTMILL_PUBLISH_TOKEN".to_string(),
        }
    }
}

impl PublishConfig {
    /// Resolve credentials; the token is read from the environment on each call
    /// so it can be rotated without a restart.
    pub fn credentials(&self) -> ConfigResult<PublishCredentials> {
        let account_id = self
            .account_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("publish account-id".to_string()))?;

        let access_token = std::env::var(&self.access_token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv(self.access_token_env.clone()))?;

        Ok(PublishCredentials {
            account_id,
            access_token,
        })
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            timezone: FixedOffset::east_opt(0).expect("zero offset is valid"),
            schedule: ScheduleConfig::default(),
            variants: VariantConfig::default(),
            generation: GenerationConfig::default(),
            template: TemplateConstraints::default(),
            render: RenderConfig::default(),
            workers: WorkerConfig::default(),
            publish: PublishConfig::default(),
            collaborators: CollaboratorConfig::default(),
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("constant clock time is valid")
}

/// Parse a `HH:MM` wall-clock time.
pub fn parse_clock(value: &str) -> ConfigResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| ConfigError::invalid("clock time", format!("{value:?}: {e}")))
}

/// Parse a UTC offset such as `+07:00`, `-05:30`, `UTC` or `Z`.
pub fn parse_utc_offset(value: &str) -> ConfigResult<FixedOffset> {
    let value = value.trim();
    let invalid = || ConfigError::invalid("timezone", format!("{value:?} is not a UTC offset"));

    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match value.as_bytes().first() {
        Some(b'+') => (1, &value[1..]),
        Some(b'-') => (-1, &value[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Load and validate the system configuration from a file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_system_config(&content)
}

/// Parse system configuration from KDL text. Missing sections keep their
/// defaults; the result is validated before it is returned.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "timezone" => config.timezone = parse_utc_offset(&required_string_arg(node)?)?,
            "schedule" => parse_schedule(node, &mut config.schedule)?,
            "variants" => parse_variants(node, &mut config.variants)?,
            "generation" => parse_generation(node, &mut config.generation)?,
            "template" => parse_template(node, &mut config.template)?,
            "render" => parse_render(node, &mut config.render)?,
            "workers" => parse_workers(node, &mut config.workers)?,
            "publish" => parse_publish(node, &mut config.publish)?,
            "collaborators" => parse_collaborators(node, &mut config.collaborators)?,
            _ => {} // Ignore unknown nodes
        }
    }

    config.validate()?;
    Ok(config)
}

fn parse_schedule(node: &KdlNode, schedule: &mut ScheduleConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "channel" => schedule.channel = required_string_arg(child)?,
            "count" => schedule.count = usize_arg(child)?,
            "window" => {
                let start = string_prop(child, "start")
                    .ok_or_else(|| ConfigError::MissingField("window start".to_string()))?;
                let end = string_prop(child, "end")
                    .ok_or_else(|| ConfigError::MissingField("window end".to_string()))?;
                schedule.window_start = parse_clock(&start)?;
                schedule.window_end = parse_clock(&end)?;
            }
            "formats" => {
                schedule.formats = all_string_args(child)
                    .iter()
                    .map(|f| f.parse().map_err(|e: String| ConfigError::invalid("formats", e)))
                    .collect::<ConfigResult<_>>()?;
            }
            "run-at" => schedule.run_at = parse_clock(&required_string_arg(child)?)?,
            "sweep-interval-secs" => {
                schedule.sweep_interval = Duration::from_secs(usize_arg(child)? as u64)
            }
            "topic" => schedule.topics.extend(all_string_args(child)),
            _ => {}
        }
    }
    Ok(())
}

fn parse_variants(node: &KdlNode, variants: &mut VariantConfig) -> ConfigResult<()> {
    if let Some(max) = usize_prop(node, "max-consecutive")? {
        variants.max_consecutive = max;
    }

    for child in children(node) {
        match child.name().value() {
            "variant" => {
                for name in all_string_args(child) {
                    if variants.candidates.contains(&name) {
                        return Err(ConfigError::Duplicate(format!("variant '{name}'")));
                    }
                    variants.candidates.push(name);
                }
            }
            "max-consecutive" => variants.max_consecutive = usize_arg(child)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_generation(node: &KdlNode, generation: &mut GenerationConfig) -> ConfigResult<()> {
    let mut fallbacks = Vec::new();

    for child in children(node) {
        match child.name().value() {
            "max-attempts" => {
                generation.max_attempts = u32::try_from(usize_arg(child)?)
                    .map_err(|_| ConfigError::invalid("max-attempts", "out of range"))?
            }
            "history-days" => {
                generation.history_days = u32::try_from(usize_arg(child)?)
                    .map_err(|_| ConfigError::invalid("history-days", "out of range"))?
            }
            "similarity-threshold" => generation.similarity_threshold = f64_arg(child)?,
            "fallback" => fallbacks.extend(all_string_args(child)),
            _ => {}
        }
    }

    if !fallbacks.is_empty() {
        generation.fallbacks = fallbacks;
    }
    Ok(())
}

fn parse_template(node: &KdlNode, template: &mut TemplateConstraints) -> ConfigResult<()> {
    let fields: [(&str, &mut usize); 4] = [
        ("max-chars", &mut template.max_chars),
        ("min-chars", &mut template.min_chars),
        ("max-lines", &mut template.max_lines),
        ("max-line-chars", &mut template.max_line_chars),
    ];

    for (name, slot) in fields {
        if let Some(value) = usize_prop(node, name)? {
            *slot = value;
        }
        if let Some(child) = children(node).iter().find(|c| c.name().value() == name) {
            *slot = usize_arg(child)?;
        }
    }
    Ok(())
}

fn parse_render(node: &KdlNode, render: &mut RenderConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "lock-timeout-secs" => {
                render.lock_timeout = Duration::from_secs(usize_arg(child)? as u64)
            }
            "output-dir" => render.output_dir = PathBuf::from(required_string_arg(child)?),
            "public-base-url" => {
                render.public_base_url = Some(parse_url("public-base-url", child)?)
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_workers(node: &KdlNode, workers: &mut WorkerConfig) -> ConfigResult<()> {
    for stage in Stage::ALL {
        let slot = match stage {
            Stage::Content => &mut workers.content,
            Stage::Render => &mut workers.render,
            Stage::Publish => &mut workers.publish,
        };
        if let Some(value) = usize_prop(node, stage.as_str())? {
            *slot = value;
        }
        if let Some(child) = children(node)
            .iter()
            .find(|c| c.name().value() == stage.as_str())
        {
            *slot = usize_arg(child)?;
        }
    }
    Ok(())
}

fn parse_publish(node: &KdlNode, publish: &mut PublishConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "account-id" => publish.account_id = Some(required_string_arg(child)?),
            "access-token-env" => publish.access_token_env = required_string_arg(child)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_collaborators(node: &KdlNode, collaborators: &mut CollaboratorConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "generator" => collaborators.generator = Some(parse_url("generator", child)?),
            "renderer" => collaborators.renderer = Some(parse_url("renderer", child)?),
            "publisher" => collaborators.publisher = Some(parse_url("publisher", child)?),
            _ => {}
        }
    }
    Ok(())
}

fn parse_url(field: &str, node: &KdlNode) -> ConfigResult<Url> {
    let raw = required_string_arg(node)?;
    Url::parse(&raw).map_err(|e| ConfigError::invalid(field, format!("{raw:?}: {e}")))
}

impl SystemConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let schedule = &self.schedule;
        if schedule.count == 0 {
            return Err(ConfigError::invalid("count", "must be at least 1"));
        }
        if schedule.window_end <= schedule.window_start {
            return Err(ConfigError::invalid(
                "window",
                format!(
                    "end {} must be after start {}",
                    schedule.window_end.format("%H:%M"),
                    schedule.window_start.format("%H:%M")
                ),
            ));
        }
        if schedule.formats.is_empty() {
            return Err(ConfigError::MissingField("schedule formats".to_string()));
        }
        if schedule.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("sweep-interval-secs", "must be positive"));
        }
        if self.variants.max_consecutive == 0 {
            return Err(ConfigError::invalid("max-consecutive", "must be at least 1"));
        }
        if self.generation.max_attempts == 0 {
            return Err(ConfigError::invalid("max-attempts", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.generation.similarity_threshold) {
            return Err(ConfigError::invalid(
                "similarity-threshold",
                "must be between 0 and 1",
            ));
        }
        if self.generation.fallbacks.is_empty() {
            return Err(ConfigError::MissingField("generation fallback".to_string()));
        }
        for stage in Stage::ALL {
            if self.workers.for_stage(stage) == 0 {
                return Err(ConfigError::invalid(
                    format!("workers {stage}"),
                    "must be at least 1",
                ));
            }
        }
        let template = &self.template;
        if template.max_chars < template.min_chars || template.max_lines == 0 {
            return Err(ConfigError::invalid("template", "limits admit no text"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        timezone "+07:00"
        schedule {
            channel "daily-quotes"
            count 5
            window start="08:30" end="22:00"
            formats "image" "video" "carousel"
            run-at "00:10"
            sweep-interval-secs 30
            topic "patience" "focus"
        }
        variants max-consecutive=3 {
            variant "sunset"
            variant "ocean"
            variant "forest"
        }
        generation {
            max-attempts 7
            history-days 30
            similarity-threshold 0.75
            fallback "Keep going."
        }
        template max-chars=200 max-lines=5 max-line-chars=40 min-chars=10
        render {
            lock-timeout-secs 120
            output-dir "/srv/media"
            public-base-url "https://media.example.com/daily/"
        }
        workers content=3 render=1 publish=2
        publish {
            account-id "17841400000000"
            access-token-env "IG_TOKEN"
        }
        collaborators {
            generator "http://127.0.0.1:8801/generate"
            renderer "http://127.0.0.1:8802/render"
            publisher "https://graph.example.com/v19.0"
        }
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_system_config(FULL).unwrap();

        assert_eq!(config.timezone.local_minus_utc(), 7 * 3600);
        assert_eq!(config.schedule.channel, "daily-quotes");
        assert_eq!(config.schedule.count, 5);
        assert_eq!(config.schedule.window_start, hm(8, 30));
        assert_eq!(config.schedule.window_end, hm(22, 0));
        assert_eq!(
            config.schedule.formats,
            vec![MediaFormat::Image, MediaFormat::Video, MediaFormat::Carousel]
        );
        assert_eq!(config.schedule.topics, vec!["patience", "focus"]);
        assert_eq!(config.variants.candidates.len(), 3);
        assert_eq!(config.variants.max_consecutive, 3);
        assert_eq!(config.generation.max_attempts, 7);
        assert_eq!(config.generation.fallbacks, vec!["Keep going."]);
        assert_eq!(config.template.max_line_chars, 40);
        assert_eq!(config.render.lock_timeout, Duration::from_secs(120));
        assert_eq!(config.workers.for_stage(Stage::Content), 3);
        assert_eq!(config.workers.for_stage(Stage::Publish), 2);
        assert_eq!(config.publish.access_token_env, "IG_TOKEN");
        assert!(config.collaborators.publisher.is_some());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config.schedule.count, 4);
        assert_eq!(config.generation.max_attempts, 5);
        assert_eq!(config.workers.content, 2);
        assert_eq!(config.workers.render, 1);
        assert_eq!(config.workers.publish, 1);
        assert_eq!(config.timezone.local_minus_utc(), 0);
    }

    #[test]
    fn test_rejects_inverted_window() {
        let kdl = r#"schedule { window start="23:00" end="09:00" }"#;
        assert!(matches!(
            parse_system_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let kdl = r#"schedule { formats "image" "hologram" }"#;
        assert!(parse_system_config(kdl).is_err());
    }

    #[test]
    fn test_rejects_duplicate_variant() {
        let kdl = r#"variants { variant "a"; variant "a" }"#;
        assert!(matches!(
            parse_system_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let kdl = "workers render=0";
        assert!(parse_system_config(kdl).is_err());
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("-05:30").unwrap().local_minus_utc(), -19800);
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("Europe/Paris").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn test_missing_credentials() {
        let publish = PublishConfig {
            account_id: None,
            access_token_env: "CONTENTMILL_TEST_UNSET_TOKEN".to_string(),
        };
        assert!(matches!(
            publish.credentials(),
            Err(ConfigError::MissingField(_))
        ));

        let publish = PublishConfig {
            account_id: Some("acct".to_string()),
            ..publish
        };
        assert!(matches!(
            publish.credentials(),
            Err(ConfigError::MissingEnv(_))
        ));
    }
}
