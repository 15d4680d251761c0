//! Pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::item::ItemStatus;

/// One phase of the fixed pipeline. Scheduling seeds `Content`; the
/// graph is always content -> render -> publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Content,
    Render,
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Content, Stage::Render, Stage::Publish];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Content => "content",
            Stage::Render => "render",
            Stage::Publish => "publish",
        }
    }

    /// Status an item must be in for this stage's handler to act on it.
    pub fn entry_status(&self) -> ItemStatus {
        match self {
            Stage::Content => ItemStatus::Pending,
            Stage::Render => ItemStatus::Generating,
            Stage::Publish => ItemStatus::Generated,
        }
    }

    /// Default worker-pool size for this stage.
    pub fn default_concurrency(&self) -> usize {
        match self {
            Stage::Content => 2,
            Stage::Render => 1,
            Stage::Publish => 1,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" | "generate" => Ok(Stage::Content),
            "render" => Ok(Stage::Render),
            "publish" => Ok(Stage::Publish),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}
