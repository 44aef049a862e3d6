//! External tool allow-list and discovery.
//!
//! Only the tools named by [`Tool`] can ever be spawned. The [`ToolRegistry`]
//! resolves each one at startup, from a configured override when that path
//! exists and from `PATH` otherwise.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::error::BackendError;
use crate::config::ToolsConfig;

/// An external executable a backend may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    Ffmpeg,
    YtDlp,
    Soffice,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Ffmpeg, Tool::YtDlp, Tool::Soffice];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::YtDlp => "yt-dlp",
            Tool::Soffice => "soffice",
        }
    }

    /// Executable names searched on `PATH`, in order.
    fn candidates(&self) -> &'static [&'static str] {
        match self {
            Tool::Ffmpeg => &["ffmpeg"],
            Tool::YtDlp => &["yt-dlp"],
            Tool::Soffice => &["soffice", "libreoffice"],
        }
    }

    fn configured<'a>(&self, config: &'a ToolsConfig) -> Option<&'a Path> {
        match self {
            Tool::Ffmpeg => config.ffmpeg.as_deref(),
            Tool::YtDlp => config.yt_dlp.as_deref(),
            Tool::Soffice => config.soffice.as_deref(),
        }
    }
}

/// Availability of one tool, as reported by the status endpoint. Host paths
/// are logged at discovery and never reported.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub available: bool,
}

/// Resolved tool locations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<Tool, PathBuf>,
}

impl ToolRegistry {
    /// Registry with no tools. Every process backend reports unavailable.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn discover(config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for tool in Tool::ALL {
            let resolved = match tool.configured(config) {
                Some(path) if path.exists() => Some(path.to_path_buf()),
                Some(path) => {
                    warn!(
                        tool = tool.name(),
                        path = %path.display(),
                        "Configured tool path does not exist, searching PATH"
                    );
                    find_on_path(tool)
                }
                None => find_on_path(tool),
            };

            match resolved {
                Some(path) => {
                    info!(tool = tool.name(), path = %path.display(), "Found external tool");
                    tools.insert(tool, path);
                }
                None => warn!(
                    tool = tool.name(),
                    "External tool not found, conversions needing it are unavailable"
                ),
            }
        }

        Self { tools }
    }

    /// Registers a tool at an explicit path.
    pub fn with_tool(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(tool, path.into());
        self
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.tools.contains_key(&tool)
    }

    pub fn require(&self, tool: Tool) -> Result<&Path, BackendError> {
        self.tools
            .get(&tool)
            .map(PathBuf::as_path)
            .ok_or_else(|| BackendError::Unavailable {
                tool: tool.name().to_string(),
                reason: "not installed or not on PATH".to_string(),
            })
    }

    pub fn check_all(&self) -> Vec<ToolInfo> {
        Tool::ALL
            .iter()
            .map(|tool| ToolInfo {
                name: tool.name(),
                available: self.is_available(*tool),
            })
            .collect()
    }
}

fn find_on_path(tool: Tool) -> Option<PathBuf> {
    tool.candidates()
        .iter()
        .find_map(|name| which::which(name).ok())
}
