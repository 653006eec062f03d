//! Cheap domain-specific remediation that bypasses the fix provider
//!
//! Quick fixes run before any prompt is built or provider contacted. The
//! pipeline is fail-open: a quick fix that errors is logged and skipped,
//! never fatal. The first fix that reports `handled` wins.

use async_trait::async_trait;
use medic_core::Result;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Domain-specific auto-remediation hook
#[async_trait]
pub trait QuickFix: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &str;

    /// Attempt to handle the failure; `Ok(true)` means handled
    async fn try_quick_fix(&self, stderr_tail: &str) -> Result<bool>;
}

/// Ordered, fail-open pipeline of quick fixes
#[derive(Default)]
pub struct QuickFixPipeline {
    fixes: Vec<Box<dyn QuickFix>>,
}

impl QuickFixPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, fix: Box<dyn QuickFix>) {
        self.fixes.push(fix);
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Run fixes in order until one handles the failure
    pub async fn try_all(&self, stderr_tail: &str) -> bool {
        for fix in &self.fixes {
            match fix.try_quick_fix(stderr_tail).await {
                Ok(true) => {
                    info!("Quick fix {:?} handled the failure", fix.name());
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Quick fix {:?} errored (continuing): {}", fix.name(), e);
                }
            }
        }
        false
    }
}

static BAD_INPUT: OnceLock<Regex> = OnceLock::new();

fn bad_input() -> &'static Regex {
    BAD_INPUT.get_or_init(|| {
        Regex::new(r#"(?i)(?:corrupt|truncated|unreadable|failed to (?:load|decode|read))[^"'\n]*["']([^"'\n]+)["']"#)
            .expect("static regex")
    })
}

/// Isolates a malformed input artifact by renaming it out of the input set
///
/// Fires when the failure text names a corrupt/unreadable file under the
/// input directory; the file is renamed with a `.quarantined` suffix so the
/// next run no longer picks it up.
pub struct IsolateBadInputFix {
    input_dir: PathBuf,
}

impl IsolateBadInputFix {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }
}

#[async_trait]
impl QuickFix for IsolateBadInputFix {
    fn name(&self) -> &str {
        "isolate-bad-input"
    }

    async fn try_quick_fix(&self, stderr_tail: &str) -> Result<bool> {
        let Some(caps) = bad_input().captures(stderr_tail) else {
            return Ok(false);
        };
        let referenced = PathBuf::from(&caps[1]);

        let candidate = if referenced.is_absolute() {
            referenced
        } else {
            self.input_dir.join(&referenced)
        };

        // Only touch files inside the input directory, and only real ones.
        if !candidate.starts_with(&self.input_dir) || !candidate.is_file() {
            return Ok(false);
        }

        let mut isolated = candidate.clone().into_os_string();
        isolated.push(".quarantined");
        tokio::fs::rename(&candidate, &isolated).await?;
        info!("Isolated bad input artifact {:?}", candidate);
        Ok(true)
    }
}
