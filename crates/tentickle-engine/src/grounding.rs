//! `GroundingProvider` — "a prompt section derived from workspace or
//! filesystem state, refreshed per execution" (spec glossary). Each
//! provider owns a one-shot mount hook (spec §4.1 `useOnMount`, §9
//! "ordered list of grounding providers, each with its own one-shot init
//! hook") plus a render hook that runs every tick (`useOnTickStart`).

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

/// One grounding section of the rendered prompt payload (spec §4.1 step 1:
/// "a system block, ordered grounding sections, ..."). Providers run in
/// registration order; their output is concatenated into the system
/// prompt ahead of the compacted timeline.
#[async_trait]
pub trait GroundingProvider: Send + Sync {
    /// Stable name, used for logging and ordering diagnostics.
    fn name(&self) -> &str;

    /// Runs exactly once per session lifetime, before the first render
    /// (spec §4.1 `useOnMount`). Any I/O a provider needs happens here —
    /// `render` itself must stay pure.
    async fn mount(&self) {}

    /// Runs at the head of every tick (spec §4.1 `useOnTickStart`).
    /// Default is a no-op; providers with per-tick refresh (e.g. re-reading
    /// a workspace file) override this.
    async fn on_tick_start(&self) {}

    /// Produce this provider's section of the prompt payload. Pure — must
    /// not perform I/O (spec §4.1 step 1: "Rendering is pure").
    fn render(&self) -> Option<String>;
}

/// Grounds the prompt in workspace `.md` files (SOUL/IDENTITY/AGENTS/USER/
/// TOOLS/MEMORY + extras), generalizing the teacher's single-purpose
/// `WorkspaceLoader` into a mountable, re-renderable provider. The loaded
/// text is cached at mount time and refreshed on demand via `reload`
/// (called by a filesystem watcher external to the engine, mirroring the
/// teacher's `PromptBuilder::reload_workspace`).
pub struct WorkspaceFilesGrounding {
    dir: PathBuf,
    cached: Mutex<Option<String>>,
}

impl WorkspaceFilesGrounding {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cached: Mutex::new(None),
        }
    }

    /// Force a re-read from disk outside the mount hook (e.g. in response
    /// to a file-change notification).
    pub fn reload(&self) {
        let content = crate::prompt::WorkspaceLoader::load(&self.dir);
        *self.cached.lock().unwrap() = content;
    }
}

#[async_trait]
impl GroundingProvider for WorkspaceFilesGrounding {
    fn name(&self) -> &str {
        "workspace_files"
    }

    async fn mount(&self) {
        self.reload();
    }

    fn render(&self) -> Option<String> {
        self.cached.lock().unwrap().clone()
    }
}

/// Grounds the prompt in a fixed string, useful for tests and for
/// system-only sections that don't depend on filesystem state.
pub struct StaticGrounding {
    name: String,
    text: String,
}

impl StaticGrounding {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
impl GroundingProvider for StaticGrounding {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self) -> Option<String> {
        if self.text.is_empty() {
            None
        } else {
            Some(self.text.clone())
        }
    }
}

/// Render every provider's section in order, skipping empty ones, joined
/// by a blank line (spec §4.1 step 1 "ordered grounding sections").
pub fn render_all(providers: &[std::sync::Arc<dyn GroundingProvider>]) -> String {
    providers
        .iter()
        .filter_map(|p| p.render())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn workspace_grounding_renders_after_mount() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "be helpful").unwrap();
        let provider = WorkspaceFilesGrounding::new(dir.path());
        assert!(provider.render().is_none());
        provider.mount().await;
        assert!(provider.render().unwrap().contains("be helpful"));
    }

    #[test]
    fn render_all_skips_empty_sections() {
        let providers: Vec<Arc<dyn GroundingProvider>> = vec![
            Arc::new(StaticGrounding::new("a", "section a")),
            Arc::new(StaticGrounding::new("b", "")),
            Arc::new(StaticGrounding::new("c", "section c")),
        ];
        let rendered = render_all(&providers);
        assert_eq!(rendered, "section a\n\nsection c");
    }
}
