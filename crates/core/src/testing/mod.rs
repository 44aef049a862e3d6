//! Testing utilities: a scriptable backend and request fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use convertly_core::testing::{fixtures, MockBackend, MockBehavior};
//!
//! let backend = MockBackend::new(JobKind::ZipPack, MockBehavior::NonZeroExit("boom".into()));
//! let dir = tempfile::TempDir::new()?;
//! let config = fixtures::config_in(dir.path());
//! let orchestrator = fixtures::orchestrator_from(&config, vec![Arc::new(backend.clone())]);
//! let report = orchestrator.run(fixtures::zip_request(&["a.txt"])).await;
//! assert!(report.outcome.is_err());
//! ```

mod mock_backend;

pub use mock_backend::{MockBackend, MockBehavior};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;
    use std::sync::Arc;

    use crate::backend::{Backend, BackendInvoker, ToolRegistry};
    use crate::config::{load_config_from_str, Config};
    use crate::job::{ConversionRequest, JobKind};
    use crate::orchestrator::Orchestrator;
    use crate::store::TempStore;

    /// Config with storage rooted in `root` and auth disabled.
    pub fn config_in(root: &Path) -> Config {
        let mut config = load_config_from_str("[auth]\nmethod = \"none\"\n")
            .unwrap_or_else(|e| panic!("fixture config must parse: {e}"));
        config.storage.scratch_dir = root.join("scratch");
        config.storage.public_dir = root.join("public");
        config
    }

    /// An orchestrator over `backends` only. No tools are discovered.
    pub fn orchestrator_from(config: &Config, backends: Vec<Arc<dyn Backend>>) -> Orchestrator {
        orchestrator_with_tools(config, Arc::new(ToolRegistry::empty()), backends)
    }

    pub fn orchestrator_with_tools(
        config: &Config,
        tools: Arc<ToolRegistry>,
        backends: Vec<Arc<dyn Backend>>,
    ) -> Orchestrator {
        let mut invoker = BackendInvoker::new(tools);
        for backend in backends {
            invoker.register(backend);
        }
        Orchestrator::new(config, TempStore::new(config.storage.clone()), Arc::new(invoker))
    }

    /// Files left anywhere under the scratch root.
    pub fn scratch_files(config: &Config) -> usize {
        count_files(&config.storage.scratch_dir)
    }

    /// Files in the public directory.
    pub fn public_files(config: &Config) -> usize {
        count_files(&config.storage.public_dir)
    }

    fn count_files(root: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(root) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    count_files(&path)
                } else {
                    1
                }
            })
            .sum()
    }

    pub fn zip_request(names: &[&str]) -> ConversionRequest {
        names.iter().fold(ConversionRequest::new(JobKind::ZipPack), |req, name| {
            req.with_file(*name, format!("contents of {}", name).into_bytes())
        })
    }

    /// A small valid PNG.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([30, 144, 255, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap_or_else(|e| panic!("png fixture: {e}"));
        out.into_inner()
    }
}
