//! Directory conversion.
//!
//! Walks a source tree, converts every image with a decodable extension
//! against one [`OutputSpec`], and mirrors the tree under the destination:
//!
//! ```text
//! photos/                     out/
//! ├── a.jpg           →       ├── a.webp
//! └── trips/                  └── trips/
//!     └── b.png       →           └── b.webp
//! ```
//!
//! Files are converted in parallel with rayon. All workers share one
//! [`Converter`], so the handle pool caps how many conversions hold a handle
//! at once regardless of the worker count. A failing file is reported and
//! skipped; it does not stop the batch.

use crate::imaging::rust_backend::supported_input_extensions;
use crate::imaging::{Converter, ImageHandle};
use crate::spec::OutputSpec;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not walk source directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("source is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Progress reported while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Converted {
        source: PathBuf,
        output: PathBuf,
        bytes: usize,
    },
    Failed {
        source: PathBuf,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
}

/// Every supported image under `root`, sorted for a stable order.
pub fn collect_sources(root: &Path) -> Result<Vec<PathBuf>, BatchError> {
    if !root.is_dir() {
        return Err(BatchError::NotADirectory(root.to_path_buf()));
    }
    let mut sources = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_file() && is_supported(entry.path()) {
            sources.push(entry.into_path());
        }
    }
    sources.sort();
    Ok(sources)
}

/// Where `source` lands under `dest`.
///
/// The path relative to `root` is kept. The extension changes only when
/// the output spec forces a format.
pub fn output_path(root: &Path, dest: &Path, source: &Path, spec: &OutputSpec) -> PathBuf {
    let relative = source.strip_prefix(root).unwrap_or(source);
    let target = dest.join(relative);
    match spec.compression.extension() {
        Some(ext) => target.with_extension(ext),
        None => target,
    }
}

fn convert_one<H: ImageHandle>(
    converter: &Converter<H>,
    source: &Path,
    output: &Path,
    spec: &OutputSpec,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let blob = std::fs::read(source)?;
    let bytes = converter.apply(&blob, spec)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &bytes)?;
    Ok(bytes.len())
}

/// Convert every supported image under `source` into `dest`.
///
/// Events are sent as each file finishes, in completion order.
pub fn convert_dir<H: ImageHandle>(
    converter: &Converter<H>,
    source: &Path,
    dest: &Path,
    spec: &OutputSpec,
    events: Option<Sender<BatchEvent>>,
) -> Result<BatchSummary, BatchError> {
    let sources = collect_sources(source)?;
    debug!(count = sources.len(), root = %source.display(), "batch sources");
    std::fs::create_dir_all(dest)?;

    let outcomes: Vec<bool> = sources
        .par_iter()
        .map(|path| {
            let output = output_path(source, dest, path, spec);
            let event = match convert_one(converter, path, &output, spec) {
                Ok(bytes) => BatchEvent::Converted {
                    source: path.clone(),
                    output,
                    bytes,
                },
                Err(e) => BatchEvent::Failed {
                    source: path.clone(),
                    error: e.to_string(),
                },
            };
            let ok = matches!(event, BatchEvent::Converted { .. });
            if let Some(tx) = &events {
                // A closed receiver only means nobody is listening.
                let _ = tx.send(event);
            }
            ok
        })
        .collect();

    let converted = outcomes.iter().filter(|ok| **ok).count();
    Ok(BatchSummary {
        converted,
        failed: outcomes.len() - converted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ConvertOptions;
    use crate::imaging::backend::tests::{FailAt, MockHandle};
    use crate::pool::HandlePool;
    use crate::spec::Compression;
    use std::fs;
    use tempfile::TempDir;

    fn converter(proto: MockHandle) -> Converter<MockHandle> {
        let pool = HandlePool::new(2, move || Ok(proto.clone())).unwrap();
        Converter::new(pool, ConvertOptions::default())
    }

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"pixels").unwrap();
    }

    #[test]
    fn collect_sources_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.PNG");
        touch(tmp.path(), "a.jpg");
        touch(tmp.path(), "notes.txt");
        touch(tmp.path(), "nested/c.webp");

        let sources = collect_sources(tmp.path()).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.jpg"),
                PathBuf::from("b.PNG"),
                PathBuf::from("nested/c.webp")
            ]
        );
    }

    #[test]
    fn collect_sources_rejects_file() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.jpg");
        assert!(matches!(
            collect_sources(&tmp.path().join("a.jpg")),
            Err(BatchError::NotADirectory(_))
        ));
    }

    #[test]
    fn output_path_swaps_extension_for_forced_format() {
        let spec = OutputSpec {
            compression: Compression::Webp,
            ..OutputSpec::new(10, 10)
        };
        assert_eq!(
            output_path(Path::new("/in"), Path::new("/out"), Path::new("/in/x/a.jpg"), &spec),
            PathBuf::from("/out/x/a.webp")
        );
    }

    #[test]
    fn output_path_keeps_extension_for_transient() {
        let spec = OutputSpec::new(10, 10);
        assert_eq!(
            output_path(Path::new("/in"), Path::new("/out"), Path::new("/in/a.tiff"), &spec),
            PathBuf::from("/out/a.tiff")
        );
    }

    #[test]
    fn convert_dir_mirrors_tree_and_reports() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        touch(src.path(), "a.jpg");
        touch(src.path(), "deep/b.png");

        let conv = converter(MockHandle::with_source(400, 200));
        let spec = OutputSpec {
            compression: Compression::Png,
            ..OutputSpec::new(100, 100)
        };
        let (tx, rx) = std::sync::mpsc::channel();

        let summary = convert_dir(&conv, src.path(), dest.path(), &spec, Some(tx)).unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                converted: 2,
                failed: 0
            }
        );

        // MockHandle encodes the final dimensions as text.
        assert_eq!(fs::read(dest.path().join("a.png")).unwrap(), b"100x100");
        assert_eq!(fs::read(dest.path().join("deep/b.png")).unwrap(), b"100x100");

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(
            events
                .iter()
                .all(|e| matches!(e, BatchEvent::Converted { bytes: 7, .. }))
        );
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        touch(src.path(), "a.jpg");

        let conv = converter(MockHandle::default().failing_at(FailAt::Encode));
        let summary =
            convert_dir(&conv, src.path(), dest.path(), &OutputSpec::new(10, 10), None).unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                converted: 0,
                failed: 1
            }
        );
        assert!(!dest.path().join("a.jpg").exists());
        assert_eq!(conv.pool().status().idle, 1);
    }
}
