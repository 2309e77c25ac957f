//! Collision-safe placement of artifacts and original copies.
//!
//! Layout: `root/{recipient}/{category}/{date}-{subject}[-N].md`, with the
//! original input copied alongside under the same base name and its own
//! extension. Both files are written to a temp file in the target directory
//! and linked into place without replacing anything that already exists.

use crate::collaborators::IndexDocument;
use crate::error::{IngestError, IngestResult};
use chrono::{DateTime, Local, NaiveDate, Utc};
use paperroute_core::{Classification, PlacementResult, ReconciledArtifact};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Extension of the primary artifact.
pub const ARTIFACT_EXTENSION: &str = "md";

const HEADER_FENCE: &str = "---";

/// Structured metadata written at the top of every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub recipient: String,
    pub category: String,
    pub date: NaiveDate,
    pub subject: String,
    pub original_filename: String,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ArtifactHeader {
    /// Render as a front-matter block. Values are JSON-encoded so any
    /// string round-trips.
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER_FENCE);
        out.push('\n');
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(self) {
            for (key, value) in fields {
                out.push_str(&format!("{}: {}\n", key, value));
            }
        }
        out.push_str(HEADER_FENCE);
        out.push_str("\n\n");
        out
    }

    /// Split an artifact into its header and body.
    pub fn parse(text: &str) -> Option<(Self, &str)> {
        let rest = text.strip_prefix(HEADER_FENCE)?.strip_prefix('\n')?;
        let end = rest.find(&format!("\n{}\n", HEADER_FENCE))?;
        let (block, body) = (&rest[..end], &rest[end + HEADER_FENCE.len() + 2..]);

        let mut fields = serde_json::Map::new();
        for line in block.lines() {
            let (key, value) = line.split_once(": ")?;
            fields.insert(key.to_string(), serde_json::from_str(value).ok()?);
        }

        let header = serde_json::from_value(serde_json::Value::Object(fields)).ok()?;
        Some((header, body.strip_prefix('\n').unwrap_or(body)))
    }

    /// Metadata sent to the index alongside the content.
    pub fn to_metadata(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Re-read a placed artifact as an index submission.
pub fn load_index_document(path: &Path) -> IngestResult<IndexDocument> {
    let text = std::fs::read_to_string(path)?;
    let (header, body) = ArtifactHeader::parse(&text).ok_or_else(|| {
        IngestError::MalformedArtifact {
            path: path.to_path_buf(),
            message: "missing or unreadable metadata header".to_string(),
        }
    })?;

    Ok(IndexDocument {
        id: path.to_string_lossy().into_owned(),
        content: body.to_string(),
        metadata: header.to_metadata(),
    })
}

pub struct PlacementEngine {
    root: PathBuf,
    collision_ceiling: u32,
    copy_original: bool,
}

impl PlacementEngine {
    pub fn new(root: impl Into<PathBuf>, collision_ceiling: u32, copy_original: bool) -> Self {
        Self {
            root: root.into(),
            collision_ceiling: collision_ceiling.max(1),
            copy_original,
        }
    }

    pub fn from_config(config: &paperroute_config::Config) -> Self {
        Self::new(
            &config.directories.output,
            config.placement.collision_ceiling,
            config.placement.copy_original,
        )
    }

    /// Write the artifact under a name no existing file uses, then copy the
    /// original beside it. A failed copy is logged and reported as `None`.
    pub fn place(
        &self,
        artifact: &ReconciledArtifact,
        classification: &Classification,
        original: &Path,
    ) -> IngestResult<(PlacementResult, IndexDocument)> {
        let date = placement_date(artifact, original);
        let dir = self
            .root
            .join(&classification.recipient)
            .join(&classification.category);
        std::fs::create_dir_all(&dir)?;

        let header = ArtifactHeader {
            recipient: classification.recipient.clone(),
            category: classification.category.clone(),
            date,
            subject: classification.subject.clone(),
            original_filename: original
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            processed_at: Utc::now(),
            title: artifact.title.clone(),
            language: artifact.language.clone(),
        };
        let contents = format!("{}{}", header.render(), artifact.markdown);

        let original_ext = original
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .filter(|e| e != ARTIFACT_EXTENSION);
        let base = format!("{}-{}", date.format("%Y-%m-%d"), classification.subject);

        let (path, counter) = self.write_free(&dir, &base, original_ext.as_deref(), &contents)?;
        info!(collision_counter = counter, "Placed artifact: {}", path.display());

        let original_copy = match (&original_ext, self.copy_original) {
            (Some(ext), true) => {
                let target = path.with_extension(ext);
                match copy_no_clobber(original, &target) {
                    Ok(()) => Some(target),
                    Err(e) => {
                        warn!("Could not copy original {} to {}: {}", original.display(), target.display(), e);
                        None
                    }
                }
            }
            _ => None,
        };

        let document = IndexDocument {
            id: path.to_string_lossy().into_owned(),
            content: artifact.markdown.clone(),
            metadata: header.to_metadata(),
        };

        Ok((
            PlacementResult {
                path,
                original_copy,
                collision_counter: counter,
            },
            document,
        ))
    }

    /// Try `base.md`, `base-2.md`, ... until one can be claimed. A name is
    /// only free if neither the artifact nor its original sibling exists.
    fn write_free(
        &self,
        dir: &Path,
        base: &str,
        sibling_ext: Option<&str>,
        contents: &str,
    ) -> IngestResult<(PathBuf, u32)> {
        for counter in 1..=self.collision_ceiling {
            let stem = if counter == 1 {
                base.to_string()
            } else {
                format!("{}-{}", base, counter)
            };
            let path = dir.join(format!("{}.{}", stem, ARTIFACT_EXTENSION));
            let sibling_taken = sibling_ext.is_some_and(|ext| path.with_extension(ext).exists());
            if path.exists() || sibling_taken {
                debug!("Name taken: {}", path.display());
                continue;
            }

            let mut temp = NamedTempFile::new_in(dir)?;
            temp.write_all(contents.as_bytes())?;
            temp.as_file().sync_all()?;

            match temp.persist_noclobber(&path) {
                Ok(_) => return Ok((path, counter)),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Lost race for name: {}", path.display());
                    continue;
                }
                Err(e) => return Err(e.error.into()),
            }
        }

        Err(IngestError::PlacementCollisionExhausted {
            path: dir.join(format!("{}.{}", base, ARTIFACT_EXTENSION)),
            ceiling: self.collision_ceiling,
        })
    }
}

/// Reconciled date, else the input's modification date, else today.
fn placement_date(artifact: &ReconciledArtifact, original: &Path) -> NaiveDate {
    if let Some(date) = artifact.document_date {
        return date;
    }
    std::fs::metadata(original)
        .and_then(|m| m.modified())
        .map(|mtime| DateTime::<Local>::from(mtime).date_naive())
        .unwrap_or_else(|_| Local::now().date_naive())
}

fn copy_no_clobber(source: &Path, target: &Path) -> io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
    let mut temp = NamedTempFile::new_in(dir)?;
    let mut input = std::fs::File::open(source)?;
    io::copy(&mut input, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}
