//! Manifest discovery.
//!
//! Walks a directory tree and yields the raw contents of every YAML file
//! found in it. Nothing here knows about Kubernetes; the parser decides what
//! the text means.

use std::{
	fs, io,
	path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{instrument, trace};
use walkdir::WalkDir;

use crate::config::CONFIG_FILE_NAME;

/// File extensions treated as manifests, compared case-insensitively.
pub const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml"];

#[derive(Debug, Error)]
pub enum LoadError {
	#[error("manifest directory {} does not exist", .0.display())]
	MissingRoot(PathBuf),

	#[error("manifest path {} is not a directory", .0.display())]
	NotADirectory(PathBuf),

	#[error("walking manifest directory")]
	Walk(#[from] walkdir::Error),

	#[error("reading manifest {}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Raw text of one manifest file.
#[derive(Debug, Clone)]
pub struct RawManifest {
	pub path: PathBuf,
	pub content: String,
}

/// Whether `path` has one of the [`MANIFEST_EXTENSIONS`].
pub fn is_manifest_file(path: &Path) -> bool {
	if path.file_name().is_some_and(|n| n == CONFIG_FILE_NAME) {
		return false;
	}
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| {
			MANIFEST_EXTENSIONS
				.iter()
				.any(|known| ext.eq_ignore_ascii_case(known))
		})
}

/// Lazily load every manifest file below `root`.
///
/// The root itself is checked eagerly so a typo in the path fails before any
/// work is done. Files are read one at a time as the iterator advances;
/// entries are sorted by file name within each directory so repeated runs
/// see the same order.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn load(root: &Path) -> Result<impl Iterator<Item = Result<RawManifest, LoadError>>, LoadError> {
	if !root.exists() {
		return Err(LoadError::MissingRoot(root.to_path_buf()));
	}
	if !root.is_dir() {
		return Err(LoadError::NotADirectory(root.to_path_buf()));
	}

	let walker = WalkDir::new(root).sort_by_file_name().into_iter();

	Ok(walker.filter_map(|entry| {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => return Some(Err(LoadError::Walk(e))),
		};
		if !entry.file_type().is_file() || !is_manifest_file(entry.path()) {
			return None;
		}

		let path = entry.into_path();
		trace!(path = %path.display(), "reading manifest");
		Some(
			fs::read_to_string(&path)
				.map(|content| RawManifest {
					path: path.clone(),
					content,
				})
				.map_err(|source| LoadError::Read { path, source }),
		)
	}))
}
