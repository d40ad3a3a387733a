//! Simple file-backed [`CredentialMirror`] for lightweight deployments and bots.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::Credentials,
	store::{CredentialMirror, MirrorFuture, StoreError},
};

/// Persists the credential pair to a JSON file after each mutation.
///
/// Writes go through a temporary sibling file followed by a rename so a crash mid-write never
/// leaves a truncated snapshot behind.
#[derive(Clone, Debug)]
pub struct FileMirror {
	path: PathBuf,
	write_guard: Arc<Mutex<()>>,
}
impl FileMirror {
	/// Creates a mirror at the provided path, creating parent directories on demand.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		Ok(Self { path, write_guard: Arc::new(Mutex::new(())) })
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create mirror directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn load_snapshot(path: &Path) -> Result<Option<Credentials>, StoreError> {
		if !path.exists() {
			return Ok(None);
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(None);
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let credentials: Credentials =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(Some(credentials))
	}

	fn persist_snapshot(&self, credentials: &Credentials) -> Result<(), StoreError> {
		let _write = self.write_guard.lock();

		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(credentials).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize mirror snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn erase_snapshot(&self) -> Result<(), StoreError> {
		let _write = self.write_guard.lock();

		if !self.path.exists() {
			return Ok(());
		}

		fs::remove_file(&self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to remove {}: {e}", self.path.display()),
		})
	}
}
impl CredentialMirror for FileMirror {
	fn persist(&self, credentials: Credentials) -> MirrorFuture<'_, ()> {
		Box::pin(async move { self.persist_snapshot(&credentials) })
	}

	fn load(&self) -> MirrorFuture<'_, Option<Credentials>> {
		Box::pin(async move { Self::load_snapshot(&self.path) })
	}

	fn erase(&self) -> MirrorFuture<'_, ()> {
		Box::pin(async move { self.erase_snapshot() })
	}
}
