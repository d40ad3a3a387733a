//! The in-process credential store and optional durable mirror backends.

pub mod file;
pub mod memory;

pub use file::FileMirror;
pub use memory::MemoryMirror;

// self
use crate::{_prelude::*, auth::Credentials};

/// Boxed future returned by [`CredentialMirror`] operations.
pub type MirrorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Optional durable reflection of the credential pair.
///
/// The store keeps the authoritative copy in memory; a mirror only has to reproduce the last
/// persisted pair across process restarts. The durable shape is two opaque string values keyed
/// by the fixed names `access_token` and `refresh_token`.
pub trait CredentialMirror
where
	Self: Send + Sync,
{
	/// Persists the provided pair, replacing whatever was mirrored before.
	fn persist(&self, credentials: Credentials) -> MirrorFuture<'_, ()>;

	/// Loads the mirrored pair, if one was persisted.
	fn load(&self) -> MirrorFuture<'_, Option<Credentials>>;

	/// Removes the mirrored pair.
	fn erase(&self) -> MirrorFuture<'_, ()>;
}

/// Error type produced by [`CredentialMirror`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Process-wide holder of the current access/refresh token pair.
///
/// Reads and writes go through a [`RwLock`] so the pair is swapped atomically; a reader never
/// observes a fresh access token next to a stale refresh token. All credential mutation in the
/// crate funnels through this type: login (external), refresh success (the coordinator), and
/// terminal auth failure (the dispatcher).
#[derive(Default)]
pub struct CredentialStore {
	current: RwLock<Credentials>,
	mirror: Option<Arc<dyn CredentialMirror>>,
}
impl CredentialStore {
	/// Creates an empty store with no durable mirror.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an empty store that reflects every mutation into `mirror`.
	pub fn with_mirror(mirror: Arc<dyn CredentialMirror>) -> Self {
		Self { current: RwLock::new(Credentials::empty()), mirror: Some(mirror) }
	}

	/// Pulls the mirrored pair into memory, if the mirror holds one.
	///
	/// Call once at startup when surviving process restarts matters; the in-memory pair stays
	/// untouched when the mirror is empty or absent.
	pub async fn restore(&self) -> Result<(), StoreError> {
		let Some(mirror) = &self.mirror else { return Ok(()) };

		if let Some(credentials) = mirror.load().await? {
			*self.current.write() = credentials;
		}

		Ok(())
	}

	/// Returns a snapshot of the current pair; never blocks on IO.
	pub fn snapshot(&self) -> Credentials {
		self.current.read().clone()
	}

	/// Replaces the pair atomically and reflects it into the mirror when one is attached.
	///
	/// The in-memory swap happens first so concurrent readers pick up the new pair even if the
	/// mirror write fails afterwards.
	pub async fn replace(&self, credentials: Credentials) -> Result<(), StoreError> {
		*self.current.write() = credentials.clone();

		if let Some(mirror) = &self.mirror {
			mirror.persist(credentials).await?;
		}

		Ok(())
	}

	/// Removes both tokens, returning the pair that was held.
	///
	/// The returned value tells the caller whether it was the one that actually emptied the
	/// store; under concurrent terminal failures only the first clearer receives a non-empty
	/// pair, which is what keeps the session-expired signal to a single emission.
	pub async fn clear(&self) -> Result<Credentials, StoreError> {
		let previous = {
			let mut guard = self.current.write();

			std::mem::take(&mut *guard)
		};

		if let Some(mirror) = &self.mirror {
			mirror.erase().await?;
		}

		Ok(previous)
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialStore")
			.field("current", &*self.current.read())
			.field("mirrored", &self.mirror.is_some())
			.finish()
	}
}
