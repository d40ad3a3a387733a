//! Thread-safe in-memory [`CredentialMirror`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::Credentials,
	store::{CredentialMirror, MirrorFuture, StoreError},
};

type MirrorSlot = Arc<RwLock<Option<Credentials>>>;

/// Mirror backend that keeps the pair in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryMirror(MirrorSlot);
impl MemoryMirror {
	fn persist_now(slot: MirrorSlot, credentials: Credentials) -> Result<(), StoreError> {
		*slot.write() = Some(credentials);

		Ok(())
	}

	fn load_now(slot: MirrorSlot) -> Option<Credentials> {
		slot.read().clone()
	}

	fn erase_now(slot: MirrorSlot) -> Result<(), StoreError> {
		*slot.write() = None;

		Ok(())
	}
}
impl CredentialMirror for MemoryMirror {
	fn persist(&self, credentials: Credentials) -> MirrorFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move { Self::persist_now(slot, credentials) })
	}

	fn load(&self) -> MirrorFuture<'_, Option<Credentials>> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(Self::load_now(slot)) })
	}

	fn erase(&self) -> MirrorFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move { Self::erase_now(slot) })
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;

	#[test]
	fn persist_load_erase_cycle() {
		let rt = Runtime::new().expect("Failed to build Tokio runtime for memory mirror test.");
		let mirror = MemoryMirror::default();

		assert_eq!(
			rt.block_on(mirror.load()).expect("Loading an empty mirror should succeed."),
			None,
		);

		rt.block_on(mirror.persist(Credentials::new("access", "refresh")))
			.expect("Persisting to the memory mirror should succeed.");

		let loaded = rt
			.block_on(mirror.load())
			.expect("Loading the memory mirror should succeed.")
			.expect("Mirror should hold the persisted pair.");

		assert_eq!(loaded.access(), Some("access"));

		rt.block_on(mirror.erase()).expect("Erasing the memory mirror should succeed.");

		assert_eq!(
			rt.block_on(mirror.load()).expect("Loading an erased mirror should succeed."),
			None,
		);
	}
}
