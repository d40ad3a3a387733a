//! Rust's drop-in authenticated HTTP client core: bearer injection, singleflight refresh
//! coalescing, and retry-once dispatch in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod obs;
pub mod refresh;
pub mod store;
pub mod transport;

mod _prelude {
	pub use std::{
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{
		Client as ReqwestClient, ClientBuilder as ReqwestClientBuilder, Error as ReqwestError,
	};
	pub use serde::{Deserialize, Serialize, de::DeserializeOwned};
	pub use thiserror::Error as ThisError;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
