//! Errors returned by the [`Kubernetes`](crate::Kubernetes) engine.

use std::time::Duration;

use thiserror::Error;

use crate::{client::ClientError, confirm::ConfirmError, diffstat::DiffstatError};

#[derive(Debug, Error)]
pub enum Error {
	#[error("creating client")]
	ClientUnavailable(#[source] ClientError),

	#[error("obtaining cluster info")]
	InfoUnavailable(#[source] ClientError),

	#[error("diff strategy `{0}` does not exist")]
	UnknownStrategy(String),

	#[error("getting orphans of kind '{category}'")]
	CategoryQueryFailed {
		category: String,
		#[source]
		source: ClientError,
	},

	#[error("aborted by user")]
	NotConfirmed,

	#[error("orphan detection did not finish within {0:?}")]
	Timeout(Duration),

	#[error("computing diff")]
	Diff(#[source] ClientError),

	#[error("applying resources")]
	Apply(#[source] ClientError),

	#[error("summarizing diff")]
	Summarize(#[from] DiffstatError),

	#[error("orphan query task panicked")]
	TaskPanicked(#[source] tokio::task::JoinError),

	#[error("asking for confirmation")]
	Confirm(#[source] ConfirmError),
}

impl From<ConfirmError> for Error {
	fn from(err: ConfirmError) -> Self {
		match err {
			ConfirmError::NotConfirmed => Error::NotConfirmed,
			err => Error::Confirm(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::error::Error as _;

	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_category_failure_names_kind() {
		let err = Error::CategoryQueryFailed {
			category: "Secret".to_string(),
			source: ClientError::UnknownKind("Secret".to_string()),
		};

		assert_eq!(err.to_string(), "getting orphans of kind 'Secret'");
		assert!(err.source().is_some());
	}

	#[test]
	fn test_from_confirm_error() {
		assert_matches!(Error::from(ConfirmError::NotConfirmed), Error::NotConfirmed);
		assert_matches!(
			Error::from(ConfirmError::Io(std::io::ErrorKind::UnexpectedEof.into())),
			Error::Confirm(ConfirmError::Io(_))
		);
	}
}
