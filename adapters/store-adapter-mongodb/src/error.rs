//! MongoDB error classification.

use emberbase::error::Error;
use tracing::warn;

/// Map a driver error onto the engine taxonomy: transient transaction
/// conflicts become `Aborted` (retryable), duplicate keys become
/// `AlreadyExists`, everything else is a backend failure.
pub fn from_mongo_error(err: mongodb::error::Error) -> Error {
	if err.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) {
		return Error::Aborted(format!("transient transaction error: {}", err));
	}
	if is_duplicate_key(&err) {
		return Error::AlreadyExists("document already exists".into());
	}
	warn!("mongodb error: {}", err);
	Error::Store(err.to_string())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
	use mongodb::error::{ErrorKind, WriteFailure};

	const DUPLICATE_KEY: i32 = 11000;
	match &*err.kind {
		ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
			write_error.code == DUPLICATE_KEY
		}
		_ => false,
	}
}

// vim: ts=4
