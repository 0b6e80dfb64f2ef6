use std::process::ExitCode;
use std::sync::Arc;

use emberbase::core::settings::Settings;
use emberbase_store_adapter_mongodb::StoreAdapterMongo;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.init();

	let settings = Settings::from_env();

	let store_adapter = match StoreAdapterMongo::new(&settings.store_uri).await {
		Ok(adapter) => Arc::new(adapter),
		Err(err) => {
			error!("failed to connect to the document store: {}", err);
			return ExitCode::FAILURE;
		}
	};

	match emberbase::run(emberbase::EmberbaseOpts { store_adapter, settings }).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!("server error: {}", err);
			ExitCode::FAILURE
		}
	}
}

// vim: ts=4
