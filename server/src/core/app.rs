//! App state type

use std::sync::Arc;

use crate::core::settings::Settings;
use crate::realtime::RealtimeBus;
use crate::rules::RulesService;
use crate::store_adapter::StoreAdapter;
use crate::tenancy::Catalog;
use crate::writes::txn::TransactionManager;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub store_adapter: Arc<dyn StoreAdapter>,
	pub catalog: Catalog,
	pub bus: RealtimeBus,
	pub rules: RulesService,
	pub transactions: TransactionManager,
	pub settings: Settings,
}

pub type App = Arc<AppState>;

impl AppState {
	pub fn build(store_adapter: Arc<dyn StoreAdapter>, settings: Settings) -> App {
		let catalog = Catalog::new(
			Arc::clone(&store_adapter),
			settings.naming_strategy,
			settings.strict_mode,
		);
		let rules = RulesService::new(Arc::clone(&store_adapter));
		Arc::new(AppState {
			store_adapter,
			catalog,
			bus: RealtimeBus::new(),
			rules,
			transactions: TransactionManager::new(),
			settings,
		})
	}
}

// vim: ts=4
