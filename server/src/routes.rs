//! API routes

use axum::{
	Router,
	routing::{get, patch, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::document;
use crate::prelude::*;
use crate::query;
use crate::realtime;
use crate::rules;
use crate::tenancy;
use crate::writes;

pub fn init_routes(app: App) -> Router {
	Router::new()
		// Realtime listen channel
		.route("/v1/listen", get(realtime::websocket::listen_handler))
		// Tenancy metadata + database-scoped operations
		// ({database} may carry an `:operation` suffix)
		.route("/v1/projects/{project}", get(tenancy::handler::get_project))
		.route(
			"/v1/projects/{project}/databases/{database}",
			get(tenancy::handler::get_database_op)
				.post(writes::handler::database_op)
				.put(rules::handler::put_database_op),
		)
		.route(
			"/v1/projects/{project}/databases/{database}/collections/{*path}",
			patch(tenancy::handler::patch_collection_meta),
		)
		// Database-root query scope
		.route(
			"/v1/projects/{project}/databases/{database}/documents:runQuery",
			post(query::handler::run_query_root),
		)
		.route(
			"/v1/projects/{project}/databases/{database}/documents:runAggregationQuery",
			post(query::handler::run_aggregation_root),
		)
		// Documents subtree: CRUD plus suffixed operations
		.route(
			"/v1/projects/{project}/databases/{database}/documents/{*path}",
			get(document::handler::get_or_list)
				.post(document::handler::post_dispatch)
				.patch(document::handler::patch_document)
				.put(document::handler::put_document)
				.delete(document::handler::delete_document),
		)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(app)
}

// vim: ts=4
