//! Store introspection
//!
//! Lists the document store's public tables and columns so operators can
//! check the externally built index before pointing traffic at it.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use scripture_qa_common::{db::TableDescription, errors::Result};

#[derive(Serialize)]
pub struct TablesResponse {
    pub documents_table: String,
    pub match_function: String,
    pub count: usize,
    pub tables: Vec<TableDescription>,
}

pub async fn describe_tables(State(state): State<AppState>) -> Result<Json<TablesResponse>> {
    let tables = state.store.describe_tables().await?;

    Ok(Json(TablesResponse {
        documents_table: state.config.database.documents_table.clone(),
        match_function: state.config.database.match_function.clone(),
        count: tables.len(),
        tables,
    }))
}
