//! Query backend for a SoliDB server's SQL endpoint

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{Query, RawResult};
use crate::error::{ShellError, ShellResult};
use crate::session::parse_use_database;

/// Leading keywords of statements that produce rows
const ROW_STATEMENTS: [&str; 7] = ["select", "show", "describe", "desc", "explain", "with", "values"];

#[derive(Debug, Serialize)]
struct SqlRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    result: JsonValue,
    #[serde(default)]
    sdbql: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseList {
    #[serde(default)]
    databases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionSummary {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionList {
    #[serde(default)]
    collections: Vec<CollectionSummary>,
}

pub struct HttpQuery {
    client: Client,
    base_url: String,
    database: String,
    api_key: Option<String>,
}

impl HttpQuery {
    pub fn new(base_url: &str, database: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            database: database.to_string(),
            api_key,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn endpoint(&self) -> String {
        format!("{}/_api/database/{}/sql", self.base_url, self.database)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ShellResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.authorized(self.client.get(url)).send().await?;
        Ok(response.error_for_status()?.json::<T>().await?)
    }
}

#[async_trait(?Send)]
impl Query for HttpQuery {
    async fn execute(&mut self, sql: &str) -> ShellResult<RawResult> {
        if let Some(database) = parse_use_database(sql) {
            self.database = database;
            return Ok(RawResult::affected(0));
        }

        let request = self.client.post(self.endpoint()).json(&SqlRequest { query: sql });
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<SqlResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("{} - {}", status, body));
            return Err(ShellError::QueryFailed(message));
        }

        let parsed: SqlResponse = serde_json::from_str(&body).map_err(|e| {
            ShellError::QueryFailed(format!("Invalid response from server: {}", e))
        })?;
        if let Some(sdbql) = &parsed.sdbql {
            tracing::debug!(%sdbql, "server translation");
        }
        response_to_raw(sql, parsed)
    }

    fn describe(&self) -> String {
        let host = self
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        format!("{}@{}", self.database, host)
    }

    async fn names(&mut self) -> ShellResult<Vec<String>> {
        let databases: DatabaseList = self.get_json("/_api/databases").await?;
        let collections: CollectionList = self
            .get_json(&format!("/_api/database/{}/collection", self.database))
            .await?;
        Ok(completion_names(databases, collections))
    }
}

fn completion_names(databases: DatabaseList, collections: CollectionList) -> Vec<String> {
    let mut names = databases.databases;
    for collection in collections.collections {
        if !names.contains(&collection.name) {
            names.push(collection.name);
        }
    }
    names
}

fn returns_rows(sql: &str) -> bool {
    sql.split_whitespace()
        .next()
        .map(|word| word.trim_start_matches('(').to_ascii_lowercase())
        .is_some_and(|word| ROW_STATEMENTS.contains(&word.as_str()))
}

fn response_to_raw(sql: &str, response: SqlResponse) -> ShellResult<RawResult> {
    if let Some(error) = response.error {
        return Err(ShellError::QueryFailed(error));
    }

    let raw = match response.result {
        JsonValue::Array(documents) if returns_rows(sql) => RawResult::from_documents(documents),
        JsonValue::Array(documents) => RawResult::affected(documents.len() as u64),
        JsonValue::Null => RawResult::affected(0),
        JsonValue::Number(n) if !returns_rows(sql) => RawResult::affected(n.as_u64().unwrap_or(0)),
        other => RawResult::from_documents(vec![other]),
    };
    Ok(raw)
}
