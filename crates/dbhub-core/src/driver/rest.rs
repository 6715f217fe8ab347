//! Relational database reached through a PostgREST-style HTTP API.
//!
//! Tables are exposed at `{url}/rest/v1/{table}`. Structure is read from
//! the OpenAPI document served at the API root; DDL runs through the
//! `exec_sql` remote procedure and the schema version is kept in the
//! `_schema_meta` table.

use super::filter::Matcher;
use super::{
    ensure_id, stamp_created, stamp_updated, AlterColumn, BackendDriver, BackendFamily,
    BatchOutcome, ConfigExt, ConflictPolicy, ConnectionConfig, DriverError, DriverResult, Filters,
    Record, ID_FIELD,
};
use crate::schema::{types, ColumnDef, IndexDef, RelationDef, SchemaDefinition, TableDef};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use semver::Version;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

/// Path prefix of the REST API.
pub const REST_PREFIX: &str = "/rest/v1";
/// Table holding the recorded schema version.
pub const META_TABLE: &str = "_schema_meta";
const VERSION_KEY: &str = "schema_version";

#[derive(Clone)]
struct RestClient {
    http: Client,
    base: String,
}

impl RestClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}/{}", self.base, path))
    }
}

/// Driver for a PostgREST-style endpoint.
pub struct RestDriver {
    config: ConnectionConfig,
    default_timeout: Duration,
    client: RwLock<Option<RestClient>>,
}

impl RestDriver {
    /// Create a disconnected driver.
    pub fn new(config: ConnectionConfig, default_timeout: Duration) -> Self {
        Self {
            config,
            default_timeout,
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> DriverResult<RestClient> {
        self.client.read().clone().ok_or(DriverError::NotConnected)
    }

    fn build_client(&self) -> DriverResult<RestClient> {
        let url = self.config.required_str("url")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DriverError::invalid("url", "expected an http(s) URL"));
        }
        let timeout = self
            .config
            .optional_u64("timeoutSecs")?
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut headers = HeaderMap::new();
        if let Some(key) = self.config.optional_str("apiKey")? {
            let value = HeaderValue::from_str(key)
                .map_err(|_| DriverError::invalid("apiKey", "not a valid header value"))?;
            headers.insert("apikey", value);
            let bearer = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| DriverError::invalid("apiKey", "not a valid header value"))?;
            headers.insert(AUTHORIZATION, bearer);
        }

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(RestClient {
            http,
            base: format!("{}{}", url.trim_end_matches('/'), REST_PREFIX),
        })
    }

    async fn exec_sql(&self, sql: &str) -> DriverResult<()> {
        let client = self.client()?;
        let statement = format!("{};\nNOTIFY pgrst, 'reload schema'", sql.trim_end_matches(';'));
        let response = client
            .request(Method::POST, "rpc/exec_sql")
            .json(&json!({ "query": statement }))
            .send()
            .await?;
        check(response, None).await?;
        tracing::debug!(sql, "Executed statement");
        Ok(())
    }

    async fn fetch_openapi(&self, client: &RestClient) -> DriverResult<Value> {
        let response = client.request(Method::GET, "").send().await?;
        Ok(check(response, None).await?.json().await?)
    }

    async fn fetch_indexes(&self, client: &RestClient) -> Vec<IndexDef> {
        let response = match client
            .request(Method::POST, "rpc/list_indexes")
            .json(&json!({}))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            _ => return Vec::new(),
        };
        let rows: Vec<Value> = response.json().await.unwrap_or_default();
        rows.iter()
            .filter_map(|row| {
                let table = row.get("table")?.as_str()?;
                let columns = row
                    .get("columns")?
                    .as_array()?
                    .iter()
                    .filter_map(|c| c.as_str())
                    .collect::<Vec<_>>();
                let index = IndexDef::new(table, columns);
                Some(if row.get("unique").and_then(Value::as_bool).unwrap_or(false) {
                    index.unique()
                } else {
                    index
                })
            })
            .filter(|i| !i.table.starts_with('_'))
            .collect()
    }

    fn with_conditions(request: RequestBuilder, filters: &Filters) -> RequestBuilder {
        let params: Vec<(String, String)> = filters
            .conditions()
            .iter()
            .map(|(field, matcher)| (field.clone(), condition(matcher)))
            .collect();
        request.query(&params)
    }
}

/// PostgREST operator for a matcher.
fn condition(matcher: &Matcher) -> String {
    match matcher {
        Matcher::Equals(Value::Null) => "is.null".to_string(),
        Matcher::Equals(value) => format!("eq.{}", scalar(value)),
        Matcher::Pattern { raw, .. } => format!("ilike.{}", raw.replace('%', "*")),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eq_id(id: &str) -> [(&'static str, String); 1] {
    [(ID_FIELD, format!("eq.{}", id))]
}

/// Map an error status to a driver error.
async fn check(response: Response, table: Option<&str>) -> DriverResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => match table {
            Some(table) => DriverError::TableNotFound(table.to_string()),
            None => DriverError::Backend(format!("{}: {}", status, body)),
        },
        StatusCode::CONFLICT => DriverError::Duplicate {
            collection: table.unwrap_or_default().to_string(),
            id: duplicate_key(&body).unwrap_or_default(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DriverError::Connection(format!("access denied ({})", status))
        }
        _ => DriverError::Backend(format!("{}: {}", status, body)),
    })
}

/// Pull the conflicting key out of a PostgreSQL unique-violation detail.
fn duplicate_key(body: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"Key \([^)]*\)=\(([^)]*)\)").ok())
        .as_ref()?;
    pattern
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn first_record(rows: Vec<Record>) -> Option<Record> {
    rows.into_iter().next()
}

/// Total from a `Content-Range` header such as `0-24/250` or `*/0`.
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("content-range")?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .parse()
        .ok()
}

/// Column type vocabulary from an OpenAPI property.
fn column_type(property: &Value) -> &'static str {
    let format = property.get("format").and_then(Value::as_str).unwrap_or("");
    match format {
        "integer" | "bigint" | "smallint" => types::INTEGER,
        "numeric" | "double precision" | "real" => types::NUMBER,
        "boolean" => types::BOOLEAN,
        "json" | "jsonb" => types::JSON,
        f if f.starts_with("timestamp") || f == "date" => types::TIMESTAMP,
        _ => match property.get("type").and_then(Value::as_str) {
            Some("integer") => types::INTEGER,
            Some("number") => types::NUMBER,
            Some("boolean") => types::BOOLEAN,
            Some("object") | Some("array") => types::JSON,
            _ => types::STRING,
        },
    }
}

/// SQL type for a column type.
fn sql_type(data_type: &str) -> &'static str {
    match data_type {
        types::INTEGER => "bigint",
        types::NUMBER => "double precision",
        types::BOOLEAN => "boolean",
        types::TIMESTAMP => "timestamptz",
        types::JSON => "jsonb",
        _ => "text",
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'::jsonb", other.to_string().replace('\'', "''")),
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote(&column.name), sql_type(&column.data_type));
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else {
        if column.required {
            sql.push_str(" NOT NULL");
        }
        if column.unique {
            sql.push_str(" UNIQUE");
        }
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT {}", sql_literal(default)));
    }
    sql
}

/// `CREATE TABLE` statement for a table definition.
pub fn create_table_sql(table: &TableDef) -> String {
    let columns = table
        .columns
        .iter()
        .map(column_sql)
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote(&table.name), columns)
}

/// Parse OpenAPI definitions into tables and relations.
fn parse_definitions(doc: &Value) -> (Vec<TableDef>, Vec<RelationDef>) {
    static FK: OnceLock<Option<Regex>> = OnceLock::new();
    let fk = FK
        .get_or_init(|| Regex::new(r#"<fk table='([^']+)' column='([^']+)'/>"#).ok())
        .as_ref();

    let mut tables = Vec::new();
    let mut relations = Vec::new();
    let Some(definitions) = doc.get("definitions").and_then(Value::as_object) else {
        return (tables, relations);
    };

    for (name, definition) in definitions {
        if name.starts_with('_') {
            continue;
        }
        let required: Vec<&str> = definition
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut table = TableDef::new(name.clone());
        if let Some(properties) = definition.get("properties").and_then(Value::as_object) {
            for (column_name, property) in properties {
                let description = property
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let mut column = ColumnDef::new(column_name.clone(), column_type(property));
                if description.contains("<pk/>") {
                    column = column.primary_key();
                } else if required.contains(&column_name.as_str()) {
                    column = column.required();
                }
                if let Some(caps) = fk.and_then(|re| re.captures(description)) {
                    relations.push(RelationDef::new(
                        name.clone(),
                        column_name.clone(),
                        &caps[1],
                        &caps[2],
                    ));
                }
                table = table.with_column(column);
            }
        }
        tables.push(table);
    }
    (tables, relations)
}

#[async_trait]
impl BackendDriver for RestDriver {
    fn family(&self) -> BackendFamily {
        BackendFamily::RelationalHttp
    }

    async fn connect(&self) -> DriverResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let client = self.build_client()?;
        let response = client
            .request(Method::GET, "")
            .send()
            .await
            .map_err(|e| DriverError::Connection(format!("{} unreachable: {}", client.base, e)))?;
        check(response, None).await?;
        tracing::debug!(base = %client.base, "Connected to REST endpoint");
        *self.client.write() = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.client.write().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    async fn create(&self, collection: &str, mut record: Record) -> DriverResult<Record> {
        let client = self.client()?;
        ensure_id(&mut record);
        stamp_created(&mut record);
        let response = client
            .request(Method::POST, collection)
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await?;
        let rows: Vec<Record> = check(response, Some(collection)).await?.json().await?;
        Ok(first_record(rows).unwrap_or(record))
    }

    async fn read(&self, collection: &str, id: Option<&str>) -> DriverResult<Value> {
        let client = self.client()?;
        let mut request = client.request(Method::GET, collection);
        if let Some(id) = id {
            request = request.query(&eq_id(id));
        }
        let rows: Vec<Record> = check(request.send().await?, Some(collection))
            .await?
            .json()
            .await?;
        match id {
            Some(_) => Ok(first_record(rows).map(Value::Object).unwrap_or(Value::Null)),
            None => {
                let rows = rows.into_iter().map(Value::Object).collect();
                let mut wrapped = Record::new();
                wrapped.insert(collection.to_string(), Value::Array(rows));
                Ok(Value::Object(wrapped))
            }
        }
    }

    async fn update(&self, collection: &str, id: &str, mut patch: Record) -> DriverResult<Record> {
        let client = self.client()?;
        patch.remove(ID_FIELD);
        stamp_updated(&mut patch);
        let response = client
            .request(Method::PATCH, collection)
            .query(&eq_id(id))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let rows: Vec<Record> = check(response, Some(collection)).await?.json().await?;
        first_record(rows).ok_or_else(|| DriverError::RecordNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> DriverResult<bool> {
        let client = self.client()?;
        let response = client
            .request(Method::DELETE, collection)
            .query(&eq_id(id))
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows: Vec<Record> = check(response, Some(collection)).await?.json().await?;
        Ok(!rows.is_empty())
    }

    async fn query(&self, collection: &str, filters: &Filters) -> DriverResult<Vec<Record>> {
        let client = self.client()?;
        let mut request = Self::with_conditions(client.request(Method::GET, collection), filters);
        if let Some(order) = &filters.order_by {
            let direction = if order.descending { "desc" } else { "asc" };
            request = request.query(&[("order", format!("{}.{}", order.field, direction))]);
        }
        if let Some(limit) = filters.limit {
            request = request.query(&[("limit", limit)]);
        }
        if let Some(offset) = filters.offset {
            request = request.query(&[("offset", offset)]);
        }
        Ok(check(request.send().await?, Some(collection))
            .await?
            .json()
            .await?)
    }

    async fn count(&self, collection: &str, filters: &Filters) -> DriverResult<u64> {
        let client = self.client()?;
        let request = Self::with_conditions(client.request(Method::GET, collection), filters)
            .query(&[("select", ID_FIELD), ("limit", "1")])
            .header("Prefer", "count=exact");
        let response = check(request.send().await?, Some(collection)).await?;
        content_range_total(&response)
            .ok_or_else(|| DriverError::Backend("response carries no count".to_string()))
    }

    /// Pages are ordered by id; PostgREST guarantees no row order otherwise.
    async fn find_many(
        &self,
        collection: &str,
        limit: usize,
        offset: usize,
    ) -> DriverResult<Vec<Record>> {
        let client = self.client()?;
        let request = client.request(Method::GET, collection).query(&[
            ("order", format!("{}.asc", ID_FIELD)),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]);
        Ok(check(request.send().await?, Some(collection))
            .await?
            .json()
            .await?)
    }

    async fn insert_batch(
        &self,
        collection: &str,
        mut records: Vec<Record>,
        on_conflict: ConflictPolicy,
    ) -> DriverResult<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let client = self.client()?;
        for record in &mut records {
            ensure_id(record);
            stamp_created(record);
        }
        let total = records.len() as u64;

        let prefer = match on_conflict {
            ConflictPolicy::Fail => "return=minimal",
            ConflictPolicy::Skip => "resolution=ignore-duplicates,return=representation",
        };
        let response = client
            .request(Method::POST, collection)
            .header("Prefer", prefer)
            .json(&records)
            .send()
            .await?;
        let response = check(response, Some(collection)).await?;

        match on_conflict {
            ConflictPolicy::Fail => Ok(BatchOutcome {
                inserted: total,
                duplicates: 0,
            }),
            ConflictPolicy::Skip => {
                let rows: Vec<Value> = response.json().await?;
                let inserted = rows.len() as u64;
                Ok(BatchOutcome {
                    inserted,
                    duplicates: total.saturating_sub(inserted),
                })
            }
        }
    }

    async fn truncate_table(&self, collection: &str) -> DriverResult<u64> {
        let removed = self.count(collection, &Filters::new()).await?;
        let client = self.client()?;
        let response = client
            .request(Method::DELETE, collection)
            .query(&[(ID_FIELD, "not.is.null")])
            .send()
            .await?;
        check(response, Some(collection)).await?;
        Ok(removed)
    }

    async fn introspect(&self) -> DriverResult<SchemaDefinition> {
        let client = self.client()?;
        let doc = self.fetch_openapi(&client).await?;
        let (tables, relations) = parse_definitions(&doc);
        let version = self
            .recorded_version()
            .await?
            .unwrap_or_else(|| Version::new(0, 0, 0));

        let mut schema = SchemaDefinition::new(version);
        schema.tables = tables;
        schema.relations = relations;
        schema.indexes = self.fetch_indexes(&client).await;
        Ok(schema)
    }

    async fn create_table(&self, table: &TableDef) -> DriverResult<()> {
        self.exec_sql(&create_table_sql(table)).await
    }

    async fn drop_table(&self, table: &str) -> DriverResult<()> {
        self.exec_sql(&format!("DROP TABLE {}", quote(table))).await
    }

    async fn alter_table(&self, table: &str, change: &AlterColumn) -> DriverResult<()> {
        let sql = match change {
            AlterColumn::Add(column) => format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                quote(table),
                column_sql(column)
            ),
            AlterColumn::Modify(column) => {
                let ty = sql_type(&column.data_type);
                format!(
                    "ALTER TABLE {t} ALTER COLUMN {c} TYPE {ty} USING {c}::{ty}",
                    t = quote(table),
                    c = quote(&column.name),
                    ty = ty
                )
            }
            AlterColumn::Drop { name } => format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
                quote(table),
                quote(name)
            ),
        };
        self.exec_sql(&sql).await
    }

    async fn create_index(&self, index: &IndexDef) -> DriverResult<()> {
        let columns = index
            .columns
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let unique = if index.unique { "UNIQUE " } else { "" };
        self.exec_sql(&format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            unique,
            quote(&index.name()),
            quote(&index.table),
            columns
        ))
        .await
    }

    async fn create_relation(&self, relation: &RelationDef) -> DriverResult<()> {
        self.exec_sql(&format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            quote(&relation.table),
            quote(&relation.name()),
            quote(&relation.column),
            quote(&relation.references_table),
            quote(&relation.references_column),
            relation.on_delete.as_sql()
        ))
        .await
    }

    async fn execute_statement(&self, statement: &str) -> DriverResult<u64> {
        self.exec_sql(statement).await?;
        Ok(0)
    }

    async fn recorded_version(&self) -> DriverResult<Option<Version>> {
        let client = self.client()?;
        let response = client
            .request(Method::GET, META_TABLE)
            .query(&eq_id(VERSION_KEY))
            .send()
            .await?;
        let rows: Vec<Record> = match check(response, Some(META_TABLE)).await {
            Ok(response) => response.json().await?,
            Err(e) if e.is_missing_table() => return Ok(None),
            Err(e) => return Err(e),
        };
        first_record(rows)
            .and_then(|row| row.get("value").and_then(Value::as_str).map(str::to_string))
            .map(|v| {
                Version::parse(&v).map_err(|e| DriverError::Backend(format!("bad version '{}': {}", v, e)))
            })
            .transpose()
    }

    async fn record_version(&self, version: &Version) -> DriverResult<()> {
        self.exec_sql(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id text PRIMARY KEY, value text NOT NULL)",
            quote(META_TABLE)
        ))
        .await?;
        let client = self.client()?;
        let response = client
            .request(Method::POST, META_TABLE)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!([{ "id": VERSION_KEY, "value": version.to_string() }]))
            .send()
            .await?;
        check(response, Some(META_TABLE)).await?;
        Ok(())
    }
}
