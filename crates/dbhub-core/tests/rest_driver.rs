//! Integration tests for the PostgREST-style driver against an in-process mock.

#![cfg(feature = "rest")]

mod common;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use common::{config, record, TestContext};
use dbhub_core::driver::{BackendDriver, ConflictPolicy, DriverError, Filters, RestDriver};
use dbhub_core::{
    BackendFamily, DatabaseStatus, Error, JobStatus, NoProgress, TableMapping, TransferOptions,
};
use parking_lot::Mutex;
use semver::Version;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockDb {
    tables: BTreeMap<String, Vec<Value>>,
    statements: Vec<String>,
    api_keys: Vec<String>,
    /// `order` parameter of every paginated read.
    page_orders: Vec<String>,
}

type Shared = Arc<Mutex<MockDb>>;

struct MockServer {
    url: String,
    db: Shared,
}

impl MockServer {
    async fn start() -> Self {
        let db: Shared = Arc::default();
        let app = Router::new()
            .route("/rest/v1/", get(openapi))
            .route("/rest/v1/rpc/exec_sql", post(exec_sql))
            .route("/rest/v1/rpc/list_indexes", post(|| async { Json(json!([])) }))
            .route("/rest/v1/:table", any(table))
            .with_state(Arc::clone(&db));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            db,
        }
    }

    fn create_table(&self, name: &str, rows: Vec<Value>) {
        self.db.lock().tables.insert(name.to_string(), rows);
    }

    fn driver(&self) -> RestDriver {
        RestDriver::new(config(json!({"url": self.url})), Duration::from_secs(5))
    }
}

async fn openapi(State(db): State<Shared>, headers: HeaderMap) -> Json<Value> {
    let mut db = db.lock();
    if let Some(key) = headers.get("apikey").and_then(|v| v.to_str().ok()) {
        db.api_keys.push(key.to_string());
    }
    let definitions: serde_json::Map<String, Value> = db
        .tables
        .keys()
        .filter(|name| !name.starts_with('_'))
        .map(|name| {
            (
                name.clone(),
                json!({
                    "required": ["id"],
                    "properties": {
                        "id": {"format": "text", "type": "string", "description": "Note:\nThis is a Primary Key.<pk/>"},
                        "name": {"format": "text", "type": "string"}
                    }
                }),
            )
        })
        .collect();
    Json(json!({ "definitions": definitions }))
}

async fn exec_sql(State(db): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    let query = body["query"].as_str().unwrap_or_default().to_string();
    let mut db = db.lock();
    if let Some(rest) = query.strip_prefix("CREATE TABLE IF NOT EXISTS \"") {
        if let Some(end) = rest.find('"') {
            db.tables.entry(rest[..end].to_string()).or_default();
        }
    }
    db.statements.push(query);
    StatusCode::OK
}

fn matches(row: &Value, params: &[(String, String)]) -> bool {
    params.iter().all(|(field, condition)| {
        if ["select", "limit", "offset", "order"].contains(&field.as_str()) {
            return true;
        }
        let value = row.get(field).unwrap_or(&Value::Null);
        match condition.as_str() {
            "is.null" => value.is_null(),
            "not.is.null" => !value.is_null(),
            c => match c.strip_prefix("eq.") {
                Some(expected) => match value {
                    Value::String(s) => s == expected,
                    other => other.to_string() == expected,
                },
                None => true,
            },
        }
    })
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

async fn table(
    State(db): State<Shared>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let prefer = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mut db = db.lock();
    if method == Method::GET && param(&params, "offset").is_some() {
        match param(&params, "order") {
            Some(order) => db.page_orders.push(order.to_string()),
            None => {
                return (StatusCode::BAD_REQUEST, Json(json!({"message": "offset without order"})))
                    .into_response()
            }
        }
    }
    let Some(rows) = db.tables.get_mut(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "relation does not exist"}))).into_response();
    };

    match method {
        Method::GET => {
            let mut selected: Vec<Value> = rows.iter().filter(|r| matches(r, &params)).cloned().collect();
            let total = selected.len();
            if let Some(order) = param(&params, "order") {
                let (field, direction) = order.split_once('.').unwrap_or((order, "asc"));
                selected.sort_by_key(|r| r.get(field).map(|v| v.to_string()).unwrap_or_default());
                if direction == "desc" {
                    selected.reverse();
                }
            }
            let offset = param(&params, "offset").and_then(|v| v.parse().ok()).unwrap_or(0);
            let limit = param(&params, "limit").and_then(|v| v.parse().ok()).unwrap_or(usize::MAX);
            let page: Vec<Value> = selected.into_iter().skip(offset).take(limit).collect();
            let mut response = Json(Value::Array(page)).into_response();
            if prefer.contains("count=exact") {
                response
                    .headers_mut()
                    .insert("content-range", format!("0-0/{}", total).parse().unwrap());
            }
            response
        }
        Method::POST => {
            let incoming = match serde_json::from_slice::<Value>(&body).unwrap() {
                Value::Array(items) => items,
                item => vec![item],
            };
            let mut inserted = Vec::new();
            for item in incoming {
                let existing = rows.iter().position(|r| r["id"] == item["id"]);
                match existing {
                    Some(_) if prefer.contains("ignore-duplicates") => continue,
                    Some(index) if prefer.contains("merge-duplicates") => rows[index] = item.clone(),
                    Some(_) => {
                        let detail = format!("Key (id)=({}) already exists.", item["id"].as_str().unwrap_or_default());
                        return (StatusCode::CONFLICT, Json(json!({"code": "23505", "details": detail})))
                            .into_response();
                    }
                    None => rows.push(item.clone()),
                }
                inserted.push(item);
            }
            if prefer.contains("return=representation") {
                (StatusCode::CREATED, Json(Value::Array(inserted))).into_response()
            } else {
                StatusCode::CREATED.into_response()
            }
        }
        Method::PATCH => {
            let patch: Value = serde_json::from_slice(&body).unwrap();
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|r| matches(r, &params)) {
                if let (Some(row), Some(patch)) = (row.as_object_mut(), patch.as_object()) {
                    for (k, v) in patch {
                        row.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
            Json(Value::Array(updated)).into_response()
        }
        Method::DELETE => {
            let (removed, kept): (Vec<Value>, Vec<Value>) =
                rows.drain(..).partition(|r| matches(r, &params));
            *rows = kept;
            Json(Value::Array(removed)).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

#[tokio::test]
async fn test_connect_sends_api_key() {
    let server = MockServer::start().await;
    let driver = RestDriver::new(
        config(json!({"url": format!("{}/", server.url), "apiKey": "secret"})),
        Duration::from_secs(5),
    );
    driver.connect().await.unwrap();
    assert!(driver.is_connected());
    assert_eq!(server.db.lock().api_keys, vec!["secret".to_string()]);

    driver.disconnect().await.unwrap();
    assert!(!driver.is_connected());
    assert!(matches!(
        driver.count("customers", &Filters::new()).await,
        Err(DriverError::NotConnected)
    ));
}

#[tokio::test]
async fn test_crud_round_trip() {
    let server = MockServer::start().await;
    server.create_table("customers", Vec::new());
    let driver = server.driver();
    driver.connect().await.unwrap();

    let created = driver
        .create("customers", record(json!({"id": "c1", "name": "Ada", "vip": true})))
        .await
        .unwrap();
    assert!(created.contains_key("createdAt"));
    driver
        .create("customers", record(json!({"id": "c2", "name": "Alan", "vip": false})))
        .await
        .unwrap();

    let ada = driver.read("customers", Some("c1")).await.unwrap();
    assert_eq!(ada["name"], json!("Ada"));
    assert_eq!(driver.read("customers", Some("nobody")).await.unwrap(), Value::Null);

    let updated = driver
        .update("customers", "c1", record(json!({"name": "Ada L."})))
        .await
        .unwrap();
    assert_eq!(updated["name"], json!("Ada L."));
    assert!(updated.contains_key("updatedAt"));

    let vips = Filters::new().eq("vip", true);
    assert_eq!(driver.count("customers", &vips).await.unwrap(), 1);
    assert_eq!(driver.count("customers", &Filters::new()).await.unwrap(), 2);

    let ordered = driver
        .query("customers", &Filters::new().order_by("name", true).limit(1))
        .await
        .unwrap();
    assert_eq!(ordered[0]["id"], json!("c2"));

    assert!(driver.delete("customers", "c2").await.unwrap());
    assert!(!driver.delete("customers", "c2").await.unwrap());

    let err = driver.find_all("orders").await.unwrap_err();
    assert!(matches!(err, DriverError::TableNotFound(ref t) if t == "orders"));
    assert!(err.is_missing_table());
}

#[tokio::test]
async fn test_pages_are_ordered_by_id() {
    let server = MockServer::start().await;
    server.create_table(
        "customers",
        vec![
            json!({"id": "c3", "name": "Grace"}),
            json!({"id": "c1", "name": "Ada"}),
            json!({"id": "c2", "name": "Alan"}),
        ],
    );
    let driver = server.driver();
    driver.connect().await.unwrap();

    let first = driver.find_many("customers", 2, 0).await.unwrap();
    let second = driver.find_many("customers", 2, 2).await.unwrap();
    let ids: Vec<&Value> = first.iter().chain(second.iter()).map(|r| &r["id"]).collect();
    assert_eq!(ids, vec![&json!("c1"), &json!("c2"), &json!("c3")]);
    assert_eq!(server.db.lock().page_orders, vec!["id.asc".to_string(), "id.asc".to_string()]);
}

#[tokio::test]
async fn test_transfer_from_rest_source_copies_every_record() {
    let server = MockServer::start().await;
    let mut rows: Vec<Value> = common::customers(250).into_iter().map(Value::Object).collect();
    rows.reverse();
    server.create_table("customers", rows);

    let ctx = TestContext::new();
    let source = ctx
        .connect(
            "postgrest",
            BackendFamily::RelationalHttp,
            config(json!({"url": server.url})),
        )
        .await;
    let target = ctx.sled("target").await;

    let engine = ctx.hub.transfers();
    let options = TransferOptions {
        batch_size: Some(100),
        validate_data: true,
        ..Default::default()
    };
    let job = engine
        .create_job("from rest", &source, &target, vec![TableMapping::identity("customers")], options)
        .unwrap();
    let job = engine.execute(&job.id, &NoProgress).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.transferred_records, 250);
    assert_eq!(job.progress.issue_count, 0);
    assert_eq!(ctx.count(&target, "customers").await, 250);
    assert!(server.db.lock().page_orders.iter().all(|o| o == "id.asc"));
}

#[tokio::test]
async fn test_batch_conflicts() {
    let server = MockServer::start().await;
    server.create_table("settings", vec![json!({"id": "currency", "value": "EUR"})]);
    let driver = server.driver();
    driver.connect().await.unwrap();

    let batch = vec![
        record(json!({"id": "currency", "value": "USD"})),
        record(json!({"id": "site_name", "value": "Shop"})),
    ];
    let outcome = driver
        .insert_batch("settings", batch.clone(), ConflictPolicy::Skip)
        .await
        .unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.duplicates, 1);

    let err = driver
        .insert_batch("settings", batch, ConflictPolicy::Fail)
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert!(matches!(err, DriverError::Duplicate { ref id, .. } if id == "currency"));

    assert_eq!(driver.truncate_table("settings").await.unwrap(), 2);
    assert_eq!(driver.count("settings", &Filters::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_activation_provisions_rest_backend() {
    let server = MockServer::start().await;
    let ctx = TestContext::new();
    let id = ctx
        .connect(
            "postgrest",
            BackendFamily::RelationalHttp,
            config(json!({"url": server.url})),
        )
        .await;

    let report = ctx.hub.registry().activate(&id).await.unwrap();
    assert_eq!(report.status, DatabaseStatus::Empty);
    assert_eq!(report.created_tables.len(), 6);
    assert_eq!(report.seeded_records, 5);

    {
        let db = server.db.lock();
        assert!(db
            .statements
            .iter()
            .any(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"users\"")));
        assert!(db
            .statements
            .iter()
            .any(|s| s.contains("FOREIGN KEY (\"customerId\") REFERENCES \"customers\"")));
        assert_eq!(db.tables["settings"].len(), 4);
    }

    let driver = ctx.driver(&id).await;
    assert_eq!(
        driver.recorded_version().await.unwrap(),
        Some(Version::new(1, 0, 0))
    );
    let site = ctx.hub.data().read("settings", Some("site_name")).await.unwrap();
    assert_eq!(site["value"], json!("My Business"));
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let ctx = TestContext::new();
    let conn = ctx
        .hub
        .registry()
        .register(
            "down",
            BackendFamily::RelationalHttp,
            config(json!({"url": "http://127.0.0.1:1", "timeoutSecs": 2})),
        )
        .unwrap();

    let test = ctx.hub.registry().test_connection(&conn.id).await.unwrap();
    assert!(!test.success);
    let err = ctx.hub.registry().activate(&conn.id).await.unwrap_err();
    assert!(matches!(err, Error::Unreachable { .. }));
}
