//! In-memory emulation of the CRM REST API.
//!
//! Serves databases and profiles with the remote's wire conventions: list
//! envelopes with `start`/`limit`/`count`/optional `total`, `X-Created` on
//! creation, 303 + `Location` when a PUT creates a profile, removed profiles
//! that keep their shape, and `{"error": {"message": ...}}` bodies on 400.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;

const DEFAULT_LIMIT: u64 = 100;
const MAX_LIMIT: u64 = 1000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    #[serde(rename = "ID")]
    pub id: u64,
    pub database: u64,
    pub fields: Map<String, Value>,
    /// Empty while the profile exists, otherwise the removal time.
    pub removed: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    #[serde(rename = "ID")]
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct Database {
    pub id: u64,
    pub name: String,
    pub collections: Vec<Collection>,
}

#[derive(Deserialize)]
pub struct ProfileInput {
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Everything the server knows.
#[derive(Clone, Debug, Default)]
pub struct Store {
    databases: BTreeMap<u64, Database>,
    profiles: BTreeMap<u64, Profile>,
    next_id: u64,
}

impl Store {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn with_database(mut self, id: u64, name: &str, collections: &[&str]) -> Self {
        let collections = collections
            .iter()
            .enumerate()
            .map(|(i, name)| Collection {
                id: id * 100 + i as u64 + 1,
                name: name.to_string(),
            })
            .collect();
        self.databases.insert(
            id,
            Database {
                id,
                name: name.to_string(),
                collections,
            },
        );
        self
    }

    /// Add `count` profiles with `email` and `index` fields.
    pub fn with_profiles(mut self, database: u64, count: usize) -> Self {
        for index in 0..count {
            let mut fields = Map::new();
            fields.insert("email".to_string(), json!(format!("user{index}@example.com")));
            fields.insert("index".to_string(), json!(index.to_string()));
            self.insert_profile(database, fields);
        }
        self
    }

    fn insert_profile(&mut self, database: u64, fields: Map<String, Value>) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.profiles.insert(
            id,
            Profile {
                id,
                database,
                fields,
                removed: String::new(),
            },
        );
        id
    }

    fn live_profiles(&self, database: u64) -> impl Iterator<Item = &Profile> {
        self.profiles
            .values()
            .filter(move |p| p.database == database && p.removed.is_empty())
    }
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    app_with(Store::new())
}

pub fn app_with(store: Store) -> Router {
    let db: Db = Arc::new(RwLock::new(store));
    Router::new()
        .route("/database/{id}", get(get_database))
        .route(
            "/database/{id}/profiles",
            get(list_profiles).post(create_profile).put(update_profiles),
        )
        .route(
            "/profile/{id}",
            get(get_profile).put(update_profile).delete(delete_profile),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, store: Store) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(store)).await
}

fn error(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": {"message": message}})),
    )
        .into_response()
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// `fields[]=name==value` selections.
fn selections(params: &[(String, String)]) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(k, _)| k == "fields[]" || k == "fields")
        .filter_map(|(_, v)| v.split_once("=="))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn matches(profile: &Profile, selections: &[(String, String)]) -> bool {
    selections.iter().all(|(name, value)| match profile.fields.get(name) {
        Some(Value::String(s)) => s == value,
        Some(other) => other.to_string() == *value,
        None => false,
    })
}

fn envelope(start: u64, limit: u64, total: Option<u64>, data: Vec<Value>) -> Value {
    let mut body = json!({
        "start": start,
        "limit": limit,
        "count": data.len(),
        "data": data,
    });
    if let Some(total) = total {
        body["total"] = json!(total);
    }
    body
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn get_database(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    let store = db.read().await;
    let Some(database) = store.databases.get(&id) else {
        return error("No database with supplied ID");
    };
    let collections: Vec<Value> = database
        .collections
        .iter()
        .map(|c| json!({"ID": c.id, "name": c.name}))
        .collect();
    let total = collections.len() as u64;
    Json(json!({
        "ID": database.id,
        "name": database.name,
        "collections": envelope(0, MAX_LIMIT, Some(total), collections),
    }))
    .into_response()
}

async fn list_profiles(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let store = db.read().await;
    if !store.databases.contains_key(&id) {
        return error("No database with supplied ID");
    }
    let start = match param(&params, "start").map(str::parse::<u64>) {
        None => 0,
        Some(Ok(start)) => start,
        Some(Err(_)) => return error("Invalid start parameter"),
    };
    let limit = match param(&params, "limit").map(str::parse::<u64>) {
        None => DEFAULT_LIMIT,
        Some(Ok(limit)) => limit.min(MAX_LIMIT),
        Some(Err(_)) => return error("Invalid limit parameter"),
    };
    let with_total = matches!(param(&params, "total"), Some("true") | Some("1"));
    let selections = selections(&params);

    let selected: Vec<&Profile> = store
        .live_profiles(id)
        .filter(|p| matches(p, &selections))
        .collect();
    let data = selected
        .iter()
        .skip(start as usize)
        .take(limit as usize)
        .map(|p| json!(p))
        .collect();
    debug!(database = id, start, limit, "listing profiles");
    Json(envelope(start, limit, with_total.then_some(selected.len() as u64), data)).into_response()
}

async fn create_profile(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<ProfileInput>,
) -> Response {
    let mut store = db.write().await;
    if !store.databases.contains_key(&id) {
        return error("No database with supplied ID");
    }
    let created = store.insert_profile(id, input.fields);
    (StatusCode::CREATED, [("x-created", created.to_string())]).into_response()
}

/// Update every selected profile; with `create=true` and no match, create
/// one and point at it with 303.
async fn update_profiles(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Query(params): Query<Vec<(String, String)>>,
    Json(input): Json<ProfileInput>,
) -> Response {
    let mut store = db.write().await;
    if !store.databases.contains_key(&id) {
        return error("No database with supplied ID");
    }
    let selections = selections(&params);
    let targets: Vec<u64> = store
        .live_profiles(id)
        .filter(|p| matches(p, &selections))
        .map(|p| p.id)
        .collect();

    if targets.is_empty() {
        if !matches!(param(&params, "create"), Some("true") | Some("1")) {
            return StatusCode::NO_CONTENT.into_response();
        }
        let mut fields: Map<String, Value> = selections
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        fields.extend(input.fields);
        let created = store.insert_profile(id, fields);
        return (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, format!("/profile/{created}"))],
        )
            .into_response();
    }

    for target in targets {
        if let Some(profile) = store.profiles.get_mut(&target) {
            profile.fields.extend(input.fields.clone());
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn get_profile(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    let store = db.read().await;
    let Some(profile) = store.profiles.get(&id) else {
        return error("No profile with supplied ID");
    };
    let mut profile = profile.clone();
    if !profile.removed.is_empty() {
        for value in profile.fields.values_mut() {
            *value = Value::String(String::new());
        }
    }
    Json(profile).into_response()
}

async fn update_profile(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<ProfileInput>,
) -> Response {
    let mut store = db.write().await;
    match store.profiles.get_mut(&id) {
        None => error("No profile with supplied ID"),
        Some(profile) if !profile.removed.is_empty() => error("Profile has already been removed"),
        Some(profile) => {
            profile.fields.extend(input.fields);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn delete_profile(State(db): State<Db>, Path(id): Path<u64>) -> Response {
    let mut store = db.write().await;
    match store.profiles.get_mut(&id) {
        None => error("No profile with supplied ID"),
        Some(profile) if !profile.removed.is_empty() => error("Profile has already been removed"),
        Some(profile) => {
            profile.removed = timestamp();
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_serializes_with_upper_case_id() {
        let profile = Profile {
            id: 7,
            database: 1,
            fields: Map::new(),
            removed: String::new(),
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["ID"], 7);
        assert_eq!(json["removed"], "");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn store_assigns_sequential_ids() {
        let store = Store::new().with_database(1, "main", &[]).with_profiles(1, 3);
        let ids: Vec<u64> = store.live_profiles(1).map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn selections_parse_field_filters() {
        let params = vec![
            ("fields[]".to_string(), "email==a@b.c".to_string()),
            ("limit".to_string(), "5".to_string()),
            ("fields[]".to_string(), "broken".to_string()),
        ];
        assert_eq!(
            selections(&params),
            vec![("email".to_string(), "a@b.c".to_string())]
        );
    }

    #[test]
    fn envelope_omits_total_unless_requested() {
        let body = envelope(0, 10, None, vec![json!({"ID": 1})]);
        assert!(body.get("total").is_none());
        assert_eq!(body["count"], 1);

        let body = envelope(0, 10, Some(4), vec![]);
        assert_eq!(body["total"], 4);
    }
}
