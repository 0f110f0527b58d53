// vecload — milvus.rs
// Blocking HTTP storage client for the Milvus RESTful v2 API.
// Author: d65v <https://github.com/d65v>
//
// Every call is a POST of a JSON body to `/v2/vectordb/<resource>/<action>`.
// Responses share one envelope: `{"code": 0, "data": ...}` on success,
// `{"code": <non-zero>, "message": "..."}` on failure.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sink::{
    CollectionSchema, InsertAck, StorageClient, ID_FIELD, ROW_COUNT_KEY, VECTOR_FIELD,
};
use crate::{LoadError, Result};

// Gigantic batches serialize to large bodies; keep generous headroom.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MilvusConfig {
    /// `host:port` or a full `http(s)://` URL
    pub address: String,
    /// Optional bearer token (`user:password` or an API key)
    pub token: Option<String>,
    pub timeout: Duration,
}

impl MilvusConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Prefix a scheme when missing and strip trailing slashes.
fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

// ── Wire Types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct HasData {
    has: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsData {
    row_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertData {
    insert_count: usize,
}

// Field names must stay equal to ID_FIELD and VECTOR_FIELD.
#[derive(Serialize)]
struct InsertRow<'a> {
    id: i64,
    vector: &'a [f32],
}

/// Unwrap the response envelope, turning a non-zero code into an error.
fn decode<T: DeserializeOwned>(envelope: Envelope) -> Result<T> {
    if envelope.code != 0 {
        return Err(LoadError::Storage(format!(
            "milvus returned code {}: {}",
            envelope.code,
            envelope.message.unwrap_or_default()
        )));
    }
    Ok(serde_json::from_value(envelope.data)?)
}

fn create_collection_body(schema: &CollectionSchema, shards: u32) -> Value {
    json!({
        "collectionName": schema.name,
        "description": schema.description,
        "schema": {
            "autoId": false,
            "enableDynamicField": false,
            "fields": [
                {
                    "fieldName": ID_FIELD,
                    "dataType": "Int64",
                    "isPrimary": true
                },
                {
                    "fieldName": VECTOR_FIELD,
                    "dataType": "FloatVector",
                    "elementTypeParams": { "dim": schema.dim.to_string() }
                }
            ]
        },
        "params": { "shardsNum": shards }
    })
}

fn insert_body(collection: &str, partition: &str, ids: &[i64], vectors: &[Vec<f32>]) -> Value {
    let rows: Vec<InsertRow<'_>> = ids
        .iter()
        .zip(vectors)
        .map(|(id, v)| InsertRow { id: *id, vector: v })
        .collect();
    json!({
        "collectionName": collection,
        "partitionName": partition,
        "data": rows,
    })
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct MilvusClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl MilvusClient {
    /// Build the HTTP client. No request is made until the first call.
    pub fn new(config: MilvusConfig) -> Result<Self> {
        if config.address.trim().is_empty() {
            return Err(LoadError::Config("storage address cannot be empty".into()));
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LoadError::Connection(format!("failed to build HTTP client: {}", e)))?;

        let base_url = normalize_address(&config.address);
        log::info!("Connecting to Milvus at: {}", base_url);

        Ok(Self {
            http,
            base_url,
            token: config.token,
        })
    }

    fn call<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let url = format!("{}/v2/vectordb/{}", self.base_url, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(LoadError::Storage(format!("{} returned {}: {}", url, status, text)));
        }
        decode(response.json::<Envelope>()?)
    }
}

impl StorageClient for MilvusClient {
    fn has_collection(&self, name: &str) -> Result<bool> {
        let data: HasData = self.call("collections/has", &json!({ "collectionName": name }))?;
        Ok(data.has)
    }

    fn create_collection(&self, schema: &CollectionSchema, shards: u32) -> Result<()> {
        self.call::<Value>("collections/create", &create_collection_body(schema, shards))?;
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.call::<Value>("collections/drop", &json!({ "collectionName": name }))?;
        Ok(())
    }

    fn has_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        let data: HasData = self.call(
            "partitions/has",
            &json!({ "collectionName": collection, "partitionName": partition }),
        )?;
        Ok(data.has)
    }

    fn create_partition(&self, collection: &str, partition: &str) -> Result<()> {
        self.call::<Value>(
            "partitions/create",
            &json!({ "collectionName": collection, "partitionName": partition }),
        )?;
        Ok(())
    }

    fn insert(
        &self,
        collection: &str,
        partition: &str,
        ids: &[i64],
        vectors: &[Vec<f32>],
    ) -> Result<InsertAck> {
        if ids.len() != vectors.len() {
            return Err(LoadError::Storage(format!(
                "column length mismatch: {} ids, {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        let data: InsertData = self.call(
            "entities/insert",
            &insert_body(collection, partition, ids, vectors),
        )?;
        Ok(InsertAck {
            inserted: data.insert_count,
        })
    }

    fn collection_statistics(&self, collection: &str) -> Result<HashMap<String, String>> {
        let data: StatsData =
            self.call("collections/get_stats", &json!({ "collectionName": collection }))?;
        let mut stats = HashMap::new();
        stats.insert(ROW_COUNT_KEY.to_string(), data.row_count.to_string());
        Ok(stats)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        self.call("collections/list", &json!({}))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(raw: &str) -> Envelope {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("localhost:19530"), "http://localhost:19530");
        assert_eq!(normalize_address("https://db.example:443/"), "https://db.example:443");
        assert_eq!(normalize_address(" http://10.0.0.1:19530 "), "http://10.0.0.1:19530");
    }

    #[test]
    fn test_decode_success() {
        let has: HasData = decode(envelope(r#"{"code":0,"data":{"has":true}}"#)).unwrap();
        assert!(has.has);

        let names: Vec<String> = decode(envelope(r#"{"code":0,"data":["a","b"]}"#)).unwrap();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_decode_error_code() {
        let err = decode::<Value>(envelope(
            r#"{"code":1100,"message":"collection not found[collection=x]"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, LoadError::Storage(ref m) if m.contains("1100")));
    }

    #[test]
    fn test_decode_stats_and_insert() {
        let stats: StatsData = decode(envelope(r#"{"code":0,"data":{"rowCount":1234}}"#)).unwrap();
        assert_eq!(stats.row_count, 1234);

        let ins: InsertData = decode(envelope(
            r#"{"code":0,"data":{"insertCount":2,"insertIds":[4,5]}}"#,
        ))
        .unwrap();
        assert_eq!(ins.insert_count, 2);
    }

    #[test]
    fn test_create_collection_body() {
        let body = create_collection_body(&CollectionSchema::random_vectors("rv", 150), 2);
        assert_eq!(body["collectionName"], "rv");
        assert_eq!(body["params"]["shardsNum"], 2);
        assert_eq!(body["schema"]["autoId"], false);
        assert_eq!(body["schema"]["fields"][0]["isPrimary"], true);
        assert_eq!(body["schema"]["fields"][1]["elementTypeParams"]["dim"], "150");
    }

    #[test]
    fn test_insert_body_rows() {
        let body = insert_body("rv", "partition3", &[10, 11], &[vec![0.5, 1.0], vec![0.25, 0.0]]);
        assert_eq!(body["partitionName"], "partition3");
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], 11);
        assert_eq!(rows[0]["vector"][1], 1.0);
    }

    #[test]
    fn test_empty_address_rejected() {
        let err = MilvusClient::new(MilvusConfig::new("  ")).err().unwrap();
        assert!(matches!(err, LoadError::Config(_)));
    }
}
