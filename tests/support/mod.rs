//! In-memory Kong Admin API used by the integration tests.
//!
//! Implements the subset of `/upstreams` and `/upstreams/{u}/targets` that
//! kongsync calls, with Kong's observable behavior: generated ids, name
//! uniqueness (409), lookups by id or name, default slots and weight,
//! and deletion of an upstream's targets together with the upstream.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kongsync::config::{AdminConfig, StateConfig, SyncConfig, TargetConfig, UpstreamConfig};
use kongsync::error::{ApiError, Result};
use kongsync::kong::{HttpMethod, RestClient, RestRequest, RestResponse};
use serde_json::{Value, json};

const DEFAULT_SLOTS: u32 = 10_000;
const DEFAULT_WEIGHT: u32 = 100;

/// A failure to return instead of handling a request.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// The request never reaches Kong.
    Transport,
    /// Kong answers with this status.
    Status(u16),
}

#[derive(Debug)]
struct Injected {
    method: HttpMethod,
    path_contains: String,
    fault: Fault,
}

/// Upstream as stored by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpstream {
    pub id: String,
    pub name: String,
    pub slots: u32,
}

/// Target as stored by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTarget {
    pub id: String,
    pub target: String,
    pub weight: u32,
    pub upstream_id: String,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    upstreams: BTreeMap<String, StoredUpstream>,
    targets: BTreeMap<String, StoredTarget>,
    faults: Vec<Injected>,
    log: Vec<(HttpMethod, String)>,
}

/// In-memory Kong Admin API.
#[derive(Debug, Default)]
pub struct FakeKong {
    inner: Mutex<Inner>,
}

impl FakeKong {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Fails the next request with `method` whose path contains `path_contains`.
    pub fn fail_next(&self, method: HttpMethod, path_contains: &str, fault: Fault) {
        self.lock().faults.push(Injected {
            method,
            path_contains: path_contains.to_string(),
            fault,
        });
    }

    pub fn upstream_by_name(&self, name: &str) -> Option<StoredUpstream> {
        self.lock().upstreams.values().find(|u| u.name == name).cloned()
    }

    pub fn upstream_count(&self) -> usize {
        self.lock().upstreams.len()
    }

    pub fn targets_of(&self, upstream_id: &str) -> Vec<StoredTarget> {
        self.lock()
            .targets
            .values()
            .filter(|t| t.upstream_id == upstream_id)
            .cloned()
            .collect()
    }

    pub fn target_count(&self) -> usize {
        self.lock().targets.len()
    }

    /// Creates an upstream behind kongsync's back.
    pub fn seed_upstream(&self, name: &str, slots: u32) -> StoredUpstream {
        let mut inner = self.lock();
        let upstream = StoredUpstream {
            id: inner.generate_id("upstream"),
            name: name.to_string(),
            slots,
        };
        inner.upstreams.insert(upstream.id.clone(), upstream.clone());
        upstream
    }

    /// Creates a target behind kongsync's back.
    pub fn seed_target(&self, upstream_id: &str, address: &str, weight: u32) -> StoredTarget {
        let mut inner = self.lock();
        let target = StoredTarget {
            id: inner.generate_id("target"),
            target: address.to_string(),
            weight,
            upstream_id: upstream_id.to_string(),
        };
        inner.targets.insert(target.id.clone(), target.clone());
        target
    }

    /// Deletes an upstream and its targets behind kongsync's back.
    pub fn drop_upstream(&self, id: &str) {
        let mut inner = self.lock();
        inner.upstreams.remove(id);
        inner.targets.retain(|_, t| t.upstream_id != id);
    }

    /// Deletes a target behind kongsync's back.
    pub fn drop_target(&self, id: &str) {
        self.lock().targets.remove(id);
    }

    /// Renames an upstream behind kongsync's back.
    pub fn rename_upstream(&self, id: &str, name: &str) {
        if let Some(upstream) = self.lock().upstreams.get_mut(id) {
            upstream.name = name.to_string();
        }
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<(HttpMethod, String)> {
        self.lock().log.clone()
    }

    /// Number of requests that were not reads.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|(method, _)| *method != HttpMethod::Get)
            .count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }
}

impl Inner {
    fn generate_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{:04}", self.next_id)
    }

    fn take_fault(&mut self, request: &RestRequest) -> Option<Fault> {
        let index = self.faults.iter().position(|f| {
            f.method == request.method && request.path.contains(&f.path_contains)
        })?;
        Some(self.faults.remove(index).fault)
    }

    fn resolve_upstream(&self, key: &str) -> Option<StoredUpstream> {
        self.upstreams
            .get(key)
            .or_else(|| self.upstreams.values().find(|u| u.name == key))
            .cloned()
    }

    fn handle(&mut self, request: &RestRequest) -> RestResponse {
        let path = request.path.trim_matches('/').to_string();
        let segments: Vec<&str> = path.split('/').collect();
        let body = request.body.clone().unwrap_or(Value::Null);

        match (request.method, segments.as_slice()) {
            (HttpMethod::Post, ["upstreams"]) => self.create_upstream(&body),
            (HttpMethod::Get, ["upstreams", key]) => match self.resolve_upstream(key) {
                Some(upstream) => respond(200, &upstream_json(&upstream)),
                None => not_found(),
            },
            (HttpMethod::Patch, ["upstreams", key]) => self.patch_upstream(key, &body),
            (HttpMethod::Delete, ["upstreams", key]) => match self.resolve_upstream(key) {
                Some(upstream) => {
                    self.upstreams.remove(&upstream.id);
                    self.targets.retain(|_, t| t.upstream_id != upstream.id);
                    RestResponse::new(204, Vec::new())
                }
                None => not_found(),
            },
            (HttpMethod::Post, ["upstreams", key, "targets"]) => self.create_target(key, &body),
            (HttpMethod::Get, ["upstreams", key, "targets", "active"]) => {
                self.list_active(key, request)
            }
            (HttpMethod::Delete, ["upstreams", key, "targets", id]) => {
                let Some(upstream) = self.resolve_upstream(key) else {
                    return not_found();
                };
                let owned = self
                    .targets
                    .get(*id)
                    .is_some_and(|t| t.upstream_id == upstream.id);
                if owned {
                    self.targets.remove(*id);
                    RestResponse::new(204, Vec::new())
                } else {
                    not_found()
                }
            }
            _ => respond(405, &json!({ "message": "Method not allowed" })),
        }
    }

    fn create_upstream(&mut self, body: &Value) -> RestResponse {
        let Some(name) = body["name"].as_str() else {
            return respond(400, &json!({ "message": "schema violation (name: required field missing)" }));
        };
        if self.upstreams.values().any(|u| u.name == name) {
            return respond(
                409,
                &json!({ "message": format!("UNIQUE violation detected on '{{name=\"{name}\"}}'") }),
            );
        }

        let upstream = StoredUpstream {
            id: self.generate_id("upstream"),
            name: name.to_string(),
            slots: as_u32(&body["slots"]).unwrap_or(DEFAULT_SLOTS),
        };
        self.upstreams.insert(upstream.id.clone(), upstream.clone());
        respond(201, &upstream_json(&upstream))
    }

    fn patch_upstream(&mut self, key: &str, body: &Value) -> RestResponse {
        let Some(existing) = self.resolve_upstream(key) else {
            return not_found();
        };
        let Some(upstream) = self.upstreams.get_mut(&existing.id) else {
            return not_found();
        };
        if let Some(name) = body["name"].as_str() {
            upstream.name = name.to_string();
        }
        if let Some(slots) = as_u32(&body["slots"]) {
            upstream.slots = slots;
        }
        let updated = upstream.clone();
        respond(200, &upstream_json(&updated))
    }

    fn create_target(&mut self, key: &str, body: &Value) -> RestResponse {
        let Some(upstream) = self.resolve_upstream(key) else {
            return not_found();
        };
        let Some(address) = body["target"].as_str() else {
            return respond(400, &json!({ "message": "schema violation (target: required field missing)" }));
        };

        let target = StoredTarget {
            id: self.generate_id("target"),
            target: address.to_string(),
            weight: as_u32(&body["weight"]).unwrap_or(DEFAULT_WEIGHT),
            upstream_id: upstream.id,
        };
        self.targets.insert(target.id.clone(), target.clone());
        respond(201, &target_json(&target))
    }

    fn list_active(&self, key: &str, request: &RestRequest) -> RestResponse {
        let Some(upstream) = self.resolve_upstream(key) else {
            return not_found();
        };
        let wanted = request
            .query
            .iter()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.as_str());

        let data: Vec<Value> = self
            .targets
            .values()
            .filter(|t| t.upstream_id == upstream.id)
            .filter(|t| wanted.is_none_or(|id| t.id == id))
            .map(target_json)
            .collect();

        respond(200, &json!({ "total": data.len(), "data": data }))
    }
}

#[async_trait]
impl RestClient for FakeKong {
    async fn request(&self, request: RestRequest) -> Result<RestResponse> {
        let mut inner = self.lock();
        inner.log.push((request.method, request.path.clone()));

        match inner.take_fault(&request) {
            Some(Fault::Transport) => Err(ApiError::transport(format!(
                "{} {} failed: connection reset",
                request.method, request.path
            ))
            .into()),
            Some(Fault::Status(status)) => {
                Ok(respond(status, &json!({ "message": "injected failure" })))
            }
            None => Ok(inner.handle(&request)),
        }
    }
}

fn respond(status: u16, body: &Value) -> RestResponse {
    RestResponse::new(status, serde_json::to_vec(body).unwrap())
}

fn not_found() -> RestResponse {
    respond(404, &json!({ "message": "Not found" }))
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

fn upstream_json(upstream: &StoredUpstream) -> Value {
    json!({ "id": upstream.id, "name": upstream.name, "slots": upstream.slots })
}

fn target_json(target: &StoredTarget) -> Value {
    json!({
        "id": target.id,
        "target": target.target,
        "weight": target.weight,
        "upstream_id": target.upstream_id,
    })
}

/// Builds a declaration from `(name, slots, [(address, weight)])` tuples.
pub fn declaration(upstreams: &[(&str, u32, &[(&str, u32)])]) -> SyncConfig {
    SyncConfig {
        admin: AdminConfig {
            url: String::from("http://kong.test:8001"),
            timeout_secs: 30,
            token_header: String::from("Kong-Admin-Token"),
        },
        state: StateConfig::default(),
        upstreams: upstreams
            .iter()
            .map(|(name, slots, targets)| UpstreamConfig {
                name: (*name).to_string(),
                slots: *slots,
                targets: targets
                    .iter()
                    .map(|(target, weight)| TargetConfig {
                        target: (*target).to_string(),
                        weight: *weight,
                    })
                    .collect(),
            })
            .collect(),
    }
}
