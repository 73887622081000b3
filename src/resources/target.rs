//! Reconciler for Kong targets.
//!
//! Targets live under their upstream (`upstreams/{upstream}/targets`).
//! Kong has no in-place update and no get-by-id for them: an update is a
//! delete followed by a create, and a read goes through the active-targets
//! listing filtered by id.

use tracing::{debug, info, warn};

use crate::error::{ApiError, KongSyncError, Result};
use crate::kong::{HttpMethod, RestClient, RestRequest, Target, TargetList, TargetRequest};

use super::status::{classify, unexpected, CrudOp, StatusOutcome};
use super::{DesiredTarget, UpdateOutcome, UpdateStep};

/// Reconciler for targets, scoped to an owning upstream.
#[derive(Debug)]
pub struct TargetReconciler<'a, C: RestClient + ?Sized> {
    /// Admin API client.
    client: &'a C,
}

fn targets_path(upstream: &str) -> String {
    format!("upstreams/{upstream}/targets")
}

impl<'a, C: RestClient + ?Sized> TargetReconciler<'a, C> {
    /// Creates a reconciler issuing requests through `client`.
    #[must_use]
    pub const fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Creates a target under `desired.upstream`.
    ///
    /// Kong accepts duplicate addresses, so there is no conflict handling.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 201.
    pub async fn create(&self, desired: &DesiredTarget) -> Result<Target> {
        let created = self.post(desired).await?;
        info!(
            "Created target: {} weight {} in upstream {} (ID: {})",
            created.target, created.weight, desired.upstream, created.id
        );
        Ok(created)
    }

    /// Reads an active target through the filtered listing.
    ///
    /// Returns `Ok(None)` on 404 or when the listing is empty, which also
    /// covers targets superseded by a later change.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 200 or 404.
    pub async fn read(&self, id: &str, upstream: &str) -> Result<Option<Target>> {
        let request = RestRequest::new(
            HttpMethod::Get,
            format!("{}/active", targets_path(upstream)),
        )
        .with_query("id", id);
        let response = self.client.request(request).await?;

        match classify(CrudOp::Read, &response) {
            StatusOutcome::Success => {}
            StatusOutcome::Absent => {
                debug!("Upstream {upstream} not found while reading target {id}");
                return Ok(None);
            }
            _ => return Err(unexpected(&response).into()),
        }

        let listing: TargetList = response.json()?;
        if listing.is_empty() {
            debug!("Target {id} is not active in upstream {upstream}");
            return Ok(None);
        }

        if listing.data.len() > 1 {
            warn!(
                "Active listing for target {id} in upstream {upstream} returned {} entries",
                listing.data.len()
            );
        }

        let mut data = listing.data;
        let index = data.iter().position(|t| t.id == id).unwrap_or(0);
        Ok(Some(data.swap_remove(index)))
    }

    /// Replaces a target with one carrying the desired address and weight.
    ///
    /// The existing target is deleted first, and the replacement is only
    /// created once the delete has been confirmed. The returned record has
    /// a new identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::TargetUpdate`] naming the failed step. Nothing is
    /// rolled back: a failed create leaves the upstream without the target.
    pub async fn update(&self, id: &str, desired: &DesiredTarget) -> Result<UpdateOutcome<Target>> {
        self.remove(id, &desired.upstream)
            .await
            .map_err(|e| step_error(UpdateStep::Delete, id, e))?;

        let record = self
            .post(desired)
            .await
            .map_err(|e| step_error(UpdateStep::Create, id, e))?;

        info!(
            "Replaced target {id} in upstream {} with {} weight {} (ID: {})",
            desired.upstream, record.target, record.weight, record.id
        );

        Ok(UpdateOutcome::Replaced {
            old_id: id.to_string(),
            record,
        })
    }

    /// Deletes a target.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 204, including 404.
    pub async fn delete(&self, id: &str, upstream: &str) -> Result<()> {
        self.remove(id, upstream).await?;
        info!("Deleted target {id} from upstream {upstream}");
        Ok(())
    }

    async fn post(&self, desired: &DesiredTarget) -> Result<Target> {
        let body = TargetRequest {
            id: String::new(),
            target: desired.target.clone(),
            weight: desired.weight,
        };
        let request =
            RestRequest::new(HttpMethod::Post, targets_path(&desired.upstream)).with_json(&body)?;
        let response = self.client.request(request).await?;

        match classify(CrudOp::Create, &response) {
            StatusOutcome::Success => response.json(),
            _ => Err(unexpected(&response).into()),
        }
    }

    async fn remove(&self, id: &str, upstream: &str) -> Result<()> {
        let request = RestRequest::new(
            HttpMethod::Delete,
            format!("{}/{id}", targets_path(upstream)),
        );
        let response = self.client.request(request).await?;

        match classify(CrudOp::Delete, &response) {
            StatusOutcome::Success => Ok(()),
            _ => Err(unexpected(&response).into()),
        }
    }
}

fn step_error(step: UpdateStep, target_id: &str, err: KongSyncError) -> KongSyncError {
    match err {
        KongSyncError::Api(source) => KongSyncError::Api(ApiError::TargetUpdate {
            step,
            target_id: target_id.to_string(),
            source: Box::new(source),
        }),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kong::{MockRestClient, RestResponse};

    fn desired(target: &str, weight: u32) -> DesiredTarget {
        DesiredTarget {
            target: target.to_string(),
            weight,
            upstream: String::from("svc-a"),
        }
    }

    fn target_json(id: &str, target: &str, weight: u32) -> serde_json::Value {
        serde_json::json!({ "id": id, "target": target, "weight": weight, "upstream_id": "u-1" })
    }

    fn listing(entries: &[serde_json::Value]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "total": entries.len(), "data": entries }))
            .unwrap()
    }

    fn created(id: &str, target: &str, weight: u32) -> RestResponse {
        RestResponse::new(201, serde_json::to_vec(&target_json(id, target, weight)).unwrap())
    }

    #[tokio::test]
    async fn test_create_posts_under_upstream_without_upstream_in_body() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .withf(|r| {
                r.method == HttpMethod::Post
                    && r.path == "upstreams/svc-a/targets"
                    && r.body
                        == Some(serde_json::json!({ "target": "10.0.0.1:8080", "weight": 100 }))
            })
            .times(1)
            .returning(|_| Ok(created("t-1", "10.0.0.1:8080", 100)));

        let target = TargetReconciler::new(&client)
            .create(&desired("10.0.0.1:8080", 100))
            .await
            .unwrap();

        assert_eq!(target.id, "t-1");
        assert_eq!(target.upstream_id, "u-1");
    }

    #[tokio::test]
    async fn test_create_conflict_is_plain_unexpected_status() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .returning(|_| Ok(RestResponse::new(409, "")));

        let err = TargetReconciler::new(&client)
            .create(&desired("10.0.0.1:8080", 100))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KongSyncError::Api(ApiError::UnexpectedStatus { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_uses_filtered_active_listing() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .withf(|r| {
                r.method == HttpMethod::Get
                    && r.path == "upstreams/svc-a/targets/active"
                    && r.query == vec![(String::from("id"), String::from("t-1"))]
            })
            .times(1)
            .returning(|_| {
                Ok(RestResponse::new(
                    200,
                    listing(&[target_json("t-1", "10.0.0.1:8080", 100)]),
                ))
            });

        let target = TargetReconciler::new(&client)
            .read("t-1", "svc-a")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(target.target, "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_read_empty_listing_is_absence() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .returning(|_| Ok(RestResponse::new(200, listing(&[]))));

        let target = TargetReconciler::new(&client).read("t-1", "svc-a").await.unwrap();
        assert!(target.is_none());
    }

    #[tokio::test]
    async fn test_read_not_found_is_absence() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .returning(|_| Ok(RestResponse::new(404, "")));

        let target = TargetReconciler::new(&client).read("t-1", "svc-a").await.unwrap();
        assert!(target.is_none());
    }

    #[tokio::test]
    async fn test_read_server_error_is_not_absence() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .returning(|_| Ok(RestResponse::new(500, "")));

        let result = TargetReconciler::new(&client).read("t-1", "svc-a").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_multiple_matches_prefers_exact_id() {
        let mut client = MockRestClient::new();
        client.expect_request().returning(|_| {
            Ok(RestResponse::new(
                200,
                listing(&[
                    target_json("t-0", "10.0.0.9:80", 1),
                    target_json("t-1", "10.0.0.1:8080", 100),
                ]),
            ))
        });

        let target = TargetReconciler::new(&client)
            .read("t-1", "svc-a")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(target.id, "t-1");
    }

    #[tokio::test]
    async fn test_update_deletes_then_creates_with_new_id() {
        let mut client = MockRestClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Delete && r.path == "upstreams/svc-a/targets/t-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(RestResponse::new(204, "")));
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Post && r.path == "upstreams/svc-a/targets")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(created("t-2", "10.0.0.2:80", 50)));

        let outcome = TargetReconciler::new(&client)
            .update("t-1", &desired("10.0.0.2:80", 50))
            .await
            .unwrap();

        assert_eq!(outcome.replaced_id(), Some("t-1"));
        let record = outcome.into_record();
        assert_eq!(record.id, "t-2");
        assert_ne!(record.id, "t-1");
        assert_eq!(record.weight, 50);
    }

    #[tokio::test]
    async fn test_update_failed_delete_never_creates() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Delete)
            .times(1)
            .returning(|_| Err(ApiError::transport("connection reset").into()));
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Post)
            .never();

        let err = TargetReconciler::new(&client)
            .update("t-1", &desired("10.0.0.2:80", 50))
            .await
            .unwrap_err();

        let api = err.as_api().unwrap();
        assert_eq!(api.failed_step(), Some(UpdateStep::Delete));
        match api {
            ApiError::TargetUpdate { source, .. } => assert!(source.is_transport()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_delete_status_aborts_before_create() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Delete)
            .times(1)
            .returning(|_| Ok(RestResponse::new(500, "")));
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Post)
            .never();

        let err = TargetReconciler::new(&client)
            .update("t-1", &desired("10.0.0.2:80", 50))
            .await
            .unwrap_err();

        assert_eq!(err.as_api().and_then(ApiError::failed_step), Some(UpdateStep::Delete));
    }

    #[tokio::test]
    async fn test_update_failed_create_names_create_step() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Delete)
            .returning(|_| Ok(RestResponse::new(204, "")));
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Post)
            .returning(|_| Ok(RestResponse::new(204, "")));

        let err = TargetReconciler::new(&client)
            .update("t-1", &desired("10.0.0.2:80", 50))
            .await
            .unwrap_err();

        assert_eq!(err.as_api().and_then(ApiError::failed_step), Some(UpdateStep::Create));
    }

    #[tokio::test]
    async fn test_delete_requires_no_content() {
        let mut client = MockRestClient::new();
        client
            .expect_request()
            .withf(|r| r.method == HttpMethod::Delete && r.path == "upstreams/svc-a/targets/t-1")
            .returning(|_| Ok(RestResponse::new(200, "")));

        let err = TargetReconciler::new(&client)
            .delete("t-1", "svc-a")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KongSyncError::Api(ApiError::UnexpectedStatus { status: 200, .. })
        ));
    }
}
