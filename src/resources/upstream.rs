//! Reconciler for Kong upstreams.

use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::kong::{HttpMethod, RestClient, RestRequest, Upstream};

use super::status::{classify, unexpected, CrudOp, StatusOutcome};
use super::{DesiredUpstream, UpdateOutcome};

/// Collection endpoint for upstreams.
const UPSTREAMS_PATH: &str = "upstreams/";

/// Reconciler for upstreams, an independent top-level resource.
#[derive(Debug)]
pub struct UpstreamReconciler<'a, C: RestClient + ?Sized> {
    /// Admin API client.
    client: &'a C,
}

impl<'a, C: RestClient + ?Sized> UpstreamReconciler<'a, C> {
    /// Creates a reconciler issuing requests through `client`.
    #[must_use]
    pub const fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Creates an upstream.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Conflict`] if the name is taken, or an error
    /// for any status other than 201.
    pub async fn create(&self, desired: &DesiredUpstream) -> Result<Upstream> {
        let body = Upstream {
            id: String::new(),
            name: desired.name.clone(),
            slots: desired.slots,
        };
        let request = RestRequest::new(HttpMethod::Post, UPSTREAMS_PATH).with_json(&body)?;
        let response = self.client.request(request).await?;

        match classify(CrudOp::Create, &response) {
            StatusOutcome::Success => {
                let created: Upstream = response.json()?;
                info!("Created upstream: {} (ID: {})", created.name, created.id);
                Ok(created)
            }
            StatusOutcome::Conflict => Err(ApiError::Conflict {
                resource: String::from("upstream"),
                name: desired.name.clone(),
            }
            .into()),
            _ => Err(unexpected(&response).into()),
        }
    }

    /// Reads an upstream by identifier.
    ///
    /// Returns `Ok(None)` when Kong no longer knows the identifier.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 200 or 404.
    pub async fn read(&self, id: &str) -> Result<Option<Upstream>> {
        let request = RestRequest::new(HttpMethod::Get, format!("{UPSTREAMS_PATH}{id}"));
        let response = self.client.request(request).await?;

        match classify(CrudOp::Read, &response) {
            StatusOutcome::Success => {
                let upstream: Upstream = response.json()?;
                debug!("Read upstream: {} (ID: {})", upstream.name, upstream.id);
                Ok(Some(upstream))
            }
            StatusOutcome::Absent => {
                debug!("Upstream {id} not found");
                Ok(None)
            }
            _ => Err(unexpected(&response).into()),
        }
    }

    /// Updates an upstream in place.
    ///
    /// `slots` cannot change after creation; callers plan a replacement
    /// instead of calling this with a different slot count.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 200.
    pub async fn update(
        &self,
        id: &str,
        desired: &DesiredUpstream,
    ) -> Result<UpdateOutcome<Upstream>> {
        let body = Upstream {
            id: id.to_string(),
            name: desired.name.clone(),
            slots: desired.slots,
        };
        let request =
            RestRequest::new(HttpMethod::Patch, format!("{UPSTREAMS_PATH}{id}")).with_json(&body)?;
        let response = self.client.request(request).await?;

        match classify(CrudOp::Update, &response) {
            StatusOutcome::Success => {
                let updated: Upstream = response.json()?;
                info!("Updated upstream: {} (ID: {})", updated.name, updated.id);
                Ok(UpdateOutcome::Updated(updated))
            }
            _ => Err(unexpected(&response).into()),
        }
    }

    /// Deletes an upstream.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 204, including 404.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let request = RestRequest::new(HttpMethod::Delete, format!("{UPSTREAMS_PATH}{id}"));
        let response = self.client.request(request).await?;

        match classify(CrudOp::Delete, &response) {
            StatusOutcome::Success => {
                info!("Deleted upstream: {id}");
                Ok(())
            }
            _ => Err(unexpected(&response).into()),
        }
    }
}
