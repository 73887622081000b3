//! Status-code interpretation shared by every resource kind.

use tracing::debug;

use crate::error::{ApiError, Result};
use crate::kong::RestResponse;

/// CRUD operation a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudOp {
    /// `POST` to a collection.
    Create,
    /// `GET` of a resource or filtered listing.
    Read,
    /// `PATCH` of a resource.
    Update,
    /// `DELETE` of a resource.
    Delete,
}

/// How a status code should be treated for a given operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The operation's expected success status.
    Success,
    /// 404 on a read: the resource no longer exists.
    Absent,
    /// 409 on a create: the resource already exists.
    Conflict,
    /// Anything else.
    Unexpected,
}

impl CrudOp {
    /// Returns the only status counted as success for this operation.
    #[must_use]
    pub const fn expected_status(self) -> u16 {
        match self {
            Self::Create => 201,
            Self::Read | Self::Update => 200,
            Self::Delete => 204,
        }
    }
}

/// Classifies `status` for `op`.
#[must_use]
pub const fn interpret(op: CrudOp, status: u16) -> StatusOutcome {
    if status == op.expected_status() {
        return StatusOutcome::Success;
    }
    match (op, status) {
        (CrudOp::Read, 404) => StatusOutcome::Absent,
        (CrudOp::Create, 409) => StatusOutcome::Conflict,
        _ => StatusOutcome::Unexpected,
    }
}

/// Classifies a response and logs the decision.
#[must_use]
pub fn classify(op: CrudOp, response: &RestResponse) -> StatusOutcome {
    let outcome = interpret(op, response.status);
    debug!("{op:?} answered {} -> {outcome:?}", response.status_line());
    outcome
}

/// Builds the error for a status outside the expected set.
#[must_use]
pub fn unexpected(response: &RestResponse) -> ApiError {
    ApiError::UnexpectedStatus {
        status: response.status,
        status_line: response.status_line(),
        body: response.body_text().trim().to_string(),
    }
}

/// Succeeds only on the operation's expected status.
///
/// # Errors
///
/// Returns [`ApiError::UnexpectedStatus`] for every other status.
pub fn expect_success(op: CrudOp, response: &RestResponse) -> Result<()> {
    match classify(op, response) {
        StatusOutcome::Success => Ok(()),
        _ => Err(unexpected(response).into()),
    }
}
