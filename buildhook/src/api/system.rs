use crate::api::{ApiState, BUILD_COMMIT, BUILD_SEMVER};
use dropshot::{endpoint, HttpError, HttpResponseOk, RequestContext};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GetSystemInfoResponse {
    /// The commit of the current build.
    pub commit: String,

    /// The semver version of the current build.
    pub semver: String,
}

/// Describe current system meta-information.
#[endpoint(
    method = GET,
    path = "/api/system/info",
    tags = ["System"],
)]
pub async fn get_system_info(
    _rqctx: RequestContext<Arc<ApiState>>,
) -> Result<HttpResponseOk<GetSystemInfoResponse>, HttpError> {
    let resp = GetSystemInfoResponse {
        commit: BUILD_COMMIT.to_string(),
        semver: BUILD_SEMVER.to_string(),
    };
    Ok(HttpResponseOk(resp))
}
