use crate::api::ApiState;
use crate::models::{ResultRecord, StorageEvent};
use dropshot::{endpoint, HttpError, HttpResponseOk, RequestContext, TypedBody};
use std::sync::Arc;
use tracing::debug;

/// CloudEvents binary mode carries the delivery id here; redeliveries repeat it.
const CLOUD_EVENT_ID_HEADER: &str = "ce-id";

/// Fills in the correlation id from the delivery when the event body did not carry one.
fn with_delivery_id(mut event: StorageEvent, delivery_id: Option<&str>) -> StorageEvent {
    if event.correlation_id().is_none() {
        event.correlation_id = delivery_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from);
    }

    event
}

fn validate(event: &StorageEvent) -> Result<(), String> {
    if event.container.trim().is_empty() {
        return Err("'container' must not be empty".into());
    }

    if event.object_key.trim().is_empty() {
        return Err("'objectKey' must not be empty".into());
    }

    Ok(())
}

/// Handle a storage event.
///
/// Runs the object through the whole build lifecycle and returns the resulting record. A failed
/// build is not a failed request: the record says whether the build succeeded.
#[endpoint(
    method = POST,
    path = "/api/events",
    tags = ["Events"],
)]
pub async fn handle_event(
    rqctx: RequestContext<Arc<ApiState>>,
    body: TypedBody<StorageEvent>,
) -> Result<HttpResponseOk<ResultRecord>, HttpError> {
    let api_state = rqctx.context();

    let delivery_id = rqctx
        .request
        .headers()
        .get(CLOUD_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = with_delivery_id(body.into_inner(), delivery_id);

    validate(&event).map_err(|msg| HttpError::for_bad_request(None, msg))?;

    debug!(
        container = event.container,
        object_key = event.object_key,
        request_id = rqctx.request_id,
        "Received storage event"
    );

    let record = api_state.orchestrator.handle(event).await;

    Ok(HttpResponseOk(record))
}
