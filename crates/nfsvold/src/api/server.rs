use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use nfsvol::Driver;
use nfsvol::protocol::{
    ActivateResponse, CapabilitiesResponse, CreateRequest, ErrorResponse, GetResponse,
    ListResponse, MountpointResponse, NameRequest,
};
use nfsvol_common::DriverResult;
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;

type SharedDriver = State<Arc<Driver>>;

/// Build the plugin router.
pub fn app(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

/// Decode a request body.
///
/// The runtime sends `application/vnd.docker.plugins.v1+json`, so the body
/// is parsed whatever the content type says. An empty body is the default
/// request.
fn decode<T: DeserializeOwned + Default>(body: &[u8]) -> DriverResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

async fn activate(State(driver): SharedDriver) -> Json<ActivateResponse> {
    Json(ActivateResponse {
        implements: driver.activate(),
    })
}

async fn create(State(driver): SharedDriver, body: Bytes) -> Json<ErrorResponse> {
    let result = decode::<CreateRequest>(&body)
        .and_then(|req| driver.create(&req.name, req.opts.unwrap_or_default()));
    Json(result.into())
}

async fn remove(State(driver): SharedDriver, body: Bytes) -> Json<ErrorResponse> {
    let result = match decode::<NameRequest>(&body) {
        Ok(req) => driver.remove(&req.name).await,
        Err(e) => Err(e),
    };
    Json(result.into())
}

async fn mount(State(driver): SharedDriver, body: Bytes) -> Json<MountpointResponse> {
    let result = match decode::<NameRequest>(&body) {
        Ok(req) => {
            tracing::debug!(volume = %req.name, caller = %req.id, "Mount requested");
            driver.mount(&req.name).await
        }
        Err(e) => Err(e),
    };
    Json(result.into())
}

async fn path(State(driver): SharedDriver, body: Bytes) -> Json<MountpointResponse> {
    let result = decode::<NameRequest>(&body).and_then(|req| driver.path(&req.name));
    Json(result.into())
}

async fn unmount(State(driver): SharedDriver, body: Bytes) -> Json<ErrorResponse> {
    let result = match decode::<NameRequest>(&body) {
        Ok(req) => {
            tracing::debug!(volume = %req.name, caller = %req.id, "Unmount requested");
            driver.unmount(&req.name).await
        }
        Err(e) => Err(e),
    };
    Json(result.into())
}

async fn get(State(driver): SharedDriver, body: Bytes) -> Json<GetResponse> {
    let result = decode::<NameRequest>(&body).and_then(|req| driver.get(&req.name));
    Json(result.into())
}

async fn list(State(driver): SharedDriver) -> Json<ListResponse> {
    Json(driver.list().into())
}

async fn capabilities(State(driver): SharedDriver) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: driver.capabilities(),
    })
}
