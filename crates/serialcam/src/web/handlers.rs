use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::receiver::SerialStatus;
use crate::storage::CatalogStats;

use super::{AppError, AppState};

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    port: Option<String>,
    baudrate: Option<u32>,
}

pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Image Processing API is running",
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

pub async fn list_images(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.store.list().await?))
}

pub async fn image_stats(State(state): State<Arc<AppState>>) -> Result<Json<CatalogStats>, AppError> {
    Ok(Json(state.store.stats()?))
}

pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let bytes = state.store.read(&name).await?;
    Ok(([(CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

pub async fn connect(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
) -> Result<Json<MessageResponse>, AppError> {
    let port = params
        .port
        .unwrap_or_else(|| state.config.serial.port.clone());
    let baud_rate = params.baudrate.unwrap_or(state.config.serial.baud_rate);

    state
        .serial
        .lock()
        .await
        .connect(&port, baud_rate)
        .await
        .map_err(|err| AppError::internal(format!("Failed to connect to serial port: {err}")))?;

    info!("Connected to {} at {} baud", port, baud_rate);
    Ok(Json(MessageResponse {
        message: "Successfully connected to serial port",
    }))
}

pub async fn disconnect(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.serial.lock().await.disconnect().await;
    Json(MessageResponse {
        message: "Disconnected from serial port",
    })
}

pub async fn serial_status(State(state): State<Arc<AppState>>) -> Json<SerialStatus> {
    Json(state.serial.lock().await.status())
}
