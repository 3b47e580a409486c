use axum::{extract::rejection::JsonRejection, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::masking::{apply_mask, detect as detect_kind};
use crate::middleware::gate::Caller;

#[derive(Debug, Serialize, Deserialize)]
pub struct MaskRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaskResponse {
    pub masked: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct DetectionRequest {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| {
            tracing::debug!("json rejection: {}", rejection.body_text());
            AppError::MalformedInput("Invalid JSON".into())
        })
}

/// POST /mask
pub async fn mask(
    payload: Result<Json<MaskRequest>, JsonRejection>,
) -> Result<Json<MaskResponse>, AppError> {
    let req = body(payload)?;
    let masked = apply_mask(&req.kind, &req.value).ok_or_else(|| {
        AppError::MalformedInput("Invalid value for the specified type".into())
    })?;
    Ok(Json(MaskResponse { masked }))
}

/// POST /bulk: paid plans only. Entries that fail to mask come back empty.
pub async fn bulk(
    Extension(caller): Extension<Caller>,
    payload: Result<Json<Vec<MaskRequest>>, JsonRejection>,
) -> Result<Json<Vec<MaskResponse>>, AppError> {
    if !caller.record.plan.is_paid() {
        return Err(AppError::Forbidden(
            "Bulk masking is available only for Pro or Ultra plans",
        ));
    }

    let reqs = body(payload)?;
    let resp = reqs
        .iter()
        .map(|req| MaskResponse {
            masked: apply_mask(&req.kind, &req.value).unwrap_or_default(),
        })
        .collect();
    Ok(Json(resp))
}

/// POST /validate
pub async fn validate(
    payload: Result<Json<MaskRequest>, JsonRejection>,
) -> Result<Json<ValidationResponse>, AppError> {
    let req = body(payload)?;
    Ok(Json(ValidationResponse {
        valid: apply_mask(&req.kind, &req.value).is_some(),
    }))
}

/// POST /detect: `{"type": ...}`, or `{}` when nothing matches.
pub async fn detect(
    payload: Result<Json<DetectionRequest>, JsonRejection>,
) -> Result<Json<DetectionResponse>, AppError> {
    let req = body(payload)?;
    Ok(Json(DetectionResponse {
        kind: detect_kind(&req.value).map(|k| k.as_str()),
    }))
}
