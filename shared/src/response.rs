//! `{success, data?, message?}` envelopes for every HTTP answer.

use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Response};
use serde::Serialize;

use crate::error::{AppError, ErrorKind};

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn json<T: Serialize>(
    status: StatusCode,
    envelope: &Envelope<T>,
    allow_origin: &str,
) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", allow_origin)
        .body(serde_json::to_string(envelope)?.into())
        .map_err(Box::new)?)
}

pub fn success<T: Serialize>(
    status: StatusCode,
    data: T,
    message: &str,
    allow_origin: &str,
) -> Result<Response<Body>, Error> {
    let envelope = Envelope {
        success: true,
        data: Some(data),
        message: Some(message.to_string()),
    };
    json(status, &envelope, allow_origin)
}

/// Maps a service error to its status. Dependency failures are logged in
/// full and answered with a generic message.
pub fn failure(err: &AppError, allow_origin: &str) -> Result<Response<Body>, Error> {
    match err.kind() {
        ErrorKind::Dependency => tracing::error!("❌ Dependency failure: {}", err),
        ErrorKind::Authentication | ErrorKind::Authorization => {
            tracing::warn!("Rejected request: {}", err)
        }
        _ => tracing::info!("Request failed: {}", err),
    }

    let envelope: Envelope<()> = Envelope {
        success: false,
        data: None,
        message: Some(err.public_message()),
    };
    json(err.status_code(), &envelope, allow_origin)
}

pub fn not_found(allow_origin: &str) -> Result<Response<Body>, Error> {
    let envelope: Envelope<()> = Envelope {
        success: false,
        data: None,
        message: Some("Route not found.".to_string()),
    };
    json(StatusCode::NOT_FOUND, &envelope, allow_origin)
}

pub fn preflight(allow_origin: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", allow_origin)
        .header("Access-Control-Allow-Methods", "GET,POST,PUT,DELETE,OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type,Authorization")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    fn body_json(response: &Response<Body>) -> serde_json::Value {
        serde_json::from_slice(response.body().as_ref()).unwrap()
    }

    #[test]
    fn success_envelope_carries_data() {
        let response = success(
            StatusCode::CREATED,
            serde_json::json!({"id": "d-1"}),
            "Donation created.",
            "*",
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(&response);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], "d-1");
        assert_eq!(response.headers()["Access-Control-Allow-Origin"], "*");
    }

    #[test]
    fn failures_omit_data_and_hide_internals() {
        let err = AppError::from(StoreError::Backend("dynamo exploded at table agosh".into()));
        let response = failure(&err, "https://agosh.org").unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(&response);
        assert_eq!(body["success"], false);
        assert!(body.get("data").is_none());
        assert_eq!(body["message"], "Internal server error.");
    }

    #[test]
    fn authorization_failures_keep_their_message() {
        let err = AppError::forbidden("Only head office can perform this action.");
        let response = failure(&err, "*").unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(&response)["message"], "Only head office can perform this action.");
    }
}
