use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    detection::media::PreparedImage,
    domain::{ClassificationResult, Prediction},
};

use super::ServiceError;

pub const DETECT_PATH: &str = "/detect";

pub fn build_request(image: &PreparedImage) -> DetectRequest<'_> {
    DetectRequest {
        image: &image.data_url,
        url: image.source_url.as_deref(),
        width: image.width,
        height: image.height,
        timestamp: Utc::now().timestamp_millis(),
    }
}

/// Accepts both the bare detector payload and the `{success, data}` envelope
/// returned by the API gateway.
pub fn parse_response(body: &[u8]) -> Result<ClassificationResult, ServiceError> {
    let payload: DetectResponse =
        serde_json::from_slice(body).map_err(|err| ServiceError::Malformed(err.to_string()))?;

    let result = match payload {
        DetectResponse::Envelope {
            success: false,
            error,
            ..
        } => {
            return Err(ServiceError::Unavailable(
                error.unwrap_or_else(|| "detection failed".to_string()),
            ))
        }
        DetectResponse::Envelope { data: None, .. } => {
            return Err(ServiceError::Malformed("envelope without data".to_string()))
        }
        DetectResponse::Envelope {
            data: Some(body), ..
        } => body,
        DetectResponse::Bare(body) => body,
    };

    if !result.confidence.is_finite() {
        return Err(ServiceError::Malformed("confidence is not a number".to_string()));
    }

    Ok(ClassificationResult {
        predictions: result.predictions,
        confidence: result.confidence.clamp(0.0, 1.0),
    })
}

#[derive(Debug, Serialize)]
pub struct DetectRequest<'a> {
    pub image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectResponse {
    Envelope {
        success: bool,
        #[serde(default)]
        data: Option<DetectBody>,
        #[serde(default)]
        error: Option<String>,
    },
    Bare(DetectBody),
}

#[derive(Debug, Deserialize)]
struct DetectBody {
    predictions: Vec<Prediction>,
    #[serde(default)]
    confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_payload() {
        let body = br#"{"predictions":[{"className":"Porn","probability":0.9}],"confidence":0.95}"#;
        let result = parse_response(body).unwrap();
        assert_eq!(result.predictions.len(), 1);
        assert_eq!(result.predictions[0].label, "Porn");
        assert!((result.predictions[0].probability - 0.9).abs() < 1e-6);
        assert!((result.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn unwraps_gateway_envelope() {
        let body = br#"{"success":true,"data":{"predictions":[{"label":"neutral","probability":0.99}],"confidence":0.4}}"#;
        let result = parse_response(body).unwrap();
        assert_eq!(result.predictions[0].label, "neutral");
        assert!((result.confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn failed_envelope_is_unavailable() {
        let body = br#"{"success":false,"error":"NudeNet service unavailable"}"#;
        assert!(matches!(
            parse_response(body),
            Err(ServiceError::Unavailable(msg)) if msg.contains("NudeNet")
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_response(b"<html>oops</html>"),
            Err(ServiceError::Malformed(_))
        ));
        assert!(matches!(
            parse_response(br#"{"confidence":0.5}"#),
            Err(ServiceError::Malformed(_))
        ));
    }
}
