use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::{
    config::ClassifierConfig, detection::media::PreparedImage, domain::ClassificationResult,
};

use super::{
    inference::{build_request, parse_response, DETECT_PATH},
    ClassificationService, ServiceError,
};

#[derive(Clone)]
pub struct HttpClassifier {
    http: Client,
    config: ClassifierConfig,
}

impl HttpClassifier {
    pub fn new(http: Client, config: ClassifierConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.config.base_url, DETECT_PATH)
    }
}

#[async_trait]
impl ClassificationService for HttpClassifier {
    async fn classify(&self, image: &PreparedImage) -> Result<ClassificationResult, ServiceError> {
        let request = build_request(image);
        let mut builder = self
            .http
            .post(self.endpoint())
            .timeout(self.config.timeout)
            .json(&request);
        if let Some(token) = &self.config.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ServiceError::RateLimited),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                return Err(ServiceError::Unavailable(response.status().to_string()))
            }
            status if !status.is_success() => return Err(ServiceError::Status(status.as_u16())),
            _ => {}
        }

        let body = response.bytes().await.map_err(map_transport_error)?;
        parse_response(&body)
    }
}

fn map_transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_decode() {
        ServiceError::Malformed(err.to_string())
    } else {
        ServiceError::Unavailable(err.to_string())
    }
}
