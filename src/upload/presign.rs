use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{Result, UploadError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignRequest<'a> {
    file_name: &'a str,
    upload_id: &'a str,
    part_number: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresignResponse {
    presigned_url: String,
}

/// Client for the signing endpoint that hands out one upload URL per part
#[derive(Clone, Default)]
pub struct PresignClient {
    client: reqwest::Client,
}

impl PresignClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Ask `endpoint` for the presigned URL of `part_number`
    ///
    /// Sends `{fileName, uploadId, partNumber}` as JSON, with a bearer token
    /// when one is given, and expects `{"presignedUrl": "..."}` back.
    pub async fn get_part_url(
        &self,
        endpoint: &str,
        file_name: &str,
        upload_id: &str,
        part_number: u32,
        auth_token: Option<&str>,
    ) -> Result<String> {
        debug!("Requesting presigned URL for part {} of {}", part_number, file_name);

        let mut request = self.client.post(endpoint).json(&PresignRequest {
            file_name,
            upload_id,
            part_number,
        });
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::PresignRequest {
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UploadError::PresignRequest {
                message: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(UploadError::PresignRequest {
                message: format!("signing endpoint returned {}: {}", status, text),
            });
        }

        parse_presigned_url(&text)
    }
}

fn parse_presigned_url(body: &str) -> Result<String> {
    let parsed: PresignResponse =
        serde_json::from_str(body).map_err(|e| UploadError::PresignParse {
            message: e.to_string(),
        })?;

    let url = parsed.presigned_url.trim();
    if url.is_empty() {
        return Err(UploadError::PresignParse {
            message: "presignedUrl is empty".to_string(),
        });
    }
    Url::parse(url).map_err(|e| UploadError::PresignParse {
        message: format!("presignedUrl '{}' is not a valid URL: {}", url, e),
    })?;

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::stub;

    #[test]
    fn test_parse_presigned_url() {
        let url = parse_presigned_url(r#"{"presignedUrl":"https://bucket.s3.amazonaws.com/k?partNumber=1"}"#)
            .unwrap();
        assert_eq!(url, "https://bucket.s3.amazonaws.com/k?partNumber=1");

        // extra fields are fine
        assert!(parse_presigned_url(r#"{"presignedUrl":"http://x/1","expires":60}"#).is_ok());
    }

    #[test]
    fn test_parse_presigned_url_rejects_bad_bodies() {
        for body in [
            "not json",
            "{}",
            r#"{"presignedUrl": 42}"#,
            r#"{"presignedUrl": ""}"#,
            r#"{"presignedUrl": "no scheme here"}"#,
        ] {
            let err = parse_presigned_url(body).unwrap_err();
            assert_eq!(err.kind(), "PresignParseError", "body: {body}");
        }
    }

    #[tokio::test]
    async fn test_get_part_url_sends_request() {
        let server = stub::serve(|req| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let part = body["partNumber"].as_u64().unwrap();
            (200, format!(r#"{{"presignedUrl":"http://store.local/part/{}"}}"#, part))
        })
        .await;

        let url = PresignClient::new()
            .get_part_url(&server.url("/sign"), "video.mp4", "abc-123", 7, Some("s3cret"))
            .await
            .unwrap();
        assert_eq!(url, "http://store.local/part/7");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/sign");
        assert_eq!(req.header("authorization").as_deref(), Some("Bearer s3cret"));
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["fileName"], "video.mp4");
        assert_eq!(body["uploadId"], "abc-123");
        assert_eq!(body["partNumber"], 7);
    }

    #[tokio::test]
    async fn test_get_part_url_without_token() {
        let server = stub::serve(|_| (200, r#"{"presignedUrl":"http://store.local/p"}"#.into())).await;
        PresignClient::new()
            .get_part_url(&server.url("/"), "f", "u", 1, None)
            .await
            .unwrap();
        assert_eq!(server.requests()[0].header("authorization"), None);
    }

    #[tokio::test]
    async fn test_get_part_url_error_status() {
        let server = stub::serve(|_| (403, r#"{"message":"denied"}"#.into())).await;
        let err = PresignClient::new()
            .get_part_url(&server.url("/"), "f", "u", 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PresignRequestError");
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_get_part_url_unreachable() {
        let err = PresignClient::new()
            .get_part_url("http://127.0.0.1:1/sign", "f", "u", 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PresignRequestError");
    }

    #[tokio::test]
    async fn test_get_part_url_malformed_json() {
        let server = stub::serve(|_| (200, "{presignedUrl:".into())).await;
        let err = PresignClient::new()
            .get_part_url(&server.url("/"), "f", "u", 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PresignParseError");
    }
}
