//! Upload collaborator.

use async_trait::async_trait;
use inquest_core::DpsLog;
use std::path::Path;

use crate::error::UploadError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Account token; `None` lets the service issue a new one.
    pub user_token: Option<String>,
    pub anonymous: bool,
}

/// Sends one log to the remote report service.
#[async_trait]
pub trait LogUploader: Send + Sync {
    async fn upload(&self, path: &Path, options: &UploadOptions) -> Result<DpsLog, UploadError>;
}

#[cfg(feature = "dps-report")]
pub use dps_report::{DpsReportUploader, DPS_REPORT_ENDPOINT};

#[cfg(feature = "dps-report")]
mod dps_report {
    use super::*;
    use inquest_core::is_log_file;
    use reqwest::multipart::{Form, Part};

    pub const DPS_REPORT_ENDPOINT: &str = "https://dps.report/uploadContent";

    /// dps.report client (multipart upload, JSON response).
    #[derive(Debug, Clone)]
    pub struct DpsReportUploader {
        client: reqwest::Client,
        endpoint: String,
    }

    impl Default for DpsReportUploader {
        fn default() -> Self {
            Self::new(DPS_REPORT_ENDPOINT)
        }
    }

    impl DpsReportUploader {
        pub fn new(endpoint: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                endpoint: endpoint.into(),
            }
        }

        fn url(&self, options: &UploadOptions) -> String {
            let mut url = format!(
                "{}?json=1&generator=ei&anonymous={}",
                self.endpoint, options.anonymous
            );
            if let Some(token) = options.user_token.as_deref().filter(|t| !t.is_empty()) {
                url.push_str("&userToken=");
                url.push_str(token);
            }
            url
        }
    }

    #[async_trait]
    impl LogUploader for DpsReportUploader {
        async fn upload(
            &self,
            path: &Path,
            options: &UploadOptions,
        ) -> Result<DpsLog, UploadError> {
            if !is_log_file(path) {
                return Err(UploadError::NotALog(path.to_path_buf()));
            }
            let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
            let response = self
                .client
                .post(self.url(options))
                .header(reqwest::header::ACCEPT, "application/json")
                .multipart(form)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(UploadError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let log: DpsLog = serde_json::from_str(&body)?;
            if let Some(error) = log.error.as_deref().filter(|e| !e.is_empty()) {
                return Err(UploadError::Remote(error.to_string()));
            }
            Ok(log)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn url_carries_token_only_when_known() {
            let uploader = DpsReportUploader::default();
            assert_eq!(
                uploader.url(&UploadOptions::default()),
                "https://dps.report/uploadContent?json=1&generator=ei&anonymous=false"
            );
            let url = uploader.url(&UploadOptions {
                user_token: Some("tok".into()),
                anonymous: true,
            });
            assert!(url.ends_with("anonymous=true&userToken=tok"));
        }

        #[tokio::test]
        async fn non_log_files_are_refused_before_any_request() {
            let uploader = DpsReportUploader::new("http://127.0.0.1:9");
            let err = uploader
                .upload(Path::new("/tmp/notes.txt"), &UploadOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, UploadError::NotALog(_)));
        }
    }
}
