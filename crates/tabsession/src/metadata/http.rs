use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::debug;
use url::Url;

use super::{MetadataSource, ParentRecordResolver, Tab, WindowMetadata};
use crate::config::MetadataConfig;
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_value;

/// Metadata and record lookups against a JSON backend.
///
/// - `GET {base}/windows/{windowTypeId}` returns [`WindowMetadata`].
/// - `GET {base}/records/{entityName}/{recordId}` returns the record as a JSON object.
///
/// Ids are appended as percent-encoded path segments, so a request never
/// leaves `{base}`.
pub struct HttpMetadataSource {
    base: Url,
    token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for HttpMetadataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetadataSource")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpMetadataSource {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let raw = base_url.trim();
        if raw.is_empty() {
            return Err(Error::msg("metadata.base_url is empty"));
        }
        let base = Url::parse(raw)?;
        if base.cannot_be_a_base() {
            return Err(Error::msg(format!("metadata.base_url '{raw}' cannot be a base URL")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base,
            token,
            client,
        })
    }

    pub fn from_config(cfg: &MetadataConfig) -> Result<Self> {
        let Some(base) = cfg.base_url.as_deref() else {
            return Err(Error::msg(
                "metadata.source = \"http\" requires metadata.base_url",
            ));
        };
        let token = cfg
            .token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self::new(base, token, Duration::from_secs(cfg.timeout_secs))
    }

    /// `{base}/{segments...}`. Dot and empty segments are refused because
    /// the URL serializer would fold them into a different path.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        if let Some(bad) = segments.iter().find(|s| s.is_empty() || **s == "." || **s == "..") {
            return Err(Error::invalid_parameters(format!(
                "refusing path segment '{}'",
                sanitize_log_value(bad)
            )));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::msg("metadata.base_url cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, segments: &[&str], what: &str) -> Result<T> {
        let url = self.endpoint(segments)?;
        debug!(%url, "GET");
        let mut req = self.client.get(url.as_str());
        if let Some(t) = self.token.as_deref() {
            req = req.bearer_auth(t);
        }
        let res = req.send()?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(what.to_string()));
        }
        if !status.is_success() {
            return Err(Error::recovery(format!(
                "fetching {what} failed with status {status}"
            )));
        }
        Ok(res.json::<T>()?)
    }
}

impl MetadataSource for HttpMetadataSource {
    fn load_window_metadata(&self, window_id: &str) -> Result<WindowMetadata> {
        let mut meta: WindowMetadata = self.get_json(
            &["windows", window_id],
            &format!("window metadata '{}'", sanitize_log_value(window_id)),
        )?;
        for tab in &mut meta.tabs {
            if tab.window.is_empty() {
                tab.window = meta.id.clone();
            }
        }
        Ok(meta)
    }
}

impl ParentRecordResolver for HttpMetadataSource {
    fn resolve_parent_record(
        &self,
        parent_tab: &Tab,
        child_tab: &Tab,
        child_record_id: &str,
    ) -> Result<Option<String>> {
        let Some(column) = child_tab.parent_column.as_deref() else {
            return Ok(None);
        };
        if child_tab.entity_name.is_empty() {
            return Ok(None);
        }
        let record: serde_json::Value = self.get_json(
            &["records", child_tab.entity_name.as_str(), child_record_id],
            &format!(
                "record '{}' of {}",
                sanitize_log_value(child_record_id),
                child_tab.entity_name
            ),
        )?;
        let parent = match record.get(column) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        debug!(
            parent_tab = %parent_tab.id,
            child_tab = %child_tab.id,
            child_record_id = %sanitize_log_value(child_record_id),
            resolved = %sanitize_log_value(parent.as_deref().unwrap_or("<none>")),
            "resolved parent record"
        );
        Ok(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_source_requires_base_url() {
        let cfg = MetadataConfig::default();
        let err = HttpMetadataSource::from_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("base_url"), "unexpected err: {err}");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let src = HttpMetadataSource::new("http://localhost/api/", None, Duration::from_secs(1))
            .unwrap();
        let url = src.endpoint(&["windows", "143"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost/api/windows/143");
    }

    #[test]
    fn ids_are_single_encoded_segments() {
        let src =
            HttpMetadataSource::new("http://localhost/api/v1", None, Duration::from_secs(1)).unwrap();
        let url = src.endpoint(&["windows", "../../admin/users"]).unwrap();
        assert_eq!(url.path(), "/api/v1/windows/..%2F..%2Fadmin%2Fusers");

        let url = src.endpoint(&["records", "Order", "a?b#c"]).unwrap();
        assert_eq!(url.path(), "/api/v1/records/Order/a%3Fb%23c");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn dot_segments_are_refused() {
        let src = HttpMetadataSource::new("http://localhost/api", None, Duration::from_secs(1)).unwrap();
        for bad in ["..", ".", ""] {
            let err = src.endpoint(&["windows", bad]).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters, "{bad:?}");
        }
        let err = src.load_window_metadata("..").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters);
    }
}
