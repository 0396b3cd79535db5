//! Admission and store policy evaluation.
//!
//! Two pure functions over an immutable [`FilterPolicy`]: [`admit`] decides
//! at request-start whether a request is tracked at all, and
//! [`should_store`] decides at completion whether a finalized record goes to
//! durable storage. Block rules beat allow rules; anything unparseable is
//! rejected.

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use webtap_core_types::{ResourceType, TrafficRecord};

/// Immutable admission/storage policy for one capture session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterPolicy {
    /// When non-empty, only these domains (and their subdomains) are admitted.
    pub allowed_domains: Vec<String>,
    /// Always rejected, even when also present in `allowed_domains`.
    pub blocked_domains: Vec<String>,
    /// When non-empty, only these resource types are admitted.
    pub allowed_resource_types: Vec<ResourceType>,
    /// URL-path extensions rejected at admission, without the leading dot.
    pub blocked_extensions: Vec<String>,
    /// Path segments that mark static-asset routes, e.g. `/static/`.
    pub blocked_path_segments: Vec<String>,
    /// Response bodies are truncated to this many bytes.
    pub max_response_body_bytes: usize,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            allowed_resource_types: vec![
                ResourceType::Xhr,
                ResourceType::Fetch,
                ResourceType::Document,
            ],
            blocked_extensions: default_blocked_extensions(),
            blocked_path_segments: default_blocked_path_segments(),
            max_response_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Static-asset extensions excluded from capture by default.
pub fn default_blocked_extensions() -> Vec<String> {
    [
        // images
        "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico", "tiff", "tif",
        // styles and scripts
        "css", "js", "jsx", "ts", "tsx", "scss", "sass", "less",
        // fonts
        "woff", "woff2", "ttf", "eot", "otf",
        // audio/video
        "mp3", "mp4", "avi", "mov", "wmv", "flv", "webm", "ogg", "wav",
        // documents
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
        // archives
        "zip", "rar", "7z", "tar", "gz", "bz2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Path segments that mark conventional static-asset routes.
pub fn default_blocked_path_segments() -> Vec<String> {
    [
        "/static/", "/assets/", "/public/", "/dist/", "/build/", "/css/", "/js/", "/img/",
        "/images/", "/fonts/", "/media/",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Case-insensitive suffix match on host label boundaries:
/// `example.com` matches `example.com` and `api.example.com`,
/// never `notexample.com`.
fn domain_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

fn path_extension(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}

/// Admission decision at request-start. Pure function of
/// (URL, resource type, policy).
pub fn admit(url: &str, resource_type: ResourceType, policy: &FilterPolicy) -> bool {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(err) => {
            trace!(target: "tap-policy", %url, %err, "rejecting unparseable url");
            return false;
        }
    };
    let host = match parsed.host_str() {
        Some(host) => host.to_ascii_lowercase(),
        None => return false,
    };

    if policy
        .blocked_domains
        .iter()
        .any(|d| domain_matches(&host, d))
    {
        return false;
    }
    if !policy.allowed_domains.is_empty()
        && !policy
            .allowed_domains
            .iter()
            .any(|d| domain_matches(&host, d))
    {
        return false;
    }

    if !policy.allowed_resource_types.is_empty()
        && !policy.allowed_resource_types.contains(&resource_type)
    {
        return false;
    }

    let path = parsed.path().to_ascii_lowercase();
    if let Some(ext) = path_extension(&path) {
        if policy
            .blocked_extensions
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(ext))
        {
            return false;
        }
    }
    if policy
        .blocked_path_segments
        .iter()
        .any(|segment| path.contains(segment.as_str()))
    {
        return false;
    }

    true
}

/// Store decision at completion. Failed captures are observational only and
/// never persisted.
pub fn should_store(record: &TrafficRecord, policy: &FilterPolicy) -> bool {
    if record.failed || !record.completed {
        return false;
    }
    if !policy.allowed_resource_types.is_empty()
        && !policy.allowed_resource_types.contains(&record.resource_type)
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use webtap_core_types::{content_hash, RequestId, SessionId, TargetId};

    fn policy() -> FilterPolicy {
        FilterPolicy::default()
    }

    fn record(resource_type: ResourceType, completed: bool, failed: bool) -> TrafficRecord {
        TrafficRecord {
            session: SessionId("s".into()),
            target: TargetId("t".into()),
            request_id: RequestId("r".into()),
            method: "GET".into(),
            url: "https://api.example.com/data".into(),
            request_headers: HashMap::new(),
            request_body: None,
            page_url: None,
            page_title: None,
            resource_type,
            initiator: None,
            status: completed.then_some(200),
            status_text: None,
            response_headers: HashMap::new(),
            mime_type: None,
            body: None,
            body_truncated: false,
            original_body_size: 0,
            fetch_error: None,
            completed,
            failed,
            error_text: None,
            content_hash: content_hash("GET", "https://api.example.com/data", None),
            started_at: chrono::Utc::now(),
            duration_ms: 1,
        }
    }

    #[test]
    fn domain_suffix_matches_subdomains_only() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("api.example.com", "example.com"));
        assert!(!domain_matches("notexample.com", "example.com"));
    }

    #[test]
    fn admits_allowed_xhr() {
        assert!(admit(
            "https://api.x.com/data",
            ResourceType::Xhr,
            &policy()
        ));
    }

    #[test]
    fn rejects_blocked_extension_regardless_of_type() {
        assert!(!admit(
            "https://x.com/logo.png",
            ResourceType::Image,
            &policy()
        ));
        // Extension block applies even when the resource type would pass.
        assert!(!admit(
            "https://x.com/logo.PNG",
            ResourceType::Xhr,
            &policy()
        ));
    }

    #[test]
    fn rejects_disallowed_resource_type() {
        assert!(!admit(
            "https://x.com/pixel",
            ResourceType::Image,
            &policy()
        ));
    }

    #[test]
    fn block_beats_allow_for_same_domain() {
        let mut policy = policy();
        policy.allowed_domains = vec!["example.com".into()];
        policy.blocked_domains = vec!["internal.example.com".into()];
        assert!(admit(
            "https://api.example.com/v1",
            ResourceType::Xhr,
            &policy
        ));
        assert!(!admit(
            "https://internal.example.com/v1",
            ResourceType::Xhr,
            &policy
        ));
    }

    #[test]
    fn allow_list_excludes_other_domains() {
        let mut policy = policy();
        policy.allowed_domains = vec!["example.com".into()];
        assert!(!admit("https://other.com/v1", ResourceType::Xhr, &policy));
    }

    #[test]
    fn rejects_static_path_segments() {
        assert!(!admit(
            "https://x.com/static/app-data",
            ResourceType::Xhr,
            &policy()
        ));
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(!admit("not a url", ResourceType::Xhr, &policy()));
    }

    #[test]
    fn ignores_query_when_extracting_extension() {
        assert!(!admit(
            "https://x.com/logo.png?v=2",
            ResourceType::Xhr,
            &policy()
        ));
    }

    #[test]
    fn failed_records_are_never_stored() {
        assert!(!should_store(
            &record(ResourceType::Xhr, false, true),
            &policy()
        ));
    }

    #[test]
    fn completed_allowed_record_is_stored() {
        assert!(should_store(
            &record(ResourceType::Xhr, true, false),
            &policy()
        ));
    }

    #[test]
    fn disallowed_type_is_skipped_at_completion() {
        assert!(!should_store(
            &record(ResourceType::Image, true, false),
            &policy()
        ));
    }
}
