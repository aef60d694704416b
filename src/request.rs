use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Resource classification supplied by the host network stack alongside a
/// request. Only a subset of the variants participates in `$option`
/// gating; the rest never match a type-constrained rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    StyleSheet,
    Script,
    Image,
    Font,
    Media,
    Object,
    ObjectSubrequest,
    XmlHttpRequest,
    WebSocket,
    Popup,
    Other,
}

impl ResourceType {
    /// Maps the labels used by WebRequest-style hosts onto a resource type.
    /// Unknown labels fall back to [`ResourceType::Other`].
    pub fn from_label(label: &str) -> ResourceType {
        match label {
            "document" | "main_frame" => ResourceType::MainFrame,
            "subdocument" | "sub_frame" => ResourceType::SubFrame,
            "stylesheet" => ResourceType::StyleSheet,
            "script" => ResourceType::Script,
            "image" | "imageset" => ResourceType::Image,
            "font" => ResourceType::Font,
            "media" => ResourceType::Media,
            "object" => ResourceType::Object,
            "object-subrequest" | "object_subrequest" => ResourceType::ObjectSubrequest,
            "xmlhttprequest" | "xhr" => ResourceType::XmlHttpRequest,
            "websocket" => ResourceType::WebSocket,
            "popup" => ResourceType::Popup,
            _ => ResourceType::Other,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("failed to parse request URL: {0}")]
    UrlParseError(#[from] url::ParseError),
}

/// One outgoing request as seen by the matcher: the URL in string form,
/// its host, and the host of the page that initiated it.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub host: String,
    pub base_host: String,
    pub resource_type: ResourceType,
}

impl Request {
    pub fn new(url: &str, host: &str, base_host: &str, resource_type: ResourceType) -> Request {
        Request {
            url: url.to_owned(),
            host: host.to_owned(),
            base_host: base_host.to_owned(),
            resource_type,
        }
    }

    /// Builds a request from the initiating page URL and the request URL.
    /// An unparseable base URL yields an empty base host, mirroring a
    /// direct navigation with no initiator.
    pub fn from_urls(
        base_url: &str,
        request_url: &str,
        resource_type: ResourceType,
    ) -> Result<Request, RequestError> {
        let parsed = Url::parse(request_url)?;
        let host = parsed.host_str().unwrap_or_default().to_owned();
        let base_host = Url::parse(base_url)
            .ok()
            .and_then(|base| base.host_str().map(str::to_owned))
            .unwrap_or_default();

        Ok(Request {
            url: parsed.as_str().to_owned(),
            host,
            base_host,
            resource_type,
        })
    }
}
