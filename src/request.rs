use std::collections::BTreeMap;
use log::debug;
use reqwest::{Client, Method};
use serde_json::Value;
use crate::{config::CommandSpec, error::WebhookError};

/// What came back from the device, read fully so it can be evaluated after the connection is gone.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    /// Lower-cased header names. Values that aren't visible ASCII are left out.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl WebhookResponse {
    /// Anything below 400 counts as success, redirects included.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// The body a command is sent with.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Raw(String),
}

impl RequestBody {
    /// Only POST and PUT carry a payload. It goes out as JSON when it parses as JSON, verbatim otherwise.
    pub fn for_command(spec: &CommandSpec) -> RequestBody {
        let payload = match spec.payload.as_deref() {
            Some(payload) if !payload.is_empty() => payload,
            _ => return RequestBody::Empty,
        };
        if spec.method != "POST" && spec.method != "PUT" {
            return RequestBody::Empty;
        }

        match serde_json::from_str(payload) {
            Ok(Value::Null) => RequestBody::Empty,
            Ok(json) => RequestBody::Json(json),
            Err(_) => RequestBody::Raw(payload.to_string()),
        }
    }
}

/// The target of a command: the address with the path glued on, nothing else.
pub fn resolve_url(address: &str, spec: &CommandSpec) -> String {
    format!("{}{}", address, spec.path.as_deref().unwrap_or(""))
}

/// Issues the request described by `spec` against `address`.
/// Non-2xx statuses are returned like any other response; only transport failures are errors.
pub async fn execute(client: &Client, address: &str, spec: &CommandSpec) -> Result<WebhookResponse, WebhookError> {
    let method = Method::from_bytes(spec.method.to_uppercase().as_bytes())
        .map_err(|_| WebhookError::InvalidMethod(spec.method.clone()))?;
    let url = resolve_url(address, spec);
    debug!("{} {}", method, url);

    let request = client.request(method, url);
    let request = match RequestBody::for_command(spec) {
        RequestBody::Empty => request,
        RequestBody::Json(json) => request.json(&json),
        RequestBody::Raw(raw) => request.body(raw),
    };

    let resp = request.send().await?;
    let status = resp.status().as_u16();
    let headers = resp.headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let body = resp.text().await?;
    Ok(WebhookResponse { status, headers, body })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers::{body_json, body_string, method, path}, Mock, MockServer, ResponseTemplate};
    use super::*;

    fn command(method: &str, path: Option<&str>, payload: Option<&str>) -> CommandSpec {
        CommandSpec {
            method: method.to_string(),
            path: path.map(str::to_string),
            payload: payload.map(str::to_string),
        }
    }

    #[test]
    fn url_is_plain_concatenation() {
        assert_eq!(resolve_url("http://x/", &command("GET", Some("on"), None)), "http://x/on");
        assert_eq!(resolve_url("http://x", &command("GET", Some("on"), None)), "http://xon");
        assert_eq!(resolve_url("http://x/", &command("GET", Some("/on"), None)), "http://x//on");
        assert_eq!(resolve_url("http://x/", &command("GET", None, None)), "http://x/");
    }

    #[test]
    fn write_verbs_send_parsed_json() {
        assert_eq!(RequestBody::for_command(&command("POST", None, Some("{\"v\":1}"))), RequestBody::Json(json!({ "v": 1 })));
        assert_eq!(RequestBody::for_command(&command("PUT", None, Some("[1, 2]"))), RequestBody::Json(json!([1, 2])));
    }

    #[test]
    fn unparseable_payload_is_sent_verbatim() {
        assert_eq!(RequestBody::for_command(&command("POST", None, Some("on=1&id=0"))), RequestBody::Raw("on=1&id=0".to_string()));
        assert_eq!(RequestBody::for_command(&command("PUT", None, Some("{broken"))), RequestBody::Raw("{broken".to_string()));
    }

    #[test]
    fn other_verbs_and_empty_payloads_send_nothing() {
        assert_eq!(RequestBody::for_command(&command("GET", None, Some("{\"v\":1}"))), RequestBody::Empty);
        assert_eq!(RequestBody::for_command(&command("DELETE", None, Some("raw"))), RequestBody::Empty);
        assert_eq!(RequestBody::for_command(&command("post", None, Some("{\"v\":1}"))), RequestBody::Empty);
        assert_eq!(RequestBody::for_command(&command("POST", None, Some(""))), RequestBody::Empty);
        assert_eq!(RequestBody::for_command(&command("POST", None, None)), RequestBody::Empty);
    }

    #[test]
    fn null_payload_sends_nothing() {
        assert_eq!(RequestBody::for_command(&command("POST", None, Some("null"))), RequestBody::Empty);
        assert_eq!(RequestBody::for_command(&command("PUT", None, Some(" null "))), RequestBody::Empty);
    }

    #[test]
    fn success_covers_redirects() {
        let status = |status| WebhookResponse { status, headers: BTreeMap::new(), body: String::new() };

        assert!(status(200).is_success());
        assert!(status(302).is_success());
        assert!(!status(404).is_success());
        assert!(!status(500).is_success());
    }

    #[tokio::test]
    async fn posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/on"))
            .and(body_json(json!({ "v": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_string("done").insert_header("X-Relay-State", "closed"))
            .expect(1)
            .mount(&server)
            .await;

        let resp = execute(&Client::new(), &server.uri(), &command("POST", Some("/on"), Some("{\"v\":1}"))).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "done");
        assert_eq!(resp.headers.get("x-relay-state").map(String::as_str), Some("closed"));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn puts_raw_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/relay"))
            .and(body_string("turn=on"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let resp = execute(&Client::new(), &server.uri(), &command("PUT", Some("/relay"), Some("turn=on"))).await.unwrap();

        assert_eq!(resp.status, 204);
        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("content-type").is_none());
    }

    #[tokio::test]
    async fn get_sends_no_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        execute(&Client::new(), &server.uri(), &command("GET", Some("/state"), Some("{\"v\":1}"))).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].body.is_empty());
    }

    #[tokio::test]
    async fn error_statuses_are_not_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let resp = execute(&Client::new(), &server.uri(), &command("GET", None, None)).await.unwrap();

        assert_eq!(resp.status, 500);
        assert_eq!(resp.body, "boom");
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn unreachable_host_is_request_failed() {
        let err = execute(&Client::new(), "http://127.0.0.1:1", &command("GET", Some("/state"), None)).await.unwrap_err();

        assert!(matches!(err, WebhookError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn empty_method_is_rejected() {
        let err = execute(&Client::new(), "http://127.0.0.1:1", &command("", None, None)).await.unwrap_err();

        assert!(matches!(err, WebhookError::InvalidMethod(m) if m.is_empty()));
    }
}
