// ABOUTME: E2B provider for remote code-execution sandboxes
// ABOUTME: Control plane over the E2B REST API, commands and files over the in-sandbox envd daemon

use super::{
    CommandOptions, OutputBuffer, ProviderError, Result, SandboxHandle, SandboxProvider,
    StreamType,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{Stream, StreamExt};
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Port the envd daemon listens on inside every sandbox
const ENVD_PORT: u16 = 49983;
/// Linux user commands and file operations run as
const DEFAULT_USER: &str = "user";
/// Connect streaming envelope flag marking the trailing end-of-stream message
const END_STREAM_FLAG: u8 = 0x02;

pub const MISSING_API_KEY_MESSAGE: &str =
    "E2B_API_KEY is not set in environment variables. Please add it to your .env file.";

#[derive(Debug, Clone)]
pub struct E2bConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub domain: String,
    /// Overrides the per-sandbox envd address; used against local fakes.
    pub envd_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for E2bConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://api.e2b.dev".to_string(),
            domain: "e2b.app".to_string(),
            envd_url: None,
            request_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "templateID", default)]
    template_id: Option<String>,
    #[serde(default)]
    envd_access_token: Option<String>,
}

impl From<SandboxResponse> for SandboxHandle {
    fn from(response: SandboxResponse) -> Self {
        SandboxHandle {
            sandbox_id: response.sandbox_id,
            template_id: response.template_id,
            access_token: response.envd_access_token,
        }
    }
}

/// E2B provider for secure sandboxes
pub struct E2bProvider {
    client: Client,
    config: E2bConfig,
}

impl E2bProvider {
    pub fn new(config: E2bConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Configuration(MISSING_API_KEY_MESSAGE.to_string()))
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn envd(&self, handle: &SandboxHandle, path: &str) -> String {
        match &self.config.envd_url {
            Some(url) => format!("{}{}", url.trim_end_matches('/'), path),
            None => format!("https://{}{}", self.host(handle, ENVD_PORT), path),
        }
    }

    fn with_access_token(request: RequestBuilder, handle: &SandboxHandle) -> RequestBuilder {
        match &handle.access_token {
            Some(token) => request.header("X-Access-Token", token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_decode() {
        ProviderError::Protocol(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Map a non-success control-plane status to a classified error
async fn control_plane_error(response: Response, sandbox_id: &str) -> ProviderError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Configuration(format!("E2B rejected the API key ({}): {}", status, body))
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound(sandbox_id.to_string()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            ProviderError::Transport(format!("E2B API returned {}: {}", status, body))
        }
        s if s.is_server_error() => {
            ProviderError::Transport(format!("E2B API returned {}: {}", status, body))
        }
        _ => ProviderError::Protocol(format!("E2B API returned {}: {}", status, body)),
    }
}

/// Map a non-success envd file status to a classified error
async fn file_error(response: Response, path: &str) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED => {
            ProviderError::Configuration(format!("envd rejected the access token: {}", body))
        }
        StatusCode::BAD_GATEWAY => ProviderError::NotFound(format!("sandbox for {}", path)),
        s if s.is_server_error() && s != StatusCode::INSUFFICIENT_STORAGE => {
            ProviderError::Transport(format!("envd returned {} for {}: {}", status, path, body))
        }
        StatusCode::NOT_FOUND => ProviderError::FileIo(format!("{}: no such file or directory", path)),
        _ => ProviderError::FileIo(format!("{} ({}): {}", path, status, body)),
    }
}

/// Frame a message in the Connect streaming envelope: flags, big-endian length, payload
fn envelope(flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.push(flags);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[derive(Debug, Default, Deserialize)]
struct StartResponse {
    #[serde(default)]
    event: Option<ProcessEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessEvent {
    #[serde(default)]
    start: Option<StartEvent>,
    #[serde(default)]
    data: Option<DataEvent>,
    #[serde(default)]
    end: Option<EndEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct StartEvent {
    #[serde(default)]
    pid: u32,
}

#[derive(Debug, Default, Deserialize)]
struct DataEvent {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndEvent {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EndStreamMessage {
    #[serde(default)]
    error: Option<ConnectError>,
}

#[derive(Debug, Default, Deserialize)]
struct ConnectError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
enum ProcessItem {
    Started(u32),
    Output(StreamType, String),
    Ended { exit_code: i32, error: Option<String> },
}

/// Incremental decoder over the enveloped `process.Process/Start` response stream
struct ProcessStream<S> {
    inner: S,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl<S, B> ProcessStream<S>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            exhausted: false,
        }
    }

    fn take_frame(&mut self) -> Option<(u8, Vec<u8>)> {
        if self.buffer.len() < 5 {
            return None;
        }
        let len = u32::from_be_bytes([self.buffer[1], self.buffer[2], self.buffer[3], self.buffer[4]])
            as usize;
        if self.buffer.len() < 5 + len {
            return None;
        }
        let flags = self.buffer[0];
        let payload = self.buffer[5..5 + len].to_vec();
        self.buffer.drain(..5 + len);
        Some((flags, payload))
    }

    async fn next_item(&mut self) -> Result<Option<ProcessItem>> {
        loop {
            while let Some((flags, payload)) = self.take_frame() {
                if flags & END_STREAM_FLAG != 0 {
                    let trailer: EndStreamMessage = if payload.is_empty() {
                        EndStreamMessage::default()
                    } else {
                        serde_json::from_slice(&payload)
                            .map_err(|e| ProviderError::Protocol(e.to_string()))?
                    };
                    if let Some(err) = trailer.error {
                        return Err(ProviderError::Command(format!("{}: {}", err.code, err.message)));
                    }
                    continue;
                }

                let message: StartResponse = serde_json::from_slice(&payload)
                    .map_err(|e| ProviderError::Protocol(e.to_string()))?;
                if let Some(item) = message.event.and_then(decode_event).transpose()? {
                    return Ok(Some(item));
                }
            }

            if self.exhausted {
                if !self.buffer.is_empty() {
                    return Err(ProviderError::Protocol(
                        "process stream ended mid-frame".to_string(),
                    ));
                }
                return Ok(None);
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => return Err(transport_error(e)),
                None => self.exhausted = true,
            }
        }
    }
}

fn decode_event(event: ProcessEvent) -> Option<Result<ProcessItem>> {
    if let Some(start) = event.start {
        return Some(Ok(ProcessItem::Started(start.pid)));
    }
    if let Some(data) = event.data {
        let (stream, encoded) = match (data.stdout, data.stderr) {
            (Some(out), _) => (StreamType::Stdout, out),
            (None, Some(err)) => (StreamType::Stderr, err),
            (None, None) => return None,
        };
        return Some(
            STANDARD
                .decode(encoded.as_bytes())
                .map(|bytes| ProcessItem::Output(stream, String::from_utf8_lossy(&bytes).into_owned()))
                .map_err(|e| ProviderError::Protocol(format!("invalid output chunk: {}", e))),
        );
    }
    event.end.map(|end| {
        Ok(ProcessItem::Ended {
            exit_code: end.exit_code,
            error: end.error,
        })
    })
}

/// Keep reading a detached process so the stream is not torn down under it
async fn drain_background<S, B>(mut process: ProcessStream<S>, sandbox_id: String)
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    loop {
        match process.next_item().await {
            Ok(Some(ProcessItem::Output(stream, text))) => {
                debug!(sandbox_id = %sandbox_id, ?stream, "background: {}", text.trim_end());
            }
            Ok(Some(ProcessItem::Ended { exit_code, .. })) => {
                debug!(sandbox_id = %sandbox_id, exit_code, "background command exited");
                return;
            }
            Ok(Some(ProcessItem::Started(_))) => {}
            Ok(None) => return,
            Err(e) => {
                debug!(sandbox_id = %sandbox_id, "background command stream closed: {}", e);
                return;
            }
        }
    }
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    fn name(&self) -> &str {
        "e2b"
    }

    fn check_credentials(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    async fn create(&self, template_id: &str) -> Result<SandboxHandle> {
        let api_key = self.api_key()?;

        info!("Creating E2B sandbox from template '{}'", template_id);

        let response = self
            .send(
                self.client
                    .post(self.api("/sandboxes"))
                    .header("X-API-Key", api_key)
                    .json(&json!({ "templateID": template_id })),
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND || response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Configuration(format!(
                "template '{}' was rejected: {}",
                template_id, body
            )));
        }
        if !response.status().is_success() {
            return Err(control_plane_error(response, template_id).await);
        }

        let created: SandboxResponse = response.json().await.map_err(transport_error)?;
        info!(sandbox_id = %created.sandbox_id, "E2B sandbox created");
        Ok(created.into())
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        let api_key = self.api_key()?;

        let response = self
            .send(
                self.client
                    .get(self.api(&format!("/sandboxes/{}", sandbox_id)))
                    .header("X-API-Key", api_key),
            )
            .await?;

        if !response.status().is_success() {
            return Err(control_plane_error(response, sandbox_id).await);
        }

        let detail: SandboxResponse = response.json().await.map_err(transport_error)?;
        Ok(detail.into())
    }

    async fn set_timeout(&self, handle: &SandboxHandle, timeout: Duration) -> Result<()> {
        let api_key = self.api_key()?;

        let response = self
            .send(
                self.client
                    .post(self.api(&format!("/sandboxes/{}/timeout", handle.sandbox_id)))
                    .header("X-API-Key", api_key)
                    .json(&json!({ "timeout": timeout.as_secs() })),
            )
            .await?;

        if !response.status().is_success() {
            return Err(control_plane_error(response, &handle.sandbox_id).await);
        }
        Ok(())
    }

    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
        options: &CommandOptions,
        output: &mut OutputBuffer,
    ) -> Result<Option<i32>> {
        let mut process = json!({
            "cmd": "/bin/bash",
            "args": ["-l", "-c", command],
            "envs": options.envs,
        });
        if let Some(cwd) = &options.cwd {
            process["cwd"] = json!(cwd);
        }
        let payload = serde_json::to_vec(&json!({ "process": process }))
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;

        let request = self
            .client
            .post(self.envd(handle, "/process.Process/Start"))
            .header("Content-Type", "application/connect+json")
            .header("Connect-Protocol-Version", "1")
            .header(
                "Authorization",
                format!("Basic {}", STANDARD.encode(format!("{}:", DEFAULT_USER))),
            )
            .body(envelope(0, &payload));
        let response = self
            .send(Self::with_access_token(request, handle))
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if status == StatusCode::BAD_GATEWAY || status == StatusCode::NOT_FOUND {
                ProviderError::NotFound(handle.sandbox_id.clone())
            } else if status.is_server_error() {
                ProviderError::Transport(format!("envd returned {}: {}", status, body))
            } else {
                ProviderError::Command(format!("envd returned {}: {}", status, body))
            });
        }

        let mut stream = ProcessStream::new(Box::pin(response.bytes_stream()));
        let mut exit_code = None;

        while let Some(item) = stream.next_item().await? {
            match item {
                ProcessItem::Started(pid) => {
                    debug!(sandbox_id = %handle.sandbox_id, pid, "process started");
                    if options.background {
                        tokio::spawn(drain_background(stream, handle.sandbox_id.clone()));
                        return Ok(None);
                    }
                }
                ProcessItem::Output(kind, text) => {
                    debug!(sandbox_id = %handle.sandbox_id, ?kind, "{}", text.trim_end());
                    output.push(kind, &text);
                }
                ProcessItem::Ended { exit_code: code, error } => {
                    if let Some(error) = error.filter(|e| !e.is_empty()) {
                        warn!(sandbox_id = %handle.sandbox_id, "process ended with error: {}", error);
                    }
                    exit_code = Some(code);
                }
            }
        }

        match exit_code {
            Some(code) => Ok(Some(code)),
            None if options.background => Ok(None),
            None => Err(ProviderError::Protocol(
                "process stream closed without an end event".to_string(),
            )),
        }
    }

    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &[u8]) -> Result<()> {
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(content.to_vec()).file_name(path.to_string()),
        );

        let request = self
            .client
            .post(self.envd(handle, "/files"))
            .query(&[("path", path), ("username", DEFAULT_USER)])
            .multipart(form);
        let response = self.send(Self::with_access_token(request, handle)).await?;

        if !response.status().is_success() {
            return Err(file_error(response, path).await);
        }
        Ok(())
    }

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>> {
        let request = self
            .client
            .get(self.envd(handle, "/files"))
            .query(&[("path", path), ("username", DEFAULT_USER)]);
        let response = self.send(Self::with_access_token(request, handle)).await?;

        if !response.status().is_success() {
            return Err(file_error(response, path).await);
        }

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(transport_error)
    }

    fn host(&self, handle: &SandboxHandle, port: u16) -> String {
        format!("{}-{}.{}", port, handle.sandbox_id, self.config.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(api_key: Option<&str>) -> E2bProvider {
        E2bProvider::new(E2bConfig {
            api_key: api_key.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = provider(None).check_credentials().unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.to_string().contains("not set in environment variables"));
    }

    #[test]
    fn test_host_uses_port_prefix() {
        let handle = SandboxHandle::new("i4abc");
        assert_eq!(provider(Some("k")).host(&handle, 3000), "3000-i4abc.e2b.app");
    }

    #[test]
    fn test_envelope_layout() {
        let frame = envelope(0, b"{}");
        assert_eq!(frame, vec![0, 0, 0, 0, 2, b'{', b'}']);
    }

    #[tokio::test]
    async fn test_process_stream_splits_frames_across_chunks() {
        let start = envelope(0, br#"{"event":{"start":{"pid":7}}}"#);
        let data = envelope(
            0,
            format!(r#"{{"event":{{"data":{{"stdout":"{}"}}}}}}"#, STANDARD.encode("hi\n")).as_bytes(),
        );
        let end = envelope(0, br#"{"event":{"end":{"exitCode":3,"exited":true}}}"#);
        let mut all = Vec::new();
        all.extend(start);
        all.extend(data);
        all.extend(end);
        all.extend(envelope(END_STREAM_FLAG, b"{}"));

        // Deliver in awkward 3-byte chunks
        let chunks: Vec<std::result::Result<Vec<u8>, reqwest::Error>> =
            all.chunks(3).map(|c| Ok(c.to_vec())).collect();
        let mut stream = ProcessStream::new(futures::stream::iter(chunks));

        assert!(matches!(
            stream.next_item().await.unwrap(),
            Some(ProcessItem::Started(7))
        ));
        match stream.next_item().await.unwrap() {
            Some(ProcessItem::Output(StreamType::Stdout, text)) => assert_eq!(text, "hi\n"),
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(matches!(
            stream.next_item().await.unwrap(),
            Some(ProcessItem::Ended { exit_code: 3, .. })
        ));
        assert!(stream.next_item().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_stream_error_is_command_error() {
        let trailer = envelope(
            END_STREAM_FLAG,
            br#"{"error":{"code":"invalid_argument","message":"bad cwd"}}"#,
        );
        let chunks: Vec<std::result::Result<Vec<u8>, reqwest::Error>> = vec![Ok(trailer)];
        let mut stream = ProcessStream::new(futures::stream::iter(chunks));

        let err = stream.next_item().await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Command("invalid_argument: bad cwd".to_string())
        );
    }
}
