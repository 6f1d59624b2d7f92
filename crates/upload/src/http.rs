//! HTTP adapters for the control plane and the data plane.
//!
//! Async clients built on `reqwest`. The control plane authenticates with
//! a bearer token; part targets are presigned, so the data plane sends no
//! credentials of its own.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bush_protocol::constants::{
    CHECKSUM_HEADER, ETAG_HEADER, complete_path, confirm_path, multipart_path,
    multipart_session_path, part_targets_path, uploads_path,
};
use bush_protocol::{
    CompleteMultipartRequest, CompletedPartEntry, InitMultipartRequest, InitMultipartResponse,
    PartTargetsRequest, PartTargetsResponse, RegisterUploadRequest, RegisterUploadResponse,
};
use bush_transfer::{CompletedPart, checksum_bytes};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::BoxFuture;
use crate::control_plane::ControlPlaneClient;
use crate::error::UploadError;
use crate::transport::ChunkTransport;
use crate::types::{PartReceipt, PartTarget, RegisteredUpload, RemoteFile, UploadDescriptor};

fn transport_error(e: reqwest::Error) -> UploadError {
    UploadError::Transport(e.to_string())
}

/// Turns a non-success response into a transport error carrying its body.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(UploadError::Transport(format!("{status}: {body}")))
}

// ---------------------------------------------------------------------------
// HttpControlPlane
// ---------------------------------------------------------------------------

/// Control plane spoken over JSON/HTTP.
pub struct HttpControlPlane {
    http: reqwest::Client,
    base_url: String,
}

impl HttpControlPlane {
    /// Creates a client for `base_url` authenticating with `api_token`.
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, UploadError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_token}"))
                .map_err(|_| UploadError::Validation("invalid API token".into()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, UploadError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        resp.json().await.map_err(transport_error)
    }

    async fn post_no_reply<B>(&self, path: &str, body: Option<&B>) -> Result<(), UploadError>
    where
        B: Serialize + ?Sized,
    {
        let mut req = self.http.post(self.url(path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(transport_error)?;
        check_status(resp).await?;
        Ok(())
    }
}

impl ControlPlaneClient for HttpControlPlane {
    fn register_upload<'a>(
        &'a self,
        descriptor: &'a UploadDescriptor,
    ) -> BoxFuture<'a, Result<RegisteredUpload, UploadError>> {
        Box::pin(async move {
            let req = RegisterUploadRequest {
                namespace_id: descriptor.namespace_id.clone(),
                file_name: descriptor.file.file_name.clone(),
                file_size: descriptor.file.file_size,
                mime_type: descriptor.file.mime_type.clone(),
                total_chunks: descriptor.total_chunks,
            };
            let resp: RegisterUploadResponse = self
                .post_json(&uploads_path(&descriptor.namespace_id), &req)
                .await?;
            Ok(RegisteredUpload {
                remote_file_id: resp.file_id,
                storage_key: resp.storage_key,
                single_shot_target: resp.upload_url,
            })
        })
    }

    fn init_multipart<'a>(
        &'a self,
        file: &'a RemoteFile,
        total_chunks: u32,
    ) -> BoxFuture<'a, Result<String, UploadError>> {
        Box::pin(async move {
            let resp: InitMultipartResponse = self
                .post_json(
                    &multipart_path(&file.namespace_id, &file.remote_file_id),
                    &InitMultipartRequest { total_chunks },
                )
                .await?;
            Ok(resp.upload_id)
        })
    }

    fn get_part_targets<'a>(
        &'a self,
        file: &'a RemoteFile,
        upload_id: &'a str,
        total_chunks: u32,
    ) -> BoxFuture<'a, Result<Vec<PartTarget>, UploadError>> {
        Box::pin(async move {
            let resp: PartTargetsResponse = self
                .post_json(
                    &part_targets_path(&file.namespace_id, &file.remote_file_id, upload_id),
                    &PartTargetsRequest { total_chunks },
                )
                .await?;
            Ok(resp
                .parts
                .into_iter()
                .map(|p| PartTarget {
                    part_number: p.part_number,
                    upload_target: p.url,
                })
                .collect())
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        file: &'a RemoteFile,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let req = CompleteMultipartRequest {
                parts: parts
                    .iter()
                    .map(|p| CompletedPartEntry {
                        part_number: p.part_number,
                        etag: p.integrity_token.clone(),
                    })
                    .collect(),
            };
            self.post_no_reply(
                &complete_path(&file.namespace_id, &file.remote_file_id, upload_id),
                Some(&req),
            )
            .await
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        file: &'a RemoteFile,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            let path = multipart_session_path(&file.namespace_id, &file.remote_file_id, upload_id);
            let resp = self
                .http
                .delete(self.url(&path))
                .send()
                .await
                .map_err(transport_error)?;
            check_status(resp).await?;
            Ok(())
        })
    }

    fn confirm_single_shot<'a>(
        &'a self,
        file: &'a RemoteFile,
    ) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            self.post_no_reply::<()>(
                &confirm_path(&file.namespace_id, &file.remote_file_id),
                None,
            )
            .await
        })
    }
}

// ---------------------------------------------------------------------------
// HttpChunkTransport
// ---------------------------------------------------------------------------

/// Sends parts with `PUT` to presigned targets.
pub struct HttpChunkTransport {
    http: reqwest::Client,
    send_checksum: bool,
}

impl HttpChunkTransport {
    /// Creates a transport whose requests time out after `timeout`.
    ///
    /// With `send_checksum`, each request carries the base64 SHA-256 of
    /// its body so storage can reject corrupted parts.
    pub fn new(timeout: Duration, send_checksum: bool) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            http,
            send_checksum,
        })
    }
}

impl ChunkTransport for HttpChunkTransport {
    fn put_part<'a>(
        &'a self,
        target: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<PartReceipt, UploadError>> {
        Box::pin(async move {
            let mut req = self.http.put(target);
            if self.send_checksum {
                req = req.header(CHECKSUM_HEADER, BASE64.encode(checksum_bytes(&body)));
            }
            let resp = req.body(body).send().await.map_err(transport_error)?;
            let resp = check_status(resp).await?;

            // Quotes are part of the token; storage expects them back verbatim.
            let integrity_token = resp
                .headers()
                .get(ETAG_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(PartReceipt { integrity_token })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bush_transfer::FileDescriptor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    /// Reads one full HTTP/1.1 request (headers plus `Content-Length` body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Starts a mock HTTP server answering one request; the handle yields
    /// the raw request it received.
    async fn serve_once(
        status: u16,
        extra_headers: &str,
        body: &str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let extra_headers = extra_headers.to_string();
        let body = body.to_string();

        let handle = tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return String::new();
            };
            let request = read_request(&mut stream).await;
            let resp = format!(
                "HTTP/1.1 {status} Mock\r\n{extra_headers}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(resp.as_bytes()).await;
            let _ = stream.shutdown().await;
            request
        });

        (url, handle)
    }

    fn remote() -> RemoteFile {
        RemoteFile {
            namespace_id: "ns1".into(),
            remote_file_id: "f1".into(),
        }
    }

    fn client(url: &str) -> HttpControlPlane {
        HttpControlPlane::new(url, "tok", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn register_posts_descriptor() {
        let (url, handle) = serve_once(
            200,
            "",
            r#"{"fileId":"f1","storageKey":"ns1/take.mov","uploadUrl":"https://s3/put"}"#,
        )
        .await;

        let descriptor = UploadDescriptor {
            namespace_id: "ns1".into(),
            file: FileDescriptor {
                file_name: "take.mov".into(),
                file_size: 5000,
                mime_type: "video/quicktime".into(),
            },
            total_chunks: 5,
        };
        let registered = client(&format!("{url}/"))
            .register_upload(&descriptor)
            .await
            .unwrap();

        assert_eq!(registered.remote_file_id, "f1");
        assert_eq!(registered.storage_key, "ns1/take.mov");
        assert_eq!(registered.single_shot_target.as_deref(), Some("https://s3/put"));

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /namespaces/ns1/uploads HTTP/1.1"));
        assert!(request.to_lowercase().contains("authorization: bearer tok"));
        assert!(request.contains(r#""fileName":"take.mov""#));
        assert!(request.contains(r#""totalChunks":5"#));
    }

    #[tokio::test]
    async fn register_without_single_shot() {
        let (url, handle) = serve_once(200, "", r#"{"fileId":"f1","storageKey":"k"}"#).await;
        let descriptor = UploadDescriptor {
            namespace_id: "ns1".into(),
            file: FileDescriptor {
                file_name: "a.bin".into(),
                file_size: 1,
                mime_type: "application/octet-stream".into(),
            },
            total_chunks: 1,
        };
        let registered = client(&url).register_upload(&descriptor).await.unwrap();
        assert!(registered.single_shot_target.is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn init_returns_upload_id() {
        let (url, handle) = serve_once(200, "", r#"{"uploadId":"mpu-9"}"#).await;
        let upload_id = client(&url).init_multipart(&remote(), 3).await.unwrap();
        assert_eq!(upload_id, "mpu-9");

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /namespaces/ns1/uploads/f1/multipart HTTP/1.1"));
    }

    #[tokio::test]
    async fn part_targets_are_mapped() {
        let (url, handle) = serve_once(
            200,
            "",
            r#"{"parts":[{"partNumber":1,"url":"https://s3/1"},{"partNumber":2,"url":"https://s3/2"}]}"#,
        )
        .await;
        let targets = client(&url)
            .get_part_targets(&remote(), "mpu-9", 2)
            .await
            .unwrap();
        assert_eq!(
            targets,
            vec![
                PartTarget {
                    part_number: 1,
                    upload_target: "https://s3/1".into()
                },
                PartTarget {
                    part_number: 2,
                    upload_target: "https://s3/2".into()
                },
            ]
        );

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /namespaces/ns1/uploads/f1/multipart/mpu-9/parts "));
    }

    #[tokio::test]
    async fn complete_sends_etags() {
        let (url, handle) = serve_once(200, "", "").await;
        let parts = vec![
            CompletedPart {
                part_number: 1,
                integrity_token: "\"a1\"".into(),
            },
            CompletedPart {
                part_number: 2,
                integrity_token: "\"b2\"".into(),
            },
        ];
        client(&url)
            .complete_multipart(&remote(), "mpu-9", &parts)
            .await
            .unwrap();

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /namespaces/ns1/uploads/f1/multipart/mpu-9/complete "));
        assert!(request.contains(r#"{"parts":[{"partNumber":1,"etag":"\"a1\""},{"partNumber":2,"etag":"\"b2\""}]}"#));
    }

    #[tokio::test]
    async fn abort_uses_delete() {
        let (url, handle) = serve_once(200, "", "").await;
        client(&url).abort_multipart(&remote(), "mpu-9").await.unwrap();
        let request = handle.await.unwrap();
        assert!(request.starts_with("DELETE /namespaces/ns1/uploads/f1/multipart/mpu-9 "));
    }

    #[tokio::test]
    async fn confirm_posts_to_confirm_route() {
        let (url, handle) = serve_once(200, "", "").await;
        client(&url).confirm_single_shot(&remote()).await.unwrap();
        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /namespaces/ns1/uploads/f1/confirm "));
    }

    #[tokio::test]
    async fn error_status_is_transport_error() {
        let (url, handle) = serve_once(403, "", r#"{"error":"namespace locked"}"#).await;
        let err = client(&url).init_multipart(&remote(), 1).await.unwrap_err();
        match err {
            UploadError::Transport(msg) => {
                assert!(msg.contains("403"));
                assert!(msg.contains("namespace locked"));
            }
            other => panic!("unexpected error: {other}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn put_part_returns_etag_and_sends_checksum() {
        let (url, handle) = serve_once(200, "ETag: \"abc123\"\r\n", "").await;
        let transport = HttpChunkTransport::new(Duration::from_secs(5), true).unwrap();

        let receipt = transport
            .put_part(&format!("{url}/bucket/key?partNumber=1"), b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(receipt.integrity_token.as_deref(), Some("\"abc123\""));

        let request = handle.await.unwrap();
        assert!(request.starts_with("PUT /bucket/key?partNumber=1 "));
        // base64(sha256("hello"))
        assert!(
            request
                .to_lowercase()
                .contains("x-amz-checksum-sha256: lpjnul+wow4m6dsqxbninhswhlwfp0jecwqzypolmcq=")
        );
        assert!(request.ends_with("hello"));
    }

    #[tokio::test]
    async fn put_part_without_checksum_or_etag() {
        let (url, handle) = serve_once(200, "", "").await;
        let transport = HttpChunkTransport::new(Duration::from_secs(5), false).unwrap();

        let receipt = transport.put_part(&url, vec![0u8; 16]).await.unwrap();
        assert!(receipt.integrity_token.is_none());

        let request = handle.await.unwrap();
        assert!(!request.to_lowercase().contains(CHECKSUM_HEADER));
    }

    #[tokio::test]
    async fn put_part_error_status() {
        let (url, handle) = serve_once(503, "", "SlowDown").await;
        let transport = HttpChunkTransport::new(Duration::from_secs(5), false).unwrap();
        let err = transport.put_part(&url, vec![1]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
        handle.abort();
    }
}
