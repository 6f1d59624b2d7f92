use std::time::Duration;

/// Default request timeout for control-plane calls.
pub const CONTROL_PLANE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a single part transfer.
///
/// Parts can be several MiB over a slow uplink, so this is far looser
/// than the control-plane timeout.
pub const PART_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Response header carrying the integrity token of a stored part.
pub const ETAG_HEADER: &str = "etag";

/// Optional request header carrying the base64 SHA-256 of a part body.
pub const CHECKSUM_HEADER: &str = "x-amz-checksum-sha256";

/// Collection route for uploads inside a namespace.
pub fn uploads_path(namespace_id: &str) -> String {
    format!("/namespaces/{namespace_id}/uploads")
}

/// Route that opens a multipart session for a registered file.
pub fn multipart_path(namespace_id: &str, file_id: &str) -> String {
    format!("{}/{file_id}/multipart", uploads_path(namespace_id))
}

/// Route addressing one multipart session (abort uses `DELETE` on it).
pub fn multipart_session_path(namespace_id: &str, file_id: &str, upload_id: &str) -> String {
    format!("{}/{upload_id}", multipart_path(namespace_id, file_id))
}

/// Route issuing (or refreshing) part targets.
pub fn part_targets_path(namespace_id: &str, file_id: &str, upload_id: &str) -> String {
    format!(
        "{}/parts",
        multipart_session_path(namespace_id, file_id, upload_id)
    )
}

/// Route assembling the uploaded parts.
pub fn complete_path(namespace_id: &str, file_id: &str, upload_id: &str) -> String {
    format!(
        "{}/complete",
        multipart_session_path(namespace_id, file_id, upload_id)
    )
}

/// Route confirming a single-shot upload.
pub fn confirm_path(namespace_id: &str, file_id: &str) -> String {
    format!("{}/{file_id}/confirm", uploads_path(namespace_id))
}
