fn main() {
    println!("Run `cargo test -p record-compat` to execute record compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use bush_protocol::{
        ChunkStatus, CompleteMultipartRequest, InitMultipartResponse, PartTargetsResponse,
        RegisterUploadRequest, RegisterUploadResponse, UploadStatus,
    };
    use bush_transfer::UploadSession;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    // --- Persisted records ---

    #[test]
    fn fixture_paused_session() {
        let session: UploadSession = roundtrip_test("upload_session_paused.json");

        assert_eq!(session.status, UploadStatus::Paused);
        assert_eq!(session.total_chunks as usize, session.chunks.len());
        assert_eq!(session.chunk(2).unwrap().status, ChunkStatus::Pending);
        assert_eq!(session.pending_part_numbers(), vec![2]);

        // Tokens keep their quotes.
        let parts = session.completed_parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);
        assert!(parts[0].integrity_token.starts_with('"'));
        assert_eq!(parts[1].part_number, 3);
    }

    #[test]
    fn fixture_paused_session_bytes_consistent() {
        let session: UploadSession = roundtrip_test("upload_session_paused.json");
        let mut recomputed = session.clone();
        recomputed.recompute_uploaded_bytes();
        assert_eq!(recomputed.uploaded_bytes, session.uploaded_bytes);

        let covered: u64 = session.chunks.iter().map(|c| c.size).sum();
        assert_eq!(covered, session.file_size);
        for pair in session.chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn fixture_failed_session() {
        let session: UploadSession = roundtrip_test("upload_session_failed.json");
        assert_eq!(session.status, UploadStatus::Failed);
        assert!(session.is_terminal());
        assert!(session.remote_file_id.is_none());
        assert!(session.error.as_deref().unwrap().contains("403"));
    }

    #[test]
    fn new_session_matches_fixture_shape() {
        let fixture = load_fixture("upload_session_failed.json");
        let fresh = UploadSession::new(
            "x".into(),
            "ns".into(),
            &bush_transfer::FileDescriptor {
                file_name: "notes.wav".into(),
                file_size: 500,
                mime_type: "audio/wav".into(),
            },
            1000,
        );
        let fresh = serde_json::to_value(&fresh).unwrap();

        let keys = |v: &serde_json::Value| {
            let mut k: Vec<String> = v.as_object().unwrap().keys().cloned().collect();
            k.sort();
            k
        };
        assert_eq!(keys(&fixture), keys(&fresh));
        assert_eq!(keys(&fixture["chunks"][0]), keys(&fresh["chunks"][0]));
    }

    // --- Control-plane messages ---

    #[test]
    fn fixture_register_upload_request() {
        let req: RegisterUploadRequest = roundtrip_test("register_upload_request.json");
        assert_eq!(req.total_chunks, 3);
    }

    #[test]
    fn fixture_register_upload_response_single_shot() {
        let resp: RegisterUploadResponse =
            roundtrip_test("register_upload_response_single_shot.json");
        assert!(resp.upload_url.is_some());
    }

    #[test]
    fn fixture_register_upload_response_multipart() {
        let resp: RegisterUploadResponse =
            roundtrip_test("register_upload_response_multipart.json");
        assert!(resp.upload_url.is_none());
    }

    #[test]
    fn fixture_init_multipart_response() {
        let resp: InitMultipartResponse = roundtrip_test("init_multipart_response.json");
        assert_eq!(resp.upload_id, "mpu_2~abc");
    }

    #[test]
    fn fixture_part_targets_response() {
        let resp: PartTargetsResponse = roundtrip_test("part_targets_response.json");
        let numbers: Vec<u32> = resp.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn fixture_complete_multipart_request() {
        let req: CompleteMultipartRequest = roundtrip_test("complete_multipart_request.json");
        assert!(req.parts.windows(2).all(|w| w[0].part_number < w[1].part_number));
    }
}
