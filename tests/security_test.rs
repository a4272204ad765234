//! Socket and directory permission checks (§4.D, §9 Design Notes).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

use muxkit::paths;

#[test]
fn test_socket_dir_is_0700() {
    let temp_dir = TempDir::new().unwrap();
    std::env::set_var("MUXKIT_SOCK_DIR", temp_dir.path());
    let dir = paths::socket_dir().unwrap();
    let mode = fs::metadata(&dir).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700, "socket directory should be 0700");
    std::env::remove_var("MUXKIT_SOCK_DIR");
}

#[test]
fn test_reserved_protocol_codes_round_trip_without_dispatch() {
    // IDENTIFY_*/READ_*/WRITE_* codes parse but have no dispatch arm; a
    // header using one round-trips on the wire rather than panicking (§9).
    use muxkit::protocol::{self, MessageType};
    use std::os::unix::net::UnixStream;

    let (mut a, mut b) = UnixStream::pair().unwrap();
    protocol::send_message(&mut a, MessageType::IdentifyTerm, &[]).unwrap();
    let header = protocol::recv_header(&mut b).unwrap();
    assert_eq!(header.msg_type, MessageType::IdentifyTerm);
    assert_eq!(header.len, 0);
}

#[test]
fn test_rename_payload_rejects_empty_new_name() {
    // Mirrors the server's rename verb validation without spinning up a
    // full daemon: empty new_name must not silently rename to "".
    let mut payload = Vec::new();
    payload.extend_from_slice(b"rename\0");
    payload.extend_from_slice(b"1\0");
    payload.push(0);
    let text = std::str::from_utf8(&payload).unwrap();
    let mut parts = text.trim_end_matches('\0').split('\0');
    assert_eq!(parts.next(), Some("rename"));
    assert_eq!(parts.next(), Some("1"));
    assert_eq!(parts.next(), Some(""));
}
