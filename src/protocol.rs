//! Client<->server wire protocol: typed length-prefixed messages plus
//! ancillary-data FD passing (§4.D, §6).

use std::io::{self, IoSlice, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::error::{MuxError, Result};

pub const PROTOCOL_VERSION: u32 = 2;

/// Message type codes. Only the normative subset is ever dispatched; the
/// `IDENTIFY_*`/`READ_*`/`WRITE_*` ranges are reserved per §9 and round-trip
/// through (de)serialization without a dispatch arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageType {
    Version = 12,

    IdentifyFlags = 100,
    IdentifyTerm = 101,
    IdentifyTtyName = 102,
    IdentifyStdin = 104,
    IdentifyEnviron = 105,
    IdentifyDone = 106,
    IdentifyClientPid = 107,
    IdentifyCwd = 108,
    IdentifyFeatures = 109,
    IdentifyStdout = 110,

    Command = 200,
    Detach = 201,
    ListSessions = 202,
    DetachKill = 203,
    Exit = 204,
    Exited = 205,
    Ready = 208,
    Resize = 209,

    ReadOpen = 300,
    Read = 301,
    ReadDone = 302,
    WriteOpen = 303,
    Write = 304,

    GridSave = 310,
}

impl MessageType {
    fn from_i32(v: i32) -> Option<MessageType> {
        use MessageType::*;
        Some(match v {
            12 => Version,
            100 => IdentifyFlags,
            101 => IdentifyTerm,
            102 => IdentifyTtyName,
            104 => IdentifyStdin,
            105 => IdentifyEnviron,
            106 => IdentifyDone,
            107 => IdentifyClientPid,
            108 => IdentifyCwd,
            109 => IdentifyFeatures,
            110 => IdentifyStdout,
            200 => Command,
            201 => Detach,
            202 => ListSessions,
            203 => DetachKill,
            204 => Exit,
            205 => Exited,
            208 => Ready,
            209 => Resize,
            300 => ReadOpen,
            301 => Read,
            302 => ReadDone,
            303 => WriteOpen,
            304 => Write,
            310 => GridSave,
            _ => return None,
        })
    }
}

/// 16-byte header: 4-byte signed type + 8-byte payload length, in host
/// endianness (the protocol is local-socket only, §4.D).
#[derive(Debug, Clone, Copy)]
pub struct MsgHeader {
    pub msg_type: MessageType,
    pub len: u64,
}

const HEADER_WIRE_SIZE: usize = 16;

impl MsgHeader {
    pub fn new(msg_type: MessageType, len: u64) -> Self {
        MsgHeader { msg_type, len }
    }

    fn to_bytes(self) -> [u8; HEADER_WIRE_SIZE] {
        let mut buf = [0u8; HEADER_WIRE_SIZE];
        buf[0..4].copy_from_slice(&(self.msg_type as i32).to_ne_bytes());
        buf[4..12].copy_from_slice(&self.len.to_ne_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_WIRE_SIZE]) -> Result<Self> {
        let type_val = i32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let len = u64::from_ne_bytes(buf[4..12].try_into().unwrap());
        let msg_type = MessageType::from_i32(type_val)
            .ok_or_else(|| MuxError::Protocol(format!("unknown message type {type_val}")))?;
        Ok(MsgHeader { msg_type, len })
    }
}

/// Read exactly `buf.len()` bytes, looping on short reads and retrying
/// `EINTR` (§5 suspension points).
pub fn read_exact_retry(stream: &mut impl Read, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn write_all_retry(stream: &mut impl Write, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "short write")),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn send_message(stream: &mut UnixStream, msg_type: MessageType, payload: &[u8]) -> Result<()> {
    let header = MsgHeader::new(msg_type, payload.len() as u64);
    write_all_retry(stream, &header.to_bytes()).map_err(MuxError::Io)?;
    write_all_retry(stream, payload).map_err(MuxError::Io)?;
    Ok(())
}

pub fn recv_header(stream: &mut UnixStream) -> Result<MsgHeader> {
    let mut buf = [0u8; HEADER_WIRE_SIZE];
    read_exact_retry(stream, &mut buf).map_err(MuxError::Io)?;
    MsgHeader::from_bytes(&buf)
}

pub fn recv_payload(stream: &mut UnixStream, len: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    read_exact_retry(stream, &mut buf).map_err(MuxError::Io)?;
    Ok(buf)
}

/// Exchange the `VERSION` handshake. Both sides close on mismatch (§4.D).
pub fn send_version(stream: &mut UnixStream) -> Result<()> {
    send_message(stream, MessageType::Version, &PROTOCOL_VERSION.to_ne_bytes())
}

pub fn recv_version(stream: &mut UnixStream) -> Result<u32> {
    let header = recv_header(stream)?;
    if header.msg_type != MessageType::Version || header.len != 4 {
        return Err(MuxError::Protocol("expected VERSION message".into()));
    }
    let payload = recv_payload(stream, header.len)?;
    Ok(u32::from_ne_bytes(payload.try_into().unwrap()))
}

pub fn check_version_handshake(stream: &mut UnixStream) -> Result<()> {
    let peer_version = recv_version(stream)?;
    if peer_version != PROTOCOL_VERSION {
        return Err(MuxError::Protocol(format!(
            "protocol version mismatch: local {PROTOCOL_VERSION}, peer {peer_version}"
        )));
    }
    Ok(())
}

/// Send `data` with `fd` attached via `SCM_RIGHTS` ancillary data. The
/// sender keeps its own copy of `fd` open; the kernel duplicates it into
/// the receiver (§4.D "FD passing", §5 "Shared resources").
pub fn send_with_fd(stream: &UnixStream, data: &[u8], fd: RawFd) -> Result<()> {
    let iov = [IoSlice::new(data)];
    let fds = [fd];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|e| MuxError::Socket(format!("sendmsg failed: {e}")))?;
    Ok(())
}

/// Receive one message, extracting any `SCM_RIGHTS` ancillary FD. Returns
/// `(data, fds)`.
pub fn recv_with_fds(stream: &UnixStream, max_bytes: usize) -> Result<(Vec<u8>, Vec<RawFd>)> {
    let mut data_buf = vec![0u8; max_bytes];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 4]);

    let (bytes, fds) = {
        let mut iov = [std::io::IoSliceMut::new(&mut data_buf)];

        let msg = recvmsg::<()>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )
        .map_err(|e| MuxError::Socket(format!("recvmsg failed: {e}")))?;

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs().map_err(|e| MuxError::Socket(e.to_string()))? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                fds.extend(received);
            }
        }
        (msg.bytes, fds)
    };
    data_buf.truncate(bytes);
    Ok((data_buf, fds))
}

/// Send one FD with the mandatory one-byte filler payload (§4.D).
pub fn send_fd(stream: &UnixStream, fd: RawFd) -> Result<()> {
    send_with_fd(stream, &[0u8], fd)
}

pub fn recv_fd(stream: &UnixStream) -> Result<Option<RawFd>> {
    let (_, fds) = recv_with_fds(stream, 1)?;
    Ok(fds.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream as StdUnixStream;

    #[test]
    fn header_round_trips() {
        let h = MsgHeader::new(MessageType::Resize, 8);
        let bytes = h.to_bytes();
        let h2 = MsgHeader::from_bytes(&bytes).unwrap();
        assert_eq!(h2.msg_type, MessageType::Resize);
        assert_eq!(h2.len, 8);
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let mut buf = [0u8; HEADER_WIRE_SIZE];
        buf[0..4].copy_from_slice(&999i32.to_ne_bytes());
        assert!(MsgHeader::from_bytes(&buf).is_err());
    }

    #[test]
    fn version_handshake_over_socketpair() {
        let (mut a, mut b) = StdUnixStream::pair().unwrap();
        send_version(&mut a).unwrap();
        let v = recv_version(&mut b).unwrap();
        assert_eq!(v, PROTOCOL_VERSION);
    }

    #[test]
    fn message_round_trip_over_socketpair() {
        let (mut a, mut b) = StdUnixStream::pair().unwrap();
        send_message(&mut a, MessageType::ListSessions, b"hello").unwrap();
        let header = recv_header(&mut b).unwrap();
        assert_eq!(header.msg_type, MessageType::ListSessions);
        let payload = recv_payload(&mut b, header.len).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn fd_passing_round_trip() {
        let (a, b) = StdUnixStream::pair().unwrap();
        let fd_to_pass = a.as_raw_fd();
        send_fd(&a, fd_to_pass).unwrap();
        let received = recv_fd(&b).unwrap();
        assert!(received.is_some());
    }
}
