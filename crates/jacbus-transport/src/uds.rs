//! Frames over a Unix domain socket hub.
//!
//! A `UdsHub` stands in for the physical wire when nodes live in separate
//! processes: every client connects to the hub socket, and each datagram a
//! client sends is rebroadcast to every other client. Datagrams are whole bus
//! frames with a 2-byte little-endian length prefix; the hub never inspects
//! frame contents.
//!
//! Carrier sense over a hub is approximate — a `UdsWire` reports the medium
//! busy based on the traffic it last observed. The hub serializes writers, so
//! collisions do not occur on this transport.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::Wire;

/// Largest accepted hub datagram; generously above the frame wire maximum.
pub const MAX_DATAGRAM: usize = 512;

const LENGTH_PREFIX: usize = 2;

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

fn validate_path(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

/// The shared-bus hub: accepts clients and rebroadcasts their datagrams.
#[derive(Debug)]
pub struct UdsHub {
    listener: UnixListener,
    path: PathBuf,
    clients: Arc<Mutex<Vec<ClientHandle>>>,
    next_client_id: AtomicUsize,
    stop: Arc<AtomicBool>,
}

#[derive(Debug)]
struct ClientHandle {
    id: usize,
    stream: Arc<Mutex<UnixStream>>,
}

impl UdsHub {
    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If the path already exists and is a socket, it is removed first
    /// (stale socket cleanup); any other file type is an error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        validate_path(&path)?;

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| TransportError::Bind {
                    path: path.clone(),
                    source: e,
                })?;
            } else {
                return Err(TransportError::Bind {
                    path: path.clone(),
                    source: std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;
        listener.set_nonblocking(true).map_err(TransportError::Io)?;
        info!(?path, "hub listening");

        Ok(Self {
            listener,
            path,
            clients: Arc::new(Mutex::new(Vec::new())),
            next_client_id: AtomicUsize::new(1),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A flag that makes [`run`](Self::run) return when set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Accept clients and rebroadcast their traffic until the stop flag is set.
    pub fn run(&self) -> Result<()> {
        while !self.stop.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _)) => self.attach(stream)?,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
        Ok(())
    }

    fn attach(&self, stream: UnixStream) -> Result<()> {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let reader = stream.try_clone().map_err(TransportError::Io)?;
        debug!(client = id, "hub client connected");

        self.clients
            .lock()
            .expect("clients lock")
            .push(ClientHandle {
                id,
                stream: Arc::new(Mutex::new(stream)),
            });

        let clients = Arc::clone(&self.clients);
        let stop = Arc::clone(&self.stop);
        std::thread::spawn(move || client_loop(id, reader, clients, stop));
        Ok(())
    }
}

impl Drop for UdsHub {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn client_loop(
    id: usize,
    mut reader: UnixStream,
    clients: Arc<Mutex<Vec<ClientHandle>>>,
    stop: Arc<AtomicBool>,
) {
    let _ = reader.set_read_timeout(Some(Duration::from_millis(100)));
    let mut buf = BytesMut::with_capacity(MAX_DATAGRAM * 2);
    let mut chunk = [0u8; 1024];

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        while let Some(datagram) = take_datagram(&mut buf) {
            broadcast(id, &datagram, &clients);
        }

        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(client = id, %err, "hub client read failed");
                break;
            }
        }
    }

    debug!(client = id, "hub client disconnected");
    clients
        .lock()
        .expect("clients lock")
        .retain(|client| client.id != id);
}

fn take_datagram(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < LENGTH_PREFIX {
        return None;
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if len > MAX_DATAGRAM {
        // Corrupt prefix; drop the buffer and resynchronize on new data.
        warn!(len, "oversized hub datagram, flushing buffer");
        buf.clear();
        return None;
    }
    if buf.len() < LENGTH_PREFIX + len {
        return None;
    }
    buf.advance(LENGTH_PREFIX);
    Some(buf.split_to(len).freeze())
}

fn broadcast(from: usize, datagram: &Bytes, clients: &Arc<Mutex<Vec<ClientHandle>>>) {
    let mut wire = BytesMut::with_capacity(LENGTH_PREFIX + datagram.len());
    wire.put_u16_le(datagram.len() as u16);
    wire.put_slice(datagram);

    let clients = clients.lock().expect("clients lock");
    for client in clients.iter().filter(|client| client.id != from) {
        let mut stream = client.stream.lock().expect("client stream lock");
        if let Err(err) = stream.write_all(&wire) {
            warn!(client = client.id, %err, "hub broadcast write failed");
        }
    }
}

/// A bus connection through a [`UdsHub`].
#[derive(Debug)]
pub struct UdsWire {
    stream: UnixStream,
    buf: BytesMut,
    last_activity: Option<Instant>,
}

impl UdsWire {
    /// Connect to a hub socket.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        validate_path(path)?;
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(MAX_DATAGRAM * 2),
            last_activity: None,
        })
    }
}

impl Wire for UdsWire {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_DATAGRAM {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                "frame exceeds hub datagram limit",
            )));
        }
        let mut wire = BytesMut::with_capacity(LENGTH_PREFIX + frame.len());
        wire.put_u16_le(frame.len() as u16);
        wire.put_slice(frame);
        self.stream.write_all(&wire).map_err(TransportError::Io)?;
        self.last_activity = Some(Instant::now());
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        if let Some(datagram) = take_datagram(&mut self.buf) {
            self.last_activity = Some(Instant::now());
            return Ok(Some(datagram));
        }

        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(TransportError::Io)?;

        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if let Some(datagram) = take_datagram(&mut self.buf) {
                        self.last_activity = Some(Instant::now());
                        return Ok(Some(datagram));
                    }
                    // Partial datagram; keep reading within this timeout.
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn idle_for(&self, gap: Duration) -> bool {
        match self.last_activity {
            Some(at) => at.elapsed() >= gap,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/jacbus-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("bus.sock")
    }

    fn start_hub(path: &Path) -> (Arc<AtomicBool>, std::thread::JoinHandle<()>) {
        let hub = UdsHub::bind(path).expect("hub should bind");
        let stop = hub.stop_flag();
        let handle = std::thread::spawn(move || {
            hub.run().expect("hub run should not fail");
        });
        (stop, handle)
    }

    #[test]
    fn hub_rebroadcasts_to_other_clients() {
        let path = make_sock_path("bcast");
        let (stop, hub_thread) = start_hub(&path);

        let mut a = UdsWire::connect(&path).expect("a connects");
        let mut b = UdsWire::connect(&path).expect("b connects");
        // Let the hub accept both before transmitting.
        std::thread::sleep(Duration::from_millis(100));

        a.send(b"frame-1").unwrap();
        let got = b
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("datagram should arrive");
        assert_eq!(got.as_ref(), b"frame-1");

        // The sender must not hear its own frame.
        assert!(a.recv_timeout(Duration::from_millis(50)).unwrap().is_none());

        stop.store(true, Ordering::Relaxed);
        hub_thread.join().unwrap();
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn bind_refuses_non_socket_path() {
        let path = make_sock_path("nonsock");
        std::fs::write(&path, b"file").unwrap();

        let err = UdsHub::bind(&path).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn bind_cleans_stale_socket() {
        let path = make_sock_path("stale");
        {
            let _stale = UnixListener::bind(&path).unwrap();
        }
        assert!(path.exists());

        let hub = UdsHub::bind(&path).expect("stale socket should be replaced");
        drop(hub);
        assert!(!path.exists(), "drop removes the socket file");

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn path_too_long_is_rejected() {
        let long = "/tmp/".to_string() + &"x".repeat(MAX_PATH_LEN);
        let err = UdsWire::connect(&long).unwrap_err();
        assert!(matches!(err, TransportError::PathTooLong { .. }));
    }

    #[test]
    fn datagram_framing_survives_split_reads() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(3);
        buf.put_slice(b"ab");
        assert!(take_datagram(&mut buf).is_none());
        buf.put_slice(b"c");
        assert_eq!(take_datagram(&mut buf).unwrap().as_ref(), b"abc");
    }

    #[test]
    fn oversized_prefix_flushes_buffer() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(u16::MAX);
        buf.put_slice(&[0u8; 8]);
        assert!(take_datagram(&mut buf).is_none());
        assert!(buf.is_empty());
    }
}
