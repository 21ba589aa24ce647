//! Plan-9 directory shares served by the host over the transport.

use std::path::Path;

use gcs_common::error::{GcsError, Result};

use super::mount::MountRequest;
use crate::oslayer::OsLayer;
use crate::transport::Transport;

/// A host directory share to mount.
#[derive(Debug, Clone, Copy)]
pub struct Plan9Share<'a> {
    /// Where the share is mounted in the guest.
    pub target: &'a Path,
    /// Share name on the host, sent as `aname`.
    pub share_name: &'a str,
    /// Transport port the host serves the share on.
    pub port: u32,
    /// Mount read-only.
    pub read_only: bool,
}

/// Dials the share's port and mounts it with the `9p` filesystem over
/// the connection's descriptor.
///
/// The kernel keeps its own reference to the socket, so our descriptor is
/// dropped once the mount call returns. The socket itself is never shut
/// down here.
///
/// # Errors
///
/// Returns an error if the mount point cannot be created, the port cannot
/// be dialed, or the mount fails.
pub fn mount_plan9_share(
    os: &dyn OsLayer,
    transport: &dyn Transport,
    share: &Plan9Share<'_>,
    mode: u32,
) -> Result<()> {
    os.mkdir_all(share.target, mode)
        .map_err(|e| GcsError::io(share.target, e))?;

    let conn = transport
        .dial(share.port)
        .map_err(|e| GcsError::os(format!("dial plan9 share port {}", share.port), e))?;
    let fd = conn.raw_fd();

    let mut request = MountRequest::new(share.target.display().to_string(), "9p")
        .read_only(share.read_only)
        .option("trans=fd")
        .option(format!("rfdno={fd}"))
        .option(format!("wfdno={fd}"));
    if !share.share_name.is_empty() {
        request = request.option(format!("aname={}", share.share_name));
    }

    let mounted = os.mount(&request, share.target).map_err(|e| {
        GcsError::os(format!("plan9 mount on {}", share.target.display()), e)
    });
    drop(conn);
    mounted?;

    tracing::info!(
        target = %share.target.display(),
        share = share.share_name,
        port = share.port,
        "plan9 share mounted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read as _, Write as _};
    use std::os::fd::{AsRawFd, RawFd};
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;

    use parking_lot::Mutex;

    use super::*;
    use crate::oslayer::fake::RecordingOs;
    use crate::transport::Connection;

    struct SocketConnection(UnixStream);

    impl io::Read for SocketConnection {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl io::Write for SocketConnection {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl Connection for SocketConnection {
        fn raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.shutdown(std::net::Shutdown::Both)
        }
    }

    struct PairTransport;

    impl Transport for PairTransport {
        fn dial(&self, _port: u32) -> io::Result<Box<dyn Connection>> {
            let (local, _remote) = UnixStream::pair()?;
            Ok(Box::new(SocketConnection(local)))
        }
    }

    /// Keeps a duplicate of the dialed descriptor, as the kernel's 9p client
    /// would, plus the peer end.
    #[derive(Default)]
    struct RetainingTransport {
        kept: Mutex<Option<(UnixStream, UnixStream)>>,
    }

    impl Transport for RetainingTransport {
        fn dial(&self, _port: u32) -> io::Result<Box<dyn Connection>> {
            let (local, remote) = UnixStream::pair()?;
            *self.kept.lock() = Some((local.try_clone()?, remote));
            Ok(Box::new(SocketConnection(local)))
        }
    }

    #[test]
    fn share_mounts_over_dialed_descriptor() {
        let os = RecordingOs::default();
        let target = PathBuf::from("/run/shares/s1");
        let share = Plan9Share {
            target: &target,
            share_name: "s1",
            port: 50001,
            read_only: true,
        };

        mount_plan9_share(&os, &PairTransport, &share, 0o700).expect("mount");

        let (request, mounted_on) = &os.mounts()[0];
        assert_eq!(mounted_on, &target);
        assert_eq!(request.fstype, "9p");
        assert!(request.read_only);
        assert_eq!(request.options[0], "trans=fd");
        assert!(request.options[1].starts_with("rfdno="));
        assert_eq!(request.options.last().map(String::as_str), Some("aname=s1"));
    }

    #[test]
    fn unnamed_share_has_no_aname() {
        let os = RecordingOs::default();
        let target = PathBuf::from("/run/shares/anon");
        let share = Plan9Share {
            target: &target,
            share_name: "",
            port: 50002,
            read_only: false,
        };

        mount_plan9_share(&os, &PairTransport, &share, 0o700).expect("mount");
        let (request, _) = &os.mounts()[0];
        assert!(!request.options.iter().any(|o| o.starts_with("aname=")));
    }

    #[test]
    fn mounted_share_socket_stays_usable() {
        let os = RecordingOs::default();
        let transport = RetainingTransport::default();
        let target = PathBuf::from("/run/shares/live");
        let share = Plan9Share {
            target: &target,
            share_name: "live",
            port: 50003,
            read_only: false,
        };

        mount_plan9_share(&os, &transport, &share, 0o700).expect("mount");

        let (mut kernel_ref, mut peer) = transport.kept.lock().take().expect("dialed");
        kernel_ref.write_all(b"Tversion").expect("socket still open");
        let mut buf = [0_u8; 8];
        peer.read_exact(&mut buf).expect("peer reads");
        assert_eq!(&buf, b"Tversion");
    }
}
