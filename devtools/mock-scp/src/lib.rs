//! A scripted DICOM acceptor for testing association requesters.
//!
//! [`Peer`] drives a single association step by step,
//! for tests which need precise control over the exchange.
//! [`Archive`] serves canned query/retrieve and storage content
//! over one or more associations.
use std::{
    net::{SocketAddr, TcpListener},
    thread::{spawn, JoinHandle},
};

pub mod archive;
pub mod peer;

pub use archive::{Archive, ArchiveLog};
pub use peer::{Incoming, Peer, Received};

pub type Result<T, E = Box<dyn std::error::Error + Send + Sync + 'static>> =
    std::result::Result<T, E>;

/// Listen on an ephemeral local port,
/// and run the given script on the first connection.
pub fn spawn_peer<F>(script: F) -> Result<(SocketAddr, JoinHandle<Result<()>>)>
where
    F: FnOnce(Peer) -> Result<()> + Send + 'static,
{
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;
    let handle = spawn(move || -> Result<()> {
        let (stream, _addr) = listener.accept()?;
        script(Peer::new(stream))
    });
    Ok((addr, handle))
}
