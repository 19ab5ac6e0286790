//! Thread-per-connection TCP front end: accepts connections, reads
//! requests with `resp::read_request`, dispatches each through
//! `command::dispatch`, and writes the encoded reply back.

use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::command;
use crate::db::Db;
use crate::resp;

pub struct Server {
    db: Arc<Db>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(db: Arc<Db>, addr: &str) -> std::io::Result<Server> {
        let listener = TcpListener::bind(addr)?;
        info!(%addr, "listening");
        Ok(Server { db, listener, shutdown: Arc::new(AtomicBool::new(false)) })
    }

    /// A clone of the shutdown flag a signal handler can flip to stop `serve`.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Accepts connections until `shutdown_flag()` is set, spawning one
    /// thread per connection. Uses a short accept timeout so the shutdown
    /// flag is checked even with no incoming traffic.
    pub fn serve(&self) -> std::io::Result<()> {
        self.listener.set_nonblocking(true)?;
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let db = self.db.clone();
                    thread::spawn(move || handle_connection(db, stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
        info!("server shutting down");
        Ok(())
    }
}

fn handle_connection(db: Arc<Db>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to clone connection");
            return;
        }
    });
    let mut writer = BufWriter::new(stream);

    loop {
        let request = match resp::read_request(&mut reader) {
            Ok(Some(args)) => args,
            Ok(None) => break,
            Err(e) => {
                debug!(?peer, error = %e, "connection closed on protocol error");
                break;
            }
        };
        if request.is_empty() {
            continue;
        }
        let reply = command::dispatch(&db, request);
        if let Err(e) = reply.encode(&mut writer) {
            debug!(?peer, error = %e, "write failed");
            break;
        }
        if let Err(e) = writer.flush() {
            debug!(?peer, error = %e, "flush failed");
            break;
        }
    }
    debug!(?peer, "connection closed");
}
