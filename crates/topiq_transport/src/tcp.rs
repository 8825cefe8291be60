//! TCP server and per-connection session handling
//!
//! Responsibilities:
//! - Accept connections and create a `SessionHandle` for each, registered
//!   with the `Broker`
//! - Run a writer task per session that drains the handle's channel onto
//!   the socket
//! - Read frames in a loop, enforce the auth order when the broker is
//!   configured with credentials, and dispatch by message variant
//!
//! Error policy per frame: oversized frames are drained and the session
//! continues; undecodable payloads are dropped and the session continues;
//! end-of-stream at a frame boundary disconnects cleanly; a truncated
//! frame or an unknown tag disconnects with a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use topiq_broker::Broker;
use topiq_client::SessionHandle;
use topiq_wire::frame::{read_frame, FrameError};
use topiq_wire::{Message, MessageKind, WireFormat};

/// Bind `addr` and serve until the process dies. Bind failures are
/// returned so the caller can exit non-zero.
pub async fn start_server(addr: &str, broker: Arc<Mutex<Broker>>) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "broker listening");
    serve(listener, broker).await
}

/// Accept loop over an already-bound listener. Split from
/// [`start_server`] so tests can bind an ephemeral port first.
pub async fn serve(listener: TcpListener, broker: Arc<Mutex<Broker>>) -> Result<(), std::io::Error> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "cannot accept connection");
                continue;
            }
        };
        debug!(peer = %peer, "connection accepted");

        let broker = broker.clone();
        tokio::spawn(async move {
            handle_connection(stream, broker).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Mutex<Broker>>) {
    let (read_half, mut write_half) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = SessionHandle::new(tx);
    let session_id = session.id.clone();
    {
        let mut broker = broker.lock().unwrap();
        broker.register_session(session);
    }

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let broker = broker.clone();
        let session_id = session_id.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                let mut broker = broker.lock().unwrap();
                broker.disconnect(&session_id);
            }
        }
    };

    // writer task: drain the session's outbound queue onto the socket
    {
        let session_id = session_id.clone();
        let do_cleanup = do_cleanup.clone();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_half.write_all(&frame).await {
                    warn!(session = %session_id, error = %e, "cannot write to session");
                    break;
                }
            }

            do_cleanup();
            debug!(session = %session_id, "writer closed");
        });
    }

    read_loop(read_half, &broker, &session_id).await;
    do_cleanup();
}

async fn read_loop(mut reader: OwnedReadHalf, broker: &Arc<Mutex<Broker>>, session_id: &str) {
    let requires_auth = broker.lock().unwrap().requires_auth();
    let mut authed = !requires_auth;

    loop {
        let (format, payload) = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(FrameError::Closed) => {
                debug!(session = %session_id, "session closed");
                return;
            }
            Err(e) if e.is_recoverable() => {
                warn!(session = %session_id, error = %e, "discarding frame");
                continue;
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "closing session");
                return;
            }
        };

        let msg = match Message::decode(format, &payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session = %session_id, format = %format, error = %e, "cannot parse message");
                continue;
            }
        };

        if !authed {
            // first frame on an auth-required broker must be AUTH
            if msg.kind != MessageKind::Auth {
                warn!(session = %session_id, kind = %msg.kind, "frame before authentication");
                return;
            }
            if broker.lock().unwrap().authenticate(session_id, &msg) {
                authed = true;
            } else {
                // the AUTH_FAILED reply is already queued; close
                return;
            }
            continue;
        }

        dispatch(broker, session_id, format, msg);
    }
}

/// Route one decoded frame into the broker.
fn dispatch(broker: &Arc<Mutex<Broker>>, session_id: &str, format: WireFormat, msg: Message) {
    let mut broker = broker.lock().unwrap();
    match msg.kind {
        MessageKind::NewTopic => broker.create_topic(&msg.topic.name),
        MessageKind::NewMessage => broker.publish(msg),
        MessageKind::NewSub => broker.subscribe(session_id, &msg.topic.name, format),
        MessageKind::Ack => broker.ack(&msg),
        MessageKind::Auth => {
            // re-auth on an established session; the reply is queued and
            // the outcome does not demote the session
            broker.authenticate(session_id, &msg);
        }
        other => warn!(session = %session_id, kind = %other, "ignoring unexpected message"),
    }
}
