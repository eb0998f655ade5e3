//! Plain TCP transport
//!
//! Opens a socket to the configured broker host and watches it: EOF or a read
//! error is reported as `SessionEvent::Dropped`. Authentication happens on the
//! credential side only; an expired credential is refused before dialing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use credential::Credential;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::classify::TransportError;
use crate::transport::{EventSink, Session, SessionEvent, Transport};

const SCHEMES: &[&str] = &["tcps://", "tcp://"];

/// `host:port` from a broker URL such as `tcps://broker:55443`.
pub fn strip_scheme(host: &str) -> &str {
    SCHEMES
        .iter()
        .find_map(|scheme| host.strip_prefix(scheme))
        .unwrap_or(host)
        .trim_end_matches('/')
}

pub struct TcpTransport {
    host: String,
    vpn_name: String,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, vpn_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            vpn_name: vpn_name.into(),
        }
    }

    pub fn address(&self) -> &str {
        strip_scheme(&self.host)
    }
}

struct TcpSession {
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Session for TcpSession {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
        Box::pin(async {})
    }
}

impl Transport for TcpTransport {
    fn id(&self) -> &str {
        "tcp"
    }

    fn open(
        &self,
        credential: Arc<Credential>,
        events: EventSink,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Session>, TransportError>> + Send + '_>> {
        Box::pin(async move {
            if credential.is_expired() {
                return Err(TransportError::auth(format!(
                    "refusing expired credential for {}",
                    credential.subject()
                )));
            }

            let address = self.address();
            let stream = TcpStream::connect(address)
                .await
                .map_err(|e| TransportError::other(format!("connecting to {address}: {e}")))?;
            info!(
                address,
                vpn = %self.vpn_name,
                principal = credential.subject(),
                "tcp session opened"
            );

            let closed = Arc::new(AtomicBool::new(false));
            let cancel = CancellationToken::new();
            tokio::spawn(watch_socket(stream, events, closed.clone(), cancel.clone()));
            Ok(Box::new(TcpSession { closed, cancel }) as Box<dyn Session>)
        })
    }
}

async fn watch_socket(
    mut stream: TcpStream,
    events: EventSink,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 1024];
    loop {
        let reason = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("tcp session closed locally");
                return;
            }
            read = stream.read(&mut buf) => match read {
                Ok(0) => "connection closed by peer".to_string(),
                Ok(_) => continue,
                Err(e) => format!("read error: {e}"),
            },
        };
        closed.store(true, Ordering::Release);
        events.emit(SessionEvent::Dropped(reason));
        return;
    }
}
