// ABOUTME: Local preview server for the victorycard application
// ABOUTME: Serves the deck directory over HTTP and pushes reload notices over a websocket

use crate::errors::{DeckError, Result};
use crate::watch::ReloadNotifier;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tungstenite::{Message, WebSocket};
use url::Url;

/// Client half of the reload protocol.
///
/// On a notice the page refetches itself. Cards whose version marker changed
/// are swapped in place; a changed head or card count reloads the page.
const RELOAD_SCRIPT: &str = r#"<script>
(function () {
  var port = __RELOAD_PORT__;
  function patch(html) {
    var next = new DOMParser().parseFromString(html, 'text/html');
    var cards = document.querySelectorAll('.deck > .card');
    var nextCards = next.querySelectorAll('.deck > .card');
    if (next.head.innerHTML !== document.head.innerHTML || cards.length !== nextCards.length) {
      location.reload();
      return;
    }
    nextCards.forEach(function (card, i) {
      if (cards[i].getAttribute('data-version') !== card.getAttribute('data-version')) {
        cards[i].replaceWith(document.importNode(card, true));
      }
    });
    if (window.victorycard) window.victorycard.autosize();
  }
  function connect() {
    var socket = new WebSocket('ws://' + (location.hostname || 'localhost') + ':' + port + '/');
    socket.onmessage = function (event) {
      if (event.data !== 'reload') return;
      fetch(location.href, { cache: 'no-store' })
        .then(function (response) { return response.text(); })
        .then(patch, function () { location.reload(); });
    };
    socket.onclose = function () { setTimeout(connect, 1000); };
  }
  connect();
})();
</script>"#;

/// Serve files below `root` on a background thread. `/` maps to `index`.
pub fn start_server(root: PathBuf, index: PathBuf, host: &str, port: u16) -> Result<()> {
    let server = Server::http(format!("{}:{}", host, port))
        .map_err(|e| DeckError::ServerError(format!("Failed to start HTTP server: {}", e)))?;

    thread::spawn(move || {
        info!("HTTP server listening on http://localhost:{}", port);
        println!("HTTP server listening on http://localhost:{}", port);

        for request in server.incoming_requests() {
            respond(&root, &index, request);
        }
    });

    Ok(())
}

fn respond(root: &Path, index: &Path, request: Request) {
    let file_path = resolve_request(root, index, request.url());
    debug!("Request for {:?} -> {:?}", request.url(), file_path);

    let result = match file_path.map(|path| fs::read(&path).map(|content| (path, content))) {
        Some(Ok((path, content))) => {
            let mut response = Response::from_data(content);
            if let Ok(header) = Header::from_bytes("Content-Type", content_type(&path)) {
                response = response.with_header(header);
            }
            request.respond(response)
        }
        _ => request.respond(Response::from_string("Not Found").with_status_code(StatusCode(404))),
    };
    if let Err(e) = result {
        error!("Failed to send response: {}", e);
    }
}

/// Map a request URL to a file inside `root`, or `None` if it falls outside.
pub fn resolve_request(root: &Path, index: &Path, request_url: &str) -> Option<PathBuf> {
    let url = Url::parse("http://localhost/").ok()?.join(request_url).ok()?;
    let relative = url.path().trim_start_matches('/');
    let candidate = if relative.is_empty() {
        index.to_path_buf()
    } else {
        root.join(relative)
    };

    let resolved = candidate.canonicalize().ok()?;
    let root = root.canonicalize().ok()?;
    (resolved.starts_with(&root) && resolved.is_file()).then_some(resolved)
}

pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Websocket endpoint that tells open pages to refresh.
pub struct ReloadHub {
    port: u16,
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
}

impl ReloadHub {
    /// Bind the reload socket and accept viewers on a background thread.
    pub fn start(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).map_err(|e| {
            DeckError::ServerError(format!("Failed to bind reload socket on port {}: {}", port, e))
        })?;
        let port = listener.local_addr().map_err(DeckError::FileReadError)?.port();

        let clients = Arc::new(Mutex::new(Vec::new()));
        let accepted = clients.clone();
        thread::spawn(move || {
            info!("Reload socket listening on ws://localhost:{}", port);
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Failed to accept reload client: {}", e);
                        continue;
                    }
                };
                match tungstenite::accept(stream) {
                    Ok(socket) => {
                        debug!("Reload client connected");
                        accepted.lock().push(socket);
                    }
                    Err(e) => warn!("Rejected reload client: {}", e),
                }
            }
        });

        Ok(Self { port, clients })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Script to append to served documents.
    pub fn script(&self) -> String {
        RELOAD_SCRIPT.replace("__RELOAD_PORT__", &self.port.to_string())
    }
}

impl ReloadNotifier for ReloadHub {
    fn notify(&self, output: &Path) {
        let mut clients = self.clients.lock();
        clients.retain_mut(|socket| socket.send(Message::Text("reload".into())).is_ok());
        info!("Notified {} viewer(s) of {:?}", clients.len(), output);
    }
}
