//! A local stand-in for the MangaDex API used by the tests.

use reqwest::Url;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Response, Server};

pub struct StubResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl StubResponse {
    pub fn json(value: Value) -> Self {
        Self {
            status: 200,
            body: value.to_string().into_bytes(),
            content_type: "application/json",
        }
    }

    pub fn image(bytes: &[u8]) -> Self {
        Self {
            status: 200,
            body: bytes.to_vec(),
            content_type: "image/jpeg",
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            content_type: "text/plain",
        }
    }
}

/// Route handler: the parsed request URL and how many times this path has
/// been requested before.
pub type Handler = dyn Fn(&Url, usize) -> StubResponse + Send + Sync + 'static;

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub url: Url,
}

pub struct StubServer {
    base: String,
    server: Arc<Server>,
    hits: Arc<Mutex<Vec<Hit>>>,
    worker: Option<JoinHandle<()>>,
}

impl StubServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Url, usize) -> StubResponse + Send + Sync + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind stub server"));
        let addr = server
            .server_addr()
            .to_ip()
            .expect("stub server listens on tcp");
        let base = format!("http://{}", addr);

        let hits: Arc<Mutex<Vec<Hit>>> = Arc::new(Mutex::new(Vec::new()));
        let worker = {
            let server = Arc::clone(&server);
            let hits = Arc::clone(&hits);
            let base = base.clone();
            let handler: Box<Handler> = Box::new(handler);
            thread::spawn(move || {
                let mut counts: HashMap<String, usize> = HashMap::new();
                while let Ok(request) = server.recv() {
                    let url = Url::parse(&format!("{}{}", base, request.url()))
                        .expect("stub request url");
                    let path = url.path().to_string();
                    let seen = counts.entry(path.clone()).or_insert(0);
                    let reply = handler(&url, *seen);
                    *seen += 1;
                    hits.lock().unwrap().push(Hit { path, url });

                    let header =
                        Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes())
                            .expect("content type header");
                    let response = Response::from_data(reply.body)
                        .with_status_code(reply.status)
                        .with_header(header);
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            base,
            server,
            hits,
            worker: Some(worker),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hits_on(&self, prefix: &str) -> usize {
        self.hits()
            .iter()
            .filter(|h| h.path.starts_with(prefix))
            .count()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

pub fn query(url: &Url, key: &str) -> Vec<String> {
    url.query_pairs()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .collect()
}

pub fn search_body(results: &[(&str, &str)]) -> Value {
    let data: Vec<Value> = results
        .iter()
        .map(|(id, title)| {
            json!({
                "id": id,
                "type": "manga",
                "attributes": { "title": { "en": title }, "altTitles": [] }
            })
        })
        .collect();
    json!({ "result": "ok", "response": "collection", "data": data,
            "limit": 10, "offset": 0, "total": results.len() })
}

/// `(cover id, file name, volume)`
pub type StubCover<'a> = (&'a str, &'a str, Option<&'a str>);

/// One page of the `/cover` collection, honoring `limit` and `offset`.
pub fn covers_page(url: &Url, covers: &[StubCover<'_>]) -> Value {
    let limit: usize = query(url, "limit")
        .first()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let offset: usize = query(url, "offset")
        .first()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let data: Vec<Value> = covers
        .iter()
        .skip(offset)
        .take(limit)
        .map(|(id, file_name, volume)| {
            json!({
                "id": id,
                "type": "cover_art",
                "attributes": { "fileName": file_name, "volume": volume, "locale": "ja" }
            })
        })
        .collect();
    json!({ "result": "ok", "response": "collection", "data": data,
            "limit": limit, "offset": offset, "total": covers.len() })
}

pub const BOUNCER_ID: &str = "7f2c1d3e-0000-4000-8000-b0a1c2e3f4a5";

pub const BOUNCER_COVERS: [StubCover<'static>; 3] = [
    ("c1", "aaa111.jpg", Some("1")),
    ("c2", "bbb222.png", Some("2")),
    ("c3", "ccc333.jpg", None),
];

/// A small catalog that knows only "Bouncer Tokyo Fist".
pub fn bouncer_catalog() -> StubServer {
    StubServer::start(|url, _| match url.path() {
        "/manga" => {
            if query(url, "title").first().map(String::as_str) == Some("Bouncer Tokyo Fist") {
                StubResponse::json(search_body(&[(BOUNCER_ID, "Bouncer")]))
            } else {
                StubResponse::json(search_body(&[]))
            }
        }
        "/cover" => StubResponse::json(covers_page(url, &BOUNCER_COVERS)),
        p if p.starts_with("/covers/") => StubResponse::image(b"\xFF\xD8\xFFimage"),
        _ => StubResponse::status(404),
    })
}
