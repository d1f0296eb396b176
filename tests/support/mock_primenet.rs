use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const GUID: &str = "0123456789abcdef0123456789abcdef";
pub const KEY: &str = "0123456789ABCDEF0123456789ABCDEF";

/// One request the mock received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn transaction(&self) -> Option<&str> {
        self.param("t")
    }
}

#[derive(Default)]
struct Inner {
    requests: Vec<Recorded>,
    /// Scripted v5 bodies per transaction type, used before the defaults.
    v5_script: HashMap<String, VecDeque<String>>,
    announce_script: VecDeque<Value>,
    chunk_script: VecDeque<Value>,
    manual_result_page: Option<String>,
}

/// A PrimeNet stand-in: the v5 endpoint under `/v5server/`, proof upload
/// under `/proof_upload/` and `/upload/chunk`, and the manual result page.
#[derive(Clone, Default)]
pub struct MockPrimeNet {
    inner: Arc<Mutex<Inner>>,
}

impl MockPrimeNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for the next `t=<transaction>` request.
    pub fn script_v5(&self, transaction: &str, code: i64, fields: &[(&str, &str)]) {
        let body = v5_body(code, fields);
        self.inner
            .lock()
            .expect("mock poisoned")
            .v5_script
            .entry(transaction.to_owned())
            .or_default()
            .push_back(body);
    }

    pub fn script_announce(&self, reply: Value) {
        self.inner
            .lock()
            .expect("mock poisoned")
            .announce_script
            .push_back(reply);
    }

    pub fn script_chunk(&self, reply: Value) {
        self.inner
            .lock()
            .expect("mock poisoned")
            .chunk_script
            .push_back(reply);
    }

    pub fn set_manual_result_page(&self, html: &str) {
        self.inner.lock().expect("mock poisoned").manual_result_page = Some(html.to_owned());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().expect("mock poisoned").requests.clone()
    }

    /// v5 transaction codes in arrival order.
    pub fn transactions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| request.transaction().map(str::to_owned))
            .collect()
    }

    pub fn requests_for(&self, transaction: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.transaction() == Some(transaction))
            .collect()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    fn record(&self, request: Recorded) {
        self.inner.lock().expect("mock poisoned").requests.push(request);
    }

    fn next_v5(&self, transaction: &str) -> String {
        let scripted = self
            .inner
            .lock()
            .expect("mock poisoned")
            .v5_script
            .get_mut(transaction)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| default_v5(transaction))
    }

    fn next_announce(&self, base: &str) -> Value {
        self.inner
            .lock()
            .expect("mock poisoned")
            .announce_script
            .pop_front()
            .unwrap_or_else(|| json!({"URLToUse": format!("{base}/upload/chunk"), "need": {"0": 0}}))
    }

    fn next_chunk(&self) -> Value {
        self.inner
            .lock()
            .expect("mock poisoned")
            .chunk_script
            .pop_front()
            .unwrap_or_else(|| json!({"FileUploaded": 1}))
    }

    fn manual_result_page(&self) -> String {
        self.inner
            .lock()
            .expect("mock poisoned")
            .manual_result_page
            .clone()
            .unwrap_or_else(|| "<div>Accepted. CPU credit is 1.0 GHz-days</div>".to_owned())
    }
}

pub fn v5_body(code: i64, fields: &[(&str, &str)]) -> String {
    let detail = if code == 0 { "SUCCESS" } else { "mock error" };
    let mut body = format!("pnErrorResult={code}\npnErrorDetail={detail}\n");
    for (key, value) in fields {
        body.push_str(&format!("{key}={value}\n"));
    }
    body.push_str("==END==\n");
    body
}

fn default_v5(transaction: &str) -> String {
    match transaction {
        "uc" => v5_body(0, &[("g", GUID), ("u", "tester"), ("cn", "mockbox"), ("od", "1")]),
        "po" => v5_body(0, &[("w", "150"), ("od", "1")]),
        "ga" => v5_body(
            0,
            &[
                ("w", "150"),
                ("n", "110000017"),
                ("k", KEY),
                ("A", "1"),
                ("b", "2"),
                ("c", "-1"),
                ("sf", "77"),
                ("saved", "1"),
                ("base", "3"),
                ("rt", "1"),
            ],
        ),
        _ => v5_body(0, &[]),
    }
}

pub struct MockPrimeNetServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockPrimeNetServer {
    pub async fn start(mock: MockPrimeNet) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock PrimeNet listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let base = format!("http://{addr}");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let service_base = base.clone();
        let make_service = make_service_fn(move |_| {
            let mock = mock.clone();
            let base = service_base.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    serve_request(mock.clone(), base.clone(), req)
                }))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock PrimeNet server stopped: {err}");
            }
        });

        Ok(Self {
            url: base,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Site root, e.g. `http://127.0.0.1:1234/`.
    pub fn site_url(&self) -> String {
        format!("{}/", self.url)
    }

    pub fn v5_url(&self) -> String {
        format!("{}/v5server/", self.url)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    mock: MockPrimeNet,
    base: String,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let query = req
        .uri()
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();
    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let recorded = Recorded {
        method: method.clone(),
        path: path.clone(),
        query,
        body: bytes,
    };
    let transaction = recorded.transaction().map(str::to_owned);
    mock.record(recorded);

    let response = match (method, path.as_str()) {
        (Method::GET, "/v5server/") => {
            let transaction = transaction.unwrap_or_default();
            Response::new(Body::from(mock.next_v5(&transaction)))
        }
        (Method::GET, "/proof_upload/") => json_response(mock.next_announce(&base)),
        (Method::POST, "/upload/chunk") => json_response(mock.next_chunk()),
        (Method::POST, "/manual_result/default.php") => {
            Response::new(Body::from(mock.manual_result_page()))
        }
        _ => {
            let mut response = Response::new(Body::from("not found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };
    Ok(response)
}

fn json_response(value: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}
