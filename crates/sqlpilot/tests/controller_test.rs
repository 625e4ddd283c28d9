//! Controller and client against an in-process HTTP backend.
//!
//! The fake backend is a bare `TcpListener` speaking just enough HTTP/1.1:
//! one request per connection, JSON replies with `content-length`, and the
//! auto-execute stream as `transfer-encoding: chunked` with one `data:` frame
//! per chunk.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use orchestration::{AttemptOutcome, AttemptPhase, Provider, Run, RunRequest, RunState, Severity};
use serde_json::{json, Value};
use sqlpilot::{BackendClient, ClientConfig, ClientError, RunController, RunHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    body: Value,
}

enum Reply {
    Json(u16, Value),
    /// Frames sent as separate chunks; `hold` keeps the body open afterwards.
    Stream { frames: Vec<String>, hold: bool },
}

type Handler = Arc<dyn Fn(&Request) -> Reply + Send + Sync>;

struct FakeBackend {
    base: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeBackend {
    async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let handler = handler.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, handler, log).await;
                });
            }
        });

        Self { base, requests }
    }

    fn client(&self) -> BackendClient {
        BackendClient::new(ClientConfig {
            api_base: self.base.clone(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    handler: Handler,
    log: Arc<Mutex<Vec<Request>>>,
) -> std::io::Result<()> {
    let request = read_request(&mut socket).await?;
    log.lock().unwrap().push(request.clone());

    match handler(&request) {
        Reply::Json(status, body) => {
            let body = body.to_string();
            let head = format!(
                "HTTP/1.1 {status} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                if status < 400 { "OK" } else { "Error" },
                body.len()
            );
            socket.write_all(head.as_bytes()).await?;
            socket.write_all(body.as_bytes()).await?;
        }
        Reply::Stream { frames, hold } => {
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n",
                )
                .await?;
            for frame in frames {
                let data = format!("data: {frame}\n\n");
                socket
                    .write_all(format!("{:x}\r\n{data}\r\n", data.len()).as_bytes())
                    .await?;
                socket.flush().await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            if hold {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            socket.write_all(b"0\r\n\r\n").await?;
        }
    }
    socket.flush().await?;
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
    Ok(Request { method, path, body })
}

fn frame(value: Value) -> String {
    value.to_string()
}

fn retry_then_success() -> Vec<String> {
    vec![
        frame(json!({"type":"start","message":"Auto-execution started","max_retries":3})),
        frame(json!({"type":"generating","attempt":1,"status":"Generating SQL (attempt 1/3)"})),
        frame(json!({"type":"generated","attempt":1,"sql":"SELECT vendr FROM bills","raw_sql":"```sql\nSELECT vendr FROM bills\n```"})),
        frame(json!({"type":"executing","attempt":1,"sql":"SELECT vendr FROM bills"})),
        frame(json!({"type":"error","attempt":1,"sql":"SELECT vendr FROM bills","error":"Unknown column 'vendr'","is_final":false})),
        frame(json!({"type":"generating","attempt":2})),
        frame(json!({"type":"generated","attempt":2,"sql":"SELECT vendor FROM bills"})),
        frame(json!({"type":"executing","attempt":2,"sql":"SELECT vendor FROM bills"})),
        frame(json!({"type":"success","attempt":2,"sql":"SELECT vendor FROM bills",
            "result":{"columns":["vendor"],"rows":[{"vendor":"Acme"},{"vendor":null}],"row_count":2}})),
        "[DONE]".to_string(),
    ]
}

async fn wait_until(handle: &RunHandle, what: &str, pred: impl Fn(&Run) -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pred(&handle.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn run_streams_to_success() {
    let backend = FakeBackend::start(|req| match req.path.as_str() {
        "/api/auto-execute" => Reply::Stream {
            frames: retry_then_success(),
            hold: false,
        },
        _ => Reply::Json(404, json!({"detail":"Not Found"})),
    })
    .await;

    let mut controller = RunController::new(backend.client());
    let request = RunRequest::new("vendors with bills")
        .with_provider(Provider::Genai)
        .with_model("gemini-1.5-flash")
        .with_max_retries(3);
    controller.start(request).await;
    let run = controller.wait().await.unwrap();

    assert_eq!(run.status(), RunState::Succeeded);
    assert_eq!(run.announced_budget(), Some(3));
    let outcomes: Vec<AttemptOutcome> = run.ledger().iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![AttemptOutcome::Failure, AttemptOutcome::Success]);
    let result = run.ledger().get(2).unwrap().result.clone().unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[1]["vendor"], Value::Null);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].body,
        json!({
            "query": "vendors with bills",
            "provider": "genai",
            "model_id": "gemini-1.5-flash",
            "max_retries": 3,
            "stream": true,
        })
    );
}

#[tokio::test]
async fn cancel_mid_stream_keeps_partial_ledger() {
    let backend = FakeBackend::start(|_| Reply::Stream {
        frames: vec![frame(json!({"type":"generating","attempt":1}))],
        hold: true,
    })
    .await;

    let mut controller = RunController::new(backend.client());
    let handle = controller.start(RunRequest::new("q")).await;
    wait_until(&handle, "first attempt", |run| run.ledger().len() == 1).await;

    handle.cancel();
    let run = controller.wait().await.unwrap();
    assert_eq!(run.status(), RunState::Cancelled);
    assert_eq!(run.ledger().get(1).unwrap().phase, AttemptPhase::Generating);
    assert_eq!(run.latest_notification().unwrap().severity, Severity::Warning);
}

#[tokio::test]
async fn starting_a_new_run_cancels_the_previous_one() {
    let backend = FakeBackend::start(|req| {
        if req.body["query"] == "slow" {
            Reply::Stream {
                frames: vec![frame(json!({"type":"generating","attempt":1}))],
                hold: true,
            }
        } else {
            Reply::Stream {
                frames: retry_then_success(),
                hold: false,
            }
        }
    })
    .await;

    let mut controller = RunController::new(backend.client());
    let first = controller.start(RunRequest::new("slow")).await;
    wait_until(&first, "slow run to start", |run| run.ledger().len() == 1).await;

    let second = controller.start(RunRequest::new("fast")).await;
    // start() returns only after the previous task has finished.
    assert_eq!(first.snapshot().status(), RunState::Cancelled);

    let run = controller.wait().await.unwrap();
    assert_eq!(run.request().query, "fast");
    assert_eq!(run.status(), RunState::Succeeded);
    assert_eq!(second.snapshot().status(), RunState::Succeeded);
}

#[tokio::test]
async fn non_success_status_fails_run_with_detail() {
    let backend =
        FakeBackend::start(|_| Reply::Json(500, json!({"detail":"Bedrock credentials missing"})))
            .await;

    let mut controller = RunController::new(backend.client());
    controller.start(RunRequest::new("q")).await;
    let run = controller.wait().await.unwrap();

    assert_eq!(run.status(), RunState::Failed);
    assert!(run.ledger().is_empty());
    let note = run.latest_notification().unwrap();
    assert_eq!(note.severity, Severity::Error);
    assert!(note.message.contains("Bedrock credentials missing"));
}

#[tokio::test]
async fn stream_closed_without_done_fails_run() {
    let backend = FakeBackend::start(|_| Reply::Stream {
        frames: vec![
            frame(json!({"type":"generating","attempt":1})),
            frame(json!({"type":"generated","attempt":1,"sql":"SELECT 1"})),
        ],
        hold: false,
    })
    .await;

    let mut controller = RunController::new(backend.client());
    controller.start(RunRequest::new("q")).await;
    let run = controller.wait().await.unwrap();
    assert_eq!(run.status(), RunState::Failed);
    assert_eq!(run.ledger().get(1).unwrap().sql.as_deref(), Some("SELECT 1"));
}

#[tokio::test]
async fn one_shot_endpoints() {
    let backend = FakeBackend::start(|req| match req.path.as_str() {
        "/api/generate" => Reply::Json(
            200,
            json!({"sql":"```sql\nSELECT 1;\n```","cleaned_sql":"SELECT 1;","provider":"local","model_id":"sqlcoder"}),
        ),
        "/api/execute" if req.body["sql"] == "SELECT 1;" => Reply::Json(
            200,
            json!({"success":true,"columns":["1"],"rows":[{"1":1}],"row_count":1}),
        ),
        "/api/execute" => Reply::Json(
            500,
            json!({"detail":"SQL syntax error: near 'SELEC'"}),
        ),
        "/api/providers" => Reply::Json(
            200,
            json!([{"id":"local","name":"Local (HuggingFace)","description":"CPU model",
                "default_model":"sqlcoder","available":true,"requires_api_key":false}]),
        ),
        "/api/health" => Reply::Json(200, json!({"status":"healthy","version":"1.4.0"})),
        _ => Reply::Json(404, json!({"detail":"Not Found"})),
    })
    .await;
    let client = backend.client();

    let sql = client.generate("one", Provider::Local, None).await.unwrap();
    assert_eq!(sql, "SELECT 1;");

    let result = client.execute(&sql).await.unwrap();
    assert_eq!(result.columns, vec!["1".to_string()]);
    assert_eq!(result.row_count, 1);

    match client.execute("SELEC 1").await {
        Err(ClientError::Status { status, detail }) => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(detail, "SQL syntax error: near 'SELEC'");
        }
        other => panic!("expected status error, got {other:?}"),
    }

    let providers = client.providers().await.unwrap();
    assert_eq!(providers[0].default_model, "sqlcoder");

    let health = client.health().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version.as_deref(), Some("1.4.0"));

    let generate_body = &backend.requests()[0].body;
    assert_eq!(generate_body["stream"], json!(false));
    assert_eq!(generate_body["model_id"], Value::Null);
}
