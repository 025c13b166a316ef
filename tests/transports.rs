#![cfg(unix)]
mod support;

use std::time::{Duration, Instant};

use llmserv::{
    ChatTurn, CompletionRequest, CurlExec, DirectSocket, Endpoint, ErrorKind, PipeExec, TlsTrust,
    Transport,
};
use support::{json_reply, request_body, write_script, MockUpstream};

const OK_BODY: &str = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hello \"world\"\nbye"}}]}"#;

fn req() -> CompletionRequest {
    let mut r = CompletionRequest::new("gpt-test", 0.25).with_max_tokens(Some(64));
    r.push(ChatTurn::system("sys"));
    r.push(ChatTurn::user("ping"));
    r
}

fn assert_request_json(body: &str) {
    let v: serde_json::Value = serde_json::from_str(body).expect("request body is JSON");
    assert_eq!(v["model"], "gpt-test");
    assert_eq!(v["temperature"].as_f64(), Some(0.25));
    assert_eq!(v["max_tokens"], 64);
    assert_eq!(v["messages"][0]["role"], "system");
    assert_eq!(v["messages"][1]["role"], "user");
    assert_eq!(v["messages"][1]["content"], "ping");
}

#[test]
fn test_direct_socket_posts_and_extracts_content() {
    let upstream = MockUpstream::start(vec![json_reply("200 OK", OK_BODY)]);
    let ep = Endpoint::parse(&upstream.base_url()).expect("endpoint");
    let t = DirectSocket::new(ep, "sk-secret".into(), TlsTrust::Verify, Duration::from_secs(5));

    assert_eq!(t.complete(&req()).unwrap(), "Hello \"world\"\nbye");

    let raw = upstream.next_request();
    assert!(raw.starts_with("POST /v1/chat/completions HTTP/1.1\r\n"), "{raw}");
    assert!(raw.contains("Authorization: Bearer sk-secret\r\n"));
    assert!(raw.contains(&format!("Host: {}\r\n", upstream.addr)));
    assert_request_json(request_body(&raw));
}

#[test]
fn test_direct_socket_non_2xx_is_upstream_error() {
    let upstream = MockUpstream::start(vec![json_reply(
        "401 Unauthorized",
        r#"{"error":{"message":"bad key"}}"#,
    )]);
    let ep = Endpoint::parse(&upstream.base_url()).expect("endpoint");
    let t = DirectSocket::new(ep, "k".into(), TlsTrust::Verify, Duration::from_secs(5));
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert!(err.message.starts_with("HTTP 401"), "{}", err.message);
    assert!(err.message.contains("bad key"));
}

#[test]
fn test_direct_socket_reads_chunked_reply() {
    let json = r#"{"choices":[{"message":{"content":"chunky"}}]}"#;
    let (a, b) = json.split_at(10);
    let reply = format!(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{:x}\r\n{a}\r\n{:x}\r\n{b}\r\n0\r\n\r\n",
        a.len(),
        b.len()
    );
    let upstream = MockUpstream::start(vec![reply.into_bytes()]);
    let ep = Endpoint::parse(&upstream.base_url()).expect("endpoint");
    let t = DirectSocket::new(ep, "k".into(), TlsTrust::Verify, Duration::from_secs(5));
    assert_eq!(t.complete(&req()).unwrap(), "chunky");
}

#[test]
fn test_direct_socket_missing_content_is_upstream_error() {
    let upstream = MockUpstream::start(vec![json_reply("200 OK", r#"{"choices":[]}"#)]);
    let ep = Endpoint::parse(&upstream.base_url()).expect("endpoint");
    let t = DirectSocket::new(ep, "k".into(), TlsTrust::Verify, Duration::from_secs(5));
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
}

#[test]
fn test_direct_socket_connection_refused_is_transport_error() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let ep = Endpoint::parse(&format!("http://127.0.0.1:{port}")).expect("endpoint");
    let t = DirectSocket::new(ep, "k".into(), TlsTrust::Verify, Duration::from_secs(2));
    assert_eq!(t.complete(&req()).unwrap_err().kind, ErrorKind::Transport);
}

#[test]
fn test_direct_socket_deadline_covers_the_whole_reply() {
    let reply = json_reply("200 OK", r#"{"choices":[{"message":{"content":"slow"}}]}"#);
    let upstream = MockUpstream::dripping(reply, Duration::from_millis(200));
    let ep = Endpoint::parse(&upstream.base_url()).expect("endpoint");
    let t = DirectSocket::new(ep, "k".into(), TlsTrust::Verify, Duration::from_secs(1));

    let started = Instant::now();
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("deadline"), "{}", err.message);
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
}

#[test]
fn test_pipe_command_gets_request_on_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("stdin.json");
    let script = write_script(
        dir.path(),
        "model.sh",
        &format!(
            "cat > '{}'\nprintf '%s' '{{\"choices\":[{{\"message\":{{\"content\":\"local says hi\"}}}}]}}'",
            seen.display()
        ),
    );
    let t = PipeExec::new(
        vec![script.display().to_string()],
        Duration::from_secs(10),
    );
    assert_eq!(t.complete(&req()).unwrap(), "local says hi");
    assert_request_json(&std::fs::read_to_string(&seen).unwrap());
}

#[test]
fn test_pipe_command_passes_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "args.sh",
        r#"cat >/dev/null; printf '{"content":"%s-%s"}' "$1" "$2""#,
    );
    let t = PipeExec::new(
        vec![script.display().to_string(), "--flag".into(), "two words".into()],
        Duration::from_secs(10),
    );
    assert_eq!(t.complete(&req()).unwrap(), "--flag-two words");
}

#[test]
fn test_pipe_command_failures_are_classified() {
    let dir = tempfile::tempdir().unwrap();
    let failing = write_script(dir.path(), "fail.sh", "cat >/dev/null; echo 'model missing' >&2; exit 7");
    let t = PipeExec::new(vec![failing.display().to_string()], Duration::from_secs(10));
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("status 7"));
    assert!(err.message.contains("model missing"));

    let missing = dir.path().join("does-not-exist");
    let t = PipeExec::new(vec![missing.display().to_string()], Duration::from_secs(10));
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("not found"), "{}", err.message);
}

#[test]
fn test_pipe_command_deadline_kills_child() {
    let dir = tempfile::tempdir().unwrap();
    let slow = write_script(dir.path(), "slow.sh", "cat >/dev/null; sleep 30");
    let t = PipeExec::new(vec![slow.display().to_string()], Duration::from_millis(500));
    let started = Instant::now();
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("timed out"), "{}", err.message);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_curl_transport_uses_fixed_argv_and_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let stdin_file = dir.path().join("stdin.json");
    let fake = write_script(
        dir.path(),
        "curl",
        &format!(
            "for a in \"$@\"; do printf '%s\\n' \"$a\"; done > '{}'\ncat > '{}'\nprintf '%s' '{}'",
            args_file.display(),
            stdin_file.display(),
            OK_BODY
        ),
    );
    let t = CurlExec::new(
        fake,
        "https://api.example.test/v1/chat/completions".into(),
        "sk-curl".into(),
        Duration::from_secs(10),
    );
    assert_eq!(t.complete(&req()).unwrap(), "Hello \"world\"\nbye");

    let args = std::fs::read_to_string(&args_file).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert!(args.contains(&"Authorization: Bearer sk-curl"));
    assert!(args.contains(&"--data-binary"));
    assert!(args.contains(&"@-"));
    assert!(args.contains(&"--write-out"));
    assert_eq!(args.last(), Some(&"https://api.example.test/v1/chat/completions"));
    assert_request_json(&std::fs::read_to_string(&stdin_file).unwrap());
}

#[test]
fn test_curl_transport_reports_http_status() {
    let dir = tempfile::tempdir().unwrap();
    let fake = write_script(
        dir.path(),
        "curl",
        r#"cat >/dev/null; printf '%s\n%s' '{"error":{"message":"bad key","content":"x"}}' 401"#,
    );
    let t = CurlExec::new(fake, "https://x/v1/chat/completions".into(), "k".into(), Duration::from_secs(10));
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert!(err.message.starts_with("HTTP 401"), "{}", err.message);
    assert!(err.message.contains("bad key"));

    let ok = write_script(
        dir.path(),
        "curl-ok",
        r#"cat >/dev/null; printf '%s\n%s' '{"choices":[{"message":{"content":"fine"}}]}' 200"#,
    );
    let t = CurlExec::new(ok, "https://x/v1/chat/completions".into(), "k".into(), Duration::from_secs(10));
    assert_eq!(t.complete(&req()).unwrap(), "fine");
}

#[test]
fn test_curl_transport_nonzero_exit_is_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let fake = write_script(
        dir.path(),
        "curl",
        "cat >/dev/null; echo 'curl: (6) Could not resolve host' >&2; exit 6",
    );
    let t = CurlExec::new(fake, "https://x/v1/chat/completions".into(), "k".into(), Duration::from_secs(10));
    let err = t.complete(&req()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(err.message.contains("Could not resolve host"));
}
