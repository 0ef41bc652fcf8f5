//! End-to-end origination tests against a scripted fake manager endpoint
//!
//! The whole engine runs here (session supervision, event loop, pending
//! table) with a fake PBX on the other end of a real TCP socket.

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use ringline_call_engine::prelude::*;

async fn read_block(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 2048];
    loop {
        let n = stream.read(&mut chunk).await.expect("fake pbx read");
        assert!(n > 0, "client closed early");
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(buf).expect("utf8")
}

fn action_id_of(block: &str) -> String {
    block
        .lines()
        .find_map(|line| line.strip_prefix("ActionID: "))
        .expect("block has ActionID")
        .trim()
        .to_string()
}

/// Fake PBX: accepts one session, handles login, reads the originate
/// action, forwards its raw block to the test, and answers according to
/// `respond` (None = never send the origination response event).
async fn fake_pbx(
    respond: Option<&'static str>,
) -> (CallEngineConfig, mpsc::Receiver<String>, tokio::task::JoinHandle<()>) {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (block_tx, block_rx) = mpsc::channel(1);

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        stream
            .write_all(b"Asterisk Call Manager/5.0.2\r\n")
            .await
            .expect("banner");

        let login = read_block(&mut stream).await;
        let login_id = action_id_of(&login);
        let ack = format!(
            "Response: Success\r\nActionID: {}\r\nMessage: Authentication accepted\r\n\r\n",
            login_id
        );
        stream.write_all(ack.as_bytes()).await.expect("login ack");

        let originate = read_block(&mut stream).await;
        assert!(originate.contains("Action: Originate"));
        let request_id = action_id_of(&originate);
        block_tx.send(originate).await.expect("forward block");

        let ack = format!("Response: Success\r\nActionID: {}\r\n\r\n", request_id);
        stream.write_all(ack.as_bytes()).await.expect("originate ack");

        if let Some(template) = respond {
            let event = template.replace("{id}", &request_id);
            stream.write_all(event.as_bytes()).await.expect("originate response");
        }

        // Hold the session open while the test finishes.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut config = CallEngineConfig::default();
    config.ami.host = "127.0.0.1".to_string();
    config.ami.port = addr.port();
    config.ami.secret = "test".to_string();
    config.ami.action_timeout = Duration::from_secs(2);
    config.origination.default_trunk = "trunk-east".to_string();

    (config, block_rx, handle)
}

fn engine(config: CallEngineConfig) -> Arc<CallEngine> {
    CallEngine::new(
        config,
        Arc::new(MemoryCallStore::new()),
        Arc::new(NullContactDirectory),
        Arc::new(NullNotifier),
    )
    .expect("engine builds")
}

fn params() -> OriginateParams {
    OriginateParams {
        to_number: "14045551234".into(),
        from_number: "+14045550000".into(),
        transfer_number: Some("4045559999".into()),
        ivr_audio: Some("greeting.wav".into()),
        amd_enabled: true,
        ..Default::default()
    }
}

#[tokio::test]
#[serial]
async fn successful_origination_resolves_with_assigned_call_id() {
    let (config, mut blocks, server) = fake_pbx(Some(
        "Event: OriginateResponse\r\nActionID: {id}\r\nResponse: Success\r\n\
         Uniqueid: 1722890000.200\r\nChannel: PJSIP/+14045551234@trunk-east-00000001\r\n\r\n",
    ))
    .await;

    let engine = engine(config);
    engine.start().await;
    assert!(engine.is_live());

    let outcome = engine.originate(params()).await.expect("origination succeeds");
    assert_eq!(outcome.call_id.as_str(), "1722890000.200");
    // No caller-supplied correlation id: it defaults to the request id.
    assert_eq!(outcome.correlation_id.as_str(), outcome.request_id.as_str());

    // The wire block carries the two normalization forms and the full
    // call-setup variable contract.
    let block = blocks.recv().await.expect("originate block");
    assert!(block.contains("Channel: PJSIP/+14045551234@trunk-east\r\n"), "block: {}", block);
    assert!(block.contains("CallerID: +14045550000\r\n"));
    assert!(block.contains("Variable: RL_TRANSFER_NUMBER=14045559999\r\n"));
    assert!(block.contains("Variable: RL_TO_NUMBER=+14045551234\r\n"));
    assert!(block.contains("Variable: RL_FROM_NUMBER=+14045550000\r\n"));
    assert!(block.contains("Variable: RL_TRUNK=trunk-east\r\n"));
    assert!(block.contains(&format!(
        "Variable: RL_CORRELATION_ID={}\r\n",
        outcome.correlation_id
    )));
    assert!(block.contains("Variable: RL_IVR_AUDIO=greeting.wav\r\n"));
    assert!(block.contains("Variable: RL_AMD=1\r\n"));
    assert!(block.contains("Async: true\r\n"));

    let stats = engine.stats();
    assert_eq!(stats.total_originated, 1);
    assert_eq!(stats.pending_originations, 0);

    engine.shutdown();
    server.abort();
}

#[tokio::test]
#[serial]
async fn rejected_origination_carries_protocol_details() {
    let (config, _blocks, server) = fake_pbx(Some(
        "Event: OriginateResponse\r\nActionID: {id}\r\nResponse: Failure\r\nReason: 3\r\n\
         Channel: PJSIP/+14045551234@trunk-east-00000001\r\nUniqueid: <null>\r\n\r\n",
    ))
    .await;

    let engine = engine(config);
    engine.start().await;

    let err = engine.originate(params()).await.expect_err("PBX said no");
    match err {
        CallEngineError::Origination(OriginateFailure::Rejected { response, reason, channel, .. }) => {
            assert_eq!(response, "Failure");
            assert_eq!(reason.as_deref(), Some("3"));
            assert!(channel.unwrap().contains("trunk-east"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(engine.stats().pending_originations, 0);

    engine.shutdown();
    server.abort();
}

#[tokio::test]
#[serial]
async fn silent_pbx_fails_the_handle_with_timeout() {
    let (mut config, _blocks, server) = fake_pbx(None).await;
    // A short deadline keeps the test quick; the contract is the same.
    config.origination.response_timeout = Duration::from_millis(400);

    let engine = engine(config);
    engine.start().await;

    let started = std::time::Instant::now();
    let err = engine.originate(params()).await.expect_err("nothing came back");
    assert!(matches!(
        err,
        CallEngineError::Origination(OriginateFailure::Timeout(_))
    ));
    // Exactly one of success/failure fired, within the deadline window.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(engine.stats().pending_originations, 0);

    engine.shutdown();
    server.abort();
}

#[tokio::test]
#[serial]
async fn origination_without_a_session_fails_immediately() {
    let mut config = CallEngineConfig::default();
    config.ami.port = 1; // nothing listens here
    config.ami.action_timeout = Duration::from_millis(200);

    let engine = engine(config);
    // Not started: no supervisor, no session, and the one eager
    // reconnect inside originate() cannot succeed either.
    let err = engine.originate(params()).await.expect_err("no session");
    assert!(matches!(err, CallEngineError::ConnectionUnavailable(_)));
    assert_eq!(engine.stats().pending_originations, 0);
}
