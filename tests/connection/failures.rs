use super::helpers::{Dial, GREETING, Scripted, ScriptedConnector, peer_addr};
use resilient_tcp::{
    ConnectionConfig, ConnectionState, Error, ExponentialBackoff, FailureKind, ResilientConnection,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn wrap(
    active: io::ErrorKind,
    connector: &ScriptedConnector,
    config: ConnectionConfig,
) -> ResilientConnection<Scripted, ScriptedConnector> {
    ResilientConnection::new(
        Scripted::failing(active, &connector.closed),
        connector.clone(),
        peer_addr(),
        config,
    )
}

fn config(max_retries: u32) -> ConnectionConfig {
    ConnectionConfig::builder()
        .max_retries(max_retries)
        .retry_interval(Duration::from_millis(100))
        .build()
}

#[tokio::test]
async fn permission_denied_passes_through_unchanged() {
    let connector = ScriptedConnector::new([]);
    let conn = wrap(io::ErrorKind::PermissionDenied, &connector, config(5));

    let err = conn.write(b"x").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Fatal);
    match err {
        Error::Io(source) => assert_eq!(source.kind(), io::ErrorKind::PermissionDenied),
        other => panic!("expected io error, got {:?}", other),
    }
    assert_eq!(connector.dial_count(), 0);
}

#[tokio::test]
async fn timeouts_from_the_transport_are_fatal() {
    let connector = ScriptedConnector::new([]);
    let conn = wrap(io::ErrorKind::TimedOut, &connector, config(5));

    let mut buf = [0u8; 8];
    assert!(matches!(conn.read(&mut buf).await, Err(Error::Io(_))));
    assert_eq!(connector.dial_count(), 0);
    assert_eq!(conn.stats().fatal_errors(), 1);
}

#[tokio::test(start_paused = true)]
async fn connection_reset_on_read_reconnects() {
    let connector = ScriptedConnector::new([Dial::Refused, Dial::Healthy]);
    let conn = wrap(io::ErrorKind::ConnectionReset, &connector, config(5));

    let start = Instant::now();
    let mut buf = [0u8; 32];
    let n = conn.read(&mut buf).await.unwrap();

    assert_eq!(&buf[..n], GREETING);
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(connector.dial_count(), 2);
    // The broken transport was retired once the healthy one took its place.
    assert_eq!(connector.closed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_error_after_reconnect_is_returned() {
    let connector = ScriptedConnector::new([Dial::Failing(io::ErrorKind::InvalidData)]);
    let conn = wrap(io::ErrorKind::BrokenPipe, &connector, config(5));

    let err = conn.write(b"x").await.unwrap_err();
    assert!(matches!(err, Error::Io(ref source) if source.kind() == io::ErrorKind::InvalidData));
    assert_eq!(conn.stats().reconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_failed_reconnects() {
    let connector = ScriptedConnector::new([Dial::Refused; 16]);
    let conn = wrap(io::ErrorKind::BrokenPipe, &connector, config(6));

    let start = Instant::now();
    let err = conn.write(b"x").await.unwrap_err();

    assert!(err.is_retries_exhausted());
    assert_eq!(err.kind(), FailureKind::RetryBudgetExhausted);
    // Five failed reconnects, sleeping after all but the last.
    assert_eq!(connector.dial_count(), 5);
    assert_eq!(
        start.elapsed(),
        ExponentialBackoff::total(Duration::from_millis(100), 4)
    );
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn every_call_starts_with_a_fresh_budget() {
    let connector = ScriptedConnector::new([Dial::Refused; 4]);
    let conn = wrap(io::ErrorKind::BrokenPipe, &connector, config(3));

    assert!(conn.write(b"x").await.unwrap_err().is_retries_exhausted());
    assert!(conn.write(b"x").await.unwrap_err().is_retries_exhausted());
    assert_eq!(connector.dial_count(), 4);

    // Plan exhausted, dials now succeed.
    let start = Instant::now();
    assert_eq!(conn.write(b"x").await.unwrap(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(conn.stats().exhausted_calls(), 2);
}

#[tokio::test]
async fn zero_retries_exhaust_without_io() {
    let connector = ScriptedConnector::new([]);
    let closed = Arc::clone(&connector.closed);
    let conn = ResilientConnection::new(
        Scripted::healthy(&closed),
        connector.clone(),
        peer_addr(),
        config(0),
    );

    let err = conn.write(b"x").await.unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 0 }));
    assert_eq!(connector.dial_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn call_timeout_cuts_the_retry_loop_short() {
    let connector = ScriptedConnector::new([Dial::Refused; 16]);
    let conn = wrap(
        io::ErrorKind::BrokenPipe,
        &connector,
        ConnectionConfig::builder()
            .max_retries(20)
            .retry_interval(Duration::from_millis(100))
            .call_timeout(Duration::from_millis(500))
            .build(),
    );

    let start = Instant::now();
    let err = conn.write(b"x").await.unwrap_err();
    assert!(err.is_deadline_exceeded());
    assert_eq!(start.elapsed(), Duration::from_millis(500));

    let io_err: io::Error = err.into();
    assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
}

#[tokio::test]
async fn close_interrupts_a_hanging_reconnect() {
    let connector = ScriptedConnector::new([Dial::Hang]);
    let conn = Arc::new(wrap(io::ErrorKind::ConnectionReset, &connector, config(5)));

    let reader = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let mut buf = [0u8; 8];
            conn.read(&mut buf).await
        })
    };

    while connector.dial_count() == 0 {
        tokio::task::yield_now().await;
    }

    conn.close().await.unwrap();
    assert!(reader.await.unwrap().unwrap_err().is_closed());
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn close_interrupts_backoff_sleep() {
    let connector = ScriptedConnector::new([Dial::Refused; 4]);
    let conn = Arc::new(wrap(
        io::ErrorKind::BrokenPipe,
        &connector,
        ConnectionConfig::builder()
            .max_retries(5)
            .retry_interval(Duration::from_secs(60))
            .build(),
    ));

    let writer = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.write(b"x").await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    conn.close().await.unwrap();

    assert!(writer.await.unwrap().unwrap_err().is_closed());
    assert_eq!(connector.dial_count(), 1);
}
