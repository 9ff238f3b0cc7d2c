//! An echo client that rides out a peer which keeps restarting.
//! Run with: cargo run --example reconnect_echo

use resilient_tcp::ConnectionConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::sleep;

/// Echo server that is up for `up`, down for `down`, forever, on the same address.
async fn flapping_echo(addr: SocketAddr, up: Duration, down: Duration) {
    loop {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                eprintln!("server: bind failed: {}", e);
                return;
            }
        };
        println!("server: up");

        let mut sessions = JoinSet::new();
        let serve = async {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    continue;
                };
                sessions.spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        };
        let _ = tokio::time::timeout(up, serve).await;

        // Dropping the listener and the sessions takes the peer down.
        drop(sessions);
        drop(listener);
        println!("server: down");
        sleep(down).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Reserve a port, then let the flapping server own it.
    let addr = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;
    tokio::spawn(flapping_echo(
        addr,
        Duration::from_millis(1500),
        Duration::from_millis(700),
    ));
    sleep(Duration::from_millis(50)).await;

    let conn = ConnectionConfig::builder()
        .max_retries(8)
        .retry_interval(Duration::from_millis(50))
        .call_timeout(Duration::from_secs(2))
        .name("echo")
        .on_reconnect(|attempt| println!("client: reconnected on attempt {}", attempt))
        .on_reconnect_failed(|attempt, delay| {
            println!("client: attempt {} failed, backing off {:?}", attempt, delay)
        })
        .build()
        .dial("tcp", &addr.to_string())
        .await?;

    let mut buf = [0u8; 64];
    for i in 0..20 {
        let message = format!("ping {}", i);
        match conn.write(message.as_bytes()).await {
            Ok(n) => println!("client: wrote {} bytes", n),
            Err(e) => println!("client: write failed: {}", e),
        }

        // A write into a half-dead connection can succeed; the read notices.
        // The echo went out with the old session, so the new one stays quiet.
        match conn.read(&mut buf).await {
            Ok(n) => println!("client: read {:?}", String::from_utf8_lossy(&buf[..n])),
            Err(e) if e.is_retries_exhausted() => println!("client: peer unreachable, moving on"),
            Err(e) if e.is_deadline_exceeded() => println!("client: echo lost with the old session"),
            Err(e) => return Err(e.into()),
        }

        sleep(Duration::from_millis(250)).await;
    }

    println!("stats: {:?}", conn.stats());
    conn.close().await?;
    Ok(())
}
