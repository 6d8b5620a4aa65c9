//! End-to-end echo server scenario: a `Preconnection` listens with the
//! bundled `TcpModule`, a real TCP client connects and writes a frame, the
//! application echoes it back on `received`, and the client reads the same
//! bytes back.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use taps_core::{
    Ability, AmbientRuntime, ConnectionCallbacks, ConnectionType, Endpoint, ListenerCallbacks,
    Message, Preconnection, ProtocolDescriptor, RecvCallbacks, SendCallbacks, StaticCatalog,
    TransportProperties,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

fn echo_catalog() -> StaticCatalog {
    let mut supported = 0u16;
    for ability in [
        Ability::Reliability,
        Ability::PreserveOrder,
        Ability::FullChecksumSend,
        Ability::FullChecksumRecv,
        Ability::CongestionControl,
        Ability::KeepAlive,
        Ability::ZeroRttMsg,
    ] {
        supported |= ability.bit();
    }
    StaticCatalog::new(vec![ProtocolDescriptor {
        name: "_kernel_TCP".to_string(),
        wire_protocol: "TCP".to_string(),
        module_path: "taps_tcp".to_string(),
        supported,
    }])
}

#[tokio::test]
async fn echo_server_happy_path() {
    let _ = tracing_subscriber::fmt::try_init();

    let catalog = echo_catalog();
    let properties = TransportProperties::new(ConnectionType::Listener);

    let mut local = Endpoint::new();
    local.with_ipv4(Ipv4Addr::LOCALHOST).unwrap();
    local.with_port(18391).unwrap();

    let pre = Preconnection::new(vec![local], vec![], properties, &catalog, None).unwrap();
    let registry = taps_core::default_registry();

    let echoed = Arc::new(Notify::new());
    let echoed_cb = Arc::clone(&echoed);

    let listener = pre
        .listen(
            &registry,
            &AmbientRuntime,
            None,
            ListenerCallbacks {
                connection_received: Box::new(move |conn| {
                    let conn_for_send = conn.clone();
                    let echoed_cb = Arc::clone(&echoed_cb);
                    conn.receive(
                        1,
                        1,
                        1024,
                        RecvCallbacks {
                            received: Box::new(|_, _| {}),
                            // The TCP module reports ordinary frame arrivals as
                            // `ReceivedPartial` (spec.md §6.1 reserves `Received`
                            // for a genuine peer FIN); with `minLength == 1` the
                            // whole frame satisfies the item on its first event,
                            // so the echo happens here rather than in `received`.
                            received_partial: Box::new(move |_token, data| {
                                conn_for_send.send(
                                    Message::new(data),
                                    1,
                                    SendCallbacks {
                                        sent: Box::new(move |_| echoed_cb.notify_one()),
                                        expired: Box::new(|_| {}),
                                        send_error: Box::new(|_, _| {}),
                                    },
                                );
                            }),
                            receive_error: Box::new(|_, _| {}),
                        },
                    );
                    Some(ConnectionCallbacks { closed: Box::new(|| {}), connection_error: Box::new(|_| {}) })
                }),
                establishment_error: Box::new(|_| {}),
                stopped: Box::new(|| {}),
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect("127.0.0.1:18391").await.unwrap();
    let payload = b"hello\n";
    client.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
    client.write_all(payload).await.unwrap();
    client.flush().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), echoed.notified())
        .await
        .expect("server did not echo the frame in time");

    let mut len_bytes = [0u8; 4];
    client.read_exact(&mut len_bytes).await.unwrap();
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, payload);

    listener.stop().await;
}
