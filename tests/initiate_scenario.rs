//! End-to-end outbound-connect scenario: `Preconnection::initiate` drives the
//! `TcpModule`'s `connect` entry point to a server raw `TcpListener`, then
//! sends and receives a message over the resulting `Connection`.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use taps_core::{
    Ability, AmbientRuntime, ConnectionCallbacks, ConnectionType, Endpoint, Message, Preconnection,
    ProtocolDescriptor, RecvCallbacks, SendCallbacks, StaticCatalog, TransportProperties,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

fn tcp_catalog() -> StaticCatalog {
    let mut supported = 0u16;
    for ability in [
        Ability::Reliability,
        Ability::PreserveOrder,
        Ability::FullChecksumSend,
        Ability::FullChecksumRecv,
        Ability::CongestionControl,
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
async fn initiate_connects_and_round_trips_a_message() {
    let raw_listener = TcpListener::bind("127.0.0.1:18392").await.unwrap();

    let server_task = tokio::spawn(async move {
        let (mut stream, _addr) = raw_listener.accept().await.unwrap();
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await.unwrap();
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();

        stream.write_all(&(buf.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(&buf).await.unwrap();
        stream.flush().await.unwrap();
        buf
    });

    let catalog = tcp_catalog();
    let properties = TransportProperties::new(ConnectionType::Initiate);

    let mut remote = Endpoint::new();
    remote.with_ipv4(Ipv4Addr::LOCALHOST).unwrap();
    remote.with_port(18392).unwrap();

    let pre = Preconnection::new(vec![], vec![remote], properties, &catalog, None).unwrap();
    let registry = taps_core::default_registry();

    let conn = pre
        .initiate(
            &registry,
            &AmbientRuntime,
            ConnectionCallbacks { closed: Box::new(|| {}), connection_error: Box::new(|_| {}) },
        )
        .await
        .unwrap();

    let sent = Arc::new(Notify::new());
    let sent_cb = Arc::clone(&sent);
    conn.send(
        Message::new(&b"ping"[..]),
        1,
        SendCallbacks {
            sent: Box::new(move |_| sent_cb.notify_one()),
            expired: Box::new(|_| {}),
            send_error: Box::new(|_, _| {}),
        },
    );
    tokio::time::timeout(Duration::from_secs(2), sent.notified()).await.unwrap();

    let received = Arc::new(Notify::new());
    let received_cb = Arc::clone(&received);
    let got = Arc::new(std::sync::Mutex::new(Vec::new()));
    let got_cb = Arc::clone(&got);
    conn.receive(
        2,
        1,
        1024,
        RecvCallbacks {
            received: Box::new(|_, _| {}),
            // The TCP module reports frame arrivals as `ReceivedPartial`
            // (`Received` is reserved for a genuine peer FIN); `minLength ==
            // 1` means the whole reply satisfies the item on its first event.
            received_partial: Box::new(move |_token, data| {
                *got_cb.lock().unwrap() = data.to_vec();
                received_cb.notify_one();
            }),
            receive_error: Box::new(|_, _| {}),
        },
    );
    tokio::time::timeout(Duration::from_secs(2), received.notified()).await.unwrap();

    assert_eq!(*got.lock().unwrap(), b"ping".to_vec());
    assert_eq!(server_task.await.unwrap(), b"ping".to_vec());
}

#[tokio::test]
async fn require_rejects_all_surfaces_no_viable_protocol() {
    let mut supported = 0u16;
    supported |= Ability::Reliability.bit();
    let catalog = StaticCatalog::new(vec![ProtocolDescriptor {
        name: "_kernel_TCP".to_string(),
        wire_protocol: "TCP".to_string(),
        module_path: "taps_tcp".to_string(),
        supported,
    }]);

    let mut properties = TransportProperties::new(ConnectionType::Initiate);
    properties.set(taps_core::Ability::Multipath, taps_core::Preference::Require);

    let err = Preconnection::new(vec![], vec![], properties, &catalog, None).unwrap_err();
    assert_eq!(err, taps_core::TapsError::NoViableProtocol);
}
