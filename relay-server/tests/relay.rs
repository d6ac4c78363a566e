use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    Connection, Event, FrameReader, FrameWriter, ProtocolError, TcpTransport, Transport,
    TransportConfig,
};
use relay_server::{ConnectionStatus, Registry, RelayServer};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    addr: SocketAddr,
    registry: Arc<Registry>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn start_server() -> Running {
    let server = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
    }));
    Running {
        addr,
        registry,
        stop,
        task,
    }
}

async fn connect(
    running: &Running,
    expected_online: usize,
) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let transport = TcpTransport::connect(&running.addr.to_string(), &TransportConfig::default())
        .await
        .unwrap();
    let halves = Connection::new(transport).split();
    // 等待服务端处理器完成登记
    timeout(READ_TIMEOUT, async {
        while running.registry.connected_count().await < expected_online {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server should register the connection");
    halves
}

async fn next_event(reader: &mut FrameReader<OwnedReadHalf>) -> Event {
    timeout(READ_TIMEOUT, reader.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event")
}

#[tokio::test]
async fn events_fan_out_to_everyone_but_the_sender() {
    let running = start_server().await;
    let (mut a_reader, mut a_writer) = connect(&running, 1).await;
    let (mut b_reader, mut b_writer) = connect(&running, 2).await;
    let (mut c_reader, _c_writer) = connect(&running, 3).await;

    let sent = [
        Event::join("alice"),
        Event::message("alice", "hello"),
        Event::message("alice", ""),
        Event::leave("alice"),
    ];
    for event in &sent {
        a_writer.send(event).await.unwrap();
    }

    for event in &sent {
        assert_eq!(&next_event(&mut b_reader).await, event);
        assert_eq!(&next_event(&mut c_reader).await, event);
    }

    // A 发送 Leave 后服务端关闭了它的连接，期间没有收到任何回显
    let closed = timeout(READ_TIMEOUT, a_reader.recv()).await.unwrap();
    assert!(matches!(closed, Err(ProtocolError::ConnectionClosed)));

    // A 已断开，B 的事件只到 C
    b_writer.send(&Event::message("bob", "anyone?")).await.unwrap();
    assert_eq!(
        next_event(&mut c_reader).await,
        Event::message("bob", "anyone?")
    );

    let _ = running.stop.send(());
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn late_joiner_only_sees_later_events() {
    let running = start_server().await;
    let (_a_reader, mut a_writer) = connect(&running, 1).await;
    let (mut b_reader, _b_writer) = connect(&running, 2).await;

    a_writer.send(&Event::message("alice", "early")).await.unwrap();
    assert_eq!(
        next_event(&mut b_reader).await,
        Event::message("alice", "early")
    );

    let (mut c_reader, _c_writer) = connect(&running, 3).await;
    a_writer.send(&Event::message("alice", "late")).await.unwrap();
    assert_eq!(
        next_event(&mut c_reader).await,
        Event::message("alice", "late")
    );
    assert_eq!(
        next_event(&mut b_reader).await,
        Event::message("alice", "late")
    );

    let _ = running.stop.send(());
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn peer_close_marks_entry_disconnected() {
    let running = start_server().await;
    let (a_reader, a_writer) = connect(&running, 1).await;
    let (_b_reader, _b_writer) = connect(&running, 2).await;

    drop(a_writer);
    drop(a_reader);

    timeout(READ_TIMEOUT, async {
        while running.registry.connected_count().await != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let statuses: Vec<_> = running
        .registry
        .snapshot()
        .await
        .into_iter()
        .map(|(_, entry)| entry.status)
        .collect();
    assert!(statuses.contains(&ConnectionStatus::Disconnected));

    let _ = running.stop.send(());
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let running = start_server().await;
    let (mut a_reader, _a_writer) = connect(&running, 1).await;

    let _ = running.stop.send(());
    running.task.await.unwrap().unwrap();

    let closed = timeout(READ_TIMEOUT, a_reader.recv()).await.unwrap();
    assert!(matches!(closed, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(running.registry.connected_count().await, 0);
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let first = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let taken = first.local_addr().unwrap().to_string();

    let second = RelayServer::bind(&taken).await;
    let err = second.err().expect("address is already in use");
    assert!(err.to_string().contains(&taken));
}
