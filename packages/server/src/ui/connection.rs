//! Connection pumps: the bridge between one WebSocket and the engine.
//!
//! Each connection runs two tasks. The inbound pump reads frames, decodes
//! them and hands envelopes to the manager. The outbound pump drains the
//! connection's outbound queue into the socket and sends keepalive pings.
//! Whichever stops first triggers the teardown, which runs exactly once in
//! `serve`.

use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{body::Bytes, extract::ws::Message};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinError,
    time::{self, Instant},
};

use crate::{
    config::EngineConfig,
    domain::{Envelope, Identity, OutboundFrame, SessionId, UserId},
    engine::{ManagerHandle, Session},
    infrastructure::dto::conversion::{DecodeError, decode_envelope},
};

/// Why a pump stopped. Every variant leads to a full connection teardown.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    Oversize { size: usize, max: usize },

    #[error("undecodable frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no frame from peer within {0:?}")]
    LivenessTimeout(Duration),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

/// Run both pumps for an accepted session until the connection ends, then
/// remove all of its memberships.
pub async fn serve<S, E>(
    socket: S,
    session: Session,
    manager: ManagerHandle,
    config: Arc<EngineConfig>,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
    <S as Sink<Message>>::Error: Display + Send,
    E: Display + Send + 'static,
{
    let Session {
        id,
        identity,
        outbound,
        ..
    } = session;
    let user_id = identity.user_id.clone();
    let (sink, stream) = socket.split();

    let mut inbound_task = tokio::spawn(inbound_pump(
        stream,
        identity,
        id,
        manager.clone(),
        config.clone(),
    ));
    let mut outbound_task = tokio::spawn(outbound_pump(sink, outbound, config.clone()));

    tokio::select! {
        result = &mut inbound_task => {
            log_exit("inbound", &user_id, result);
            manager.disconnect(user_id.clone(), id).await;
            // the outbound pump sends a close frame once the queue closes
            if time::timeout(config.write_wait, &mut outbound_task).await.is_err() {
                tracing::debug!("Outbound pump of '{}' did not drain in time", user_id);
                outbound_task.abort();
            }
        }
        result = &mut outbound_task => {
            log_exit("outbound", &user_id, result);
            inbound_task.abort();
            manager.disconnect(user_id.clone(), id).await;
        }
    }

    tracing::info!("Connection of '{}' closed", user_id);
}

fn log_exit(pump: &str, user_id: &UserId, result: Result<Result<(), PumpError>, JoinError>) {
    match result {
        Ok(Ok(())) => tracing::info!("{} pump of '{}' finished", pump, user_id),
        Ok(Err(e)) => tracing::warn!("{} pump of '{}' terminated: {}", pump, user_id, e),
        Err(e) => tracing::error!("{} pump of '{}' failed: {}", pump, user_id, e),
    }
}

/// Read frames until the peer goes away, stamping each envelope with the
/// connection's identity before it reaches the manager.
///
/// Any frame, including a pong, counts as peer activity and re-arms the
/// liveness deadline.
pub async fn inbound_pump<St, E>(
    mut stream: St,
    identity: Identity,
    session: SessionId,
    manager: ManagerHandle,
    config: Arc<EngineConfig>,
) -> Result<(), PumpError>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let message = match time::timeout(config.pong_wait, stream.next()).await {
            Err(_) => return Err(PumpError::LivenessTimeout(config.pong_wait)),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(PumpError::Transport(e.to_string())),
            Ok(Some(Ok(message))) => message,
        };

        let envelope = match &message {
            Message::Text(text) => {
                decode_frame(text.as_str().as_bytes(), &identity, config.max_message_size)?
            }
            Message::Binary(data) => decode_frame(data, &identity, config.max_message_size)?,
            Message::Pong(_) => {
                tracing::trace!("Pong from '{}'", identity.user_id);
                continue;
            }
            // answered by the WebSocket layer
            Message::Ping(_) => continue,
            Message::Close(_) => {
                tracing::info!("Client '{}' requested close", identity.user_id);
                return Ok(());
            }
        };

        tracing::debug!("Received {:?} from '{}'", envelope.kind, identity.user_id);
        if !manager.route(session, envelope).await {
            return Ok(());
        }
    }
}

fn decode_frame(bytes: &[u8], identity: &Identity, max: usize) -> Result<Envelope, PumpError> {
    if bytes.len() > max {
        return Err(PumpError::Oversize {
            size: bytes.len(),
            max,
        });
    }
    Ok(decode_envelope(bytes, identity.clone())?)
}

/// Write queued frames and keepalive pings until the queue closes or a
/// write fails.
pub async fn outbound_pump<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<OutboundFrame>,
    config: Arc<EngineConfig>,
) -> Result<(), PumpError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut keepalive = time::interval_at(Instant::now() + config.ping_period, config.ping_period);

    let result = loop {
        tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => {
                    let message = Message::Text(frame.as_ref().into());
                    if let Err(e) = write(&mut sink, message, config.write_wait).await {
                        break Err(e);
                    }
                }
                None => {
                    // the manager tore this connection down
                    let _ = write(&mut sink, Message::Close(None), config.write_wait).await;
                    break Ok(());
                }
            },
            _ = keepalive.tick() => {
                if let Err(e) = write(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    break Err(e);
                }
            }
        }
    };

    let _ = time::timeout(config.write_wait, sink.close()).await;
    result
}

async fn write<Si>(sink: &mut Si, message: Message, deadline: Duration) -> Result<(), PumpError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    match time::timeout(deadline, sink.send(message)).await {
        Err(_) => Err(PumpError::WriteTimeout(deadline)),
        Ok(Err(e)) => Err(PumpError::Transport(e.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        convert::Infallible,
        pin::Pin,
        task::{Context, Poll},
    };

    use futures_util::stream;
    use rooms_shared::time::FixedClock;

    use super::*;
    use crate::{
        domain::{DisplayName, EnvelopeKind, MembershipEvent, UserId},
        engine::Manager,
        infrastructure::event_publisher::InMemoryEventPublisher,
    };

    type RecordingSink = Pin<Box<dyn Sink<Message, Error = Infallible> + Send>>;

    fn test_config() -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            write_wait: Duration::from_millis(200),
            pong_wait: Duration::from_millis(100),
            ping_period: Duration::from_millis(30),
            max_message_size: 128,
            ..EngineConfig::default()
        })
    }

    fn spawn_manager() -> ManagerHandle {
        Manager::spawn(
            &EngineConfig::default(),
            Arc::new(FixedClock::new(0)),
            Arc::new(InMemoryEventPublisher::new()),
        )
        .unwrap()
    }

    async fn connect(manager: &ManagerHandle, id: &str) -> Session {
        manager
            .connect(
                UserId::new(id.to_string()).unwrap(),
                DisplayName::new(id.to_string()).unwrap(),
            )
            .await
            .unwrap()
    }

    /// Config with a liveness deadline long enough that only the failures
    /// injected by a test end the connection.
    fn serve_config() -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            write_wait: Duration::from_millis(200),
            pong_wait: Duration::from_secs(10),
            ping_period: Duration::from_secs(9),
            ..EngineConfig::default()
        })
    }

    /// Socket whose reads yield `reads` and then end (or hang if `hang`), and
    /// whose writes always fail.
    struct FailingSocket {
        reads: VecDeque<Result<Message, &'static str>>,
        hang: bool,
    }

    impl FailingSocket {
        fn new(reads: Vec<Result<Message, &'static str>>, hang: bool) -> Self {
            Self {
                reads: reads.into(),
                hang,
            }
        }
    }

    impl Stream for FailingSocket {
        type Item = Result<Message, &'static str>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let this = self.get_mut();
            match this.reads.pop_front() {
                Some(item) => Poll::Ready(Some(item)),
                None if this.hang => Poll::Pending,
                None => Poll::Ready(None),
            }
        }
    }

    impl Sink<Message> for FailingSocket {
        type Error = &'static str;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err("broken pipe"))
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Err("broken pipe")
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Sink that never becomes ready to accept a frame.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    fn recording_sink() -> (RecordingSink, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = futures_util::sink::unfold(tx, |tx, message: Message| async move {
            let _ = tx.send(message);
            Ok::<_, Infallible>(tx)
        });
        (Box::pin(sink), rx)
    }

    fn text(json: &str) -> Result<Message, Infallible> {
        Ok(Message::Text(json.into()))
    }

    #[tokio::test]
    async fn test_inbound_pump_routes_envelopes_until_stream_ends() {
        // テスト項目: 受信したエンベロープがマネージャーに渡され、ストリーム終了で正常終了する
        // given (前提条件):
        let manager = spawn_manager();
        let session = connect(&manager, "alice").await;
        let frames = stream::iter(vec![text(r#"{"kind":"create-room","body":"r1"}"#)]);

        // when (操作):
        let result = inbound_pump(
            frames,
            session.identity.clone(),
            session.id,
            manager.clone(),
            test_config(),
        )
        .await;

        // then (期待する結果):
        assert!(result.is_ok());
        let snapshot = manager.snapshot().await.unwrap();
        let room = snapshot.room_by_name("r1").unwrap();
        assert_eq!(room.members, vec![session.identity.user_id.clone()]);
    }

    #[tokio::test]
    async fn test_inbound_pump_rejects_oversize_frame() {
        // テスト項目: 上限を超えるフレームを受信するとポンプが終了する
        // given (前提条件):
        let manager = spawn_manager();
        let session = connect(&manager, "alice").await;
        let body = "x".repeat(200);
        let json = format!(r#"{{"kind":"create-room","body":"{}"}}"#, body);
        let frames = stream::iter(vec![text(&json)]);

        // when (操作):
        let result = inbound_pump(
            frames,
            session.identity.clone(),
            session.id,
            manager.clone(),
            test_config(),
        )
        .await;

        // then (期待する結果):
        assert!(matches!(result, Err(PumpError::Oversize { max: 128, .. })));
        assert_eq!(manager.snapshot().await.unwrap().rooms.len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_pump_fails_fast_on_malformed_frame() {
        // テスト項目: デコードできないフレームでポンプが即座に終了し、後続は処理されない
        // given (前提条件):
        let manager = spawn_manager();
        let session = connect(&manager, "alice").await;
        let frames = stream::iter(vec![
            text("not json"),
            text(r#"{"kind":"create-room","body":"r1"}"#),
        ]);

        // when (操作):
        let result = inbound_pump(
            frames,
            session.identity.clone(),
            session.id,
            manager.clone(),
            test_config(),
        )
        .await;

        // then (期待する結果):
        assert!(matches!(result, Err(PumpError::Decode(_))));
        assert!(manager.snapshot().await.unwrap().room_by_name("r1").is_none());
    }

    #[tokio::test]
    async fn test_inbound_pump_times_out_without_peer_activity() {
        // テスト項目: 一定時間フレームが届かないとライブネスタイムアウトで終了する
        // given (前提条件):
        let manager = spawn_manager();
        let session = connect(&manager, "alice").await;
        let silent = stream::pending::<Result<Message, Infallible>>();

        // when (操作):
        let result = inbound_pump(
            silent,
            session.identity.clone(),
            session.id,
            manager,
            test_config(),
        )
        .await;

        // then (期待する結果):
        assert!(matches!(result, Err(PumpError::LivenessTimeout(_))));
    }

    #[tokio::test]
    async fn test_outbound_pump_writes_frames_then_close() {
        // テスト項目: キューのフレームを順番に書き込み、キューが閉じると Close を送る
        // given (前提条件):
        let (sink, mut written) = recording_sink();
        let (tx, rx) = mpsc::channel(4);
        tx.send(OutboundFrame::from("first")).await.unwrap();
        tx.send(OutboundFrame::from("second")).await.unwrap();
        drop(tx);

        // when (操作):
        let result = outbound_pump(sink, rx, test_config()).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(matches!(written.recv().await, Some(Message::Text(t)) if t.as_str() == "first"));
        assert!(matches!(written.recv().await, Some(Message::Text(t)) if t.as_str() == "second"));
        assert!(matches!(written.recv().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn test_outbound_pump_sends_keepalive_pings() {
        // テスト項目: キューが空でも一定間隔で ping を送る
        // given (前提条件):
        let (sink, mut written) = recording_sink();
        let (tx, rx) = mpsc::channel(4);
        let pump = tokio::spawn(outbound_pump(sink, rx, test_config()));

        // when (操作):
        let first = time::timeout(Duration::from_secs(1), written.recv()).await;

        // then (期待する結果):
        assert!(matches!(first, Ok(Some(Message::Ping(_)))));
        drop(tx);
        assert!(pump.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_outbound_pump_stops_on_write_failure() {
        // テスト項目: 書き込みに失敗するとポンプがエラーで終了する
        // given (前提条件):
        let broken = Box::pin(futures_util::sink::unfold((), |_, _message: Message| async {
            Err::<(), _>("broken pipe")
        }));
        let (tx, rx) = mpsc::channel(4);
        tx.send(OutboundFrame::from("hello")).await.unwrap();

        // when (操作):
        let result = outbound_pump(broken, rx, test_config()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(PumpError::Transport(e)) if e == "broken pipe"));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_pump_pong_rearms_liveness_deadline() {
        // テスト項目: pong を受信するたびに受信期限が延長され、期限より長く接続が維持される
        // given (前提条件): 期限 100ms に対して 60ms ごとに pong が届く
        let manager = spawn_manager();
        let session = connect(&manager, "alice").await;
        let pongs = Box::pin(stream::unfold(0u32, |sent| async move {
            if sent == 5 {
                return None;
            }
            time::sleep(Duration::from_millis(60)).await;
            Some((Ok::<_, Infallible>(Message::Pong(Bytes::new())), sent + 1))
        }));
        let started = Instant::now();

        // when (操作):
        let result = inbound_pump(
            pongs,
            session.identity.clone(),
            session.id,
            manager,
            test_config(),
        )
        .await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_pump_times_out_on_stalled_write() {
        // テスト項目: 書き込みが期限内に完了しないとポンプが WriteTimeout で終了する
        // given (前提条件):
        let (tx, rx) = mpsc::channel(4);
        tx.send(OutboundFrame::from("hello")).await.unwrap();

        // when (操作):
        let result = outbound_pump(StalledSink, rx, test_config()).await;

        // then (期待する結果):
        assert!(
            matches!(result, Err(PumpError::WriteTimeout(d)) if d == Duration::from_millis(200))
        );
        drop(tx);
    }

    #[tokio::test]
    async fn test_serve_tears_down_once_after_stream_reset() {
        // テスト項目: 読み込みがリセットされ書き込みも失敗すると、一度だけ全ルームから削除される
        // given (前提条件):
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let manager = Manager::spawn(
            &EngineConfig::default(),
            Arc::new(FixedClock::new(0)),
            publisher.clone(),
        )
        .unwrap();
        let session = connect(&manager, "alice").await;
        let create = Envelope::new(
            EnvelopeKind::CreateRoom,
            None,
            session.identity.clone(),
            Some("r1".to_string()),
        );
        assert!(manager.route(session.id, create).await);
        let socket = FailingSocket::new(vec![Err("connection reset")], false);

        // when (操作):
        let served = time::timeout(
            Duration::from_secs(2),
            serve(socket, session, manager.clone(), serve_config()),
        )
        .await;

        // then (期待する結果):
        assert!(served.is_ok());
        let snapshot = manager.snapshot().await.unwrap();
        let alice = UserId::new("alice".to_string()).unwrap();
        assert!(snapshot.connection(&alice).is_none());
        assert!(snapshot.room_by_name("r1").is_none());
        assert!(snapshot.room_by_name("default").unwrap().members.is_empty());

        let member_left = |events: &[MembershipEvent]| {
            events
                .iter()
                .filter(|event| matches!(event, MembershipEvent::MemberLeft { .. }))
                .count()
        };
        time::timeout(Duration::from_secs(2), async {
            while member_left(&publisher.events().await) < 2 {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        manager.snapshot().await.unwrap();
        assert_eq!(member_left(&publisher.events().await), 2);

        // 再接続できる
        assert!(
            manager
                .connect(alice, DisplayName::new("alice".to_string()).unwrap())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_serve_tears_down_when_outbound_pump_fails_first() {
        // テスト項目: 受信側が止まったままでも、書き込み失敗で接続全体が終了する
        // given (前提条件): 読み込みは何も返さず、受信期限は 10 秒
        let manager = spawn_manager();
        let session = connect(&manager, "alice").await;
        let socket = FailingSocket::new(Vec::new(), true);

        // when (操作):
        let served = time::timeout(
            Duration::from_secs(1),
            serve(socket, session, manager.clone(), serve_config()),
        )
        .await;

        // then (期待する結果):
        assert!(served.is_ok());
        let snapshot = manager.snapshot().await.unwrap();
        assert!(snapshot.connections.is_empty());
        assert!(snapshot.room_by_name("default").unwrap().members.is_empty());
    }
}
