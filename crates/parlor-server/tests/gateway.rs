mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parlor_types::events::{ClientCommand, ServerEvent};

use common::TestApp;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, cookie: Option<&str>) -> Socket {
    let mut req = format!("ws://{addr}/gateway").into_client_request().unwrap();
    if let Some(cookie) = cookie {
        req.headers_mut()
            .insert("cookie", HeaderValue::from_str(cookie).unwrap());
    }
    let (ws, _) = connect_async(req).await.unwrap();
    ws
}

async fn send(ws: &mut Socket, cmd: ClientCommand) {
    let text = serde_json::to_string(&cmd).unwrap();
    ws.send(Message::text(text)).await.unwrap();
}

async fn next_event(ws: &mut Socket) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for an event")
}

async fn assert_silent(ws: &mut Socket) {
    let quiet = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(quiet.is_err(), "expected no event, got {quiet:?}");
}

fn join(room: &str) -> ClientCommand {
    ClientCommand::Join { room: room.into() }
}

#[tokio::test]
async fn two_members_chat_and_disconnect() {
    let app = TestApp::new();
    let alice_cookie = app.member("a@x.com", "alice").await;
    let bob_cookie = app.member("b@x.com", "bob").await;
    let addr = serve(&app).await;

    let mut alice = connect(addr, Some(&alice_cookie)).await;
    let mut bob = connect(addr, Some(&bob_cookie)).await;

    send(&mut alice, join("general")).await;
    assert_eq!(next_event(&mut alice).await, ServerEvent::status("alice has entered the room"));

    send(&mut bob, join("general")).await;
    assert_eq!(next_event(&mut bob).await, ServerEvent::status("bob has entered the room"));
    assert_eq!(next_event(&mut alice).await, ServerEvent::status("bob has entered the room"));

    send(
        &mut alice,
        ClientCommand::ChatMessage {
            room: "general".into(),
            message: "hi".into(),
        },
    )
    .await;
    let hi = ServerEvent::Message {
        handle: "alice".into(),
        text: "hi".into(),
    };
    assert_eq!(next_event(&mut alice).await, hi);
    assert_eq!(next_event(&mut bob).await, hi);

    // Abrupt disconnect
    drop(bob);
    assert_eq!(next_event(&mut alice).await, ServerEvent::status("bob has left the room"));

    // Cleanup has run once alice hears about it.
    assert_eq!(app.state.dispatcher.room_members("general").await, vec!["alice"]);
}

#[tokio::test]
async fn late_joiner_sees_no_history() {
    let app = TestApp::new();
    let alice_cookie = app.member("a@x.com", "alice").await;
    let carol_cookie = app.member("c@x.com", "carol").await;
    let addr = serve(&app).await;

    let mut alice = connect(addr, Some(&alice_cookie)).await;
    send(&mut alice, join("general")).await;
    next_event(&mut alice).await;
    send(
        &mut alice,
        ClientCommand::ChatMessage {
            room: "general".into(),
            message: "before you came".into(),
        },
    )
    .await;
    next_event(&mut alice).await;

    let mut carol = connect(addr, Some(&carol_cookie)).await;
    send(&mut carol, join("general")).await;
    assert_eq!(next_event(&mut carol).await, ServerEvent::status("carol has entered the room"));
    assert_silent(&mut carol).await;
}

#[tokio::test]
async fn anonymous_and_malformed_commands_get_private_status() {
    let app = TestApp::new();
    let nameless_cookie = app.sign_in("n@x.com").await;
    let addr = serve(&app).await;

    let mut anon = connect(addr, None).await;
    send(&mut anon, join("general")).await;
    assert_eq!(next_event(&mut anon).await, ServerEvent::status("Please log in first."));

    anon.send(Message::text("{\"type\":\"dance\"}")).await.unwrap();
    assert_eq!(next_event(&mut anon).await, ServerEvent::status("Unrecognized command."));

    let mut nameless = connect(addr, Some(&nameless_cookie)).await;
    send(&mut nameless, join("general")).await;
    assert_eq!(
        next_event(&mut nameless).await,
        ServerEvent::status("Please choose a handle before joining a room.")
    );

    assert_eq!(app.state.dispatcher.room_count().await, 0);
}

async fn pair_in_general(app: &TestApp, alice_cookie: &str, bob_cookie: &str) -> (Socket, Socket) {
    let addr = serve(app).await;
    let mut alice = connect(addr, Some(alice_cookie)).await;
    let mut bob = connect(addr, Some(bob_cookie)).await;

    send(&mut alice, join("general")).await;
    next_event(&mut alice).await;
    send(&mut bob, join("general")).await;
    next_event(&mut bob).await;
    next_event(&mut alice).await;
    (alice, bob)
}

#[tokio::test]
async fn logout_takes_open_socket_out_of_rooms() {
    let app = TestApp::new();
    let alice_cookie = app.member("a@x.com", "alice").await;
    let bob_cookie = app.member("b@x.com", "bob").await;
    let (mut alice, mut bob) = pair_in_general(&app, &alice_cookie, &bob_cookie).await;

    app.get("/logout", Some(&bob_cookie)).await;
    assert_eq!(next_event(&mut alice).await, ServerEvent::status("bob has left the room"));
    assert_eq!(next_event(&mut bob).await, ServerEvent::status("Please log in first."));
    assert_eq!(app.state.dispatcher.room_members("general").await, vec!["alice"]);

    send(
        &mut alice,
        ClientCommand::ChatMessage {
            room: "general".into(),
            message: "gone?".into(),
        },
    )
    .await;
    next_event(&mut alice).await;
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn new_login_link_takes_open_socket_out_of_rooms() {
    let app = TestApp::new();
    let alice_cookie = app.member("a@x.com", "alice").await;
    let bob_cookie = app.member("b@x.com", "bob").await;
    let (mut alice, mut bob) = pair_in_general(&app, &alice_cookie, &bob_cookie).await;

    app.login("b@x.com", "198.51.100.77").await;
    assert_eq!(next_event(&mut alice).await, ServerEvent::status("bob has left the room"));
    assert_eq!(
        next_event(&mut bob).await,
        ServerEvent::status("Please verify your email address first.")
    );
    assert_eq!(app.state.dispatcher.room_members("general").await, vec!["alice"]);
}
