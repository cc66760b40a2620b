fn main() {
    println!("Run `cargo test -p session-flow` to execute the end-to-end session scenarios.");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use termlink_agent_link::{RelayClient, TerminalBridge};
    use termlink_protocol::frame::{decode_frame, encode_frame};
    use termlink_protocol::types::SessionId;
    use termlink_relay::{RelayConfig, RelayServer};

    type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    /// Starts a relay on an ephemeral port.
    async fn start_relay(config: RelayConfig) -> (Arc<RelayServer>, u16, tokio::task::JoinHandle<()>) {
        let server = RelayServer::new(RelayConfig { port: 0, ..config });
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });
        let mut port = 0;
        for _ in 0..200 {
            port = server.port().await;
            if port != 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_ne!(port, 0, "relay should bind");
        (server, port, handle)
    }

    async fn connect(port: u16, path: &str) -> Ws {
        let url = format!("ws://127.0.0.1:{port}{path}");
        let (ws, _) = connect_async(&url).await.expect("upgrade should succeed");
        ws
    }

    /// Connects an agent socket and consumes its `registered` frame.
    async fn connect_agent(port: u16) -> (Ws, String, SessionId) {
        let mut ws = connect(port, "/mac").await;
        let registered = recv_json(&mut ws).await;
        assert_eq!(registered["type"], "registered");
        let code = registered["code"].as_str().unwrap().to_owned();
        let session_id: SessionId = registered["sessionId"].as_str().unwrap().parse().unwrap();
        (ws, code, session_id)
    }

    async fn send_json(ws: &mut Ws, value: serde_json::Value) {
        ws.send(WsMessage::Text(value.to_string().into()))
            .await
            .expect("send should succeed");
    }

    /// Receives the next text frame as JSON, skipping protocol pings.
    async fn recv_json(ws: &mut Ws) -> serde_json::Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
                .await
                .expect("frame should arrive in time")
                .expect("stream should be open")
                .expect("frame should be readable");
            match frame {
                WsMessage::Text(t) => return serde_json::from_str(t.as_str()).unwrap(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    /// Receives the next binary frame, skipping protocol pings.
    async fn recv_binary(ws: &mut Ws) -> Vec<u8> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
                .await
                .expect("frame should arrive in time")
                .expect("stream should be open")
                .expect("frame should be readable");
            match frame {
                WsMessage::Binary(b) => return b.to_vec(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("expected binary frame, got {other:?}"),
            }
        }
    }

    /// Asserts that the relay closes the socket.
    async fn expect_close(ws: &mut Ws) {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, ws.next())
                .await
                .expect("close should arrive in time")
            {
                None => return,
                Some(Ok(WsMessage::Close(_))) => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            }
        }
    }

    // --- Scenario 1: happy path -------------------------------------------

    #[tokio::test]
    async fn happy_path_join_input_and_binary() {
        let (server, port, handle) = start_relay(RelayConfig::default()).await;

        let (mut agent, code, session_id) = connect_agent(port).await;

        // Join with the lowercased code: pairing is case-insensitive.
        let mut browser = connect(port, "/browser").await;
        send_json(
            &mut browser,
            serde_json::json!({"type": "join", "code": code.to_lowercase()}),
        )
        .await;
        let joined = recv_json(&mut browser).await;
        assert_eq!(joined["type"], "joined");
        assert_eq!(joined["sessionId"].as_str().unwrap(), session_id.to_string());

        // The agent hears about the viewer.
        let notice = recv_json(&mut agent).await;
        assert_eq!(notice["type"], "browser_connected");

        // Keystrokes arrive at the agent as the identical structured message.
        send_json(
            &mut browser,
            serde_json::json!({
                "type": "terminal_input",
                "sessionId": session_id.to_string(),
                "payload": "ls\r"
            }),
        )
        .await;
        let input = recv_json(&mut agent).await;
        assert_eq!(input["type"], "terminal_input");
        assert_eq!(input["sessionId"].as_str().unwrap(), session_id.to_string());
        assert_eq!(input["payload"], "ls\r");

        // Terminal bytes flow back over the binary fast path, unchanged.
        let frame = encode_frame(session_id, b"drwxr-xr-x");
        agent
            .send(WsMessage::Binary(frame.clone().into()))
            .await
            .unwrap();
        let received = recv_binary(&mut browser).await;
        assert_eq!(received, frame);
        let (decoded_sid, payload) = decode_frame(&received).unwrap();
        assert_eq!(decoded_sid, session_id);
        assert_eq!(payload, b"drwxr-xr-x");

        // Agent events wrapped in session_data come out unwrapped.
        agent
            .send(WsMessage::Text(
                serde_json::json!({
                    "type": "session_data",
                    "payload": {"type": "tab_list", "tabs": [{"id": "t1", "title": "zsh", "active": true}]}
                })
                .to_string()
                .into(),
            ))
            .await
            .unwrap();
        let tab_list = recv_json(&mut browser).await;
        assert_eq!(tab_list["type"], "tab_list");
        assert_eq!(tab_list["tabs"][0]["title"], "zsh");

        drop(browser);
        drop(agent);
        server.shutdown();
        handle.await.unwrap();
    }

    // --- Scenario 2: invalid code -----------------------------------------

    #[tokio::test]
    async fn invalid_code_is_rejected_and_agent_unaffected() {
        let (server, port, handle) = start_relay(RelayConfig::default()).await;

        let (_agent, _code, _session_id) = connect_agent(port).await;
        assert_eq!(server.registry().pair_count(), 1);

        let mut browser = connect(port, "/browser").await;
        send_json(
            &mut browser,
            serde_json::json!({"type": "join", "code": "ZZZZZZ"}),
        )
        .await;
        let err = recv_json(&mut browser).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "INVALID_CODE");
        assert!(err["message"].is_string());
        expect_close(&mut browser).await;

        // The agent's pair is untouched.
        assert_eq!(server.registry().pair_count(), 1);

        server.shutdown();
        handle.await.unwrap();
    }

    // --- Scenario 3: double join ------------------------------------------

    #[tokio::test]
    async fn second_join_is_rejected_first_survives() {
        let (server, port, handle) = start_relay(RelayConfig::default()).await;

        let (mut agent, code, _session_id) = connect_agent(port).await;

        let mut browser_a = connect(port, "/browser").await;
        send_json(&mut browser_a, serde_json::json!({"type": "join", "code": code})).await;
        assert_eq!(recv_json(&mut browser_a).await["type"], "joined");
        let _ = recv_json(&mut agent).await; // browser_connected

        let mut browser_b = connect(port, "/browser").await;
        send_json(&mut browser_b, serde_json::json!({"type": "join", "code": code})).await;
        let err = recv_json(&mut browser_b).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "ALREADY_JOINED");
        expect_close(&mut browser_b).await;

        // Browser A's session is intact: ping still answered.
        send_json(&mut browser_a, serde_json::json!({"type": "ping"})).await;
        assert_eq!(recv_json(&mut browser_a).await["type"], "pong");

        server.shutdown();
        handle.await.unwrap();
    }

    // --- Scenario 4: rejoin after refresh ---------------------------------

    #[tokio::test]
    async fn rejoin_after_browser_reload() {
        let (server, port, handle) = start_relay(RelayConfig::default()).await;

        let (mut agent, code, session_id) = connect_agent(port).await;

        let mut browser = connect(port, "/browser").await;
        send_json(&mut browser, serde_json::json!({"type": "join", "code": code})).await;
        assert_eq!(recv_json(&mut browser).await["type"], "joined");
        assert_eq!(recv_json(&mut agent).await["type"], "browser_connected");

        // Reload: the socket just closes.
        drop(browser);
        assert_eq!(recv_json(&mut agent).await["type"], "browser_disconnected");

        // Within the window, rejoin by session id re-pairs.
        let mut browser = connect(port, "/browser").await;
        send_json(
            &mut browser,
            serde_json::json!({"type": "rejoin", "sessionId": session_id.to_string()}),
        )
        .await;
        let joined = recv_json(&mut browser).await;
        assert_eq!(joined["type"], "joined");
        assert_eq!(joined["sessionId"].as_str().unwrap(), session_id.to_string());
        assert_eq!(recv_json(&mut agent).await["type"], "browser_connected");

        server.shutdown();
        handle.await.unwrap();
    }

    // --- Scenario 5: agent drops ------------------------------------------

    #[tokio::test]
    async fn agent_drop_tears_down_and_blocks_rejoin() {
        let (server, port, handle) = start_relay(RelayConfig::default()).await;

        let (agent, code, session_id) = connect_agent(port).await;

        let mut browser = connect(port, "/browser").await;
        send_json(&mut browser, serde_json::json!({"type": "join", "code": code})).await;
        assert_eq!(recv_json(&mut browser).await["type"], "joined");

        drop(agent);

        // The browser is told the session is gone, then closed.
        let notice = recv_json(&mut browser).await;
        assert_eq!(notice["type"], "session_disconnected");
        assert_eq!(notice["sessionId"].as_str().unwrap(), session_id.to_string());
        expect_close(&mut browser).await;

        // Rejoining the dead session names the cause.
        let mut browser = connect(port, "/browser").await;
        send_json(
            &mut browser,
            serde_json::json!({"type": "rejoin", "sessionId": session_id.to_string()}),
        )
        .await;
        let err = recv_json(&mut browser).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "MAC_DISCONNECTED");

        server.shutdown();
        handle.await.unwrap();
    }

    // --- Scenario 6: expiry -----------------------------------------------

    #[tokio::test]
    async fn unpaired_code_expires() {
        let (server, port, handle) = start_relay(RelayConfig {
            code_expiry: Duration::from_millis(200),
            ..RelayConfig::default()
        })
        .await;

        let (_agent, code, _session_id) = connect_agent(port).await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut browser = connect(port, "/browser").await;
        send_json(&mut browser, serde_json::json!({"type": "join", "code": code})).await;
        let err = recv_json(&mut browser).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "EXPIRED_CODE");

        server.shutdown();
        handle.await.unwrap();
    }

    // --- First-frame discipline -------------------------------------------

    #[tokio::test]
    async fn browser_must_join_before_anything_else() {
        let (server, port, handle) = start_relay(RelayConfig::default()).await;

        let mut browser = connect(port, "/browser").await;
        send_json(
            &mut browser,
            serde_json::json!({
                "type": "terminal_input",
                "sessionId": SessionId::new().to_string(),
                "payload": "x"
            }),
        )
        .await;
        let err = recv_json(&mut browser).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "INVALID_MESSAGE");
        expect_close(&mut browser).await;

        server.shutdown();
        handle.await.unwrap();
    }

    // --- The agent link client, end to end --------------------------------

    struct RecordingBridge {
        inputs: std::sync::Mutex<Vec<(SessionId, String)>>,
    }

    impl TerminalBridge for RecordingBridge {
        fn on_terminal_input(
            &self,
            session_id: SessionId,
            payload: String,
        ) -> termlink_agent_link::BridgeFuture<'_> {
            self.inputs.lock().unwrap().push((session_id, payload));
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn agent_link_client_round_trip() {
        let (server, port, handle) = start_relay(RelayConfig::default()).await;

        let bridge = Arc::new(RecordingBridge {
            inputs: std::sync::Mutex::new(Vec::new()),
        });
        let url = format!("ws://127.0.0.1:{port}/mac");
        let (client, registration) = RelayClient::connect(&url, bridge.clone()).await.unwrap();

        let mut browser = connect(port, "/browser").await;
        send_json(
            &mut browser,
            serde_json::json!({"type": "join", "code": registration.code.as_str()}),
        )
        .await;
        assert_eq!(recv_json(&mut browser).await["type"], "joined");

        // Agent-originated event reaches the browser unwrapped.
        client
            .send_event(&termlink_protocol::messages::RelayToBrowser::SessionConnected {
                session_id: registration.session_id,
                title: Some("zsh".into()),
            })
            .await
            .unwrap();
        let event = recv_json(&mut browser).await;
        assert_eq!(event["type"], "session_connected");
        assert_eq!(event["title"], "zsh");

        // Terminal bytes over the fast path.
        client
            .send_terminal_data(registration.session_id, b"total 0\r\n")
            .await
            .unwrap();
        let frame = recv_binary(&mut browser).await;
        let (sid, payload) = decode_frame(&frame).unwrap();
        assert_eq!(sid, registration.session_id);
        assert_eq!(payload, b"total 0\r\n");

        // Keystrokes land in the bridge.
        send_json(
            &mut browser,
            serde_json::json!({
                "type": "terminal_input",
                "sessionId": registration.session_id.to_string(),
                "payload": "echo hi\r"
            }),
        )
        .await;
        for _ in 0..100 {
            if !bridge.inputs.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            bridge.inputs.lock().unwrap().as_slice(),
            &[(registration.session_id, "echo hi\r".to_string())]
        );

        client.close().await;
        server.shutdown();
        handle.await.unwrap();
    }
}
