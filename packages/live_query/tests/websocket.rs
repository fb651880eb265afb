mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use live_query::{Client, ClientConfig, Event, LiveQueryError, ParseObject, Query, SubscriptionHandler};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, PartialEq)]
enum Seen {
    Subscribed,
    Created(String),
    Error(LiveQueryError),
}

struct Forward {
    tx: mpsc::UnboundedSender<Seen>,
}

impl SubscriptionHandler for Forward {
    type Object = ParseObject;

    fn on_event(&self, _query: &Query, event: Event<ParseObject>, _client: &Client) {
        if let Event::Created(object) = event {
            let _ = self.tx.send(Seen::Created(object.object_id));
        }
    }

    fn on_error(&self, _query: &Query, error: LiveQueryError, _client: &Client) {
        let _ = self.tx.send(Seen::Error(error));
    }

    fn on_subscribe(&self, _query: &Query, _client: &Client) {
        let _ = self.tx.send(Seen::Subscribed);
    }
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> anyhow::Result<Value> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => anyhow::bail!("client hung up"),
        }
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) -> anyhow::Result<()> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("handler dropped")
}

#[tokio::test]
async fn test_round_trip_with_server_close_and_resubscribe() -> anyhow::Result<()> {
    common::init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let mut received = Vec::new();
        for round in 0..2 {
            let (stream, _) = listener.accept().await?;
            let mut ws = tokio_tungstenite::accept_async(stream).await?;

            received.push(next_json(&mut ws).await?);
            send_json(&mut ws, json!({"op": "connected"})).await?;
            let subscribe = next_json(&mut ws).await?;
            let request_id = subscribe["requestId"].clone();
            received.push(subscribe);
            send_json(&mut ws, json!({"op": "subscribed", "requestId": request_id})).await?;

            if round == 0 {
                send_json(
                    &mut ws,
                    json!({
                        "op": "create",
                        "requestId": request_id,
                        "object": {"className": "Message", "objectId": "abc", "text": "hi"}
                    }),
                )
                .await?;
                send_json(
                    &mut ws,
                    json!({"op": "error", "requestId": request_id, "code": 3, "error": "slow down", "reconnect": false}),
                )
                .await?;
                ws.close(None).await?;
                while let Some(Ok(_)) = ws.next().await {}
            } else {
                // Hold the socket open until the client goes away.
                while let Some(Ok(_)) = ws.next().await {}
            }
        }
        anyhow::Ok(received)
    });

    let client = Client::new(ClientConfig::new(format!("http://{addr}/"), "app"))?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = client.subscribe(Query::new("Message"), Forward { tx })?;

    assert_eq!(recv(&mut rx).await, Seen::Subscribed);
    assert_eq!(recv(&mut rx).await, Seen::Created("abc".to_string()));
    assert_eq!(
        recv(&mut rx).await,
        Seen::Error(LiveQueryError::ServerReported {
            code: 3,
            message: "slow down".to_string(),
            reconnect: false,
        })
    );
    // Server closed the socket; the client reconnects and replays the subscription.
    assert_eq!(recv(&mut rx).await, Seen::Subscribed);

    client.shutdown()?;
    let received = tokio::time::timeout(Duration::from_secs(10), server).await???;

    assert_eq!(received.len(), 4);
    for round in [0, 2] {
        assert_eq!(
            received[round],
            json!({"op": "connect", "applicationId": "app", "sessionToken": ""})
        );
        assert_eq!(
            received[round + 1],
            json!({
                "op": "subscribe",
                "requestId": 1,
                "query": {"className": "Message", "where": {}}
            })
        );
    }
    Ok(())
}
