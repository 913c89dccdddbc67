// Websocket event subscriber.
//
// One connection per chain to the currently-picked endpoint, with two
// subscriptions: NewBlock and Vote. Frames go into a bounded channel;
// a slow consumer blocks the reads, which is the backpressure we want.
// On any failure the loop re-picks an endpoint, reconnects with capped
// exponential backoff and emits a Resync frame so the tape can blank
// the gap.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use tokio::{net::TcpStream, sync::mpsc, time::{sleep, timeout}};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use vigil_common::{
    api::tendermint::{
        Block, EventResult, RpcRequest, RpcResponse, Vote, EVENT_NEW_BLOCK, EVENT_VOTE,
    },
    task::ShutdownReceiver,
    time::get_current_time_in_millis,
};

use crate::{
    config::{HTTP_TIMEOUT, WS_BACKOFF_MAX, WS_BACKOFF_MIN},
    core::{fleet::ws_endpoint, ChainMonitor},
};

// Frames handed to the chain ingest loop
#[derive(Debug)]
pub enum Frame {
    NewBlock(Box<Block>),
    Vote(Vote),
    // the feed was interrupted; intervening blocks are unknowable
    Resync,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run_subscriber(
    chain: Arc<ChainMonitor>,
    frames: mpsc::Sender<Frame>,
    mut shutdown: ShutdownReceiver,
) -> Result<()> {
    let mut backoff = WS_BACKOFF_MIN;

    loop {
        if shutdown.is_shutdown() {
            return Ok(());
        }

        let Some(url) = chain.fleet.pick().await else {
            debug!("[{}] no endpoint available for websocket", chain.name);
            tokio::select! {
                _ = sleep(Duration::from_secs(backoff)) => {},
                _ = shutdown.recv() => return Ok(()),
            }
            continue;
        };

        let connected_at = tokio::time::Instant::now();
        match stream_events(&chain, &url, &frames, &mut shutdown).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                // a connection that held for a while earns a fresh backoff
                if connected_at.elapsed() > Duration::from_secs(WS_BACKOFF_MAX) {
                    backoff = WS_BACKOFF_MIN;
                }
                warn!("[{}] websocket to {} failed: {:#}", chain.name, url, e);
                chain
                    .fleet
                    .mark_down(&url, &e.to_string(), get_current_time_in_millis())
                    .await;
                if frames.send(Frame::Resync).await.is_err() {
                    return Ok(());
                }
            }
        }

        // capped exponential backoff with jitter so a fleet of
        // monitors does not reconnect in lockstep
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        let delay = (backoff as f64 * jitter).round() as u64;
        tokio::select! {
            _ = sleep(Duration::from_secs(delay.max(1))) => {},
            _ = shutdown.recv() => return Ok(()),
        }
        backoff = (backoff * 2).min(WS_BACKOFF_MAX);
    }
}

async fn stream_events(
    chain: &Arc<ChainMonitor>,
    url: &str,
    frames: &mpsc::Sender<Frame>,
    shutdown: &mut ShutdownReceiver,
) -> Result<()> {
    let ws_url = ws_endpoint(url);
    let (mut stream, _) = timeout(Duration::from_secs(HTTP_TIMEOUT), connect_async(&ws_url))
        .await
        .context("websocket connect timed out")?
        .context("websocket connect failed")?;

    subscribe(&mut stream, 1, "tm.event='NewBlock'").await?;
    subscribe(&mut stream, 2, "tm.event='Vote'").await?;
    info!("[{}] subscribed to {}", chain.name, ws_url);

    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = shutdown.recv() => {
                let _ = stream.close(None).await;
                return Ok(());
            }
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(anyhow!("websocket read error: {}", e)),
            None => return Err(anyhow!("websocket closed by peer")),
        };

        match message {
            Message::Text(text) => {
                if let Some(frame) = parse_frame(text.as_ref()) {
                    if frames.send(frame).await.is_err() {
                        // consumer is gone, shutting down
                        return Ok(());
                    }
                }
            }
            Message::Ping(payload) => {
                stream.send(Message::Pong(payload)).await?;
            }
            Message::Close(_) => return Err(anyhow!("websocket closed by peer")),
            _ => {}
        }
    }
}

async fn subscribe(stream: &mut WsStream, id: u64, query: &str) -> Result<()> {
    let request = RpcRequest::new(id, "subscribe", json!({ "query": query }));
    let payload = serde_json::to_string(&request)?;
    stream
        .send(Message::text(payload))
        .await
        .context("subscribe send failed")?;
    Ok(())
}

// Demux one websocket text payload into a frame; subscription acks and
// unknown events yield nothing
fn parse_frame(payload: &str) -> Option<Frame> {
    let response: RpcResponse<EventResult> = serde_json::from_str(payload).ok()?;
    let data = response.result?.data?;
    match data.kind.as_str() {
        EVENT_NEW_BLOCK => {
            let value: vigil_common::api::tendermint::NewBlockValue =
                serde_json::from_value(data.value).ok()?;
            value.block.map(|block| Frame::NewBlock(Box::new(block)))
        }
        EVENT_VOTE => {
            let value: vigil_common::api::tendermint::VoteValue =
                serde_json::from_value(data.value).ok()?;
            value.vote.map(Frame::Vote)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_demux() {
        let new_block = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "query": "tm.event='NewBlock'",
                "data": {
                    "type": "tendermint/event/NewBlock",
                    "value": {
                        "block": {
                            "header": {
                                "chain_id": "test-1",
                                "height": "7",
                                "proposer_address": "AA"
                            },
                            "data": { "txs": [] }
                        }
                    }
                }
            }
        }"#;
        assert!(matches!(
            parse_frame(new_block),
            Some(Frame::NewBlock(block)) if block.header.height == "7"
        ));

        let vote = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "query": "tm.event='Vote'",
                "data": {
                    "type": "tendermint/event/Vote",
                    "value": { "Vote": { "type": 2, "height": "7", "validator_address": "AA" } }
                }
            }
        }"#;
        assert!(matches!(
            parse_frame(vote),
            Some(Frame::Vote(vote)) if vote.is_precommit()
        ));

        // subscription ack carries no data
        let ack = r#"{"jsonrpc": "2.0", "id": 1, "result": {}}"#;
        assert!(parse_frame(ack).is_none());
    }
}
