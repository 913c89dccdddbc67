// Dashboard hub and websocket sessions.
//
// The hub is the single publisher: chain tasks push status frames and
// log lines into it, every connected websocket session receives the
// broadcast. A client gets a full snapshot on connect, then deltas.

use std::{collections::VecDeque, sync::Arc};

use actix_web::{web::Payload, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use indexmap::IndexMap;
use tokio::sync::{broadcast, RwLock};
use vigil_common::{
    api::dashboard::{ChainStatus, DashboardFrame, LogLine},
    time::get_current_time_in_millis,
};

use crate::{config::{DASHBOARD_CHANNEL_SIZE, LOG_RING_SIZE}, core::alerts::AlarmCache};

pub struct DashboardHub {
    sender: broadcast::Sender<DashboardFrame>,
    // newest status per chain, for snapshots and the pull endpoint
    statuses: RwLock<IndexMap<String, ChainStatus>>,
    logs: RwLock<VecDeque<LogLine>>,
    alarms: Arc<AlarmCache>,
    hide_logs: bool,
}

impl DashboardHub {
    pub fn new(alarms: Arc<AlarmCache>, hide_logs: bool) -> Arc<Self> {
        let (sender, _) = broadcast::channel(DASHBOARD_CHANNEL_SIZE);
        Arc::new(Self {
            sender,
            statuses: RwLock::new(IndexMap::new()),
            logs: RwLock::new(VecDeque::with_capacity(LOG_RING_SIZE)),
            alarms,
            hide_logs,
        })
    }

    pub fn alarms(&self) -> &Arc<AlarmCache> {
        &self.alarms
    }

    pub async fn push_status(&self, status: ChainStatus) {
        self.statuses
            .write()
            .await
            .insert(status.name.clone(), status.clone());
        // Err means nobody is connected, which is fine
        let _ = self.sender.send(DashboardFrame::Status {
            status: Box::new(status),
        });
    }

    pub async fn log(&self, msg: String) {
        if self.hide_logs {
            return;
        }
        let line = LogLine {
            ts: get_current_time_in_millis(),
            msg,
        };
        {
            let mut logs = self.logs.write().await;
            if logs.len() >= LOG_RING_SIZE {
                logs.pop_front();
            }
            logs.push_back(line.clone());
        }
        let _ = self.sender.send(DashboardFrame::Log { line });
    }

    // Full snapshot for new subscribers and the pull endpoint
    pub async fn snapshot(&self) -> DashboardFrame {
        DashboardFrame::Update {
            chains: self.statuses.read().await.values().cloned().collect(),
            logs: self.logs.read().await.iter().cloned().collect(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardFrame> {
        self.sender.subscribe()
    }
}

// One websocket session: snapshot first, then the live stream
pub async fn dashboard_websocket(
    hub: Arc<DashboardHub>,
    request: &HttpRequest,
    body: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(request, body)?;
    let mut receiver = hub.subscribe();

    actix_web::rt::spawn(async move {
        let snapshot = hub.snapshot().await;
        if send_frame(&mut session, &snapshot).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                frame = receiver.recv() => match frame {
                    Ok(frame) => {
                        if send_frame(&mut session, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("dashboard client lagged, {} frames dropped", skipped);
                        // resynchronize with a fresh snapshot
                        let snapshot = hub.snapshot().await;
                        if send_frame(&mut session, &snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                message = msg_stream.next() => match message {
                    Some(Ok(Message::Ping(payload))) => {
                        if session.pong(&payload).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }
        let _ = session.close(None).await;
    });

    Ok(response)
}

async fn send_frame(
    session: &mut actix_ws::Session,
    frame: &DashboardFrame,
) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(frame) {
        Ok(payload) => session.text(payload).await,
        Err(e) => {
            error!("could not serialize dashboard frame: {}", e);
            Ok(())
        }
    }
}
