// Dashboard and metrics HTTP servers.
//
// The dashboard server exposes the embedded page, a pull endpoint for
// the current state and the websocket stream. Prometheus exposition
// runs on its own listener so operators can firewall the two apart.

mod websocket;

pub use websocket::DashboardHub;

use std::sync::Arc;

use actix_web::{
    dev::ServerHandle,
    web::{self, Data, Payload},
    App as ActixApp, HttpRequest, HttpResponse, HttpServer, Responder,
};
use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::Mutex;
use vigil_common::task::spawn_task;

use crate::core::App;

pub struct DashboardServer {
    handles: Mutex<Vec<ServerHandle>>,
}

impl DashboardServer {
    pub async fn new(app: Arc<App>) -> anyhow::Result<Arc<Self>> {
        let server = Arc::new(Self {
            handles: Mutex::new(Vec::new()),
        });

        if app.config.prometheus_enabled {
            let (recorder, _) = PrometheusBuilder::new()
                .build()
                .context("Failed to create Prometheus handler")?;
            let handle = recorder.handle();
            metrics::set_global_recorder(Box::new(recorder))
                .context("Failed to set global recorder for Prometheus")?;

            let bind = format!("0.0.0.0:{}", app.config.prometheus_listen_port);
            info!("Starting Prometheus exposition on {}", bind);
            let http_server = HttpServer::new(move || {
                ActixApp::new()
                    .app_data(Data::new(handle.clone()))
                    .route("/metrics", web::get().to(prometheus_metrics))
            })
            .disable_signals()
            .bind(&bind)?
            .workers(1)
            .run();
            server.handles.lock().await.push(http_server.handle());
            spawn_task("prometheus-server", http_server);
        }

        if app.config.enable_dashboard {
            let bind = format!("0.0.0.0:{}", app.config.listen_port);
            info!("Starting dashboard on {}", bind);
            let app_data = Data::from(app.clone());
            let http_server = HttpServer::new(move || {
                ActixApp::new()
                    .app_data(app_data.clone())
                    .route("/", web::get().to(index))
                    .route("/state", web::get().to(state_endpoint))
                    .route("/ws", web::get().to(ws_endpoint))
            })
            .disable_signals()
            .bind(&bind)?
            .run();
            server.handles.lock().await.push(http_server.handle());
            spawn_task("dashboard-server", http_server);
        }

        Ok(server)
    }

    pub async fn stop(&self) {
        let handles: Vec<ServerHandle> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.stop(false).await;
        }
        info!("HTTP servers stopped");
    }
}

async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn state_endpoint(app: Data<App>) -> impl Responder {
    HttpResponse::Ok().json(app.dashboard.snapshot().await)
}

async fn ws_endpoint(
    app: Data<App>,
    request: HttpRequest,
    body: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    websocket::dashboard_websocket(app.dashboard.clone(), &request, body).await
}

async fn prometheus_metrics(handle: Data<PrometheusHandle>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

// Self-contained status page fed by the /ws stream
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Vigil</title>
<style>
  body { font-family: monospace; background: #101418; color: #d8dee9; margin: 2em; }
  h1 { font-size: 1.2em; }
  table { border-collapse: collapse; width: 100%; }
  th, td { text-align: left; padding: 4px 10px; border-bottom: 1px solid #2e3440; }
  .blocks span { display: inline-block; width: 4px; height: 14px; margin-right: 1px; }
  .o0 { background: #3b4252; } .o1, .o2, .o3 { background: #bf616a; }
  .o4 { background: #a3be8c; } .o5 { background: #88c0d0; } .o6 { background: #ebcb8b; }
  .bad { color: #bf616a; } .good { color: #a3be8c; }
  #logs { margin-top: 1.5em; white-space: pre-wrap; color: #81a1c1; }
</style>
</head>
<body>
<h1>Vigil validator monitor</h1>
<table>
  <thead><tr>
    <th>chain</th><th>moniker</th><th>height</th><th>bonded</th><th>missed</th>
    <th>nodes</th><th>alerts</th><th>last 64 blocks</th>
  </tr></thead>
  <tbody id="chains"></tbody>
</table>
<div id="logs"></div>
<script>
const chains = {};
const classes = {no_data:0,missed:1,missed_prevote:2,missed_precommit:3,signed:4,proposed:5,empty_proposed:6};
function render() {
  const tbody = document.getElementById('chains');
  tbody.innerHTML = '';
  for (const status of Object.values(chains)) {
    const row = document.createElement('tr');
    const tape = (status.blocks || []).slice(-64)
      .map(o => `<span class="o${classes[o] ?? 0}"></span>`).join('');
    row.innerHTML =
      `<td>${status.name}</td><td>${status.moniker}</td><td>${status.height}</td>` +
      `<td class="${status.bonded ? 'good' : 'bad'}">${status.bonded}</td>` +
      `<td>${status.missed}/${status.window}</td>` +
      `<td>${status.healthy_nodes}/${status.nodes}</td>` +
      `<td class="${status.active_alerts ? 'bad' : ''}">${status.active_alerts}</td>` +
      `<td class="blocks">${tape}</td>`;
    tbody.appendChild(row);
  }
}
function logLine(line) {
  const logs = document.getElementById('logs');
  logs.textContent += new Date(line.ts).toISOString() + ' ' + line.msg + '\n';
}
function connect() {
  const ws = new WebSocket((location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '/ws');
  ws.onmessage = (event) => {
    const frame = JSON.parse(event.data);
    if (frame.msgType === 'status') { chains[frame.name] = frame; render(); }
    else if (frame.msgType === 'log') { logLine(frame); }
    else if (frame.msgType === 'update') {
      for (const status of frame.chains) chains[status.name] = status;
      for (const line of frame.logs) logLine(line);
      render();
    }
  };
  ws.onclose = () => setTimeout(connect, 2000);
}
connect();
</script>
</body>
</html>
"#;
