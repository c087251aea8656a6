//! Health & Status API endpoints
//!
//! Provides HTTP endpoints for monitoring:
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Escrow/room counts and uptime

#![allow(dead_code)]

use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::db;
use crate::metrics;

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    escrows: Vec<CountEntry>,
    rooms: Vec<CountEntry>,
}

#[derive(Serialize)]
struct CountEntry {
    status: String,
    count: i64,
}

/// Start the API server (combines metrics and status endpoints)
pub async fn start_api_server(addr: SocketAddr, db: PgPool) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    let started = Instant::now();
    metrics::UP.set(1.0);

    loop {
        let (mut socket, _) = listener.accept().await?;
        let db = db.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            if socket.readable().await.is_ok() {
                let _ = socket.try_read(&mut buf);
            }

            let request = String::from_utf8_lossy(&buf);

            if request.contains("GET /metrics") {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                let _ = encoder.encode(&metric_families, &mut buffer);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                    buffer.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&buffer).await;
            } else if request.contains("GET /health") {
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            } else if request.contains("GET /status") {
                let status = build_status_response(&db, started).await;
                let body = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            } else {
                let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

async fn build_status_response(db: &PgPool, started: Instant) -> StatusResponse {
    let escrows = db::count_escrows_by_status(db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|(status, count)| {
            metrics::ESCROWS_BY_STATUS
                .with_label_values(&[&status])
                .set(count as f64);
            CountEntry { status, count }
        })
        .collect();

    let rooms = db::count_rooms_by_status(db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|(status, count)| {
            metrics::ROOMS_BY_STATUS
                .with_label_values(&[&status])
                .set(count as f64);
            CountEntry { status, count }
        })
        .collect();

    StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: started.elapsed().as_secs(),
        escrows,
        rooms,
    }
}
