//! Shared fixtures for dsrc-enrich integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dsrc_common::db::{CircuitPurpose, CircuitRecord, CircuitStatus, DeviceRecord, CSV_IMPORT_SOURCE};
use dsrc_enrich::services::{LookupFailure, LookupOutcome, OrgResolver, Resolution, ResolutionSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serve `router` on an ephemeral local port; returns `http://127.0.0.1:PORT`
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub async fn memory_pool() -> sqlx::SqlitePool {
    dsrc_common::db::init_memory_database().await.unwrap()
}

pub fn circuit(site: &str, purpose: &str, provider: &str, speed: &str, cost: Option<f64>) -> CircuitRecord {
    CircuitRecord {
        site_name: site.to_string(),
        site_id: String::new(),
        purpose: CircuitPurpose::from(purpose),
        provider_name: provider.to_string(),
        speed: speed.to_string(),
        monthly_cost: cost,
        status: CircuitStatus::Enabled,
        data_source: CSV_IMPORT_SOURCE.to_string(),
        ip_address_start: None,
    }
}

pub fn device(serial: &str, network: &str, notes: &str, wan1: Option<&str>, wan2: Option<&str>) -> DeviceRecord {
    DeviceRecord {
        serial: serial.to_string(),
        network_name: network.to_string(),
        model: "MX68".to_string(),
        notes: notes.to_string(),
        wan1_ip: wan1.map(str::to_string),
        wan2_ip: wan2.map(str::to_string),
        tags: vec![],
    }
}

/// In-memory resolver with per-IP canned answers that counts calls
#[derive(Default)]
pub struct FakeResolver {
    answers: Mutex<HashMap<String, LookupOutcome>>,
    calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, ip: &str, org: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(ip.to_string(), Ok(Resolution::new(org, ResolutionSource::Registry)));
    }

    pub fn fail(&self, ip: &str, failure: LookupFailure) {
        self.answers.lock().unwrap().insert(ip.to_string(), Err(failure));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrgResolver for FakeResolver {
    async fn resolve(&self, ip: &str) -> LookupOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .get(ip)
            .cloned()
            .unwrap_or(Err(LookupFailure::NotFound))
    }
}
