//! Liveness reporting for the long-running loops of a service.
//!
//! Every consistency propagator owns a `HealthHandle` and reports on each poll
//! of its channel. A loop that stops reporting (stuck handler, dead task) turns
//! the registry unhealthy once its deadline passes, so the orchestrator can
//! restart the process.
//!
//! The registry is healthy when at least one component is registered and every
//! registered component reported healthy within its deadline.
use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (code, body).into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, no report yet
    Starting,
    /// Must report again before this instant
    HealthyUntil(time::OffsetDateTime),
    Unhealthy,
    /// The HealthyUntil deadline passed without a new report
    Stalled,
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy until now + deadline. Loops must call this more often than the deadline.
    pub async fn report_healthy(&self) {
        let until = time::OffsetDateTime::now_utc().add(self.deadline);
        self.report_status(ComponentStatus::HealthyUntil(until)).await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!(component = %self.component, "failed to report health status: {}", err)
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime: status updates are applied by a spawned task.
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(16);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    Err(_) => warn!("poisoned health registry lock"),
                }
            }
        });

        registry
    }

    /// Register a component, starting in `Starting`. Pass the handle to the loop it watches.
    pub async fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Combined status of every registered component. Usable as an axum handler body.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("poisoned health registry lock");
            return HealthStatus::default();
        };

        let now = time::OffsetDateTime::now_utc();
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, component) in components.iter() {
            let current = match component {
                ComponentStatus::HealthyUntil(until) if until.gt(&now) => component.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(current, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), current);
        }

        if status.healthy {
            debug!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, status.components);
        }
        status
    }
}
