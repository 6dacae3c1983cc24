use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;

/// Health reporting for the asynchronous loops of a service.
///
/// Each loop registers itself with a deadline and must report healthy more
/// often than that deadline. The process is healthy only while every
/// registered component has reported recently; a component that goes quiet
/// past its deadline flips the liveness probe to failing, which is how a
/// wedged consumer loop gets its pod restarted.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered.
    Starting,
    /// Recently reported healthy; must report again before the instant.
    HealthyUntil(DateTime<Utc>),
    /// Reported unhealthy.
    Unhealthy,
}

impl ComponentStatus {
    fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => *until > now,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct HealthStatus {
    /// True iff every registered component is currently healthy.
    pub healthy: bool,
    /// Per-component status, for debugging via the probe body.
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

/// Handle held by one component to report its own health.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy until one deadline from now. Must be called more
    /// frequently than the deadline the component registered with.
    pub async fn report_healthy(&self) {
        let until = Utc::now()
            + chrono::Duration::from_std(self.deadline).unwrap_or(chrono::Duration::zero());
        self.report_status(ComponentStatus::HealthyUntil(until)).await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<HealthMessage>(16);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> = Default::default();

        let for_updates = components.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let mut components = for_updates
                    .write()
                    .expect("health component lock poisoned");
                components.insert(message.component, message.status);
            }
        });

        Self {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    /// Register a component. The returned handle must report healthy more
    /// often than `deadline` for the registry to stay green.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.clone(),
            deadline,
            sender: self.sender.clone(),
        };
        // Mark as starting so a component that never reports is visible.
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Fold all component statuses into the probe result.
    pub fn get_status(&self) -> HealthStatus {
        let now = Utc::now();
        let components = self
            .components
            .read()
            .expect("health component lock poisoned");

        let healthy =
            !components.is_empty() && components.values().all(|status| status.is_healthy(now));

        HealthStatus {
            healthy,
            components: components.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
