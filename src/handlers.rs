/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Built-in example handlers.
//!
//! These stand in for real side effects (mail, CRM, analytics) and are what
//! the binary registers by default. Library users build their own
//! [`HandlerRegistry`] instead.

use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::info;

use crate::error::HandlerError;
use crate::registry::HandlerRegistry;

fn str_field<'a>(payload: &'a JsonValue, key: &str) -> &'a str {
    payload.get(key).and_then(JsonValue::as_str).unwrap_or("unknown")
}

pub async fn send_email(payload: JsonValue) -> Result<(), HandlerError> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(customer = str_field(&payload, "customerId"), "email sent");
    Ok(())
}

pub async fn push_to_crm(payload: JsonValue) -> Result<(), HandlerError> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(order = str_field(&payload, "orderId"), "CRM updated");
    Ok(())
}

pub async fn record_analytics(payload: JsonValue) -> Result<(), HandlerError> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(order = str_field(&payload, "orderId"), "analytics recorded");
    Ok(())
}

/// Registry with the example handlers wired up.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("order.created", send_email);
    registry.register_fn("order.created.crm", push_to_crm);
    registry.register_fn("order.created.analytics", record_analytics);
    registry
}
