//! Push messages sent to live viewers
//!
//! Every push is one JSON object tagged by `type`. Messages are serialized
//! once per broadcast and the resulting frame is shared by all targets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::failsafe::FailSafeAlert;
use crate::sla::SlaSnapshot;
use crate::types::{TelemetrySample, TenantId};

/// Serialized push, shared across connections
pub type Frame = Arc<str>;

/// Literal liveness request sent by viewers
pub const PING: &str = "ping";

/// Server to viewer push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// One ingested sample
    Telemetry {
        timestamp: i64,
        data: TelemetrySample,
    },

    /// Current SLA statistics for a tenant
    SlaMetrics {
        tenant_id: TenantId,
        data: SlaSnapshot,
    },

    /// Fail-safe transition
    FailsafeAlert { alert: FailSafeAlert },

    /// Compliance report for oversight viewers
    RegulatorReport {
        tenant_id: TenantId,
        data: SlaSnapshot,
    },

    /// Liveness reply
    Pong,
}

impl PushMessage {
    /// Serialize into a shareable frame
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }

    /// Label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::Telemetry { .. } => "telemetry",
            PushMessage::SlaMetrics { .. } => "sla_metrics",
            PushMessage::FailsafeAlert { .. } => "failsafe_alert",
            PushMessage::RegulatorReport { .. } => "regulator_report",
            PushMessage::Pong => "pong",
        }
    }
}

/// Reply to an inbound control frame, if it is one
pub fn control_reply(text: &str) -> Option<PushMessage> {
    (text.trim() == PING).then_some(PushMessage::Pong)
}
