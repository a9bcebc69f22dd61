//! Request-completion telemetry.

use std::time::Duration;

use serde_json::json;

use crate::protocol::{ErrorCode, Notification};

pub(crate) const TELEMETRY_METHOD: &str = "telemetry/event";

/// Record one finished request: a `tracing` event on `ember::telemetry` plus
/// the `telemetry/event` notification for the client.
pub(crate) fn request_completed(method: &str, elapsed: Duration, error: Option<ErrorCode>) -> Notification {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let error_kind = error.map(ErrorCode::kind);
    tracing::info!(
        target: "ember::telemetry",
        method,
        elapsed_ms,
        error_kind = error_kind.unwrap_or("none"),
        "request completed"
    );
    Notification::new(
        TELEMETRY_METHOD,
        Some(json!({
            "name": "request_completed",
            "method": method,
            "elapsedMs": elapsed_ms,
            "errorKind": error_kind,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_shape() {
        let event = request_completed("textDocument/hover", Duration::from_millis(42), None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["method"], TELEMETRY_METHOD);
        assert_eq!(json["params"]["name"], "request_completed");
        assert_eq!(json["params"]["method"], "textDocument/hover");
        assert_eq!(json["params"]["elapsedMs"], 42);
        assert!(json["params"]["errorKind"].is_null());

        let cancelled = request_completed("x", Duration::ZERO, Some(ErrorCode::RequestCancelled));
        let json = serde_json::to_value(&cancelled).unwrap();
        assert_eq!(json["params"]["errorKind"], "cancelled");
    }
}
