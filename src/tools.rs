//! Builtin example tools.
//!
//! These demonstrate both handler contracts: `echo` and `system_info`
//! complete synchronously on a worker, while `long_running_task` and
//! `network_scan` are cooperative async tools that stream progress and honor
//! cancellation. Hardware-facing tools live with the platform integration,
//! not here.

use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;

use crate::protocol::CallToolResult;
use crate::registry::{RegistryError, Tool, ToolRegistry};

/// Register every builtin tool
pub fn register_builtins(registry: &ToolRegistry) -> Result<(), RegistryError> {
    registry.register(echo())?;
    registry.register(system_info(registry.clone()))?;
    registry.register(long_running_task())?;
    registry.register(network_scan())?;
    Ok(())
}

/// `echo`: return the given message
pub fn echo() -> Tool {
    Tool::sync(
        "echo",
        "Echo a message back to the caller",
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Text to echo"}
            },
            "required": ["message"]
        }),
        |args| {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| "missing required argument: message".to_string())?;
            Ok(CallToolResult::text(format!("echo: {}", message)))
        },
    )
}

/// `system_info`: server identity and runtime facts
pub fn system_info(registry: ToolRegistry) -> Tool {
    Tool::sync(
        "system_info",
        "Report server identity, platform, and registry size",
        json!({"type": "object", "properties": {}}),
        move |_args| {
            let info = json!({
                "server": crate::defaults::SERVER_NAME,
                "version": crate::VERSION,
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "timestamp": chrono::Utc::now().timestamp(),
                "registeredTools": registry.len(),
            });
            let rendered = serde_json::to_string_pretty(&info)
                .map_err(|e| format!("failed to render system info: {}", e))?;
            Ok(CallToolResult::text(rendered))
        },
    )
}

/// `long_running_task`: async demo streaming progress over a configurable span
///
/// Arguments: `duration_ms` (default 2000) and `steps` (default 10).
pub fn long_running_task() -> Tool {
    Tool::async_fn(
        "long_running_task",
        "Run a demonstration task that reports progress and honors cancellation",
        json!({
            "type": "object",
            "properties": {
                "duration_ms": {"type": "integer", "minimum": 0},
                "steps": {"type": "integer", "minimum": 1}
            }
        }),
        |ctx, args| {
            Box::pin(async move {
                let duration_ms = args
                    .get("duration_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(2000);
                let steps = args.get("steps").and_then(Value::as_u64).unwrap_or(10).max(1);
                let step_pause = Duration::from_millis(duration_ms / steps);

                for step in 0..steps {
                    if !ctx.pause(step_pause).await {
                        return Err("task interrupted".to_string());
                    }
                    let keep_going = ctx
                        .progress(
                            step + 1,
                            steps,
                            Some(format!("step {} of {}", step + 1, steps)),
                        )
                        .await;
                    if !keep_going {
                        return Err("task interrupted".to_string());
                    }
                }
                Ok(CallToolResult::text(format!(
                    "completed {} steps over {} ms",
                    steps, duration_ms
                )))
            })
        },
    )
    .with_estimated_duration(Duration::from_secs(60))
}

/// `network_scan`: async demo producing synthetic scan results
///
/// Stands in for a radio survey: each "network" takes a jittered pause to
/// discover, progress is streamed per find, and cancellation aborts the
/// sweep between finds.
pub fn network_scan() -> Tool {
    Tool::async_fn(
        "network_scan",
        "Scan for nearby networks (synthetic results)",
        json!({
            "type": "object",
            "properties": {
                "max_networks": {"type": "integer", "minimum": 1, "maximum": 16}
            }
        }),
        |ctx, args| {
            Box::pin(async move {
                let max_networks = args
                    .get("max_networks")
                    .and_then(Value::as_u64)
                    .unwrap_or(5)
                    .clamp(1, 16);

                let mut found = Vec::new();
                for index in 0..max_networks {
                    let pause_ms = {
                        let mut rng = rand::thread_rng();
                        rng.gen_range(40..120)
                    };
                    if !ctx.pause(Duration::from_millis(pause_ms)).await {
                        return Err("scan interrupted".to_string());
                    }
                    let (channel, rssi) = {
                        let mut rng = rand::thread_rng();
                        (rng.gen_range(1..=11), rng.gen_range(-90..-30))
                    };
                    found.push(json!({
                        "ssid": format!("network-{:02}", index + 1),
                        "channel": channel,
                        "rssi": rssi,
                    }));
                    if !ctx
                        .progress(index + 1, max_networks, Some("scanning".to_string()))
                        .await
                    {
                        return Err("scan interrupted".to_string());
                    }
                }

                let report = serde_json::to_string_pretty(&json!({"networks": found}))
                    .map_err(|e| format!("failed to render scan results: {}", e))?;
                Ok(CallToolResult::text(report))
            })
        },
    )
    .with_estimated_duration(Duration::from_secs(10))
}
