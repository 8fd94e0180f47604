//! JSON rendering of terminal results. Payloads are shown as text.

use fabric_wrangler_core::{
    EventWatchResult, InstallReport, InvocationResult, PeerPayload, QueryResult,
};
use serde_json::{json, Value};

fn payloads(payloads: &[PeerPayload]) -> Value {
    payloads
        .iter()
        .map(|p| json!({ "peer": p.peer, "payload": p.text() }))
        .collect()
}

pub fn invocation(result: &InvocationResult) -> Value {
    json!({
        "tx_id": result.tx_id,
        "status": result.status,
        "detail": result.detail,
        "peer_payloads": payloads(&result.peer_payloads),
        "failed_peers": result.failed_peers,
    })
}

pub fn query(result: &QueryResult) -> Value {
    json!({
        "tx_id": result.tx_id,
        "peer_payloads": payloads(&result.peer_payloads),
        "failed_peers": result.failed_peers,
    })
}

pub fn install(report: &InstallReport) -> Value {
    json!({
        "chaincode_id": report.chaincode_id,
        "chaincode_version": report.chaincode_version,
        "complete": report.is_complete(),
        "installed": report.installed,
        "failures": report.failures,
    })
}

pub fn event(result: &EventWatchResult) -> Value {
    match result {
        EventWatchResult::Received(event) => json!({
            "outcome": "received",
            "chaincode_id": event.chaincode_id,
            "event_name": event.event_name,
            "tx_id": event.tx_id,
            "block_number": event.block_number,
            "payload": String::from_utf8_lossy(&event.payload),
        }),
        EventWatchResult::TimedOut => json!({ "outcome": "timed_out" }),
    }
}

pub fn print(value: &Value) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
