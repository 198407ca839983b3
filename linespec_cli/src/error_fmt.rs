//! Human-readable error descriptions and structured JSON error formatting.

use linespec_core::{BuildError, SpecError, TerminationReason};
use serde_json::json;

use crate::cli::LAST_REQUEST;
use crate::measure::{MeasurementTerminated, termination_reason_name};

fn spec_error_name(e: &SpecError) -> &'static str {
    match e {
        SpecError::Config(_) => "Config",
        SpecError::Transport(_) => "Transport",
        SpecError::Timeout => "Timeout",
        SpecError::DataIntegrity(_) => "DataIntegrity",
        SpecError::CommunicationLoss(_) => "CommunicationLoss",
        SpecError::State(_) => "State",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransport => {
                "What happened: No transport was provided to the driver.\nLikely causes: The camera backend failed to initialize or was not wired into the builder.\nHow to fix: Ensure the transport is created successfully and passed via with_transport(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/linespec.toml for a sample."
            ),
        };
    }

    if let Some(t) = err.downcast_ref::<MeasurementTerminated>() {
        let head = format!(
            "What happened: Measurement stopped after {} of {} cycles",
            t.cycles_handled, t.requested_cycles
        );
        return match t.reason {
            TerminationReason::Saturation => format!(
                "{head} because a cycle saturated.\nLikely causes: Integration time too long for the light level, or too much light on the slit.\nHow to fix: Lower --it-ms or attenuate the source; set acquisition.abort_on_saturation = false to keep saturated cycles."
            ),
            TerminationReason::InvalidData => format!(
                "{head} because a cycle contained invalid data.\nLikely causes: device.scale_gain/scale_offset map raw counts below zero, or the detector returned garbage.\nHow to fix: Check the scaling in [device] and the cabling, then run `linespec recover`."
            ),
            TerminationReason::Cancelled => format!(
                "{head} because it was cancelled.\nLikely causes: Ctrl-C or an abort from another caller.\nHow to fix: Start a new measurement."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<SpecError>() {
        return match se {
            SpecError::Timeout => {
                let hint = LAST_REQUEST.get().map_or(String::new(), |r| {
                    format!(" (cycle_timeout_ms = {})", r.cycle_timeout_ms)
                });
                format!(
                    "What happened: The camera did not deliver data in time{hint}.\nLikely causes: USB link stalled, device hung, or timeout configured too low for the integration time.\nHow to fix: Rerun with --recover, or raise acquisition.cycle_timeout_ms in the config."
                )
            }
            SpecError::CommunicationLoss(m) => format!(
                "What happened: Communication with the camera was lost ({m}).\nLikely causes: Cable unplugged, device power-cycled, or recovery exhausted.\nHow to fix: Check the USB connection and power, then reconnect."
            ),
            SpecError::Config(m) => format!(
                "What happened: The device rejected the configuration ({m}).\nLikely causes: Wrong serial, pixel geometry that does not match the camera, or an out-of-range value.\nHow to fix: Compare [device] in the config with the connected camera."
            ),
            // Fallback to generic for other domain errors
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config file is not valid TOML or does not match the schema ({}).\nLikely causes: A typo, a missing [device] section, or a value of the wrong type.\nHow to fix: Fix the reported key in the config and rerun.",
            te.message().trim()
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = format!("{err:#}").to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass an existing TOML file via --config. Original: {msg}"
        );
    }

    if lower.contains("invalid configuration") || lower.contains("unknown camera") {
        return format!(
            "What happened: Configuration is invalid or incomplete ({err:#}).\nLikely causes: Missing [device] serial, unknown camera/sensor model, or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: terminations and link failures get their own; everything else is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(t) = err.downcast_ref::<MeasurementTerminated>() {
        return match t.reason {
            TerminationReason::Cancelled => 2,
            TerminationReason::Saturation => 3,
            TerminationReason::InvalidData => 4,
        };
    }
    match err.downcast_ref::<SpecError>() {
        Some(SpecError::Timeout) => 5,
        Some(SpecError::CommunicationLoss(_)) => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let msg = humanize(err);
    let request = LAST_REQUEST.get();

    if let Some(t) = err.downcast_ref::<MeasurementTerminated>() {
        let details = json!({
            "cycles_handled": t.cycles_handled,
            "requested_cycles": t.requested_cycles,
            "integration_time_ms": request.map(|r| r.it_ms),
        });
        return json!({
            "reason": termination_reason_name(t.reason),
            "details": details,
            "message": msg,
        })
        .to_string();
    }

    if let Some(se) = err.downcast_ref::<SpecError>() {
        let detail_obj = match se {
            SpecError::Timeout => request.map(|r| {
                json!({
                    "cycle_timeout_ms": r.cycle_timeout_ms,
                    "requested_cycles": r.cycles,
                    "integration_time_ms": r.it_ms,
                })
            }),
            _ => None,
        };
        let obj = if let Some(d) = detail_obj {
            json!({ "reason": spec_error_name(se), "details": d, "message": msg })
        } else {
            json!({ "reason": spec_error_name(se), "message": msg })
        };
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": msg }).to_string()
}
