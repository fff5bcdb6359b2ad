//! Sanitized log projection of RADIUS messages.
//!
//! Audit records must never carry credentials or EAP state, so requests
//! and replies are projected into typed structures: known single-valued
//! attributes become named fields, everything else is preserved verbatim
//! under `OtherAttributes`, and the sensitive attributes are dropped
//! outright.

use serde::Serialize;

use swanportal_adapters::LogSink;

use super::attrs::{AttributeMap, RadiusAttribute};

/// Request attributes excluded from audit records.
const EXCLUDED_REQUEST_ATTRS: [&str; 3] = ["EAP-Message", "Message-Authenticator", "State"];

#[derive(Debug, Default, Serialize)]
struct RadiusRequestLog {
    #[serde(rename = "Acct-Input-Octets", skip_serializing_if = "Option::is_none")]
    acct_input_octets: Option<i64>,
    #[serde(rename = "Acct-Input-Packets", skip_serializing_if = "Option::is_none")]
    acct_input_packets: Option<i64>,
    #[serde(rename = "Acct-Output-Octets", skip_serializing_if = "Option::is_none")]
    acct_output_octets: Option<i64>,
    #[serde(rename = "Acct-Output-Packets", skip_serializing_if = "Option::is_none")]
    acct_output_packets: Option<i64>,
    #[serde(rename = "Acct-Session-Id", skip_serializing_if = "Option::is_none")]
    acct_session_id: Option<String>,
    #[serde(rename = "Acct-Session-Time", skip_serializing_if = "Option::is_none")]
    acct_session_time: Option<i64>,
    #[serde(rename = "Acct-Status-Type", skip_serializing_if = "Option::is_none")]
    acct_status_type: Option<String>,
    #[serde(rename = "Acct-Terminate-Cause", skip_serializing_if = "Option::is_none")]
    acct_terminate_cause: Option<String>,
    #[serde(rename = "Acct-Unique-Session-Id", skip_serializing_if = "Option::is_none")]
    acct_unique_session_id: Option<String>,
    #[serde(rename = "Called-Station-Id", skip_serializing_if = "Option::is_none")]
    called_station_id: Option<String>,
    #[serde(rename = "Calling-Station-Id", skip_serializing_if = "Option::is_none")]
    calling_station_id: Option<String>,
    #[serde(rename = "Class", skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    #[serde(rename = "Event-Timestamp", skip_serializing_if = "Option::is_none")]
    event_timestamp: Option<String>,
    #[serde(rename = "Framed-IP-Address", skip_serializing_if = "Option::is_none")]
    framed_ip_address: Option<String>,
    #[serde(rename = "NAS-Identifier", skip_serializing_if = "Option::is_none")]
    nas_identifier: Option<String>,
    #[serde(rename = "NAS-IP-Address", skip_serializing_if = "Option::is_none")]
    nas_ip_address: Option<String>,
    #[serde(rename = "NAS-Port", skip_serializing_if = "Option::is_none")]
    nas_port: Option<i64>,
    #[serde(rename = "Service-Type", skip_serializing_if = "Option::is_none")]
    service_type: Option<String>,
    #[serde(rename = "User-Name", skip_serializing_if = "Option::is_none")]
    user_name: Option<String>,
    #[serde(rename = "OtherAttributes", skip_serializing_if = "AttributeMap::is_empty")]
    other_attributes: AttributeMap,
}

#[derive(Debug, Default, Serialize)]
struct RadiusReplyLog {
    #[serde(rename = "Class", skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    #[serde(rename = "MS-Primary-DNS-Server", skip_serializing_if = "Option::is_none")]
    ms_primary_dns_server: Option<String>,
    #[serde(rename = "MS-Secondary-DNS-Server", skip_serializing_if = "Option::is_none")]
    ms_secondary_dns_server: Option<String>,
    #[serde(rename = "OtherAttributes", skip_serializing_if = "AttributeMap::is_empty")]
    other_attributes: AttributeMap,
}

#[derive(Debug, Serialize)]
struct RadiusExchangeLog {
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<RadiusRequestLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<RadiusReplyLog>,
}

/// Decode a `0x…` hex string when every byte is printable ASCII.
///
/// Concentrators commonly echo the Class attribute hex-encoded; decoding
/// it makes audit records greppable, but binary class blobs are kept raw.
fn decode_hex_text(text: &str) -> Option<String> {
    let stripped = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))?;
    let data = hex::decode(stripped).ok()?;

    if data.iter().any(|&b| b <= 32 || b >= 127) {
        return None;
    }

    String::from_utf8(data).ok()
}

fn project_request(request: &AttributeMap) -> RadiusRequestLog {
    let mut out = RadiusRequestLog::default();

    for (name, attr) in request {
        if EXCLUDED_REQUEST_ATTRS.contains(&name.as_str()) || name.starts_with("NAS-Port-") {
            continue;
        }

        if attr.value.len() != 1 {
            out.other_attributes.insert(name.clone(), attr.clone());
            continue;
        }
        if name.starts_with("Tmp-") {
            continue;
        }

        if let Some(value) = attr.value[0].as_str() {
            let value = value.to_string();
            match name.as_str() {
                "Acct-Session-Id" => out.acct_session_id = Some(value),
                "Acct-Status-Type" => out.acct_status_type = Some(value),
                "Acct-Terminate-Cause" => out.acct_terminate_cause = Some(value),
                "Acct-Unique-Session-Id" => out.acct_unique_session_id = Some(value),
                "Called-Station-Id" => out.called_station_id = Some(value),
                "Calling-Station-Id" => out.calling_station_id = Some(value),
                "Class" => match decode_hex_text(&value) {
                    Some(decoded) => out.class = Some(decoded),
                    None => {
                        out.other_attributes.insert(name.clone(), attr.clone());
                    }
                },
                "Event-Timestamp" => out.event_timestamp = Some(value),
                "Framed-IP-Address" => out.framed_ip_address = Some(value),
                "NAS-Identifier" => out.nas_identifier = Some(value),
                "NAS-IP-Address" => out.nas_ip_address = Some(value),
                "Service-Type" => out.service_type = Some(value),
                "User-Name" => out.user_name = Some(value),
                _ => {
                    out.other_attributes.insert(name.clone(), attr.clone());
                }
            }
        } else if let Some(value) = attr.value[0].as_i64() {
            match name.as_str() {
                "Acct-Input-Octets" => out.acct_input_octets = Some(value),
                "Acct-Input-Packets" => out.acct_input_packets = Some(value),
                "Acct-Output-Octets" => out.acct_output_octets = Some(value),
                "Acct-Output-Packets" => out.acct_output_packets = Some(value),
                "Acct-Session-Time" => out.acct_session_time = Some(value),
                // NAS-Port-* is excluded above; the bare port is kept.
                "NAS-Port" => out.nas_port = Some(value),
                _ => {
                    out.other_attributes.insert(name.clone(), attr.clone());
                }
            }
        } else {
            out.other_attributes.insert(name.clone(), attr.clone());
        }
    }

    out
}

fn project_reply(reply: &AttributeMap) -> RadiusReplyLog {
    let mut out = RadiusReplyLog::default();

    for (name, attr) in reply {
        if name == "control:NT-Password" {
            continue;
        }

        if attr.value.len() != 1 {
            out.other_attributes.insert(name.clone(), attr.clone());
            continue;
        }
        if name.starts_with("Tmp-") {
            continue;
        }

        match (name.as_str(), attr.value[0].as_str()) {
            ("reply:Class", Some(value)) => out.class = Some(value.to_string()),
            ("reply:MS-Primary-DNS-Server", Some(value)) => {
                out.ms_primary_dns_server = Some(value.to_string())
            }
            ("reply:MS-Secondary-DNS-Server", Some(value)) => {
                out.ms_secondary_dns_server = Some(value.to_string())
            }
            _ => {
                out.other_attributes.insert(name.clone(), attr.clone());
            }
        }
    }

    out
}

/// Emit one audit record for a request/reply exchange.
pub fn log_radius_exchange(
    log: &dyn LogSink,
    stream: &str,
    status: u16,
    request: &AttributeMap,
    reply: Option<&AttributeMap>,
) {
    let record = RadiusExchangeLog {
        status,
        request: Some(project_request(request)),
        reply: reply.map(project_reply),
    };

    match serde_json::to_value(&record) {
        Ok(value) => log.info_json(stream, value),
        Err(e) => log.error("Failed to encode audit record", &[("err", &e.to_string())]),
    }
}
