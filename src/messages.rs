use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Coordinate, Locator, ViewId};
use crate::error::RunaError;
use crate::events::BridgeEvent;

/// Typed inbound port message. Wire shape is one JSON envelope per line:
/// `{"port": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq)]
pub enum PortMessage {
    DownloadImages(Vec<Locator>),
    InitMap {
        view: ViewId,
        coordinates: Vec<Coordinate>,
    },
    HttpError(String),
    Analytics(String),
    RequestFullscreen,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    port: String,
    #[serde(default)]
    data: Value,
}

/// Decodes one inbound line. Unknown ports yield `Ok(None)` and are
/// skipped without comment; a known port with a payload that does not
/// decode is an error the caller reports and survives.
pub fn decode_line(line: &str) -> Result<Option<PortMessage>, RunaError> {
    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|err| RunaError::MalformedLine(err.to_string()))?;

    match envelope.port.as_str() {
        "downloadImages" => {
            let raw: Vec<String> = payload(&envelope.port, envelope.data)?;
            let locators = raw
                .iter()
                .map(|value| value.parse::<Locator>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| malformed(&envelope.port, err))?;
            Ok(Some(PortMessage::DownloadImages(locators)))
        }
        "initMap" => {
            let (view, pairs): (String, Vec<[f64; 2]>) = payload(&envelope.port, envelope.data)?;
            let view = view
                .parse::<ViewId>()
                .map_err(|err| malformed(&envelope.port, err))?;
            let coordinates = pairs
                .iter()
                .map(|[lon, lat]| Coordinate::new(*lon, *lat))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| malformed(&envelope.port, err))?;
            Ok(Some(PortMessage::InitMap { view, coordinates }))
        }
        "httpError" => {
            let message: String = payload(&envelope.port, envelope.data)?;
            Ok(Some(PortMessage::HttpError(message)))
        }
        "analytics" => {
            let page: String = payload(&envelope.port, envelope.data)?;
            Ok(Some(PortMessage::Analytics(page)))
        }
        "requestFullscreen" => Ok(Some(PortMessage::RequestFullscreen)),
        _ => Ok(None),
    }
}

fn payload<T: serde::de::DeserializeOwned>(port: &str, data: Value) -> Result<T, RunaError> {
    serde_json::from_value(data).map_err(|err| RunaError::MalformedPayload {
        port: port.to_string(),
        reason: err.to_string(),
    })
}

fn malformed(port: &str, err: RunaError) -> RunaError {
    RunaError::MalformedPayload {
        port: port.to_string(),
        reason: err.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    #[serde(flatten)]
    event: &'a BridgeEvent,
    at: String,
}

/// Encodes one outbound event as an NDJSON line (without the newline).
pub fn encode_event(event: &BridgeEvent) -> Result<String, RunaError> {
    serde_json::to_string(&OutboundFrame {
        event,
        at: iso_timestamp(),
    })
    .map_err(|err| RunaError::Io(err.to_string()))
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
