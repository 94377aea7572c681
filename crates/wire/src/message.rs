use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muid: Option<String>,
}

impl Metadata {
    pub fn muid(muid: impl Into<String>) -> Self {
        Metadata { muid: Some(muid.into()) }
    }
}

/// First frame of every connection; selects the RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    StartMeasurement { description: String, host: String },
    StopMeasurement { muid: String },
    StartStage { muid: String },
    StopStage { muid: String },
    StoreLogEntries {
        #[serde(default)]
        metadata: Metadata,
    },
    StorePassiveEntry {
        #[serde(default)]
        metadata: Metadata,
    },
    StoreEntradaEntry {
        #[serde(default)]
        metadata: Metadata,
    },
    StoreZoneEntry {
        #[serde(default)]
        metadata: Metadata,
    },
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Call::StartMeasurement { .. } => "start_measurement",
            Call::StopMeasurement { .. } => "stop_measurement",
            Call::StartStage { .. } => "start_stage",
            Call::StopStage { .. } => "stop_stage",
            Call::StoreLogEntries { .. } => "store_log_entries",
            Call::StorePassiveEntry { .. } => "store_passive_entry",
            Call::StoreEntradaEntry { .. } => "store_entrada_entry",
            Call::StoreZoneEntry { .. } => "store_zone_entry",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key: String,
    pub url: String,
    #[serde(default)]
    pub mmd: i64,
    #[serde(default)]
    pub dns_api_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "b64")]
    pub cert_der: Vec<u8>,
    #[serde(default)]
    pub is_precert: bool,
    pub index: i64,
    pub timestamp_ms: i64,
    pub log: LogInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveEntry {
    pub query: String,
    pub query_type: String,
    pub timestamp_ms: i64,
}

/// `last_seen_ms` defaults to `timestamp_ms` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntradaEntry {
    pub fqdn: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneType {
    Registration,
    Expiration,
    FirstSeen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEntry {
    pub apex: String,
    #[serde(rename = "type")]
    pub kind: ZoneType,
    pub timestamp_ms: i64,
}

/// An entry type carried by one of the streaming calls.
pub trait StreamEntry: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// The call that opens a stream of this entry type.
    fn open(metadata: Metadata) -> Call;
}

impl StreamEntry for LogEntry {
    fn open(metadata: Metadata) -> Call {
        Call::StoreLogEntries { metadata }
    }
}

impl StreamEntry for PassiveEntry {
    fn open(metadata: Metadata) -> Call {
        Call::StorePassiveEntry { metadata }
    }
}

impl StreamEntry for EntradaEntry {
    fn open(metadata: Metadata) -> Call {
        Call::StoreEntradaEntry { metadata }
    }
}

impl StreamEntry for ZoneEntry {
    fn open(metadata: Metadata) -> Call {
        Call::StoreZoneEntry { metadata }
    }
}

/// One batch frame of a streaming call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "E: StreamEntry")]
pub struct Batch<E> {
    pub entries: Vec<E>,
}

impl<E> Default for Batch<E> {
    fn default() -> Self {
        Batch { entries: Vec::new() }
    }
}

impl<E> Batch<E> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok,
    InvalidArgument,
    Internal,
    Cancelled,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::Ok => "ok",
            Code::InvalidArgument => "invalid argument",
            Code::Internal => "internal",
            Code::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Server to client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Muid {
        muid: String,
    },
    Ack {
        ok: bool,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        error: String,
    },
    Status {
        code: Code,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
    },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status { code: Code::Ok, message: String::new() }
    }

    pub fn status(code: Code, message: impl Into<String>) -> Self {
        Reply::Status { code, message: message.into() }
    }

    pub fn ack<E: fmt::Display>(outcome: Result<(), E>) -> Self {
        match outcome {
            Ok(()) => Reply::Ack { ok: true, error: String::new() },
            Err(e) => Reply::Ack { ok: false, error: e.to_string() },
        }
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_is_tagged_by_method() {
        let c: Call = serde_json::from_value(json!({"method": "store_zone_entry", "metadata": {"muid": "abc"}})).unwrap();
        assert_eq!(c, Call::StoreZoneEntry { metadata: Metadata::muid("abc") });
        let c: Call = serde_json::from_value(json!({"method": "store_passive_entry"})).unwrap();
        assert_eq!(c, Call::StorePassiveEntry { metadata: Metadata::default() });
        assert_eq!(c.method(), "store_passive_entry");
    }

    #[test]
    fn log_entry_der_is_base64() {
        let e = LogEntry {
            cert_der: vec![0x30, 0x82, 0xff],
            is_precert: true,
            index: 7,
            timestamp_ms: 1_700_000_000_123,
            log: LogInfo { url: "https://ct.example/".into(), ..Default::default() },
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["cert_der"], "MIL/");
        let back: LogEntry = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
        assert!(serde_json::from_value::<LogEntry>(json!({
            "cert_der": "***", "index": 1, "timestamp_ms": 1, "log": {"url": "u"}
        }))
        .is_err());
    }

    #[test]
    fn zone_type_uses_upper_case_names() {
        let z: ZoneEntry = serde_json::from_str(r#"{"apex":"a.org","type":"FIRST_SEEN","timestamp_ms":5}"#).unwrap();
        assert_eq!(z.kind, ZoneType::FirstSeen);
    }

    #[test]
    fn replies() {
        assert_eq!(serde_json::to_string(&Reply::ok()).unwrap(), r#"{"type":"status","code":"ok"}"#);
        assert_eq!(serde_json::to_string(&Reply::ack::<String>(Ok(()))).unwrap(), r#"{"type":"ack","ok":true}"#);
        let r: Reply = serde_json::from_str(r#"{"type":"ack","ok":false,"error":"bad"}"#).unwrap();
        assert_eq!(r, Reply::Ack { ok: false, error: "bad".into() });
    }

    #[test]
    fn batch_rejects_foreign_entries() {
        let ok: Batch<PassiveEntry> =
            serde_json::from_str(r#"{"entries":[{"query":"a.com","query_type":"A","timestamp_ms":1}]}"#).unwrap();
        assert_eq!(ok.len(), 1);
        assert!(serde_json::from_str::<Batch<PassiveEntry>>(r#"{"entries":[{"apex":"a.com"}]}"#).is_err());
    }
}
