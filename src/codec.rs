//! Payload codec: the single narrow interface through which the core ever
//! looks inside an opaque payload (spec §9). Everywhere else the core only
//! takes `payload.len()`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::InputFile;

/// Declared keyword arguments extracted from a serialized payload, used to
/// discover which input files must be staged before dispatch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecodedKwargs {
    #[serde(default)]
    pub input_files: HashMap<String, Vec<InputFile>>,
}

/// Decodes the function-argument wire format well enough to discover
/// declared input files. The wire format itself (msgpack, pickle, whatever
/// the backend's argument serialization codec uses) is an external
/// collaborator (spec §1); this trait is the seam.
pub trait PayloadCodec: Send + Sync {
    fn decode_kwargs(&self, payload: &[u8]) -> SchedulerResult<DecodedKwargs>;
}

/// Default codec: payloads are JSON-encoded `{"input_files": {src: [...]}}`
/// envelopes. Production deployments swap this for whatever the backend's
/// real argument serializer produces.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPayloadCodec;

impl PayloadCodec for JsonPayloadCodec {
    fn decode_kwargs(&self, payload: &[u8]) -> SchedulerResult<DecodedKwargs> {
        if payload.is_empty() {
            return Ok(DecodedKwargs::default());
        }
        serde_json::from_slice(payload).map_err(|e| SchedulerError::PayloadDecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_decodes_to_no_files() {
        let codec = JsonPayloadCodec;
        let decoded = codec.decode_kwargs(&[]).unwrap();
        assert!(decoded.input_files.is_empty());
    }

    #[test]
    fn decodes_declared_input_files() {
        let codec = JsonPayloadCodec;
        let payload = br#"{"input_files": {"site-a": [{"path": "x.dat", "size": 10}]}}"#;
        let decoded = codec.decode_kwargs(payload).unwrap();
        assert_eq!(decoded.input_files["site-a"].len(), 1);
    }
}
