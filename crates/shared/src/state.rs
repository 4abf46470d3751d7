use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorCode};

/// Counter state round-tripped through button value payloads. The server
/// keeps no durable copy; whatever the surface echoes back is the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterState {
    pub c: i64,
}

impl CounterState {
    pub fn new(c: i64) -> Self {
        Self { c }
    }

    pub fn encode(&self) -> Result<String, ApiError> {
        serde_json::to_string(self)
            .map_err(|e| ApiError::new(ErrorCode::Internal, format!("counter encode failed: {e}")))
    }

    /// An absent payload decodes to the zero state. A present but malformed
    /// payload is an error; callers must not apply a state update in that
    /// case.
    pub fn decode(payload: Option<&str>) -> Result<Self, ApiError> {
        let Some(raw) = payload else {
            return Ok(Self::default());
        };
        serde_json::from_str(raw).map_err(|e| {
            ApiError::new(ErrorCode::Decode, format!("malformed counter payload: {e}"))
        })
    }
}
