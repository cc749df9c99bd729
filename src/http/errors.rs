use hyper::StatusCode;
use serde_json;

/// Maps an error to an http status and to the `error_kind` of the response body.
pub trait Codeable {
    fn code(&self) -> StatusCode;

    fn error_kind(&self) -> &'static str;
}

/// Extra details sent to the client, e.g. validation errors.
pub trait PayloadCarrier {
    fn payload(&self) -> Option<serde_json::Value>;
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub error_kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Request body could not be read or deserialized.
#[derive(Debug, Clone, Fail)]
#[fail(display = "malformed request body: {}", _0)]
pub struct ParseError(pub String);
