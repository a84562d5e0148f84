use serde::{Deserialize, Serialize};

/// Error envelope returned by the Stripe API on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorObject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
}

impl ApiErrorObject {
    /// The error code, falling back to the error type when Stripe sends none.
    pub fn code_or_type(&self) -> &str {
        match self.code.as_deref() {
            Some(code) if !code.is_empty() => code,
            _ => &self.kind,
        }
    }
}
