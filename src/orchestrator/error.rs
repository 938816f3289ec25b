use super::*;

#[derive(Debug)]
pub struct OrchestratorError {
    code: &'static str,
    message: String,
}

impl OrchestratorError {
    fn new(code: &'static str, message: String) -> Self {
        Self { code, message }
    }

    pub(super) fn invalid_request(message: String) -> Self {
        Self::new("INVALID_REQUEST", message)
    }

    pub(super) fn model_unavailable(message: String) -> Self {
        Self::new("MODEL_UNAVAILABLE", message)
    }

    pub(super) fn internal(message: String) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_payload(&self) -> Value {
        json!({
            "code": self.code,
            "message": self.message,
        })
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OrchestratorError {}
