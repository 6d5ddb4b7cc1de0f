// sage-core/src/ports/hook.rs

use async_trait::async_trait;

use crate::domain::schema::PreValidation;
use crate::error::SageError;

#[derive(Debug, Clone)]
pub struct HookResponse {
    pub status: u16,
    pub body: String,
}

impl HookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The optional HTTP check between staging and commit. The configured
/// payload is forwarded verbatim; run context travels out-of-band so
/// the payload stays opaque.
#[async_trait]
pub trait PreValidationHook: Send + Sync {
    async fn call(
        &self,
        config: &PreValidation,
        staging_table: &str,
        submission_id: &str,
    ) -> Result<HookResponse, SageError>;
}
