use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};

/// Semantic checks applied after a reply has been deserialized.
pub trait ValidateResponse {
    /// Return a description of the first violated constraint.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// JSON schema for `T` as sent to providers.
pub fn response_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Remove a surrounding Markdown code fence (```json ... ```), if present.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Request a completion and parse it into `T`.
///
/// Any reply that is not valid JSON for `T`, or that fails [`ValidateResponse`], becomes
/// [`CompletionError::InvalidResponse`].
pub async fn complete_structured<T>(
    client: &dyn CompletionClient,
    model: &str,
    system_prompt: &str,
    user_content: String,
) -> Result<(T, CompletionResponse), CompletionError>
where
    T: DeserializeOwned + JsonSchema + ValidateResponse,
{
    let schema_name = T::schema_name();
    let request = CompletionRequest {
        model: model.to_string(),
        system_prompt: system_prompt.to_string(),
        user_content,
        schema_name: schema_name.clone(),
        response_schema: response_schema::<T>(),
    };

    let response = client.complete(request).await?;
    let parsed: T = serde_json::from_str(strip_code_fences(&response.content)).map_err(|error| {
        CompletionError::InvalidResponse(format!("reply is not a valid {schema_name}: {error}"))
    })?;
    parsed
        .validate()
        .map_err(|reason| CompletionError::InvalidResponse(format!("{schema_name}: {reason}")))?;

    tracing::debug!(schema = %schema_name, model = %response.model, "Structured completion parsed");
    Ok((parsed, response))
}

pub(crate) fn check_unit_interval(field: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{field} must be within [0, 1], got {value}"))
    }
}
