//! Generic node for tasks answered by a single structured completion.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use super::PipelineServices;
use crate::completion::{CompletionResponse, ValidateResponse, complete_structured};
use crate::pipeline::{Node, NodeError, TaskContext};

/// One LLM-backed task: how to build its input and where to store its answer.
#[async_trait]
pub trait LlmTask: Send + Sync + 'static {
    /// Input serialized into the user message.
    type Context: Serialize + Send + Sync;
    /// Structured reply expected from the model.
    type Response: DeserializeOwned + JsonSchema + ValidateResponse + Serialize + Send;
    /// Extra material gathered while preparing, handed back to [`LlmTask::finish`].
    type Retrieved: Send;

    /// Node name and result key.
    const NAME: &'static str;

    /// System prompt for the completion.
    fn prompt(&self) -> &'static str;

    /// Build the model input from the run so far.
    async fn prepare(
        &self,
        services: &PipelineServices,
        context: &TaskContext,
    ) -> Result<(Self::Context, Self::Retrieved), NodeError>;

    /// Render the user message; pretty JSON by default.
    fn user_message(&self, input: &Self::Context) -> Result<String, NodeError> {
        Ok(serde_json::to_string_pretty(input)?)
    }

    /// Store the parsed reply. The default node result is already recorded.
    fn finish(
        &self,
        context: &mut TaskContext,
        response: Self::Response,
        retrieved: Self::Retrieved,
    ) -> Result<(), NodeError>;
}

/// [`Node`] that runs an [`LlmTask`].
///
/// The node result is `{result, model, usage}`; tasks may replace it in `finish`.
pub struct LlmNode<T> {
    services: Arc<PipelineServices>,
    task: T,
}

impl<T: LlmTask + Default> LlmNode<T> {
    /// Create the node.
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self {
            services,
            task: T::default(),
        }
    }
}

fn node_result<R: Serialize>(
    response: &R,
    completion: &CompletionResponse,
) -> Result<Value, serde_json::Error> {
    let mut result = Map::new();
    result.insert("result".into(), serde_json::to_value(response)?);
    result.insert("model".into(), json!(completion.model));
    if let Some(usage) = &completion.usage {
        result.insert("usage".into(), usage.clone());
    }
    Ok(Value::Object(result))
}

#[async_trait]
impl<T: LlmTask> Node for LlmNode<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    async fn process(&self, mut context: TaskContext) -> Result<TaskContext, NodeError> {
        let (input, retrieved) = self.task.prepare(&self.services, &context).await?;
        let user_content = self.task.user_message(&input)?;

        let (response, completion) = complete_structured::<T::Response>(
            self.services.completion.as_ref(),
            &self.services.settings.llm_model,
            self.task.prompt(),
            user_content,
        )
        .await?;
        tracing::debug!(node = T::NAME, model = %completion.model, "Completion received");

        context.record_node(T::NAME, node_result(&response, &completion)?);
        self.task.finish(&mut context, response, retrieved)?;
        Ok(context)
    }
}
