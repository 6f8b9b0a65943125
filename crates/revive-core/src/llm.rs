use anyhow::Result;
use async_trait::async_trait;
use revive_clients::{ChatCompletion, ChatRequest, OpenAiClient, Run, ThreadMessage};

/// Language model provider used by the personalization chain
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn create_thread(&self) -> Result<String>;

    async fn add_message(&self, thread_id: &str, role: &str, content: &str) -> Result<()>;

    async fn start_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<Run>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Newest first
    async fn thread_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<ThreadMessage>>;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion>;
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn create_thread(&self) -> Result<String> {
        Ok(OpenAiClient::create_thread(self).await?)
    }

    async fn add_message(&self, thread_id: &str, role: &str, content: &str) -> Result<()> {
        OpenAiClient::add_message(self, thread_id, role, content).await?;
        Ok(())
    }

    async fn start_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<Run> {
        Ok(self.create_run(thread_id, assistant_id, instructions).await?)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        Ok(OpenAiClient::get_run(self, thread_id, run_id).await?)
    }

    async fn thread_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<ThreadMessage>> {
        Ok(self.list_messages(thread_id, limit).await?)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        Ok(self.chat_completion(request).await?)
    }
}
