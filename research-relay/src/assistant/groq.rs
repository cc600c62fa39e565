use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Chat-completions client for the remote report writer.
#[derive(Clone)]
pub struct GroqClient {
    api_key: String,
    client: Client,
}

impl GroqClient {
    pub fn new(api_key: String, client: Client) -> Self {
        Self { api_key, client }
    }

    pub async fn generate(&self, prompt: &str, model: &str) -> Result<String> {
        let response = self
            .client
            .post(GROQ_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "messages": [
                    {
                        "role": "user",
                        "content": prompt
                    }
                ],
                "temperature": 0.4,
                "max_tokens": 4096
            }))
            .send()
            .await
            .context("Groq request failed")?
            .error_for_status()
            .context("Groq returned an error status")?;

        let data = response.json::<Value>().await?;

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Failed to get content from Groq response"))
    }
}
