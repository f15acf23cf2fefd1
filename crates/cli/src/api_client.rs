//! Thin client for the conversation API.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn create_conversation(
        &self,
        requirement: &str,
        repo_url: &str,
        mode: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(self.url("/conversations"))
            .json(&json!({
                "requirement": requirement,
                "repo_url": repo_url,
                "mode": mode,
            }))
            .send()
            .await
            .context("create conversation")?;
        let status = response.status();
        let body: Value = response.json().await.context("parse response")?;
        if !status.is_success() {
            return Err(anyhow!("server returned {status}: {body}"));
        }
        body["conversation_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("response without conversation_id"))
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.url(&format!("/conversations/{conversation_id}")))
            .send()
            .await
            .context("get conversation")?;
        let status = response.status();
        let body: Value = response.json().await.context("parse response")?;
        if !status.is_success() {
            return Err(anyhow!("server returned {status}: {body}"));
        }
        Ok(body)
    }

    pub async fn cancel_conversation(&self, conversation_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/conversations/{conversation_id}/cancel")))
            .send()
            .await
            .context("cancel conversation")?;
        if !response.status().is_success() {
            return Err(anyhow!("server returned {}", response.status()));
        }
        Ok(())
    }

    /// Poll until the conversation reaches a terminal status, printing
    /// transitions as they happen.
    pub async fn follow(&self, conversation_id: &str) -> Result<Value> {
        let mut last_status = String::new();
        let mut last_message_count = 0;
        loop {
            let view = self.get_conversation(conversation_id).await?;
            let status = view["status"].as_str().unwrap_or("UNKNOWN").to_string();

            if let Some(messages) = view["messages"].as_array() {
                for message in messages.iter().skip(last_message_count) {
                    let role = message["role"].as_str().unwrap_or("?");
                    let content = message["content"].as_str().unwrap_or("");
                    println!("[{role}] {content}");
                }
                last_message_count = messages.len();
            }
            if status != last_status {
                println!("-- status: {status}");
                last_status = status.clone();
            }

            if matches!(status.as_str(), "COMPLETED" | "FAILED" | "CANCELLED") {
                return Ok(view);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}
