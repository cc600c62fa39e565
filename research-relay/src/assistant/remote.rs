use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::Ollama;
use reqwest::Client;

use super::engine::{ResearchTask, Researcher, ResearcherFactory};
use super::groq::GroqClient;
use super::prompts::format_report_prompt;
use super::utils::{perplexity_search, research_context, source_domains, strip_think_tags};
use crate::configuration::{EngineSettings, ResearchMode};

/// Builds [`RemoteResearcher`]s that share one HTTP connection pool.
#[derive(Clone)]
pub struct RemoteResearcherFactory {
    settings: EngineSettings,
    client: Client,
}

impl RemoteResearcherFactory {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            client: Client::new(),
        }
    }
}

impl ResearcherFactory for RemoteResearcherFactory {
    fn build(&self, task: ResearchTask) -> Box<dyn Researcher> {
        Box::new(RemoteResearcher {
            task,
            settings: self.settings.clone(),
            client: self.client.clone(),
            context: None,
        })
    }
}

/// Researches with Perplexity and writes the report with Groq or a local Ollama model.
pub struct RemoteResearcher {
    task: ResearchTask,
    settings: EngineSettings,
    client: Client,
    context: Option<String>,
}

impl RemoteResearcher {
    async fn generate(&self, prompt: String) -> Result<String> {
        match self.settings.research_mode {
            ResearchMode::Local => {
                tracing::debug!(model = %self.settings.local_llm, "Writing report with Ollama");
                let ollama = Ollama::default();
                let request = GenerationRequest::new(self.settings.local_llm.clone(), prompt);
                Ok(ollama
                    .generate(request)
                    .await
                    .map_err(|e| anyhow!("Ollama request failed: {}", e))?
                    .response)
            }
            ResearchMode::Remote => {
                let groq_api_key = self
                    .settings
                    .groq_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("GROQ_API_KEY is not configured"))?;
                tracing::debug!(model = %self.settings.groq_model, "Writing report with Groq");
                let groq = GroqClient::new(groq_api_key, self.client.clone());
                groq.generate(&prompt, &self.settings.groq_model).await
            }
        }
    }
}

#[async_trait]
impl Researcher for RemoteResearcher {
    async fn conduct_research(&mut self) -> Result<()> {
        let api_key = self
            .settings
            .perplexity_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("PERPLEXITY_API_KEY is not configured"))?;
        let domains = source_domains(&self.task.sources);

        let search_results = perplexity_search(
            &self.client,
            api_key,
            &self.settings.perplexity_model,
            &self.task.query,
            &domains,
        )
        .await?;

        tracing::info!(results = search_results.results.len(), "Research gathered");
        self.context = Some(research_context(&search_results));
        Ok(())
    }

    async fn write_report(&mut self) -> Result<String> {
        let prompt = format_report_prompt(
            self.task.report_type,
            &self.task.query,
            self.context.as_deref(),
        );
        let report = strip_think_tags(&self.generate(prompt).await?);
        if report.is_empty() {
            return Err(anyhow!("Report writer returned an empty report"));
        }
        Ok(report)
    }
}
