//! The provider sum type and the failover chain.
//!
//! The provider set is closed and fixed at build time, so polymorphism is a
//! plain enum with one dispatch point; each dialect's conversions live in
//! its own module.

use std::{collections::HashMap, pin::Pin};

use {secrecy::Secret, tokio_stream::Stream, tracing::{debug, info, warn}};

use torbo_config::ProvidersConfig;

use crate::{
    anthropic::AnthropicProvider,
    error::ProviderError,
    gemini::GeminiProvider,
    model::{ChatRequest, CompletionResponse, StreamEvent},
    openai::OpenAiProvider,
};

const DEFAULT_LOCAL_BASE: &str = "http://127.0.0.1:11434";
const DEFAULT_LOCAL_MODEL: &str = "llama3.2";
const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// One configured upstream.
pub enum Provider {
    Local(OpenAiProvider),
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
    Gemini(GeminiProvider),
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::OpenAi(_) => "openai",
            Self::Anthropic(_) => "anthropic",
            Self::Gemini(_) => "gemini",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Local(p) | Self::OpenAi(p) => p.model(),
            Self::Anthropic(p) => p.model(),
            Self::Gemini(p) => p.model(),
        }
    }

    pub async fn complete(&self, req: &ChatRequest) -> Result<CompletionResponse, ProviderError> {
        match self {
            Self::Local(p) | Self::OpenAi(p) => p.complete(req).await,
            Self::Anthropic(p) => p.complete(req).await,
            Self::Gemini(p) => p.complete(req).await,
        }
    }

    pub async fn stream(
        &self,
        req: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, ProviderError> {
        match self {
            Self::Local(p) | Self::OpenAi(p) => p.stream(req).await,
            Self::Anthropic(p) => p.stream(req).await,
            Self::Gemini(p) => p.stream(req).await,
        }
    }
}

/// Provider implied by a model-name prefix; `None` means no preference
/// (auto-routing through the chain order).
pub fn provider_for_model(model: &str) -> Option<&'static str> {
    let model = model.trim();
    if model.is_empty() || model == "auto" {
        return None;
    }
    if model.starts_with("claude") {
        return Some("anthropic");
    }
    if model.starts_with("gpt")
        || model.starts_with("chatgpt")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        return Some("openai");
    }
    if model.starts_with("gemini") {
        return Some("gemini");
    }
    Some("local")
}

/// How a request actually got served: the provider used and every hop
/// tried along the way.
#[derive(Debug, Clone)]
pub struct FailoverOutcome {
    pub provider: &'static str,
    pub hops: Vec<&'static str>,
}

impl FailoverOutcome {
    /// Audit detail like `provider=local→openai`, or `None` when the first
    /// candidate answered.
    pub fn detail(&self) -> Option<String> {
        (self.hops.len() > 1).then(|| format!("provider={}", self.hops.join("→")))
    }
}

/// Configured providers in failover order: local first, then cloud
/// providers in the user-pinned order.
pub struct ProviderChain {
    providers: Vec<Provider>,
}

impl ProviderChain {
    /// Build the chain. API keys resolve keychain first, then config, then
    /// environment; cloud providers without a key are left out.
    pub fn from_config(cfg: &ProvidersConfig, keychain_keys: &HashMap<String, String>) -> Self {
        let mut providers = Vec::new();

        for name in cfg.failover_order() {
            match name.as_str() {
                "local" if cfg.is_enabled("local") => {
                    let base = setting(cfg, "local", |e| e.base_url.clone())
                        .unwrap_or_else(|| DEFAULT_LOCAL_BASE.into());
                    let model = setting(cfg, "local", |e| e.model.clone())
                        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.into());
                    providers.push(Provider::Local(OpenAiProvider::local(
                        model,
                        format!("{base}/v1"),
                    )));
                },
                "openai" if cfg.is_enabled("openai") => {
                    if let Some(key) = resolve_key(cfg, keychain_keys, "openai", "OPENAI_API_KEY") {
                        let base = setting(cfg, "openai", |e| e.base_url.clone())
                            .unwrap_or_else(|| DEFAULT_OPENAI_BASE.into());
                        let model = setting(cfg, "openai", |e| e.model.clone())
                            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into());
                        providers.push(Provider::OpenAi(OpenAiProvider::new(key, model, base)));
                    }
                },
                "anthropic" if cfg.is_enabled("anthropic") => {
                    if let Some(key) =
                        resolve_key(cfg, keychain_keys, "anthropic", "ANTHROPIC_API_KEY")
                    {
                        let base = setting(cfg, "anthropic", |e| e.base_url.clone())
                            .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE.into());
                        let model = setting(cfg, "anthropic", |e| e.model.clone())
                            .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.into());
                        providers.push(Provider::Anthropic(AnthropicProvider::new(
                            key, model, base,
                        )));
                    }
                },
                "gemini" if cfg.is_enabled("gemini") => {
                    if let Some(key) = resolve_key(cfg, keychain_keys, "gemini", "GEMINI_API_KEY") {
                        let base = setting(cfg, "gemini", |e| e.base_url.clone())
                            .unwrap_or_else(|| DEFAULT_GEMINI_BASE.into());
                        let model = setting(cfg, "gemini", |e| e.model.clone())
                            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into());
                        providers.push(Provider::Gemini(GeminiProvider::new(key, model, base)));
                    }
                },
                _ => {},
            }
        }

        info!(
            providers = %providers.iter().map(Provider::name).collect::<Vec<_>>().join(", "),
            "provider chain built"
        );
        Self { providers }
    }

    /// Build directly from providers (tests and embedding).
    pub fn from_providers(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(Provider::name).collect()
    }

    /// Candidates in try-order: the preferred provider (override header
    /// wins over the model-name prefix) first, then the chain order.
    fn candidates(&self, model: &str, override_name: Option<&str>) -> Vec<&Provider> {
        let preferred = override_name
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| provider_for_model(model).map(str::to_string));

        let mut out: Vec<&Provider> = Vec::with_capacity(self.providers.len());
        if let Some(ref name) = preferred
            && let Some(p) = self.providers.iter().find(|p| p.name() == name.as_str())
        {
            out.push(p);
        }
        for p in &self.providers {
            if !out.iter().any(|c| c.name() == p.name()) {
                out.push(p);
            }
        }
        out
    }

    /// Buffered completion with failover. Walks the candidate order,
    /// skipping providers that fail retryably; a non-retryable error aborts
    /// the chain.
    pub async fn complete(
        &self,
        req: &ChatRequest,
        override_name: Option<&str>,
    ) -> Result<(CompletionResponse, FailoverOutcome), ProviderError> {
        let mut hops = Vec::new();
        let mut last_err: Option<ProviderError> = None;

        for provider in self.candidates(&req.model, override_name) {
            hops.push(provider.name());
            debug!(provider = provider.name(), "trying provider");
            match provider.complete(req).await {
                Ok(resp) => {
                    return Ok((resp, FailoverOutcome {
                        provider: provider.name(),
                        hops,
                    }));
                },
                Err(e) if e.retryable() => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    last_err = Some(e);
                },
                Err(e) => return Err(e),
            }
        }

        Err(ProviderError::Exhausted {
            last: Box::new(last_err.unwrap_or(ProviderError::MissingKey { provider: "local" })),
        })
    }

    /// Streaming counterpart: failover happens at connection time; once a
    /// stream is open, its frames belong to that provider.
    pub async fn open_stream(
        &self,
        req: &ChatRequest,
        override_name: Option<&str>,
    ) -> Result<
        (
            Pin<Box<dyn Stream<Item = StreamEvent> + Send>>,
            FailoverOutcome,
        ),
        ProviderError,
    > {
        let mut hops = Vec::new();
        let mut last_err: Option<ProviderError> = None;

        for provider in self.candidates(&req.model, override_name) {
            hops.push(provider.name());
            match provider.stream(req).await {
                Ok(stream) => {
                    return Ok((stream, FailoverOutcome {
                        provider: provider.name(),
                        hops,
                    }));
                },
                Err(e) if e.retryable() => {
                    warn!(provider = provider.name(), error = %e, "stream open failed, trying next");
                    last_err = Some(e);
                },
                Err(e) => return Err(e),
            }
        }

        Err(ProviderError::Exhausted {
            last: Box::new(last_err.unwrap_or(ProviderError::MissingKey { provider: "local" })),
        })
    }
}

fn setting<F>(cfg: &ProvidersConfig, name: &str, pick: F) -> Option<String>
where
    F: Fn(&torbo_config::ProviderEntry) -> Option<String>,
{
    cfg.get(name).and_then(pick).filter(|s| !s.is_empty())
}

fn resolve_key(
    cfg: &ProvidersConfig,
    keychain_keys: &HashMap<String, String>,
    name: &str,
    env_var: &str,
) -> Option<Secret<String>> {
    keychain_keys
        .get(name)
        .cloned()
        .filter(|k| !k.is_empty())
        .or_else(|| setting(cfg, name, |e| e.api_key.clone()))
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
        .map(Secret::new)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::model::ChatMessage};

    #[test]
    fn prefix_selection() {
        assert_eq!(provider_for_model("claude-sonnet-4-20250514"), Some("anthropic"));
        assert_eq!(provider_for_model("gpt-4o"), Some("openai"));
        assert_eq!(provider_for_model("o3-mini"), Some("openai"));
        assert_eq!(provider_for_model("gemini-2.0-flash"), Some("gemini"));
        assert_eq!(provider_for_model("llama3.2"), Some("local"));
        assert_eq!(provider_for_model("auto"), None);
        assert_eq!(provider_for_model(""), None);
    }

    /// Cloud entries disabled so ambient `*_API_KEY` env vars cannot leak
    /// into the assertion.
    fn cloud_disabled() -> ProvidersConfig {
        let off = torbo_config::ProviderEntry {
            enabled: Some(false),
            ..Default::default()
        };
        ProvidersConfig {
            openai: off.clone(),
            anthropic: off.clone(),
            gemini: off,
            ..Default::default()
        }
    }

    #[test]
    fn chain_skips_cloud_providers_without_keys() {
        let chain = ProviderChain::from_config(&cloud_disabled(), &HashMap::new());
        assert_eq!(chain.names(), vec!["local"]);
    }

    #[test]
    fn chain_includes_keyed_providers_in_pinned_order() {
        let mut cfg = cloud_disabled();
        cfg.openai.enabled = Some(true);
        cfg.gemini.enabled = Some(true);
        cfg.pinned_order = vec!["gemini".into(), "openai".into()];
        let keys = HashMap::from([
            ("openai".to_string(), "sk-1".to_string()),
            ("gemini".to_string(), "g-1".to_string()),
        ]);
        let chain = ProviderChain::from_config(&cfg, &keys);
        assert_eq!(chain.names(), vec!["local", "gemini", "openai"]);
    }

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        }
    }

    fn ok_body() -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "served"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1},
        })
        .to_string()
    }

    #[tokio::test]
    async fn failover_walks_to_next_provider() {
        let mut dead = mockito::Server::new_async().await;
        dead.mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("down")
            .create_async()
            .await;

        let mut live = mockito::Server::new_async().await;
        live.mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(ok_body())
            .create_async()
            .await;

        let chain = ProviderChain::from_providers(vec![
            Provider::Local(OpenAiProvider::local("llama3.2".into(), dead.url())),
            Provider::OpenAi(OpenAiProvider::new(
                Secret::new("sk-test".into()),
                "gpt-4o".into(),
                live.url(),
            )),
        ]);

        let (resp, outcome) = chain.complete(&request("auto"), None).await.unwrap();
        assert_eq!(resp.text.as_deref(), Some("served"));
        assert_eq!(outcome.provider, "openai");
        assert_eq!(outcome.detail().as_deref(), Some("provider=local→openai"));
    }

    #[tokio::test]
    async fn no_failover_when_first_candidate_answers() {
        let mut live = mockito::Server::new_async().await;
        live.mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(ok_body())
            .create_async()
            .await;

        let chain = ProviderChain::from_providers(vec![Provider::Local(OpenAiProvider::local(
            "llama3.2".into(),
            live.url(),
        ))]);

        let (_, outcome) = chain.complete(&request("auto"), None).await.unwrap();
        assert_eq!(outcome.provider, "local");
        assert!(outcome.detail().is_none());
    }

    #[tokio::test]
    async fn non_retryable_error_aborts_the_chain() {
        let mut bad_request = mockito::Server::new_async().await;
        bad_request
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let mut live = mockito::Server::new_async().await;
        let fallback_mock = live
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(ok_body())
            .expect(0)
            .create_async()
            .await;

        let chain = ProviderChain::from_providers(vec![
            Provider::Local(OpenAiProvider::local("llama3.2".into(), bad_request.url())),
            Provider::OpenAi(OpenAiProvider::new(
                Secret::new("sk-test".into()),
                "gpt-4o".into(),
                live.url(),
            )),
        ]);

        let err = chain.complete(&request("auto"), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 400, .. }));
        fallback_mock.assert_async().await;
    }

    #[tokio::test]
    async fn exhausted_chain_reports_last_error() {
        let mut dead = mockito::Server::new_async().await;
        dead.mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("down")
            .create_async()
            .await;

        let chain = ProviderChain::from_providers(vec![Provider::Local(OpenAiProvider::local(
            "llama3.2".into(),
            dead.url(),
        ))]);

        let err = chain.complete(&request("auto"), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Exhausted { .. }));
        assert_eq!(err.provider(), "local");
    }

    #[tokio::test]
    async fn override_header_beats_model_prefix() {
        let mut openai_srv = mockito::Server::new_async().await;
        let openai_mock = openai_srv
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(ok_body())
            .create_async()
            .await;

        let mut local_srv = mockito::Server::new_async().await;
        let local_mock = local_srv
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(ok_body())
            .expect(0)
            .create_async()
            .await;

        let chain = ProviderChain::from_providers(vec![
            Provider::Local(OpenAiProvider::local("llama3.2".into(), local_srv.url())),
            Provider::OpenAi(OpenAiProvider::new(
                Secret::new("sk-test".into()),
                "gpt-4o".into(),
                openai_srv.url(),
            )),
        ]);

        // Model says local, but the override header says openai.
        let (_, outcome) = chain
            .complete(&request("llama3.2"), Some("openai"))
            .await
            .unwrap();
        assert_eq!(outcome.provider, "openai");
        openai_mock.assert_async().await;
        local_mock.assert_async().await;
    }
}
