use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use commcoach_core::error::{ProviderError, RouterError};
use commcoach_core::provider::gemini::GeminiProvider;
use commcoach_core::provider::AiProvider;
use commcoach_core::router::health::HealthSettings;
use commcoach_core::router::rate::RateLimits;
use commcoach_core::router::{AiRouter, RouterSettings};
use commcoach_core::types::{
    GenerationConfig, Prompt, ProviderId, ProviderOutput, StructuredOutput, TokenUsage,
};

/// Adapter whose behaviour can be flipped between calls.
struct Scripted {
    id: ProviderId,
    failing: AtomicBool,
    delay: Option<Duration>,
    cost: f64,
    structured_reply: String,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(id: ProviderId) -> Arc<Self> {
        Self::with(id, |_| {})
    }

    fn with(id: ProviderId, f: impl FnOnce(&mut Scripted)) -> Arc<Self> {
        let mut s = Scripted {
            id,
            failing: AtomicBool::new(false),
            delay: None,
            cost: 0.0,
            structured_reply: r#"{"score": 8}"#.to_string(),
            calls: AtomicUsize::new(0),
        };
        f(&mut s);
        Arc::new(s)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn step(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Upstream {
                status: 503,
                message: format!("{} unavailable", self.id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AiProvider for Scripted {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn default_model(&self) -> &str {
        match self.id {
            ProviderId::Gemini => "gemini-2.0-flash",
            ProviderId::Ollama => "llama3.1:8b",
            ProviderId::OpenRouter => "meta-llama/llama-3.1-8b-instruct",
        }
    }

    fn accepts_model(&self, model: &str) -> bool {
        match self.id {
            ProviderId::Gemini => model.starts_with("gemini"),
            ProviderId::Ollama => model.contains(':'),
            ProviderId::OpenRouter => model.contains('/'),
        }
    }

    async fn generate_content(
        &self,
        model: &str,
        prompt: &Prompt,
        _config: &GenerationConfig,
    ) -> Result<ProviderOutput, ProviderError> {
        self.step().await?;
        let text = match prompt {
            Prompt::Text(t) => format!("{}: {}", self.id, t),
            Prompt::Messages(m) => format!("{}: {} turns", self.id, m.len()),
        };
        Ok(ProviderOutput {
            text,
            model: model.to_string(),
            cost: self.cost,
            usage: TokenUsage::default(),
        })
    }

    async fn generate_structured_content(
        &self,
        model: &str,
        _prompt: &Prompt,
        _schema: &serde_json::Value,
        _config: &GenerationConfig,
    ) -> Result<StructuredOutput, ProviderError> {
        self.step().await?;
        let value = serde_json::from_str(&self.structured_reply)
            .map_err(|e| ProviderError::SchemaParse(e.to_string()))?;
        Ok(StructuredOutput {
            value,
            model: model.to_string(),
            cost: self.cost,
            usage: TokenUsage::default(),
        })
    }

    async fn is_available(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}

struct Harness {
    router: AiRouter,
    gemini: Arc<Scripted>,
    ollama: Arc<Scripted>,
    openrouter: Arc<Scripted>,
}

fn harness_with(gemini: Arc<Scripted>, ollama: Arc<Scripted>, openrouter: Arc<Scripted>) -> Harness {
    let providers: Vec<Arc<dyn AiProvider>> = vec![gemini.clone(), ollama.clone(), openrouter.clone()];
    Harness {
        router: AiRouter::new(providers, RouterSettings::default()),
        gemini,
        ollama,
        openrouter,
    }
}

fn harness() -> Harness {
    harness_with(
        Scripted::new(ProviderId::Gemini),
        Scripted::new(ProviderId::Ollama),
        Scripted::new(ProviderId::OpenRouter),
    )
}

fn cfg() -> GenerationConfig {
    GenerationConfig::default()
}

#[tokio::test(start_paused = true)]
async fn test_healthy_primary_serves_without_fallback() {
    let h = harness();
    let result = h.router.generate_content("How was my pitch?", &cfg()).await.unwrap();

    assert_eq!(result.provider, ProviderId::Gemini);
    assert_eq!(result.text, "gemini: How was my pitch?");
    assert_eq!(result.model, "gemini-2.0-flash");
    assert!(!result.fallback_used);
    assert_eq!(result.attempted_providers, vec![ProviderId::Gemini]);
    assert_eq!(h.ollama.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_open_the_circuit() {
    let h = harness();
    h.gemini.set_failing(true);

    for _ in 0..3 {
        let result = h.router.generate_content("hi", &cfg()).await.unwrap();
        assert_eq!(result.provider, ProviderId::Ollama);
        assert!(result.fallback_used);
        assert_eq!(result.attempted_providers, vec![ProviderId::Gemini, ProviderId::Ollama]);
    }
    assert_eq!(h.gemini.calls(), 3);

    // Gemini is skipped entirely while open
    assert_eq!(h.router.provider_priority(), vec![ProviderId::Ollama, ProviderId::OpenRouter]);
    let result = h.router.generate_content("hi", &cfg()).await.unwrap();
    assert_eq!(result.provider, ProviderId::Ollama);
    assert!(!result.fallback_used);
    assert_eq!(result.attempted_providers, vec![ProviderId::Ollama]);
    assert_eq!(h.gemini.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_recloses_after_reset_timeout() {
    let h = harness();
    h.gemini.set_failing(true);
    for _ in 0..3 {
        h.router.generate_content("hi", &cfg()).await.unwrap();
    }
    assert!(!h.router.provider_priority().contains(&ProviderId::Gemini));

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(!h.router.provider_priority().contains(&ProviderId::Gemini));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(h.router.provider_priority().first(), Some(&ProviderId::Gemini));

    h.gemini.set_failing(false);
    let result = h.router.generate_content("hi", &cfg()).await.unwrap();
    assert_eq!(result.provider, ProviderId::Gemini);
    assert!(!result.fallback_used);
}

#[tokio::test(start_paused = true)]
async fn test_all_providers_failing() {
    let h = harness();
    h.gemini.set_failing(true);
    h.ollama.set_failing(true);
    h.openrouter.set_failing(true);

    let err = h.router.generate_content("hi", &cfg()).await.unwrap_err();
    match &err {
        RouterError::AllProvidersExhausted { attempted, last_error } => {
            assert_eq!(attempted, &ProviderId::ALL.to_vec());
            assert!(last_error.contains("openrouter unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        "All AI providers failed (attempted: gemini -> ollama -> openrouter): Upstream error (503): openrouter unavailable"
    );

    // Every attempt counted exactly once
    let status = h.router.status();
    for p in &status.providers {
        assert_eq!(p.health.consecutive_failures, 1, "{}", p.provider);
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_quota_demotes_gemini() {
    let h = harness();
    for _ in 0..15 {
        let result = h.router.generate_content("hi", &cfg()).await.unwrap();
        assert_eq!(result.provider, ProviderId::Gemini);
    }

    assert_eq!(
        h.router.provider_priority(),
        vec![ProviderId::Ollama, ProviderId::OpenRouter, ProviderId::Gemini]
    );
    let result = h.router.generate_content("hi", &cfg()).await.unwrap();
    assert_eq!(result.provider, ProviderId::Ollama);
    assert!(!result.fallback_used);

    // The minute window rolls over
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(h.router.provider_priority().first(), Some(&ProviderId::Gemini));
}

#[tokio::test(start_paused = true)]
async fn test_over_quota_gemini_is_last_resort() {
    let h = harness();
    for _ in 0..15 {
        h.router.generate_content("hi", &cfg()).await.unwrap();
    }
    h.ollama.set_failing(true);
    h.openrouter.set_failing(true);

    let result = h.router.generate_content("hi", &cfg()).await.unwrap();
    assert_eq!(result.provider, ProviderId::Gemini);
    assert!(result.fallback_used);
    assert_eq!(
        result.attempted_providers,
        vec![ProviderId::Ollama, ProviderId::OpenRouter, ProviderId::Gemini]
    );
}

#[tokio::test(start_paused = true)]
async fn test_structured_parse_failure_fails_over() {
    let gemini = Scripted::with(ProviderId::Gemini, |s| s.structured_reply = "Sure! Here is".into());
    let h = harness_with(gemini, Scripted::new(ProviderId::Ollama), Scripted::new(ProviderId::OpenRouter));

    let schema = json!({"type": "object", "properties": {"score": {"type": "integer"}}});
    let result = h
        .router
        .generate_structured_content("Rate my delivery", &schema, &cfg())
        .await
        .unwrap();

    assert_eq!(result.provider, ProviderId::Ollama);
    assert_eq!(result.value, json!({"score": 8}));
    assert!(result.fallback_used);

    let gemini = &h.router.status().providers[0];
    assert_eq!(gemini.health.consecutive_failures, 1);
    assert!(gemini
        .health
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("Structured output is not valid JSON"));
}

#[tokio::test(start_paused = true)]
async fn test_model_hint_only_reaches_matching_provider() {
    let h = harness();
    h.gemini.set_failing(true);
    let config = GenerationConfig {
        model: Some("gemini-1.5-pro".into()),
        ..Default::default()
    };
    let result = h.router.generate_content("hi", &config).await.unwrap();
    assert_eq!(result.provider, ProviderId::Ollama);
    assert_eq!(result.model, "llama3.1:8b");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_failover() {
    let gemini = Scripted::with(ProviderId::Gemini, |s| s.delay = Some(Duration::from_secs(10)));
    let h = harness_with(gemini, Scripted::new(ProviderId::Ollama), Scripted::new(ProviderId::OpenRouter));

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        h.router.generate_content("hi", &cfg()),
    )
    .await;
    assert!(outcome.is_err());

    assert_eq!(h.gemini.calls(), 1);
    assert_eq!(h.ollama.calls(), 0);
    // An abandoned call is neither a success nor a failure
    let status = h.router.status();
    assert_eq!(status.providers[0].health.consecutive_failures, 0);
    assert_eq!(status.rate_limit.per_minute, 0);
    assert_eq!(status.costs[0].request_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_metered_cost_is_ledgered() {
    let openrouter = Scripted::with(ProviderId::OpenRouter, |s| s.cost = 0.0025);
    let h = harness_with(Scripted::new(ProviderId::Gemini), Scripted::new(ProviderId::Ollama), openrouter);
    h.gemini.set_failing(true);
    h.ollama.set_failing(true);

    for _ in 0..2 {
        let result = h.router.generate_content("hi", &cfg()).await.unwrap();
        assert_eq!(result.provider, ProviderId::OpenRouter);
        assert!((result.cost - 0.0025).abs() < 1e-12);
    }

    let status = h.router.status();
    let openrouter = &status.costs[2];
    assert_eq!(openrouter.provider, ProviderId::OpenRouter);
    assert_eq!(openrouter.request_count, 2);
    assert!((status.total_cost_usd - 0.005).abs() < 1e-12);
    assert_eq!(status.costs[0].request_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_is_read_only() {
    let h = harness();
    h.gemini.set_failing(true);
    for _ in 0..3 {
        h.router.generate_content("hi", &cfg()).await.unwrap();
    }
    tokio::time::advance(Duration::from_secs(61)).await;

    let first = h.router.status();
    let second = h.router.status();
    assert_eq!(first, second);
    // Status shows the circuit as it would read now
    assert!(first.providers[0].health.healthy);
    assert_eq!(first.priority, ProviderId::ALL.to_vec());
    assert_eq!(first.rate_limit.per_minute_limit, 15);

    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["providers"][0]["provider"], "gemini");
    assert!(json["providers"][0].get("consecutiveFailures").is_some());
    assert_eq!(json["rateLimit"]["perDayLimit"], 1500);
}

#[tokio::test(start_paused = true)]
async fn test_reset_restores_fresh_state() {
    let h = harness();
    h.gemini.set_failing(true);
    for _ in 0..3 {
        h.router.generate_content("hi", &cfg()).await.unwrap();
    }
    h.router.reset();

    let status = h.router.status();
    assert!(status.providers.iter().all(|p| p.health.healthy && p.health.consecutive_failures == 0));
    assert_eq!(status.total_cost_usd, 0.0);
    assert!(status.costs.iter().all(|c| c.request_count == 0));
    assert_eq!(status.rate_limit.per_minute, 0);
    assert_eq!(status.priority, ProviderId::ALL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_state() {
    let h = harness();
    let requests = (0..10).map(|i| {
        let router = &h.router;
        async move { router.generate_content(format!("request {i}"), &cfg()).await }
    });
    let results = futures::future::join_all(requests).await;

    assert!(results.iter().all(|r| r.is_ok()));
    let status = h.router.status();
    let served: u64 = status.costs.iter().map(|c| c.request_count).sum();
    assert_eq!(served, 10);
    assert_eq!(status.rate_limit.per_minute, status.costs[0].request_count as usize);
}

#[tokio::test(start_paused = true)]
async fn test_custom_settings() {
    let gemini = Scripted::new(ProviderId::Gemini);
    let ollama = Scripted::new(ProviderId::Ollama);
    let providers: Vec<Arc<dyn AiProvider>> = vec![gemini.clone(), ollama.clone()];
    let router = AiRouter::new(
        providers,
        RouterSettings {
            health: HealthSettings {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(5),
            },
            rate: RateLimits {
                per_minute: 1,
                ..RateLimits::default()
            },
        },
    );

    router.generate_content("one", &cfg()).await.unwrap();
    assert_eq!(router.provider_priority(), vec![ProviderId::Ollama, ProviderId::Gemini]);

    ollama.set_failing(true);
    let result = router.generate_content("two", &cfg()).await.unwrap();
    assert_eq!(result.provider, ProviderId::Gemini);
    assert_eq!(router.provider_priority(), vec![ProviderId::Gemini]);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(router.provider_priority(), vec![ProviderId::Ollama, ProviderId::Gemini]);
}

#[tokio::test(start_paused = true)]
async fn test_messages_prompt_passes_through() {
    let h = harness();
    let prompt = Prompt::Messages(vec![
        commcoach_core::Message::user("Here is my speech"),
        commcoach_core::Message::assistant("Go ahead"),
        commcoach_core::Message::user("..."),
    ]);
    let result = h.router.generate_content(prompt, &cfg()).await.unwrap();
    assert_eq!(result.text, "gemini: 3 turns");
}

#[tokio::test(start_paused = true)]
async fn test_check_availability_reports_each_provider() {
    let h = harness();
    h.ollama.set_failing(true);
    let probes = h.router.check_availability().await;
    assert_eq!(probes.len(), 3);
    assert_eq!(probes[&ProviderId::Gemini], true);
    assert_eq!(probes[&ProviderId::Ollama], false);
    assert_eq!(h.router.status().providers[1].health.consecutive_failures, 0);
}

#[tokio::test]
async fn test_gemini_key_stays_out_of_errors_and_status() {
    let gemini = GeminiProvider::new(
        "SECRET-GEMINI-KEY".into(),
        Some("http://127.0.0.1:9".into()),
        "gemini-2.0-flash".into(),
        Duration::from_secs(5),
    );
    let router = AiRouter::new(vec![Arc::new(gemini)], RouterSettings::default());

    let err = router.generate_content("hi", &cfg()).await.unwrap_err();
    assert!(err.to_string().starts_with("All AI providers failed (attempted: gemini): Transport error"));
    assert!(!err.to_string().contains("SECRET-GEMINI-KEY"), "{err}");

    let status = serde_json::to_string(&router.status()).unwrap();
    assert!(status.contains("Transport error"));
    assert!(!status.contains("SECRET-GEMINI-KEY"), "{status}");
}
