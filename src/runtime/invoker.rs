use chrono::Duration as ChronoDuration;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::constants::{
    DEFAULT_KEY_COOLDOWN_SECS, DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_ROTATION_DELAY_MS,
};
use crate::credentials::CredentialStore;
use crate::models::{Model, ModelRequest, ModelResponse, ProviderError};
use crate::utils::{PaiError, PaiResult};

/// Backoff schedule for transient provider failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Calls made against one key before giving up, first call included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Add up to a quarter of the delay at random
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            multiplier: 2.0,
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(32) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        let mut delay = Duration::from_millis(millis as u64);
        if self.jitter {
            let spread = delay.as_millis() as u64 / 4;
            if spread > 0 {
                delay += Duration::from_millis(rand::thread_rng().gen_range(0..=spread));
            }
        }
        delay
    }
}

/// Judges whether a planner answer is good enough to stop retrying
#[cfg_attr(test, automock)]
pub trait CompletionOracle: Send + Sync {
    fn is_complete(&self, request: &ModelRequest, content: &str) -> bool;
}

/// Accepts any answer with visible text
#[derive(Debug, Default, Clone, Copy)]
pub struct NonEmptyOracle;

impl CompletionOracle for NonEmptyOracle {
    fn is_complete(&self, _request: &ModelRequest, content: &str) -> bool {
        !content.trim().is_empty()
    }
}

/// One planner call with credential rotation and backoff
pub struct ResilientInvoker {
    model: Arc<dyn Model>,
    store: Arc<CredentialStore>,
    policy: RetryPolicy,
    oracle: Option<Arc<dyn CompletionOracle>>,
    rotation_delay: Duration,
    cooldown: ChronoDuration,
}

impl ResilientInvoker {
    pub fn new(model: Arc<dyn Model>, store: Arc<CredentialStore>) -> Self {
        Self {
            model,
            store,
            policy: RetryPolicy::default(),
            oracle: None,
            rotation_delay: Duration::from_millis(DEFAULT_ROTATION_DELAY_MS),
            cooldown: ChronoDuration::seconds(DEFAULT_KEY_COOLDOWN_SECS),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn CompletionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_rotation_delay(mut self, delay: Duration) -> Self {
        self.rotation_delay = delay;
        self
    }

    pub fn with_cooldown(mut self, cooldown: ChronoDuration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    fn exhausted(&self) -> PaiError {
        if self.store.enabled_count() == 0 {
            return PaiError::NoCredentials;
        }
        let wait_secs = self
            .store
            .min_remaining_cooldown()
            .map_or(1, |d| d.num_seconds().max(1));
        PaiError::AllCredentialsExhausted { wait_secs }
    }

    /// Persisted stores take a cross-process file lock that may wait; run
    /// those calls on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> PaiResult<T>
    where
        F: FnOnce(&CredentialStore) -> PaiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| PaiError::Config(format!("Credential store task failed: {}", e)))?
    }

    fn accepts(&self, request: &ModelRequest, response: &ModelResponse) -> bool {
        match &self.oracle {
            Some(oracle) => oracle.is_complete(request, &response.content),
            None => true,
        }
    }

    /// Send `request`, rotating keys on rate limits and backing off on
    /// transient failures. Fatal errors surface on the first occurrence.
    #[instrument(skip_all, fields(prompt_len = request.prompt.len()))]
    pub async fn invoke(&self, request: &ModelRequest) -> PaiResult<ModelResponse> {
        let max_attempts = self.policy.max_attempts.max(1);
        let max_rotations = self.store.enabled_count().max(1);

        let mut current: Option<(String, String)> = None;
        let mut attempts = 0u32;
        let mut rotations = 0usize;
        let mut prior: Option<ModelResponse> = None;

        loop {
            let (key_id, secret) = match current.take() {
                Some(key) => key,
                None => match self.with_store(|store| store.get_next_available_key()).await? {
                    Some(key) => key,
                    None => return prior.ok_or_else(|| self.exhausted()),
                },
            };

            debug!(key = %key_id, attempt = attempts, "calling planner");
            let failure = match self.model.generate(&secret, request).await {
                Ok(response) if self.accepts(request, &response) => return Ok(response),
                Ok(response) => {
                    debug!(key = %key_id, "answer judged incomplete");
                    prior = Some(response);
                    ProviderError::Transient("incomplete answer".to_string())
                }
                Err(error) => error,
            };

            match failure {
                ProviderError::RateLimited(message) => {
                    warn!(key = %key_id, %message, "rate limited, rotating credential");
                    let (id, cooldown) = (key_id.clone(), self.cooldown);
                    self.with_store(move |store| store.blacklist(&id, Some(cooldown)))
                        .await?;
                    rotations += 1;
                    if rotations >= max_rotations {
                        return prior.ok_or_else(|| self.exhausted());
                    }
                    tokio::time::sleep(self.rotation_delay).await;
                }
                ProviderError::Transient(message) => {
                    attempts += 1;
                    if attempts >= max_attempts {
                        warn!(key = %key_id, %message, attempts, "giving up after transient failures");
                        return prior.ok_or(PaiError::Provider(message));
                    }
                    let delay = self.policy.delay_for(attempts - 1);
                    debug!(key = %key_id, %message, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    current = Some((key_id, secret));
                }
                fatal @ (ProviderError::Auth(_) | ProviderError::Fatal(_)) => {
                    return Err(PaiError::Provider(fatal.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MockModel;
    use mockall::Sequence;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
            jitter: false,
        }
    }

    fn response(content: &str) -> ModelResponse {
        ModelResponse {
            content: content.to_string(),
            usage: None,
            model_name: "mock".to_string(),
        }
    }

    fn store_with(keys: &[(&str, &str)]) -> Arc<CredentialStore> {
        let store = CredentialStore::in_memory();
        for (id, secret) in keys {
            store.add_key(id, secret, None).unwrap();
        }
        Arc::new(store)
    }

    fn invoker(model: MockModel, store: Arc<CredentialStore>, attempts: u32) -> ResilientInvoker {
        ResilientInvoker::new(Arc::new(model), store)
            .with_policy(quick_policy(attempts))
            .with_rotation_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = quick_policy(3);
        assert_eq!(policy.delay_for(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for(5), Duration::from_millis(4));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(400),
            ..RetryPolicy::default()
        };
        for _ in 0..20 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn test_success_on_first_call() {
        let mut model = MockModel::new();
        model
            .expect_generate()
            .withf(|key, _| key == "secret-a")
            .times(1)
            .returning(|_, _| Ok(response("LIST_PATHS::.")));

        let store = store_with(&[("a", "secret-a")]);
        let result = invoker(model, store, 3).invoke(&ModelRequest::new("hi")).await.unwrap();
        assert_eq!(result.content, "LIST_PATHS::.");
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_and_blacklists() {
        let mut model = MockModel::new();
        let mut seq = Sequence::new();
        model
            .expect_generate()
            .withf(|key, _| key == "secret-a")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::RateLimited("quota".to_string())));
        model
            .expect_generate()
            .withf(|key, _| key == "secret-b")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response("ok")));

        let store = store_with(&[("a", "secret-a"), ("b", "secret-b")]);
        let result = invoker(model, store.clone(), 3)
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(result.content, "ok");

        let listed = store.list();
        let a = listed.iter().find(|k| k.id == "a").unwrap();
        assert!(a.cooldown_secs.is_some());
        assert!(store.min_remaining_cooldown().is_some());
    }

    #[tokio::test]
    async fn test_all_keys_rate_limited_is_exhausted() {
        let mut model = MockModel::new();
        model
            .expect_generate()
            .times(2)
            .returning(|_, _| Err(ProviderError::RateLimited("429".to_string())));

        let store = store_with(&[("a", "secret-a"), ("b", "secret-b")]);
        let err = invoker(model, store, 3)
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap_err();
        match err {
            PaiError::AllCredentialsExhausted { wait_secs } => assert!(wait_secs > 0),
            other => panic!("Expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_keys_is_reported_without_calling() {
        let mut model = MockModel::new();
        model.expect_generate().never();

        let err = invoker(model, Arc::new(CredentialStore::in_memory()), 3)
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaiError::NoCredentials));
    }

    #[tokio::test]
    async fn test_all_keys_disabled_is_no_credentials() {
        let mut model = MockModel::new();
        model.expect_generate().never();

        let store = store_with(&[("a", "secret-a")]);
        store.set_enabled("a", false).unwrap();
        let err = invoker(model, store, 3)
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaiError::NoCredentials));
        assert!(!err.to_string().contains("0 seconds"));
    }

    #[tokio::test]
    async fn test_locked_credential_file_does_not_stall_the_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::open(&path).unwrap();
        store.add_key("primary", "secret", None).unwrap();
        // Another process holds the lock
        let lock = dir.path().join("credentials.json.lock");
        std::fs::write(&lock, "4242").unwrap();

        let mut model = MockModel::new();
        model
            .expect_generate()
            .times(1)
            .returning(|_, _| Ok(response("done")));
        let invoker = invoker(model, Arc::new(store), 3);

        // Single-threaded runtime: this only runs if invoke yields while waiting
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::remove_file(&lock).unwrap();
        });
        let answer = invoker.invoke(&ModelRequest::new("hi")).await.unwrap();
        release.await.unwrap();
        assert_eq!(answer.content, "done");
    }

    #[tokio::test]
    async fn test_transient_retries_same_key() {
        let mut model = MockModel::new();
        let mut seq = Sequence::new();
        model
            .expect_generate()
            .withf(|key, _| key == "secret-a")
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::Transient("503".to_string())));
        model
            .expect_generate()
            .withf(|key, _| key == "secret-a")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response("done")));

        let store = store_with(&[("a", "secret-a"), ("b", "secret-b")]);
        let result = invoker(model, store, 3).invoke(&ModelRequest::new("hi")).await.unwrap();
        assert_eq!(result.content, "done");
    }

    #[tokio::test]
    async fn test_transient_gives_up_after_max_attempts() {
        let mut model = MockModel::new();
        model
            .expect_generate()
            .times(2)
            .returning(|_, _| Err(ProviderError::Transient("timeout".to_string())));

        let store = store_with(&[("a", "secret-a")]);
        let err = invoker(model, store, 2)
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaiError::Provider(msg) if msg == "timeout"));
    }

    #[tokio::test]
    async fn test_fatal_error_surfaces_immediately() {
        let mut model = MockModel::new();
        model
            .expect_generate()
            .times(1)
            .returning(|_, _| Err(ProviderError::Auth("bad key".to_string())));

        let store = store_with(&[("a", "secret-a"), ("b", "secret-b")]);
        let err = invoker(model, store, 5)
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaiError::Provider(_)));
    }

    #[tokio::test]
    async fn test_oracle_retries_incomplete_then_accepts() {
        let mut model = MockModel::new();
        let mut seq = Sequence::new();
        model
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response("")));
        model
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response("FINISH::done")));

        let store = store_with(&[("a", "secret-a")]);
        let result = invoker(model, store, 3)
            .with_oracle(Arc::new(NonEmptyOracle))
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(result.content, "FINISH::done");
    }

    #[tokio::test]
    async fn test_prior_answer_returned_when_retries_run_out() {
        let mut model = MockModel::new();
        let mut seq = Sequence::new();
        model
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response("partial plan")));
        model
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::Transient("503".to_string())));

        let mut oracle = MockCompletionOracle::new();
        oracle.expect_is_complete().returning(|_, _| false);

        let store = store_with(&[("a", "secret-a")]);
        let result = invoker(model, store, 2)
            .with_oracle(Arc::new(oracle))
            .invoke(&ModelRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(result.content, "partial plan");
    }
}
