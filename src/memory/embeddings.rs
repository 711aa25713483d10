use async_trait::async_trait;

use std::net::IpAddr;
use std::time::Duration;

/// Converts text to fixed-length vectors.
///
/// `embed` returns one slot per input text; `None` means "no embedding" for
/// that entry. An `Err` means the provider is unavailable for the whole batch.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Model tag persisted next to every vector this provider produced
    fn model(&self) -> &str;

    /// Embedding dimensions; 0 means the provider never produces vectors
    fn dimensions(&self) -> usize;

    fn is_available(&self) -> bool {
        self.dimensions() > 0
    }

    /// Embed a batch of texts into vectors
    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> anyhow::Result<Option<Vec<f32>>> {
        let mut results = self.embed(&[text]).await?;
        Ok(results.pop().flatten())
    }
}

/// Embed `texts` with a hard time bound, absorbing every failure.
///
/// Always returns exactly `texts.len()` slots. Vectors with the wrong
/// dimensionality are dropped.
pub async fn embed_bounded(
    provider: &dyn EmbeddingProvider,
    texts: &[&str],
    timeout: Duration,
) -> Vec<Option<Vec<f32>>> {
    let mut slots = vec![None; texts.len()];
    if texts.is_empty() || !provider.is_available() {
        return slots;
    }

    match tokio::time::timeout(timeout, provider.embed(texts)).await {
        Ok(Ok(vectors)) => {
            if vectors.len() != texts.len() {
                tracing::warn!(
                    provider = provider.name(),
                    expected = texts.len(),
                    got = vectors.len(),
                    "embedding batch misaligned; storing without vectors"
                );
                return slots;
            }
            let dims = provider.dimensions();
            for (slot, vector) in slots.iter_mut().zip(vectors) {
                *slot = vector.filter(|v| v.len() == dims && v.iter().all(|x| x.is_finite()));
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(provider = provider.name(), "embedding provider unavailable: {e}");
        }
        Err(_) => {
            tracing::warn!(
                provider = provider.name(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "embedding call timed out; continuing lexical-only"
            );
        }
    }
    slots
}

#[cfg(test)]
pub(crate) struct DeterministicEmbedding {
    dims: usize,
    seed: u64,
}

#[cfg(test)]
impl DeterministicEmbedding {
    pub(crate) fn new(dims: usize) -> Self {
        Self { dims, seed: 0 }
    }

    fn fnv1a64(seed: u64, bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ seed;
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn splitmix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = x;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[allow(clippy::cast_precision_loss)]
    fn u64_to_unit_f32(x: u64) -> f32 {
        const U24_MAX: f32 = ((1u32 << 24) - 1) as f32;
        let top_u24: u32 = (x >> 40) as u32;
        (top_u24 as f32 / U24_MAX) * 2.0 - 1.0
    }
}

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for DeterministicEmbedding {
    fn name(&self) -> &str {
        "deterministic_test"
    }

    fn model(&self) -> &str {
        "deterministic-v1"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for &t in texts {
            let base = Self::fnv1a64(self.seed, t.as_bytes());
            let mut v = Vec::with_capacity(self.dims);
            for i in 0..self.dims {
                let mixed = Self::splitmix64(base ^ (i as u64));
                v.push(Self::u64_to_unit_f32(mixed));
            }
            out.push(Some(v));
        }
        Ok(out)
    }
}

// ── Noop provider (keyword-only fallback) ────────────────────

pub struct NoopEmbedding;

#[async_trait]
impl EmbeddingProvider for NoopEmbedding {
    fn name(&self) -> &str {
        "none"
    }

    fn model(&self) -> &str {
        "none"
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        Ok(vec![None; texts.len()])
    }
}

// ── OpenAI-compatible embedding provider ─────────────────────

pub struct OpenAiEmbedding {
    client: reqwest::Client,
    embeddings_url: String,
    auth_header: String,
    model: String,
    dims: usize,
}

fn is_blocked_host(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.eq_ignore_ascii_case("localhost") || host.eq_ignore_ascii_case("metadata.google.internal")
    {
        return true;
    }

    match host.to_ascii_lowercase().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => {
            let seg0 = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (seg0 & 0xffc0) == 0xfe80
                || (seg0 & 0xfe00) == 0xfc00
        }
        Err(_) => false,
    }
}

/// Accepts only public `https` base URLs without credentials, query or fragment.
fn validate_custom_base_url(raw: &str, allow_http: bool) -> anyhow::Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("custom embedding base URL is empty");
    }

    let url = reqwest::Url::parse(raw)
        .map_err(|_| anyhow::anyhow!("invalid custom embedding base URL"))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        _ => anyhow::bail!("custom embedding base URL must use https"),
    }

    if !url.username().is_empty() || url.password().is_some() {
        anyhow::bail!("custom embedding base URL must not include userinfo");
    }
    if url.query().is_some() || url.fragment().is_some() {
        anyhow::bail!("custom embedding base URL must not include query or fragment");
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("custom embedding base URL missing host"))?;
    if is_blocked_host(host) {
        anyhow::bail!("custom embedding base URL host is blocked");
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

impl OpenAiEmbedding {
    pub fn new(base_url: &str, api_key: &str, model: &str, dims: usize) -> Self {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            embeddings_url: format!("{base}/v1/embeddings"),
            auth_header: format!("Bearer {api_key}"),
            model: model.to_string(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Option<Vec<f32>>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&self.embeddings_url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Embedding HTTP request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Embedding API error {status}");
        }

        let json: serde_json::Value = resp.json().await?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing 'data'"))?;

        // Entries carry their input position; missing or malformed ones stay `None`.
        let mut slots = vec![None; texts.len()];
        for (position, item) in data.iter().enumerate() {
            let index = item
                .get("index")
                .and_then(serde_json::Value::as_u64)
                .and_then(|i| usize::try_from(i).ok())
                .unwrap_or(position);
            let Some(slot) = slots.get_mut(index) else {
                continue;
            };
            let Some(embedding) = item.get("embedding").and_then(|e| e.as_array()) else {
                continue;
            };

            #[allow(clippy::cast_possible_truncation)]
            let vec: Vec<f32> = embedding
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            if !vec.is_empty() {
                *slot = Some(vec);
            }
        }

        Ok(slots)
    }
}

// ── Factory ──────────────────────────────────────────────────

pub fn create_embedding_provider(
    provider: &str,
    api_key: Option<&str>,
    model: &str,
    dims: usize,
) -> Box<dyn EmbeddingProvider> {
    match provider {
        "openai" => Box::new(OpenAiEmbedding::new(
            "https://api.openai.com",
            api_key.unwrap_or(""),
            model,
            dims,
        )),
        name if name.starts_with("custom:") => {
            let base_url = name.strip_prefix("custom:").unwrap_or("");
            match validate_custom_base_url(base_url, cfg!(test)) {
                Ok(valid) => Box::new(OpenAiEmbedding::new(
                    &valid,
                    api_key.unwrap_or(""),
                    model,
                    dims,
                )),
                Err(e) => {
                    tracing::warn!("embedding provider disabled: {e}");
                    Box::new(NoopEmbedding)
                }
            }
        }
        "none" | "" => Box::new(NoopEmbedding),
        other => {
            tracing::warn!("Unknown embedding provider '{other}', falling back to lexical-only");
            Box::new(NoopEmbedding)
        }
    }
}
