// Jupiter adapter: token search, used as the metadata (secondary) source.

use std::sync::Arc;

use super::http::HttpFetcher;
use super::jupiter_types::{SearchResponse, Token};
use super::{FetchError, SourceAdapter};
use crate::clock::Clock;
use crate::engine::types::{QuoteEntry, RawPayload, SourceId};

pub const DEFAULT_URL: &str = "https://lite-api.jup.ag/tokens/v2/search?query=SOL";

pub struct JupiterAdapter {
    source: SourceId,
    url: String,
    http: HttpFetcher,
    clock: Arc<dyn Clock>,
}

impl JupiterAdapter {
    pub fn new(source: SourceId, url: impl Into<String>, http: HttpFetcher, clock: Arc<dyn Clock>) -> Self {
        Self { source, url: url.into(), http, clock }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for JupiterAdapter {
    fn source(&self) -> &SourceId {
        &self.source
    }

    async fn fetch(&self) -> Result<RawPayload, FetchError> {
        let resp: SearchResponse = self.http.get_json(&self.source, &self.url).await?;
        let entries = resp.into_tokens().into_iter().map(entry_from_token).collect();
        Ok(RawPayload::new(self.source.clone(), self.clock.now_ms(), entries))
    }
}

pub fn entry_from_token(token: Token) -> QuoteEntry {
    QuoteEntry {
        address: token.address().map(str::to_string),
        name: token.name,
        ticker: token.symbol,
        price_usd: token.usd_price.or(token.price),
        logo_url: token.logo_uri.or(token.icon),
        ..Default::default()
    }
}
