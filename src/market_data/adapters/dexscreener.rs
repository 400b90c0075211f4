// DexScreener adapter: pair search, the primary market-data source.

use std::sync::Arc;

use super::dexscreener_types::{Pair, SearchResponse};
use super::http::HttpFetcher;
use super::{FetchError, SourceAdapter};
use crate::clock::Clock;
use crate::engine::types::{QuoteEntry, RawPayload, SourceId};
use crate::market_data::normaliser::parse_decimal;

pub const DEFAULT_URL: &str = "https://api.dexscreener.com/latest/dex/search?q=solana";

pub struct DexScreenerAdapter {
    source: SourceId,
    url: String,
    http: HttpFetcher,
    clock: Arc<dyn Clock>,
}

impl DexScreenerAdapter {
    pub fn new(source: SourceId, url: impl Into<String>, http: HttpFetcher, clock: Arc<dyn Clock>) -> Self {
        Self { source, url: url.into(), http, clock }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for DexScreenerAdapter {
    fn source(&self) -> &SourceId {
        &self.source
    }

    async fn fetch(&self) -> Result<RawPayload, FetchError> {
        let resp: SearchResponse = self.http.get_json(&self.source, &self.url).await?;
        let entries = entries_from_response(resp);
        Ok(RawPayload::new(self.source.clone(), self.clock.now_ms(), entries))
    }
}

/// Map the search response into provider-agnostic entries.
pub fn entries_from_response(resp: SearchResponse) -> Vec<QuoteEntry> {
    resp.pairs.unwrap_or_default().into_iter().map(entry_from_pair).collect()
}

fn entry_from_pair(pair: Pair) -> QuoteEntry {
    let base = pair.base_token.unwrap_or_default();
    let txns_24h = pair
        .txns
        .and_then(|t| t.h24)
        .and_then(|c| match (c.buys, c.sells) {
            (None, None) => None,
            (b, s) => Some(b.unwrap_or(0).saturating_add(s.unwrap_or(0))),
        });
    let change = pair.price_change.unwrap_or_default();

    QuoteEntry {
        address: base.address,
        name: base.name,
        ticker: base.symbol,
        price_usd: pair.price_usd.as_deref().and_then(parse_decimal),
        price_native: pair.price_native.as_deref().and_then(parse_decimal),
        fdv_usd: pair.fdv,
        volume_usd_24h: pair.volume.and_then(|v| v.h24),
        liquidity_usd: pair.liquidity.and_then(|l| l.usd),
        txns_24h,
        price_change_1h: change.h1,
        price_change_24h: change.h24,
        // not offered by this endpoint
        price_change_7d: None,
        venue: pair.dex_id,
        chain_id: pair.chain_id,
        logo_url: pair.info.and_then(|i| i.image_url),
    }
}
