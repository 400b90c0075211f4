//! Multi-source reconciliation.
//!
//! One primary payload is authoritative for market fields; secondary payloads
//! only enrich records the primary already produced, or contribute minimal
//! low-confidence records for assets the primary never listed.
//!
//! Ordering contract: the output is sorted by `volume_usd` descending with a
//! stable sort, so equal volumes keep registry insertion order (primary
//! entries first, in payload order, then secondary-only inserts).

use ahash::AHashMap;
use tracing::debug;

use crate::engine::types::{AssetRecord, QuoteEntry, RawPayload, Snapshot, SourceId, Sources};
use crate::market_data::normaliser::{
    finite_or_zero, median, non_negative, normalize_address, to_native, usable_price,
    usd_per_native,
};

/// Per-cycle parameters the merge cannot learn from the payloads.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub generation: u64,
    pub now_ms: u64,
    /// Chain assigned to records that arrive without one.
    pub default_chain_id: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub primary_records: usize,
    pub primary_replaced: usize,
    pub enriched: usize,
    pub secondary_only: usize,
    pub dropped: usize,
}

/// Insertion-ordered registry keyed by normalized address.
struct Registry {
    index: AHashMap<String, usize>,
    records: Vec<AssetRecord>,
}

impl Registry {
    fn with_capacity(n: usize) -> Self {
        Self { index: AHashMap::with_capacity(n), records: Vec::with_capacity(n) }
    }

    fn get_mut(&mut self, address: &str) -> Option<&mut AssetRecord> {
        let slot = *self.index.get(address)?;
        self.records.get_mut(slot)
    }

    /// Insert, or overwrite in place keeping the original slot.
    /// Returns true if an existing record was replaced.
    fn upsert(&mut self, record: AssetRecord) -> bool {
        match self.index.get(&record.address) {
            Some(&slot) => {
                self.records[slot] = record;
                true
            }
            None => {
                self.index.insert(record.address.clone(), self.records.len());
                self.records.push(record);
                false
            }
        }
    }
}

/// Reconcile `primary` with `secondaries` into one snapshot.
pub fn merge(primary: &RawPayload, secondaries: &[RawPayload], ctx: &MergeContext) -> Snapshot {
    let (snapshot, stats) = merge_with_stats(primary, secondaries, ctx);
    debug!(
        generation = ctx.generation,
        records = snapshot.len(),
        primary = stats.primary_records,
        replaced = stats.primary_replaced,
        enriched = stats.enriched,
        secondary_only = stats.secondary_only,
        dropped = stats.dropped,
        "merge complete"
    );
    snapshot
}

pub fn merge_with_stats(
    primary: &RawPayload,
    secondaries: &[RawPayload],
    ctx: &MergeContext,
) -> (Snapshot, MergeStats) {
    let mut stats = MergeStats::default();
    let mut registry = Registry::with_capacity(primary.entries.len());
    let mut native_rates = Vec::with_capacity(primary.entries.len());

    // Step 1: primary is authoritative.
    for entry in &primary.entries {
        let Some(address) = entry.address.as_deref().and_then(normalize_address) else {
            stats.dropped += 1;
            continue;
        };
        let (record, rate) = primary_record(entry, address, &primary.source, ctx);
        if let Some(rate) = rate {
            native_rates.push(rate);
        }
        if registry.upsert(record) {
            stats.primary_replaced += 1;
        } else {
            stats.primary_records += 1;
        }
    }

    let reference_rate = median(&mut native_rates);

    // Step 2: secondaries enrich, or add low-confidence records.
    for payload in secondaries {
        for entry in &payload.entries {
            let Some(address) = entry.address.as_deref().and_then(normalize_address) else {
                stats.dropped += 1;
                continue;
            };
            if let Some(existing) = registry.get_mut(&address) {
                enrich(existing, entry, &payload.source);
                stats.enriched += 1;
            } else if let Some(price_usd) = usable_price(entry.price_usd) {
                registry.upsert(secondary_record(
                    entry,
                    address,
                    price_usd,
                    reference_rate,
                    &payload.source,
                    ctx,
                ));
                stats.secondary_only += 1;
            }
        }
    }

    // Step 3: stable sort keeps insertion order on ties.
    let mut records = registry.records;
    records.sort_by(|a, b| b.volume_usd.total_cmp(&a.volume_usd));

    let sources = std::iter::once(primary)
        .chain(secondaries.iter())
        .filter(|p| !p.entries.is_empty())
        .map(|p| p.source.clone())
        .collect();

    let snapshot = Snapshot { generation: ctx.generation, created_at: ctx.now_ms, sources, records };
    (snapshot, stats)
}

/// Build a full record from a primary entry. Also returns the implied
/// USD-per-native rate when the entry carries both prices.
fn primary_record(
    entry: &QuoteEntry,
    address: String,
    source: &SourceId,
    ctx: &MergeContext,
) -> (AssetRecord, Option<f64>) {
    let price_usd = non_negative(entry.price_usd.unwrap_or(0.0));
    let price_native = non_negative(entry.price_native.unwrap_or(0.0));
    let rate = usd_per_native(price_usd, entry.price_native);

    let implied = match (usable_price(Some(price_usd)), usable_price(Some(price_native))) {
        (Some(_), Some(_)) => Some(rate),
        _ => None,
    };

    let record = AssetRecord {
        name: entry.name.clone().unwrap_or_else(|| "Unknown".to_string()),
        ticker: entry.ticker.clone().unwrap_or_else(|| "?".to_string()),
        price_usd,
        price_native,
        market_cap_native: to_native(entry.fdv_usd, rate),
        volume_usd: non_negative(entry.volume_usd_24h.unwrap_or(0.0)),
        volume_native: to_native(entry.volume_usd_24h, rate),
        liquidity_native: to_native(entry.liquidity_usd, rate),
        transaction_count: entry.txns_24h.unwrap_or(0),
        price_change_1h: finite_or_zero(entry.price_change_1h),
        price_change_24h: finite_or_zero(entry.price_change_24h),
        price_change_7d: finite_or_zero(entry.price_change_7d),
        venue: entry.venue.clone().unwrap_or_else(|| source.to_string()),
        chain_id: entry.chain_id.clone().unwrap_or_else(|| ctx.default_chain_id.clone()),
        last_updated: ctx.now_ms,
        logo_url: entry.logo_url.clone(),
        sources: Sources::from_elem(source.clone(), 1),
        address,
    };
    (record, implied)
}

/// Secondary data never touches market fields.
fn enrich(record: &mut AssetRecord, entry: &QuoteEntry, source: &SourceId) {
    if record.logo_url.is_none() {
        record.logo_url = entry.logo_url.clone();
    }
    record.add_source(source);
}

fn secondary_record(
    entry: &QuoteEntry,
    address: String,
    price_usd: f64,
    reference_rate: Option<f64>,
    source: &SourceId,
    ctx: &MergeContext,
) -> AssetRecord {
    let price_native = match (usable_price(entry.price_native), reference_rate) {
        (Some(native), _) => native,
        (None, Some(rate)) => non_negative(price_usd / rate),
        (None, None) => 0.0,
    };
    AssetRecord {
        name: entry.name.clone().unwrap_or_else(|| "Unknown".to_string()),
        ticker: entry.ticker.clone().unwrap_or_else(|| "?".to_string()),
        price_usd,
        price_native,
        market_cap_native: 0.0,
        volume_usd: 0.0,
        volume_native: 0.0,
        liquidity_native: 0.0,
        transaction_count: 0,
        price_change_1h: 0.0,
        price_change_24h: 0.0,
        price_change_7d: 0.0,
        venue: source.to_string(),
        chain_id: entry.chain_id.clone().unwrap_or_else(|| ctx.default_chain_id.clone()),
        last_updated: ctx.now_ms,
        logo_url: entry.logo_url.clone(),
        sources: Sources::from_elem(source.clone(), 1),
        address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEX: &str = "DexScreener";
    const JUP: &str = "Jupiter";

    fn ctx() -> MergeContext {
        MergeContext { generation: 1, now_ms: 1_700_000_000_000, default_chain_id: "solana".into() }
    }

    fn pair(addr: &str, usd: f64, native: f64, volume: f64) -> QuoteEntry {
        QuoteEntry {
            address: Some(addr.to_string()),
            name: Some(format!("{addr} token")),
            ticker: Some(addr.to_string()),
            price_usd: Some(usd),
            price_native: Some(native),
            volume_usd_24h: Some(volume),
            venue: Some("raydium".into()),
            chain_id: Some("solana".into()),
            ..Default::default()
        }
    }

    fn listing(addr: &str, logo: Option<&str>, price: Option<f64>) -> QuoteEntry {
        QuoteEntry {
            address: Some(addr.to_string()),
            name: Some(format!("{addr} listing")),
            ticker: Some(addr.to_string()),
            price_usd: price,
            logo_url: logo.map(str::to_string),
            ..Default::default()
        }
    }

    fn payload(source: &str, entries: Vec<QuoteEntry>) -> RawPayload {
        RawPayload::new(source.into(), 0, entries)
    }

    #[test]
    fn test_primary_wins_secondary_enriches() {
        let primary = payload(DEX, vec![pair("A", 1.00, 0.01, 1000.0)]);
        let secondary = payload(JUP, vec![listing("A", Some("x.png"), Some(9.99))]);

        let snap = merge(&primary, &[secondary], &ctx());

        assert_eq!(snap.len(), 1);
        let a = snap.get("A").unwrap();
        assert_eq!(a.price_usd, 1.00);
        assert_eq!(a.price_native, 0.01);
        assert_eq!(a.logo_url.as_deref(), Some("x.png"));
        assert_eq!(a.sources.as_slice(), &[SourceId::from(DEX), SourceId::from(JUP)]);
    }

    #[test]
    fn test_existing_logo_is_kept() {
        let mut p = pair("A", 1.0, 0.01, 10.0);
        p.logo_url = Some("primary.png".into());
        let snap = merge(
            &payload(DEX, vec![p]),
            &[payload(JUP, vec![listing("A", Some("x.png"), None)])],
            &ctx(),
        );
        assert_eq!(snap.records[0].logo_url.as_deref(), Some("primary.png"));
    }

    #[test]
    fn test_derived_fields_use_native_rate() {
        // 1 native = 100 USD
        let mut p = pair("A", 1.0, 0.01, 1000.0);
        p.fdv_usd = Some(50_000.0);
        p.liquidity_usd = Some(2_000.0);
        p.txns_24h = Some(42);
        let snap = merge(&payload(DEX, vec![p]), &[], &ctx());
        let a = &snap.records[0];
        assert_eq!(a.volume_usd, 1000.0);
        assert_eq!(a.volume_native, 10.0);
        assert_eq!(a.market_cap_native, 500.0);
        assert_eq!(a.liquidity_native, 20.0);
        assert_eq!(a.transaction_count, 42);
    }

    #[test]
    fn test_missing_prices_do_not_fault() {
        let entry = QuoteEntry {
            address: Some("A".into()),
            volume_usd_24h: Some(500.0),
            fdv_usd: Some(-1.0),
            ..Default::default()
        };
        let snap = merge(&payload(DEX, vec![entry]), &[], &ctx());
        let a = &snap.records[0];
        assert_eq!(a.price_usd, 0.0);
        assert_eq!(a.volume_native, 500.0);
        assert_eq!(a.market_cap_native, 0.0);
        assert_eq!(a.name, "Unknown");
        assert_eq!(a.ticker, "?");
        assert_eq!(a.venue, DEX);
    }

    #[test]
    fn test_secondary_only_record_is_low_confidence() {
        let primary = payload(DEX, vec![pair("A", 1.0, 0.01, 1000.0)]);
        let secondary = payload(JUP, vec![listing("B", Some("b.png"), Some(5.0))]);

        let snap = merge(&primary, &[secondary], &ctx());

        assert_eq!(snap.len(), 2);
        let b = snap.get("B").unwrap();
        assert_eq!(b.price_usd, 5.0);
        // reference rate from primary: 100 USD per native
        assert_eq!(b.price_native, 0.05);
        assert_eq!(b.volume_usd, 0.0);
        assert_eq!(b.liquidity_native, 0.0);
        assert_eq!(b.transaction_count, 0);
        assert_eq!(b.venue, JUP);
        assert_eq!(b.chain_id, "solana");
        assert_eq!(b.sources.as_slice(), &[SourceId::from(JUP)]);
    }

    #[test]
    fn test_secondary_without_price_is_skipped() {
        let snap = merge(
            &payload(DEX, vec![]),
            &[payload(JUP, vec![listing("B", Some("b.png"), None), listing("C", None, Some(0.0))])],
            &ctx(),
        );
        assert!(snap.is_empty());
    }

    #[test]
    fn test_secondary_only_without_primary_rate() {
        let snap =
            merge(&payload(DEX, vec![]), &[payload(JUP, vec![listing("B", None, Some(2.0))])], &ctx());
        assert_eq!(snap.records[0].price_native, 0.0);
        assert_eq!(snap.sources, vec![SourceId::from(JUP)]);
    }

    #[test]
    fn test_entries_without_address_are_dropped() {
        let mut blank = pair("A", 1.0, 0.01, 10.0);
        blank.address = Some("   ".into());
        let mut missing = pair("B", 1.0, 0.01, 10.0);
        missing.address = None;
        let (snap, stats) = merge_with_stats(
            &payload(DEX, vec![blank, missing, pair("C", 1.0, 0.01, 1.0)]),
            &[payload(JUP, vec![QuoteEntry::default()])],
            &ctx(),
        );
        assert_eq!(snap.len(), 1);
        assert_eq!(stats.dropped, 3);
    }

    #[test]
    fn test_duplicate_primary_keeps_first_slot() {
        let primary = payload(
            DEX,
            vec![pair("A", 1.0, 0.01, 100.0), pair("B", 2.0, 0.02, 100.0), pair("A", 1.5, 0.015, 100.0)],
        );
        let (snap, stats) = merge_with_stats(&primary, &[], &ctx());
        assert_eq!(stats.primary_replaced, 1);
        let order: Vec<_> = snap.records.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
        assert_eq!(snap.records[0].price_usd, 1.5);
    }

    #[test]
    fn test_sorted_by_volume_ties_keep_insertion_order() {
        let primary = payload(
            DEX,
            vec![
                pair("LOW", 1.0, 0.01, 10.0),
                pair("TIE1", 1.0, 0.01, 50.0),
                pair("HIGH", 1.0, 0.01, 90.0),
                pair("TIE2", 1.0, 0.01, 50.0),
            ],
        );
        let secondary = payload(JUP, vec![listing("S1", None, Some(1.0)), listing("S2", None, Some(1.0))]);
        let snap = merge(&primary, &[secondary], &ctx());
        let order: Vec<_> = snap.records.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(order, vec!["HIGH", "TIE1", "TIE2", "LOW", "S1", "S2"]);
    }

    #[test]
    fn test_seven_day_change_is_not_synthesized() {
        let mut p = pair("A", 1.0, 0.01, 1.0);
        p.price_change_24h = Some(10.0);
        let snap = merge(&payload(DEX, vec![p]), &[], &ctx());
        assert_eq!(snap.records[0].price_change_24h, 10.0);
        assert_eq!(snap.records[0].price_change_7d, 0.0);
    }

    #[test]
    fn test_hex_addresses_collide_case_insensitively() {
        let primary = payload(DEX, vec![pair("0xABCdef", 1.0, 0.01, 1.0)]);
        let secondary = payload(JUP, vec![listing("0xabcDEF", Some("x.png"), None)]);
        let snap = merge(&primary, &[secondary], &ctx());
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.records[0].address, "0xabcdef");
        assert_eq!(snap.records[0].sources.len(), 2);
    }

    fn arb_entry() -> impl Strategy<Value = (u8, f64, Option<f64>)> {
        (0u8..12, 0.0f64..1e6, proptest::option::of(0.0f64..100.0))
    }

    proptest! {
        #[test]
        fn prop_primary_fields_survive_and_order_holds(
            prim in proptest::collection::vec(arb_entry(), 0..30),
            sec in proptest::collection::vec(arb_entry(), 0..30),
        ) {
            let primary = payload(DEX, prim.iter()
                .map(|(a, vol, px)| pair(&format!("T{a}"), px.unwrap_or(0.0), 0.01, *vol))
                .collect());
            let secondary = payload(JUP, sec.iter()
                .map(|(a, _, px)| listing(&format!("T{a}"), Some("s.png"), *px))
                .collect());

            let snap = merge(&primary, &[secondary.clone()], &ctx());

            // ordering
            for w in snap.records.windows(2) {
                prop_assert!(w[0].volume_usd >= w[1].volume_usd);
            }
            // unique addresses
            let mut seen = std::collections::HashSet::new();
            for r in &snap.records {
                prop_assert!(seen.insert(r.address.clone()));
                prop_assert!(!r.sources.is_empty());
            }
            // primary authority: last primary entry for an address wins
            for entry in &primary.entries {
                let addr = entry.address.as_deref().unwrap();
                let last = primary.entries.iter().rev()
                    .find(|e| e.address.as_deref() == Some(addr)).unwrap();
                let rec = snap.get(addr).unwrap();
                prop_assert_eq!(rec.price_usd, non_negative(last.price_usd.unwrap()));
                prop_assert_eq!(rec.volume_usd, last.volume_usd_24h.unwrap());
                prop_assert!(rec.has_source(&DEX.into()));
            }
            // secondary-only: present once, zero market fields
            for entry in &secondary.entries {
                let addr = entry.address.as_deref().unwrap();
                let in_primary = primary.entries.iter().any(|e| e.address.as_deref() == Some(addr));
                if !in_primary && usable_price(entry.price_usd).is_some() {
                    let rec = snap.get(addr).unwrap();
                    prop_assert_eq!(rec.volume_usd, 0.0);
                    prop_assert_eq!(rec.liquidity_native, 0.0);
                    prop_assert_eq!(rec.transaction_count, 0);
                    prop_assert!(!rec.has_source(&DEX.into()));
                }
            }
        }
    }
}
