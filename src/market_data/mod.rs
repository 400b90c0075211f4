// Market data module entrypoint
pub mod adapters;   // provider-specific fetchers (DexScreener, Jupiter)
pub mod normaliser; // decimal parsing, guarded rates, address keys
pub mod router;     // runs one aggregation cycle across all adapters
pub mod delta;      // volatile-price selection + publication
