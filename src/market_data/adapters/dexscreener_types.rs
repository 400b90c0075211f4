// Source: https://api.dexscreener.com/latest/dex/search?q=<query>
// Only the fields the merge uses are modelled; everything is optional because
// the API drops keys freely (e.g. `fdv` and `liquidity` on fresh pairs).
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub chain_id: Option<String>,
    pub dex_id: Option<String>,
    pub base_token: Option<BaseToken>,
    pub price_native: Option<String>, // decimal string, e.g. "0.0000123"
    pub price_usd: Option<String>,
    pub txns: Option<Txns>,
    pub volume: Option<Windows>,
    pub price_change: Option<Windows>,
    pub liquidity: Option<Liquidity>,
    pub fdv: Option<f64>,
    pub info: Option<PairInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BaseToken {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Txns {
    pub h24: Option<TxnCount>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TxnCount {
    pub buys: Option<u64>,
    pub sells: Option<u64>,
}

// Shared by `volume` and `priceChange`
#[derive(Debug, Default, Deserialize)]
pub struct Windows {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfo {
    pub image_url: Option<String>,
}
