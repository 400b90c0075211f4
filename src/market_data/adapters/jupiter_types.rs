// Source: https://lite-api.jup.ag/tokens/v2/search?query=<query>
// Older list endpoints used `mint`/`logoURI`/`price`; v2 uses `id`/`icon`/`usdPrice`.
// Keep all spellings as separate fields: serde aliases reject a body that
// carries two spellings at once.
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SearchResponse {
    List(Vec<Token>),
    Wrapped { tokens: Vec<Token> },
}

impl SearchResponse {
    pub fn into_tokens(self) -> Vec<Token> {
        match self {
            SearchResponse::List(tokens) | SearchResponse::Wrapped { tokens } => tokens,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub address: Option<String>,
    pub mint: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    #[serde(rename = "logoURI")]
    pub logo_uri: Option<String>,
    pub icon: Option<String>,
    pub usd_price: Option<f64>,
    pub price: Option<f64>,
}

impl Token {
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref().or(self.mint.as_deref()).or(self.id.as_deref())
    }
}
