use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Valute {
    #[serde(rename = "CharCode")]
    pub char_code: String,
    #[serde(rename = "Nominal", default = "default_nominal")]
    pub nominal: String,
    /// Price of `nominal` units in the feed's base, with a comma decimal separator.
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct ValCurs {
    #[serde(rename = "@Date", default)]
    pub date: Option<String>,
    #[serde(rename = "Valute", default)]
    pub valute: Vec<Valute>,
}

fn default_nominal() -> String {
    "1".to_string()
}
