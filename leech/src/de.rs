use serde::{de, Deserialize};
use url::Url;

// Deserializer helpers for metainfo fields.

pub fn url_deserialize<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Url::parse(&s).map_err(de::Error::custom)
}

pub fn announce_list_deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<Vec<Url>>>, D::Error>
where
    D: de::Deserializer<'de>,
{
    let raw = Vec::<Vec<String>>::deserialize(deserializer)?;
    let mut tiers = Vec::new();

    for tier in raw {
        let mut urls = Vec::new();
        for url in tier {
            urls.push(Url::parse(&url).map_err(de::Error::custom)?);
        }
        tiers.push(urls);
    }

    let total = tiers.iter().map(|t| t.len()).sum::<usize>();
    if total == 0 { Ok(None) } else { Ok(Some(tiers)) }
}
