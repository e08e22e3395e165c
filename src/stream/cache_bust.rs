use chrono::Utc;
use rand::Rng;
use url::Url;

/// Append a millisecond timestamp and a random token so that no cache
/// between us and the camera can answer with a stale stream.
pub fn cache_busting_url(base: &Url) -> Url {
    let mut url = base.clone();
    let token: u64 = rand::rng().random();
    url.query_pairs_mut()
        .append_pair("t", &Utc::now().timestamp_millis().to_string())
        .append_pair("cache", &format!("{token:016x}"));
    url
}
