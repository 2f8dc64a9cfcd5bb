use crate::util::{api_request, build_url};

pub async fn run(api_url: &str) -> i32 {
    match build_url(api_url, &["health"], &[]) {
        Ok(url) => api_request(reqwest::Method::GET, url).await,
        Err(code) => code,
    }
}
