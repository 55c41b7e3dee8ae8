//! Fetch transport capability
//!
//! The executor is generic over a [`PageFetcher`]: one implementation per
//! transport, injected at construction. The crate ships a plain-HTTP
//! implementation on reqwest and a no-op one for handler-only crawls and
//! tests; a headless-browser transport would slot in the same way.

use crate::request::{HttpMethod, Request};
use crate::{CrawlError, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Proxy chosen for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyInfo {
    pub url: String,
}

/// Mints proxy bindings, optionally sticky per session
pub trait ProxyProvider: Send + Sync {
    /// Returns the proxy to use for one attempt
    ///
    /// When a session id is given, the same session keeps getting the same
    /// proxy, so retries under one identity stay on one egress address.
    fn new_proxy_info(&self, session_id: Option<&str>) -> Option<ProxyInfo>;
}

/// Fixed proxy list: sticky by session, round-robin otherwise
pub struct StaticProxyList {
    urls: Vec<String>,
    counter: AtomicUsize,
}

impl StaticProxyList {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            counter: AtomicUsize::new(0),
        }
    }
}

impl ProxyProvider for StaticProxyList {
    fn new_proxy_info(&self, session_id: Option<&str>) -> Option<ProxyInfo> {
        if self.urls.is_empty() {
            return None;
        }
        let index = match session_id {
            Some(id) => {
                let mut hasher = DefaultHasher::new();
                id.hash(&mut hasher);
                (hasher.finish() as usize) % self.urls.len()
            }
            None => self.counter.fetch_add(1, Ordering::Relaxed) % self.urls.len(),
        };
        Some(ProxyInfo {
            url: self.urls[index].clone(),
        })
    }
}

/// Result of fetching one page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the fetch actually resolved to, after redirects
    pub final_url: Url,

    pub status: u16,

    pub headers: HashMap<String, String>,

    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport capability: fetch-and-render for one attempt
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the request's URL; `Ok(None)` means this transport produces
    /// no page (handler-only crawls)
    async fn fetch(
        &self,
        request: &Request,
        proxy: Option<&ProxyInfo>,
    ) -> Result<Option<FetchedPage>>;
}

/// Transport that fetches nothing; the handler does all the work
pub struct NoopFetcher;

#[async_trait]
impl PageFetcher for NoopFetcher {
    async fn fetch(
        &self,
        _request: &Request,
        _proxy: Option<&ProxyInfo>,
    ) -> Result<Option<FetchedPage>> {
        Ok(None)
    }
}

/// Plain-HTTP transport on reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
    // One client per proxy URL; reqwest binds proxies at client build time
    proxy_clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Self::build_client(user_agent, timeout, None)?;
        Ok(Self {
            client,
            timeout,
            user_agent: user_agent.to_string(),
            proxy_clients: Mutex::new(HashMap::new()),
        })
    }

    fn build_client(
        user_agent: &str,
        timeout: Duration,
        proxy_url: Option<&str>,
    ) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy_url) = proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| CrawlError::Http {
                url: proxy_url.to_string(),
                source: e,
            })?;
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(|e| CrawlError::Http {
            url: String::new(),
            source: e,
        })
    }

    fn client_for(&self, proxy: Option<&ProxyInfo>) -> Result<reqwest::Client> {
        let Some(proxy) = proxy else {
            return Ok(self.client.clone());
        };

        let mut clients = self.proxy_clients.lock().unwrap();
        if let Some(client) = clients.get(&proxy.url) {
            return Ok(client.clone());
        }

        let client = Self::build_client(&self.user_agent, self.timeout, Some(&proxy.url))?;
        clients.insert(proxy.url.clone(), client.clone());
        Ok(client)
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &Request,
        proxy: Option<&ProxyInfo>,
    ) -> Result<Option<FetchedPage>> {
        let client = self.client_for(proxy)?;
        let url = request.url.to_string();

        let mut builder = client.request(to_reqwest_method(request.method), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(payload) = &request.payload {
            builder = builder.body(payload.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::NavigationTimeout {
                    url: url.clone(),
                    timeout: self.timeout,
                }
            } else {
                CrawlError::Http {
                    url: url.clone(),
                    source: e,
                }
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| CrawlError::Http {
                url: url.clone(),
                source: e,
            })?
            .to_vec();

        tracing::debug!(url = %url, status, bytes = body.len(), "Fetched page");

        Ok(Some(FetchedPage {
            final_url,
            status,
            headers,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_proxy_round_robin() {
        let provider = StaticProxyList::new(vec![
            "http://proxy-a:8000".to_string(),
            "http://proxy-b:8000".to_string(),
        ]);

        let first = provider.new_proxy_info(None).unwrap();
        let second = provider.new_proxy_info(None).unwrap();
        assert_ne!(first, second);

        let third = provider.new_proxy_info(None).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_static_proxy_sticky_per_session() {
        let provider = StaticProxyList::new(vec![
            "http://proxy-a:8000".to_string(),
            "http://proxy-b:8000".to_string(),
            "http://proxy-c:8000".to_string(),
        ]);

        let a1 = provider.new_proxy_info(Some("session-1")).unwrap();
        let a2 = provider.new_proxy_info(Some("session-1")).unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn test_empty_proxy_list_yields_none() {
        let provider = StaticProxyList::new(vec![]);
        assert!(provider.new_proxy_info(None).is_none());
        assert!(provider.new_proxy_info(Some("s")).is_none());
    }

    #[tokio::test]
    async fn test_noop_fetcher_returns_no_page() {
        let fetcher = NoopFetcher;
        let request = Request::new("https://example.com/").unwrap();
        let page = fetcher.fetch(&request, None).await.unwrap();
        assert!(page.is_none());
    }

    #[test]
    fn test_fetched_page_text() {
        let page = FetchedPage {
            final_url: Url::parse("https://example.com/").unwrap(),
            status: 200,
            headers: HashMap::new(),
            body: b"hello".to_vec(),
        };
        assert_eq!(page.text(), "hello");
    }
}
