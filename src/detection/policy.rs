use url::Url;

use crate::domain::PolicySettings;

/// Allow/deny evaluation for the page's host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainPolicy {
    allowed: Vec<String>,
    denied: Vec<String>,
}

impl DomainPolicy {
    pub fn new<A, D>(allowed: A, denied: D) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            allowed: normalize(allowed),
            denied: normalize(denied),
        }
    }

    pub fn from_settings(settings: &PolicySettings) -> Self {
        Self::new(&settings.allowed_domains, &settings.denied_domains)
    }

    /// Deny-list wins; a non-empty allow-list must match; anything else is allowed.
    /// Matching is substring containment in either direction.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        if self.denied.iter().any(|entry| matches(&host, entry)) {
            return false;
        }
        if !self.allowed.is_empty() {
            return self.allowed.iter().any(|entry| matches(&host, entry));
        }
        true
    }
}

/// Host of an http(s) URL, lowercased. Extension and browser pages have none.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .map(|host| host.to_ascii_lowercase())
}

fn matches(host: &str, entry: &str) -> bool {
    host.contains(entry) || entry.contains(host)
}

fn normalize<I>(entries: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    entries
        .into_iter()
        .map(|entry| entry.as_ref().trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}
