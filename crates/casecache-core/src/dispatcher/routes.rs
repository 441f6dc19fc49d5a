//! Routing table mapping request URLs to cache stores.

use reqwest::Url;

use crate::cache::manager::{EVALUATIONS_KEY, PLAN_VIE_QUESTIONS_KEY, VICTIMS_KEY, VICTIM_STATS_KEY};
use crate::store::StoreName;

/// Match on the URL path, compared after trimming a trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Contains(&'static str),
    EndsWith(&'static str),
}

impl PathPattern {
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        match self {
            PathPattern::Contains(needle) => path.contains(needle),
            PathPattern::EndsWith(suffix) => path.ends_with(suffix),
        }
    }
}

/// Which key inside the store a response is cached under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPolicy {
    /// One record for the whole collection. A request carrying a query
    /// string is a partial view and is keyed like `PerPath` instead.
    Fixed(&'static str),
    /// One record per path + query
    PerPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoute {
    pub pattern: PathPattern,
    pub store: StoreName,
    pub key: KeyPolicy,
}

impl CacheRoute {
    pub const fn new(pattern: PathPattern, store: StoreName, key: KeyPolicy) -> Self {
        Self {
            pattern,
            store,
            key,
        }
    }
}

/// A store and key a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub store: StoreName,
    pub key: String,
}

/// Ordered `(pattern, store)` pairs; the first match wins, so more specific
/// patterns go first.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<CacheRoute>,
}

impl RouteTable {
    pub fn new(routes: Vec<CacheRoute>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[CacheRoute] {
        &self.routes
    }

    pub fn resolve(&self, url: &Url) -> Option<ResolvedRoute> {
        let path = url.path();
        let route = self.routes.iter().find(|route| route.pattern.matches(path))?;

        let query = url.query().filter(|query| !query.is_empty());
        let key = match (&route.key, query) {
            (KeyPolicy::Fixed(key), None) => key.to_string(),
            (_, Some(query)) => format!("{}?{}", path, query),
            (KeyPolicy::PerPath, None) => path.to_string(),
        };

        Some(ResolvedRoute {
            store: route.store,
            key,
        })
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        use KeyPolicy::{Fixed, PerPath};
        use PathPattern::{Contains, EndsWith};

        Self::new(vec![
            CacheRoute::new(Contains("/victime/stats"), StoreName::VictimStats, Fixed(VICTIM_STATS_KEY)),
            CacheRoute::new(
                Contains("/plan-vie/questions"),
                StoreName::PlanVieQuestions,
                Fixed(PLAN_VIE_QUESTIONS_KEY),
            ),
            CacheRoute::new(EndsWith("/evaluation"), StoreName::Evaluations, Fixed(EVALUATIONS_KEY)),
            CacheRoute::new(Contains("/evaluation"), StoreName::Evaluations, PerPath),
            CacheRoute::new(EndsWith("/victime"), StoreName::Victims, Fixed(VICTIMS_KEY)),
            CacheRoute::new(Contains("/victime/"), StoreName::Victims, PerPath),
            CacheRoute::new(Contains("/reference"), StoreName::ReferenceData, PerPath),
        ])
    }
}
