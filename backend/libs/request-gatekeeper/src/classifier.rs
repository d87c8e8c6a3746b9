//! Endpoint Classifier
//!
//! Decides whether an outbound call may go out without a credential. The
//! decision is an ordered rule table evaluated top to bottom; the first rule
//! whose path pattern and method set both match wins, and anything no rule
//! claims is protected.
//!
//! Classification depends on the method: `GET /shows` is public while
//! `POST /shows` is not, so results are never cached by URL alone.

use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::config::GatekeeperConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
}

/// Classification result with the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub access: Access,
    pub rule: &'static str,
}

const ASSET_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico", ".avif", ".bmp",
];

// ============================================================================
// URL normalization
// ============================================================================

/// Where a URL points, after normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    /// Another host; never gets a credential
    External,
    /// Image or asset URL
    Asset,
    /// Backend endpoint, as path segments below the API prefix
    Api(Vec<String>),
}

#[derive(Debug, Clone)]
pub(crate) struct EndpointLocator {
    base: Url,
    api_prefix: String,
    asset_hosts: Vec<String>,
}

impl EndpointLocator {
    pub(crate) fn new(config: &GatekeeperConfig) -> Self {
        Self {
            base: config.api_base_url.clone(),
            api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
            asset_hosts: config
                .asset_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    pub(crate) fn locate(&self, url: &str) -> Target {
        // Relative and scheme-relative URLs resolve exactly as dispatch resolves them
        let Ok(resolved) = self.base.join(url) else {
            return Target::External;
        };

        let host = resolved.host_str().unwrap_or_default().to_ascii_lowercase();
        if self.asset_hosts.iter().any(|h| *h == host) {
            return Target::Asset;
        }
        if !self.is_api_origin(&resolved) {
            return Target::External;
        }
        let path = resolved.path().to_string();

        let lower = path.to_ascii_lowercase();
        if ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            return Target::Asset;
        }

        let below_prefix = match path.strip_prefix(self.api_prefix.as_str()) {
            Some(rest) if !self.api_prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
                rest
            }
            _ => path.as_str(),
        };

        Target::Api(
            below_prefix
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Same scheme, host and port as the API base
    pub(crate) fn is_api_origin(&self, url: &Url) -> bool {
        url.origin() == self.base.origin()
    }
}

// ============================================================================
// Path patterns
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `{name}`: exactly one segment
    Param,
    /// `**`: any number of trailing segments, including none
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathPattern(Vec<Segment>);

impl PathPattern {
    pub(crate) fn parse(pattern: &str) -> Self {
        Self(
            pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s {
                    "**" => Segment::Rest,
                    s if s.starts_with('{') && s.ends_with('}') => Segment::Param,
                    s => Segment::Literal(s.to_string()),
                })
                .collect(),
        )
    }

    pub(crate) fn matches(&self, segments: &[String]) -> bool {
        let mut remaining = segments.iter();
        for segment in &self.0 {
            match segment {
                Segment::Rest => return true,
                Segment::Param => {
                    if remaining.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match remaining.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }
        remaining.next().is_none()
    }
}

// ============================================================================
// Rule table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Methods {
    Any,
    /// GET only; mutating methods fall through to later rules
    Read,
}

impl Methods {
    fn allows(&self, method: &Method) -> bool {
        match self {
            Methods::Any => true,
            Methods::Read => *method == Method::GET,
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    name: &'static str,
    patterns: Vec<PathPattern>,
    methods: Methods,
    access: Access,
}

impl Rule {
    fn new(name: &'static str, patterns: &[&str], methods: Methods, access: Access) -> Self {
        Self {
            name,
            patterns: patterns.iter().map(|p| PathPattern::parse(p)).collect(),
            methods,
            access,
        }
    }

    fn matches(&self, segments: &[String], method: &Method) -> bool {
        self.methods.allows(method) && self.patterns.iter().any(|p| p.matches(segments))
    }
}

#[derive(Debug, Clone)]
pub struct EndpointClassifier {
    locator: EndpointLocator,
    refresh: PathPattern,
    rules: Vec<Rule>,
}

impl EndpointClassifier {
    pub fn new(config: &GatekeeperConfig) -> Self {
        let bootstrap = [
            config.signin_path.as_str(),
            config.signup_path.as_str(),
            config.refresh_path.as_str(),
        ];

        let rules = vec![
            Rule::new("auth-bootstrap", &bootstrap, Methods::Any, Access::Public),
            Rule::new(
                "promotions-public",
                &[
                    "/promotions/active",
                    "/promotions/validate/{code}",
                    "/promotions/calculate",
                ],
                Methods::Any,
                Access::Public,
            ),
            Rule::new("promotions", &["/promotions/**"], Methods::Any, Access::Protected),
            Rule::new(
                "catalog-read",
                &[
                    "/shows",
                    "/shows/{id}",
                    "/shows/{id}/reviews",
                    "/shows/{id}/recommendations",
                    "/shows/{id}/schedules",
                    "/schedules",
                    "/schedules/{id}",
                    "/venues",
                    "/venues/{id}",
                ],
                Methods::Read,
                Access::Public,
            ),
            Rule::new(
                "read-only-allow-list",
                &[
                    "/schedules/{id}/seats",
                    "/schedules/{id}/seat-map",
                    "/seats/schedule/{id}",
                    "/seat-maps/**",
                    "/bookings/notifications/**",
                    "/venues/{id}/schedules",
                ],
                Methods::Read,
                Access::Public,
            ),
        ];

        Self {
            locator: EndpointLocator::new(config),
            refresh: PathPattern::parse(&config.refresh_path),
            rules,
        }
    }

    pub fn classify(&self, url: &str, method: &Method) -> Access {
        self.explain(url, method).access
    }

    /// Classify and report which rule decided
    pub fn explain(&self, url: &str, method: &Method) -> Classification {
        let classification = match self.locator.locate(url) {
            Target::External => Classification {
                access: Access::Public,
                rule: "external-host",
            },
            Target::Asset => Classification {
                access: Access::Public,
                rule: "asset",
            },
            Target::Api(segments) => self
                .rules
                .iter()
                .find(|rule| rule.matches(&segments, method))
                .map(|rule| Classification {
                    access: rule.access,
                    rule: rule.name,
                })
                .unwrap_or(Classification {
                    access: Access::Protected,
                    rule: "default",
                }),
        };

        debug!(
            %method,
            url,
            access = ?classification.access,
            rule = classification.rule,
            "Endpoint classified"
        );
        classification
    }

    /// Whether `url` is the token refresh endpoint itself
    pub fn is_refresh_endpoint(&self, url: &str) -> bool {
        matches!(self.locator.locate(url), Target::Api(segments) if self.refresh.matches(&segments))
    }
}
