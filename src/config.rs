//! Configuration for the migration runner

use std::time::Duration;

use url::Url;

use crate::credential::ServiceCredential;
use crate::endpoint::EndpointCandidate;
use crate::error::{Error, Result};

/// Environment variable holding the project base URL
pub const URL_ENV: &str = "SUPABASE_URL";

/// Environment variable holding the service role key
pub const SERVICE_KEY_ENV: &str = "SUPABASE_SERVICE_ROLE_KEY";

const HOSTED_SUFFIX: &str = ".supabase.co";
const DASHBOARD_BASE: &str = "https://supabase.com/dashboard/project";

/// Which project to talk to and with what key.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub url: Url,
    pub credential: ServiceCredential,
}

impl ProjectConfig {
    /// Creates a new configuration, validating the URL and key.
    pub fn new(url_str: &str, service_key: &str) -> Result<Self> {
        let url = Url::parse(url_str.trim())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "project URL must be http(s), got {}",
                url.scheme()
            )));
        }
        let credential = ServiceCredential::new(service_key)?;
        Ok(Self { url, credential })
    }

    /// Reads `SUPABASE_URL` and `SUPABASE_SERVICE_ROLE_KEY`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(URL_ENV)
            .map_err(|_| Error::config(format!("{} environment variable not found", URL_ENV)))?;
        let key = std::env::var(SERVICE_KEY_ENV).map_err(|_| {
            Error::config(format!("{} environment variable not found", SERVICE_KEY_ENV))
        })?;
        Self::new(&url, &key)
    }

    /// Absolute URL for a path relative to the project root
    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&joined)?)
    }

    /// Project ref from the `*.supabase.co` host, else from the key's claims.
    pub fn project_ref(&self) -> Option<String> {
        if let Some(host) = self.url.host_str() {
            if let Some(project) = host.strip_suffix(HOSTED_SUFFIX) {
                if !project.is_empty() && !project.contains('.') {
                    return Some(project.to_string());
                }
            }
        }
        match self.credential.claims() {
            Ok(claims) => claims.project_ref.filter(|r| !r.is_empty()),
            Err(err) => {
                log::debug!("could not read project ref from key: {}", err);
                None
            }
        }
    }

    /// SQL editor of the project dashboard, when the project ref is known
    pub fn dashboard_sql_url(&self) -> Option<String> {
        self.project_ref()
            .map(|project| format!("{}/{}/sql/new", DASHBOARD_BASE, project))
    }
}

/// Options controlling how statements are delivered
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Timeout for each SQL execution call
    pub request_timeout: Duration,

    /// Timeout for read-only probes
    pub probe_timeout: Duration,

    /// Endpoint candidates, in preference order
    pub candidates: Vec<EndpointCandidate>,

    /// Wait after installing the RPC function before using it
    pub propagation_delay: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            candidates: EndpointCandidate::defaults(),
            propagation_delay: Duration::from_secs(3),
        }
    }
}

impl RunnerOptions {
    /// Set the execution timeout
    pub fn with_request_timeout(mut self, value: Duration) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the probe timeout
    pub fn with_probe_timeout(mut self, value: Duration) -> Self {
        self.probe_timeout = value;
        self
    }

    /// Replace the endpoint candidates
    pub fn with_candidates(mut self, value: Vec<EndpointCandidate>) -> Self {
        self.candidates = value;
        self
    }

    /// Set the post-install propagation delay
    pub fn with_propagation_delay(mut self, value: Duration) -> Self {
        self.propagation_delay = value;
        self
    }
}
