//! Service credential handling
//!
//! Supabase API keys are JWTs. The runner never verifies the signature (the
//! project does that server-side) but it reads the claims to warn about keys
//! that are not `service_role` and to find the project ref.

use std::collections::HashSet;
use std::fmt;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Role claim carried by keys that bypass row-level security
pub const SERVICE_ROLE: &str = "service_role";

/// Claims found in a Supabase API key
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CredentialClaims {
    /// Issuer, `supabase` for hosted projects
    pub iss: Option<String>,
    /// Project reference (the subdomain of `*.supabase.co`)
    #[serde(rename = "ref")]
    pub project_ref: Option<String>,
    /// Postgres role the key maps to (`anon`, `service_role`, ...)
    pub role: Option<String>,
    /// Expiry as a unix timestamp
    pub exp: Option<i64>,
}

impl CredentialClaims {
    /// Whether the key maps to the RLS-bypassing service role
    pub fn is_service_role(&self) -> bool {
        self.role.as_deref() == Some(SERVICE_ROLE)
    }
}

/// High-privilege API key sent as both `apikey` and bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceCredential {
    token: String,
}

impl ServiceCredential {
    /// Wrap a key, rejecting empty input
    pub fn new(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::config("service key cannot be empty"));
        }
        Ok(Self {
            token: token.to_string(),
        })
    }

    /// The raw key as sent on the wire
    pub fn expose(&self) -> &str {
        &self.token
    }

    /// Decode the JWT claims without verifying the signature
    pub fn claims(&self) -> Result<CredentialClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<CredentialClaims>(
            &self.token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )?;
        Ok(data.claims)
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail: String = self
            .token
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        write!(f, "ServiceCredential(...{})", tail)
    }
}
