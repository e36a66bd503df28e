//! Request authentication.

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::blacklist::TokenBlacklist;
use crate::error::{AuthError, GatewayError, GatewayResult};

pub const TOKEN_HEADER: &str = "x-token";
pub const REQUEST_USER_HEADER: &str = "x-request-user";

const STATUS_ACTIVE: &str = "active";

/// Token claims the gateway relies on. Anything else is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// The authenticated caller, attached to requests and responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUser(pub String);

/// One `addr/prefix` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cidr {
    net: IpAddr,
    prefix: u8,
}

impl Cidr {
    fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => (a.trim(), Some(p.trim().parse::<u8>().ok()?)),
            None => (s.trim(), None),
        };
        let net: IpAddr = addr.parse().ok()?;
        let max = if net.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max);
        (prefix <= max).then_some(Self { net, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.net, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Networks allowed to assert `X-Request-User` without a token.
/// Loopback is always trusted.
#[derive(Debug, Clone, Default)]
pub struct TrustedNetworks {
    blocks: Vec<Cidr>,
}

impl TrustedNetworks {
    pub fn parse(entries: &[String]) -> GatewayResult<Self> {
        let blocks = entries
            .iter()
            .map(|e| {
                Cidr::parse(e).ok_or_else(|| GatewayError::Config(format!("invalid trusted network {e:?}")))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        ip.to_canonical().is_loopback() || self.blocks.iter().any(|b| b.contains(ip))
    }
}

pub struct Authenticator {
    key: Option<DecodingKey>,
    validation: Validation,
    blacklist: Arc<TokenBlacklist>,
    trusted: TrustedNetworks,
}

impl Authenticator {
    pub fn new(secret: &str, blacklist: Arc<TokenBlacklist>, trusted: TrustedNetworks) -> Self {
        if secret.is_empty() {
            warn!("jwt secret is empty, token authentication disabled");
        }
        let key = (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes()));
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            key,
            validation,
            blacklist,
            trusted,
        }
    }

    pub fn blacklist(&self) -> &Arc<TokenBlacklist> {
        &self.blacklist
    }

    /// Validate a token: signature, expiry, revocation, account status.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| AuthError::Invalid("no signing secret configured".to_string()))?;
        let data = jsonwebtoken::decode::<Claims>(token, key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;
        if self.blacklist.is_blacklisted(token) {
            return Err(AuthError::Revoked);
        }
        let claims = data.claims;
        if let Some(status) = &claims.status
            && status != STATUS_ACTIVE
        {
            return Err(AuthError::Inactive(claims.sub));
        }
        Ok(claims)
    }

    /// Identify the caller from headers and the peer address.
    pub fn authenticate(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Result<RequestUser, AuthError> {
        if let Some(token) = header_str(headers, TOKEN_HEADER) {
            return self.verify_token(token).map(|c| RequestUser(c.sub));
        }
        match (peer, header_str(headers, REQUEST_USER_HEADER)) {
            (Some(ip), Some(user)) if self.trusted.contains(ip) => Ok(RequestUser(user.to_string())),
            _ => Err(AuthError::Missing),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
