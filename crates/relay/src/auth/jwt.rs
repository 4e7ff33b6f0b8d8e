use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_PLATFORM_ROLE: &str = "user";

/// Claims minted by the identity service. Only `sub` and `exp` are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    iat: i64,
    exp: i64,
}

/// A verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: Uuid,
    /// Platform role claim (e.g. `user`, `admin`). Room roles are separate.
    pub role: String,
    pub display_name: Option<String>,
}

impl UserIdentity {
    /// Name shown next to chat lines.
    pub fn username(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("user_{}", &self.user_id.simple().to_string()[..8]),
        }
    }
}

#[derive(Clone)]
pub struct JwtAccessTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAccessTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_user_token(
        &self,
        user_id: Uuid,
        role: &str,
        display_name: Option<&str>,
    ) -> anyhow::Result<String> {
        self.issue_user_token_at(user_id, role, display_name, current_unix_timestamp()?)
    }

    fn issue_user_token_at(
        &self,
        user_id: Uuid,
        role: &str,
        display_name: Option<&str>,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            role: Some(role.to_string()),
            name: display_name.map(ToOwned::to_owned),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    pub fn validate_user_token(&self, token: &str) -> anyhow::Result<UserIdentity> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("access token subject '{}' is not a UUID", claims.sub))?;

        Ok(UserIdentity {
            user_id,
            role: claims.role.unwrap_or_else(|| DEFAULT_PLATFORM_ROLE.to_string()),
            display_name: claims.name,
        })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, JwtAccessTokenService, ACCESS_TOKEN_TTL_SECONDS};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;
    use uuid::Uuid;

    const TEST_SECRET: &str = "liveroom_test_secret_that_is_definitely_long_enough";

    #[test]
    fn issues_and_validates_user_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let user_id = Uuid::new_v4();

        let token = service
            .issue_user_token(user_id, "admin", Some("Ada"))
            .expect("token should be issued");
        let identity = service.validate_user_token(&token).expect("token should validate");

        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.role, "admin");
        assert_eq!(identity.username(), "Ada");
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtAccessTokenService::new("too-short").is_err());
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let token =
            service.issue_user_token(Uuid::new_v4(), "user", None).expect("token should be issued");
        let tampered = format!("{token}x");

        assert!(service.validate_user_token(&tampered).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token = service
            .issue_user_token_at(Uuid::new_v4(), "user", None, issued_at)
            .expect("token should be issued");

        assert!(service.validate_user_token(&token).is_err());
    }

    #[test]
    fn missing_role_and_name_claims_fall_back_to_defaults() {
        #[derive(Serialize)]
        struct MinimalClaims {
            sub: String,
            iat: i64,
            exp: i64,
        }

        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let user_id = Uuid::parse_str("1234abcd-0000-4000-8000-000000000000").expect("uuid");
        let token = encode(
            &Header::new(Algorithm::HS256),
            &MinimalClaims { sub: user_id.to_string(), iat: now, exp: now + 60 },
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        let identity = service.validate_user_token(&token).expect("token should validate");
        assert_eq!(identity.role, "user");
        assert_eq!(identity.username(), "user_1234abcd");
    }

    #[test]
    fn rejects_tokens_with_invalid_subject_claim() {
        #[derive(Serialize)]
        struct InvalidSubjectClaims {
            sub: &'static str,
            iat: i64,
            exp: i64,
        }

        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let claims = InvalidSubjectClaims { sub: "not-a-uuid", iat: now, exp: now + 60 };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        assert!(service.validate_user_token(&token).is_err());
    }
}
