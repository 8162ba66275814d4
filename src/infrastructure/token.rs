use crate::domain::keyspace::Account;
use crate::domain::ports::{TokenClaims, TokenCodec};
use crate::error::{GatewayError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Bearer tokens of the form `hex(json claims).hex(hmac-sha256)`.
pub struct HmacTokenCodec {
    secret: Zeroizing<Vec<u8>>,
}

impl HmacTokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(GatewayError::invalid("token secret must not be empty"));
        }
        Ok(Self { secret })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| GatewayError::Internal(Box::new(std::io::Error::other(e.to_string()))))
    }
}

impl TokenCodec for HmacTokenCodec {
    fn issue(&self, index: u64, account: &Account) -> Result<String> {
        let claims = TokenClaims {
            index,
            account: account.clone(),
        };
        let payload = serde_json::to_vec(&claims)?;
        let mut mac = self.mac()?;
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(&payload), hex::encode(tag)))
    }

    fn parse(&self, token: &str) -> Result<TokenClaims> {
        let invalid = || GatewayError::invalid("invalid token");

        let (payload, tag) = token.split_once('.').ok_or_else(invalid)?;
        let payload = hex::decode(payload).map_err(|_| invalid())?;
        let tag = hex::decode(tag).map_err(|_| invalid())?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&tag).map_err(|_| invalid())?;

        serde_json::from_slice(&payload).map_err(|_| invalid())
    }
}
