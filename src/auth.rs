//! Partner credentials and request authentication.

pub mod credential_vault;
pub mod hmac_authenticator;
pub mod hmac_signer;
pub mod nonce_ledger;

pub use credential_vault::{CredentialVault, KeyEnvironment};
pub use hmac_authenticator::{AuthError, HmacAuthenticator, OutboundSignature};
pub use hmac_signer::{HmacSigner, format_signature_header};
pub use nonce_ledger::{NonceError, NonceLedger};
