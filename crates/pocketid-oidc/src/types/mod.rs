//! Domain types shared by the services and storage backends.
//!
//! - [`Client`] - registered relying party
//! - [`AuthorizationCode`] / [`DeviceCode`] - one-time grants and their states
//! - [`UserAuthorizedClient`] - durable consent
//! - [`User`] - directory view used for claims and group policy
//! - [`SigningKeyRecord`] / [`EncryptedSecret`] - envelope-encrypted records

pub mod authorization_code;
pub mod client;
pub mod consent;
pub mod device_code;
pub mod key_material;
pub mod user;

pub use authorization_code::{AuthorizationCode, AuthorizationCodeState};
pub use client::{Client, ClientValidationError, GrantType};
pub use consent::{ConsentUpsert, UserAuthorizedClient};
pub use device_code::{DeviceCode, DeviceCodeState, PollDecision};
pub use key_material::{EncryptedSecret, SigningKeyRecord};
pub use user::{CustomClaim, User, UserGroup};
