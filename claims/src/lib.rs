pub mod config;
pub mod customer;
pub mod eligibility;
pub mod error;
pub mod keys;
pub mod notify;
pub mod signer;
pub mod store;
pub mod stripe;
pub mod tier;
pub mod token;

pub use config::{Config, DiscordConfig};
pub use customer::{normalize_email, Customer};
pub use eligibility::{EligibilityResolver, Resolution};
pub use error::ClaimError;
pub use keys::{SecretWords, SECRET_WORD_COUNT};
pub use notify::{mask_email, Notifier, NotifyEvent};
pub use signer::{email_hash, ClaimSignature, RewardSigner};
pub use store::{CustomerStore, StoreStats};
pub use stripe::StripeClient;
pub use tier::Tier;
pub use token::TokenIssuer;
