pub mod email;
pub mod format;
pub mod fulfillment;
pub mod links;
pub mod storage;
pub mod stripe;
pub mod tiers;
pub mod traits;

pub use email::{LogMailer, ResendMailer};
pub use format::*;
pub use fulfillment::*;
pub use links::*;
pub use storage::*;
pub use stripe::{is_placeholder_key, StripeClient, StripeEvent, CHECKOUT_SESSION_COMPLETED};
pub use tiers::*;
pub use traits::*;
