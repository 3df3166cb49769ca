pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::ProviderFactory;
pub use provider::PaymentProvider;
pub use types::{
    CreatePaymentRequest, CreatedPayment, PaymentAction, PaymentStatus, ProviderName,
    RefundExecution, RefundOutcome, TierId, WebhookOutcome,
};
