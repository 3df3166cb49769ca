pub mod rate_service;
pub mod refund;
pub mod webhook_ingress;

pub use rate_service::RateService;
pub use refund::RefundDispatcher;
pub use webhook_ingress::WebhookIngress;
