pub mod chain;
pub mod gateway;
pub mod token;

pub use chain::ChainProvider;
pub use gateway::GatewayProvider;
pub use token::TokenProvider;
