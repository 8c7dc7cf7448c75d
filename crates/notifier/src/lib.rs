//! Push notification delivery.
//!
//! Receipts handed in by the host flow through:
//! - [`hub::PushHub`], which fans them out to the configured handlers
//! - [`gateway_handler::GatewayHandler`], which queues them and spawns one
//!   dispatch per receipt
//! - [`dispatcher::PushDispatcher`], which resolves target devices, calls the
//!   gateway through [`gateway::GatewayClient`] and classifies the reply

pub mod dispatcher;
pub mod gateway;
pub mod gateway_handler;
pub mod handler;
pub mod hub;
pub mod log_handler;

pub use handler::{HandlerState, PushError, PushHandler};
pub use hub::PushHub;
