//! `ratewatch-core`: domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod currency;
pub mod email;
pub mod error;
pub mod id;
pub mod subscription;
pub mod value_object;

pub use currency::CurrencyCode;
pub use email::Email;
pub use error::{DomainError, DomainResult};
pub use id::SagaId;
pub use subscription::Subscription;
pub use value_object::ValueObject;
