#![forbid(unsafe_code)]

//! Lifetime-scoped reactive runtime.
//!
//! - [`Lifetime`]: ownership scope with cascading, idempotent teardown.
//! - [`Conduit`]: demand-activated reactive source; subscribing with a
//!   lifetime keeps the subscription alive exactly as long as that lifetime.
//! - [`LocalProperty`] / [`LocalAction`]: locally owned value and event
//!   conduits.
//! - [`MappingConduit`]: derived value computed only while subscribed.
//! - [`LocalSet`] / [`FilterSetConduit`]: set conduits where each member has
//!   its own lifetime.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`) and `!Send`.

pub mod conduit;
pub mod equality;
pub mod error;
pub mod lifetime;
pub mod local;
pub mod mapping;
pub mod set;
pub mod vec3;

pub use conduit::{ActivationHooks, Callback, Conduit, ConduitCore, ConduitExt, NoHooks, Subscriber};
pub use equality::{ValuesEqual, values_equal};
pub use error::{CoreError, Result};
pub use lifetime::{Disposable, Lifetime, OwnKey, WeakLifetime};
pub use local::{LocalAction, LocalProperty};
pub use mapping::{MappingConduit, Setter};
pub use set::{FilterSetConduit, LocalSet, Reconciled, SetConduit, SetCore, SetMember};
pub use vec3::Vec3;
