//! Ratatoskr carries small status messages between the robots of a team.
//!
//! A message is built from independently defined [components](component::Component) that are
//! registered once at startup in a [`RegistryBuilder`](registry::RegistryBuilder). Every control
//! cycle the [`Packer`](message::Packer) squeezes as many components as fit into a fixed byte
//! budget, the [`Transport`](transport::Transport) broadcasts the result, and receivers unpack
//! it and dispatch each component to the callbacks subscribed to its kind.
pub mod component;
pub mod components;
pub mod config;
pub mod message;
pub mod registry;
pub mod serialization;
pub mod subscription;
pub mod transport;

mod error;
pub use error::{Error, Rejection, Result};

pub use component::Component;
pub use message::{Envelope, Header, Packer, Packet};
pub use registry::{KindId, Registry, RegistryBuilder};
pub use subscription::Subscription;
pub use transport::{Receipt, Transport};
