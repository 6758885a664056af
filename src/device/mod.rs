//! Device-facing types: identities, the connection seam, and the static device list.
//!
//! ## Contents
//! - [`DeviceId`], [`CallerId`] identity newtypes
//! - [`Connector`], [`Connection`] traits implemented by the vendor integration
//! - [`DeviceSpec`] one entry of the startup device list

mod connection;
mod id;
mod spec;

pub use connection::{
    Command, ConnectParams, Connection, ConnectionRef, Connector, ConnectorRef, SensorSnapshot,
};
pub use id::{CallerId, DeviceId};
pub use spec::DeviceSpec;
