pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod router;
pub mod secret;

pub use client::{CallerScope, Client, ClientOptions, ClientStatus, DsnTemplate};
pub use db::{Connector, SqlxConnector};
pub use error::VaultDbError;
pub use secret::{Lease, SecretReader, VaultReader};
