//! # skiff-location
//!
//! Client side of a skiff location: one authenticated broker session
//! through which nodes are ranked, volumes created, containers spawned,
//! tunnels opened onto container ports and clusters published on web
//! endpoints.
//!
//! ```no_run
//! # async fn demo() -> skiff_location::Result<()> {
//! use skiff_location::{Location, LocationConfig};
//!
//! let location = Location::connect(LocationConfig::discover()?).await?;
//! let node = location.node()?;
//! let container = node.spawn_container("nginx:latest", None).await?;
//! container.wait_http_200(80, "www.localhost", None, None).await?;
//! location.run(None).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod container;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod image;
pub mod keys;
pub mod location;
pub mod node;
pub mod tunnel;
pub mod volume;

pub use config::LocationConfig;
pub use connection::{BrokerSide, Connection, ConnectionState, PushHandler, Transport};
pub use container::{Container, ExternalContainer};
pub use endpoint::{Cluster, TlsMaterial, WebEndpoint};
pub use error::{LocationError, Result};
pub use http::HttpPoll;
pub use image::{DirLayerSource, ImageUpload, LayerSource};
pub use keys::{all_locations, KeyPair};
pub use location::Location;
pub use node::Node;
pub use tunnel::Tunnel;
pub use volume::Volume;
