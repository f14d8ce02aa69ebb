//! # skiff-proto
//!
//! Wire definitions for the connection between a skiff location client and
//! the broker that owns the compute nodes.
//!
//! Every frame is a JSON document carried in a WebSocket text message:
//!
//! - [`ClientFrame`] : frames sent by the location (handshake and commands)
//! - [`BrokerFrame`] : frames sent by the broker (handshake, replies, pushes)
//! - [`Command`] : typed commands, one variant per broker operation
//! - [`Push`] : unsolicited broker notifications

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod b64;
pub mod commands;
pub mod error;
pub mod events;
pub mod messages;
pub mod types;

pub use commands::{
    ClusterSpec, Command, CreateVolumeReply, DescribeImageReply, FindTagReply,
    PublishReply, SpawnContainerReply, UploadRequirementsReply,
};
pub use error::ProtoError;
pub use events::{DomainOffer, NodeOffer, Push, VolumeOffer};
pub use messages::{BrokerFrame, ClientFrame, RequestId};
pub use types::{
    ClusterId, ContainerId, ContainerStatus, ImageDescription, NodeId, NodeStats, ProxyId,
    TunnelId, VolumeId, WriteMode,
};
