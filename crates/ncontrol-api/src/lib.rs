// ncontrol-api: websocket request/acknowledge channel to the DevCtrl coordination server

pub mod channel;
pub mod error;
pub mod frame;

pub use channel::{ChannelConfig, ChannelEvent, ChannelHandle, ReconnectConfig, websocket_url};
pub use error::Error;
pub use frame::{AUTH_HEADER, Frame, FrameKind, events};
