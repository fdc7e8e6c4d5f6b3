//! Application protocol over the game data channel

pub mod messages;
pub mod rpc;

pub use messages::{
    unix_millis, ChannelMessage, Pong, PushMessage, RpcCall, RpcReply, SongSummary,
    MAX_MESSAGE_SIZE,
};
pub use rpc::RpcClient;
