pub mod command;
pub mod config;
pub mod engine;
pub mod net;
pub mod store;
pub mod tags;

pub use command::{Dispatcher, MessageType, ABSOLUTE_TIMESTAMP_FORMAT, INVALID_COMMAND};
pub use config::{init_logging, CacheConfig, ConfigError, LoggerKind, StorageKind};
pub use engine::CacheEngine;
pub use net::{
    encode_frame, BroadcastBus, BroadcastEvent, CacheClient, CacheServer, Frame, FrameDecoder,
    NetError, SetOptions,
};
pub use store::{CacheStore, ExpirationPolicy, ExpireSink, StoreError};
pub use tags::{KeyPattern, TagIndex};
