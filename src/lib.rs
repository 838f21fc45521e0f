//! # eveapi Library
//!
//! A client for EVE-style XML web APIs. Calls are made by walking a tree of
//! immutable [`Context`] values, responses come back as a navigable tree whose
//! tabular parts are [`Rowset`]s, and documents are replayed from a pluggable
//! [`CacheStore`] until the server-declared expiry.
//!
//! ```no_run
//! use eveapi::{Context, Params};
//!
//! let api = Context::connect("api.eveonline.com")?;
//! let tree = api.extend("eve").extend("SkillTree").call()?;
//! for group in tree.rowset("skillGroups").into_iter().flatten() {
//!     println!("{}", group.text("groupName").unwrap_or_default());
//! }
//!
//! let me = api.auth(123, "vcode").character(456);
//! let sheet = me.extend("CharacterSheet").invoke(Params::new())?;
//! println!("{:?}", sheet.int("balance"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod http_client;
pub mod response;
pub mod rowset;

pub use cache::{
    CacheBackend, CacheStore, CachedDocument, DiskCache, FileCache, MemoryCache, NullBackend,
    RequestFingerprint, TieredCache,
};
pub use cli::Cli;
pub use config::{
    Config, ConfigManager, DEFAULT_USER_AGENT, ProxyConfig, default_proxy, set_default_proxy,
    set_user_agent, user_agent,
};
pub use context::{ConnectionBuilder, Context, ParamValue, Params};
pub use error::{ApiError, CacheError, ConfigError, ErrorKind, Result, RowsetError};
pub use http_client::{HttpClientConfig, HttpTransport, Transport, TransportRequest};
pub use response::{Document, Node, Response, Scalar, Value};
pub use rowset::{GroupedRowset, IndexedRowset, Lookup, Row, Rowset, Select};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
