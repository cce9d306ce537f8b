//! # filament
//!
//! The connection core of an HTTP/2 client: a per-connection protocol
//! engine that multiplexes many concurrent request/response streams over a
//! single TLS connection, honors HTTP/2 flow control at both the connection
//! and stream level, and admits work from a demand-driven request queue.
//!
//! One engine task owns all connection state; users talk to it through a
//! cloneable [`Handle`] and read results off an [`Events`] channel.
//!
//! ## Usage
//!
//! ```no_run
//! use filament::{Config, Connection, Event};
//! use http::{Method, Uri};
//!
//! # async fn example() -> filament::Result<()> {
//! let uri: Uri = "https://example.com/".parse().unwrap();
//! let transport = filament::transport::connect(&uri).await?;
//! let (handle, mut events) = Connection::open(transport, Config::default()).await?;
//!
//! let token = handle.request(Method::GET, uri, vec![], bytes::Bytes::new())?;
//! while let Some(event) = events.recv().await {
//!     if let Event::Response { token: t, response } = event {
//!         assert_eq!(t, token);
//!         println!("{} ({} bytes)", response.status, response.body.len());
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod hpack;
pub mod queue;
pub mod settings;
pub mod stream;
pub mod transport;

pub use connection::{Config, Connection, Event, Events, Handle};
pub use error::{Error, Result};
pub use frame::{ErrorCode, Frame};
pub use queue::{QueueHandle, Request};
pub use settings::Settings;
pub use stream::{Response, Stream, StreamState};
