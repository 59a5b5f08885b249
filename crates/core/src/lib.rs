pub mod auth;
pub mod error;
pub mod media;
pub mod mount;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use auth::{AuthScheme, CredentialStore};
pub use error::{Result, RtspError};
pub use media::{PacketizationMode, Packetizer};
pub use mount::Mount;
pub use server::{AuthSettings, Server, ServerConfig, Viewer};
pub use session::{SessionEvent, SessionListener, SessionStatus};
pub use transport::{PemSource, TlsSettings};
