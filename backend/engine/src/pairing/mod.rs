mod manager;
pub mod uri;

pub use manager::{CreatedPairing, PairingManager};
pub use uri::{format_uri, parse_uri, UriParameters};
