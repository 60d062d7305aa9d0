//! Network module for SMB message templates and connection handling

pub mod packet;
pub mod socket;

pub use packet::{OsBanner, Patch, ResponseView, Template};
pub use socket::{connect, SmbConnection};
