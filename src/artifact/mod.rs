//! Final build artifacts.
//!
//! - [`iso`] - Output naming and the external packer invocation
//! - [`checksum`] - SHA-256 digests and the `sha256.txt` record file

pub mod checksum;
pub mod iso;

pub use checksum::{sha256_file, write_checksum_manifest};
pub use iso::{assemble, IsoName};
