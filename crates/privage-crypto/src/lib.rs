//! privage-crypto: the on-disk format of a privage secret
//!
//! Every encrypted file is a self-describing artifact:
//! ```text
//! [ 512 bytes: space-padded age ciphertext of the 245-byte header ][ age ciphertext of the body ]
//!
//! header plaintext = version[5] || category[40] || label[200]   (each right-justified, space-padded)
//! file name        = sha256(category 0x1F label 0x1F recipient) as hex || suffix || ".age"
//! ```
//!
//! Metadata is decrypted separately from the body, so a repository can be
//! listed, searched, and renamed without ever touching secret content.

pub mod ascii85;
pub mod header;
pub mod names;

pub use header::{pad, pad_encrypted, parse, unpad, Header};
pub use names::{file_name, name_hash};
