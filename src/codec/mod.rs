//! Short Code Encoding
//!
//! Turns identifiers into the short codes handed out to clients.
//!
//! The numeral system is *bijective* base-62: there is no zero digit, so every
//! non-negative integer has exactly one spelling and every non-empty string
//! over the alphabet names exactly one integer.
//!
//! ```text
//!   id:    0    1  ...  61    62    63  ...  3905   3906
//!   code: "0"  "1" ... "z"  "00"  "01" ...  "zz"  "000"
//! ```
//!
//! ## Example
//!
//! ```
//! use shortn::codec::{decode, encode};
//!
//! let code = encode(1_890_951_313_831_759_872).unwrap();
//! assert_eq!(code, "1EfYlH2c4IQ");
//! assert_eq!(decode(&code).unwrap(), 1_890_951_313_831_759_872);
//! assert!(encode(-1).is_err());
//! ```

pub mod base62;

pub use base62::{decode, encode, is_valid_code, Base62Encoder, CodeEncoder, ALPHABET};
