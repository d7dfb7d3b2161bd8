//! RESP wire protocol, the subset the command surface needs.
//!
//! ```
//! use shortn::protocol::{parse_command, Frame};
//!
//! let (args, used) = parse_command(b"*2\r\n$7\r\nRESOLVE\r\n$2\r\n0z\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(args.len(), 2);
//! assert_eq!(used, 25);
//!
//! assert_eq!(&Frame::Null.encode()[..], b"$-1\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_command, parse_frame, ParseError, ParseResult};
pub use types::Frame;
