//! Wire protocol definitions for the graph database driver
//!
//! The protocol is a stream of length-prefixed chunks carried over a
//! message-oriented transport (WebSocket binary frames):
//!
//! ```text
//!   [chunk_size][      chunk     ]      ...      [0x00 0x00]
//!   [ 2 bytes  ][chunk_size bytes]                  seal
//! ```
//!
//! All the chunks between two seals form one logical message. A logical
//! message starts with a one byte tag followed by tagged values encoded as
//! described in [`value`]. All integers are big-endian.

pub mod chunk;
pub mod decoder;
pub mod encoder;
pub mod request;
pub mod response;
pub mod value;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use decoder::MessageDecoder;
pub use encoder::ValueEncoder;
pub use request::{Request, RequestWriter};
pub use response::{QueryPreamble, ResponseEnvelope};
pub use value::{
    Date, DateTime, Decimal, Direction, GraphAnon, GraphEdge, GraphNode, GraphPath,
    GraphPathSegment, Iri, Parameters, StringDatatype, StringLang, Time, Value,
};

use crate::error::DriverError;

/// Number of records requested per pull when the caller does not say otherwise.
pub const DEFAULT_FETCH_SIZE: u32 = 1024;

/// Capacity of the outbound staging buffer, chunk headers included.
pub const BUFFER_SIZE: usize = 1400;

/// Size of the big-endian `u16` that prefixes every chunk.
pub const CHUNK_HEADER_SIZE: usize = 2;

/// Upper bound for one reassembled inbound message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal { $($variant:ident = $code:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $code,)+
        }

        impl $name {
            /// One past the highest valid tag.
            pub const TOTAL: u8 = [$($code),+].len() as u8;

            pub fn code(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = DriverError;

            fn try_from(code: u8) -> Result<Self, DriverError> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(DriverError::Decode(format!(
                        concat!("unhandled ", $what, " with code 0x{:02x}"),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum! {
    /// Tag byte that precedes every encoded value.
    DataType, "data type" {
        Null = 0,
        BoolFalse = 1,
        BoolTrue = 2,
        UInt8 = 3,
        UInt16 = 4,
        UInt32 = 5,
        UInt64 = 6,
        Int64 = 7,
        Float = 8,
        Double = 9,
        Decimal = 10,
        String = 11,
        StringLang = 12,
        StringDatatype = 13,
        Iri = 14,
        NamedNode = 15,
        Edge = 16,
        Anon = 17,
        Date = 18,
        Time = 19,
        DateTime = 20,
        Path = 21,
        List = 22,
        Map = 23,
    }
}

wire_enum! {
    /// First byte of every outbound logical message.
    RequestType, "request type" {
        Run = 0,
        Pull = 1,
        Discard = 2,
        Catalog = 3,
        Cancel = 4,
    }
}

wire_enum! {
    /// The `type` entry of every inbound envelope.
    ResponseType, "response type" {
        Success = 0,
        Error = 1,
        Record = 2,
        Variables = 3,
        QueryData = 4,
    }
}
