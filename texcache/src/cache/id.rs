//! 128-bit content identifiers.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Unique key of a cached item.
///
/// The hyphenated lowercase string form names the body file, and its first
/// hex character selects the shard directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(Uuid);

impl ContentId {
    /// The all-zero id. Never a valid key; marks an empty header record.
    pub const NIL: ContentId = ContentId(Uuid::nil());

    /// Generates a random id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds an id from its 16 raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw bytes as stored in the header file.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns true for the all-zero id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Shard character: the first hex digit of the string form.
    pub fn shard(&self) -> char {
        let nibble = self.as_bytes()[0] >> 4;
        char::from_digit(u32::from(nibble), 16).unwrap_or('0')
    }
}

impl From<Uuid> for ContentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ContentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
