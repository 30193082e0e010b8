//! On-block type tag.
//!
//! Resolves the first Open Question in the design notes: the tag lives at
//! byte offset 0 of every block and is decoded by value, never compared
//! by pointer identity to a constant.

/// What a block currently holds. Only `Data` blocks participate in the
/// per-inode dirty index; every dirty slot still enters the global dirty
/// list regardless of tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Data = 1,
    BTreeNode = 2,
    Bitmap = 3,
    Inode = 4,
    Super = 5,
}

impl BlockType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Data),
            2 => Some(Self::BTreeNode),
            3 => Some(Self::Bitmap),
            4 => Some(Self::Inode),
            5 => Some(Self::Super),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Read the tag from the first byte of a block buffer, if it decodes
    /// to a known variant.
    pub fn of(block: &[u8]) -> Option<Self> {
        block.first().copied().and_then(Self::from_byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_byte() {
        for t in [
            BlockType::Data,
            BlockType::BTreeNode,
            BlockType::Bitmap,
            BlockType::Inode,
            BlockType::Super,
        ] {
            assert_eq!(BlockType::from_byte(t.as_byte()), Some(t));
        }
    }

    #[test]
    fn unknown_byte_decodes_to_none() {
        assert_eq!(BlockType::from_byte(0), None);
        assert_eq!(BlockType::from_byte(200), None);
    }
}
