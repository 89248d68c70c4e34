/// Block type identifier as carried on the legacy wire and in chunk documents.
///
/// The engine stores these as raw bytes. `BlockId::AIR` (0) is the only value
/// with structural meaning: it is "empty" for height-map and light purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockId(pub u8);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn is_air(self) -> bool {
        self.0 == 0
    }
}

impl From<u8> for BlockId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

// -- Beta block ids used by terrain generation and the server --

pub const AIR: BlockId = BlockId::AIR;
pub const STONE: BlockId = BlockId(1);
pub const GRASS: BlockId = BlockId(2);
pub const DIRT: BlockId = BlockId(3);
pub const BEDROCK: BlockId = BlockId(7);
pub const WATER: BlockId = BlockId(9); // still
pub const SAND: BlockId = BlockId(12);
pub const GRAVEL: BlockId = BlockId(13);
pub const IRON_ORE: BlockId = BlockId(15);
pub const COAL_ORE: BlockId = BlockId(16);

/// Can a player-placed block replace this one?
pub fn is_replaceable(id: BlockId) -> bool {
    id == AIR || id == WATER
}

/// Is this block something a player can stand inside of?
pub fn is_passable(id: BlockId) -> bool {
    is_replaceable(id)
}

/// Terrain blocks a column "surface" is made of.
pub fn is_terrain(id: BlockId) -> bool {
    matches!(id, STONE | DIRT | GRASS | SAND | GRAVEL | BEDROCK)
}
