pub mod calls;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod rpc;
pub mod session;
pub mod test_helpers;
pub mod transport;

pub use error::{
    GameError,
    Result,
};

pub mod mines_types {
    use alloy_sol_types::sol;

    sol! {
        #[derive(Debug, PartialEq, Eq)]
        struct Game {
            address player;
            uint256 betAmount;
            uint8 totalMines;
            uint8 revealedSafeTiles;
            bool[25] revealedTiles;
            uint8[] mineLocations;
            bool isActive;
        }

        function startGame(uint8 mineCount) external payable;
        function revealTile(uint8 tileIndex) external;
        function cashOut() external;
        function getGameStatus(address player) external view returns (Game memory);
        function getSharedPoolBalance() external view returns (uint256);
        function calculateWinnings(
            uint256 betAmount,
            uint8 totalMines,
            uint8 revealedSafeTiles
        ) external pure returns (uint256);
    }
}

/// Number of cells on the board.
pub const GRID_SIZE: usize = 25;
pub const MIN_MINES: u8 = 1;
pub const MAX_MINES: u8 = 24;
