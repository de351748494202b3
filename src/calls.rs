use crate::{
    GRID_SIZE,
    MAX_MINES,
    MIN_MINES,
    envelope,
    error::{
        GameError,
        Result,
    },
    mines_types::{
        Game,
        calculateWinningsCall,
        cashOutCall,
        getGameStatusCall,
        getSharedPoolBalanceCall,
        revealTileCall,
        startGameCall,
    },
};
use alloy_primitives::{
    Address,
    Bytes,
    U256,
};
use alloy_sol_types::SolCall;

/// A contract invocation ready to be enveloped and handed to a transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
}

impl ContractCall {
    fn new(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data: data.into(),
            value: None,
        }
    }

    /// Calldata wrapped in the execution layer's transaction envelope.
    pub fn enveloped_data(&self) -> Result<String> {
        envelope::encode_calldata(&self.data)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallBuilder {
    contract: Address,
}

impl CallBuilder {
    pub fn new(contract: Address) -> Self {
        Self { contract }
    }

    pub fn start_game(&self, mine_count: u8, bet_amount_wei: U256) -> Result<ContractCall> {
        validate_mine_count(mine_count)?;
        if bet_amount_wei.is_zero() {
            return Err(GameError::validation("Bet amount must be greater than zero."));
        }
        let data = startGameCall {
            mineCount: mine_count,
        }
        .abi_encode();
        let mut call = ContractCall::new(self.contract, data);
        call.value = Some(bet_amount_wei);
        Ok(call)
    }

    pub fn reveal_tile(&self, tile_index: u8) -> Result<ContractCall> {
        validate_tile_index(tile_index)?;
        let data = revealTileCall {
            tileIndex: tile_index,
        }
        .abi_encode();
        Ok(ContractCall::new(self.contract, data))
    }

    pub fn cash_out(&self) -> ContractCall {
        ContractCall::new(self.contract, cashOutCall {}.abi_encode())
    }

    pub fn get_game_status(&self, player: Address) -> ContractCall {
        ContractCall::new(self.contract, getGameStatusCall { player }.abi_encode())
    }

    pub fn get_shared_pool_balance(&self) -> ContractCall {
        ContractCall::new(self.contract, getSharedPoolBalanceCall {}.abi_encode())
    }

    pub fn calculate_winnings(
        &self,
        bet_amount_wei: U256,
        total_mines: u8,
        revealed_safe_tiles: u8,
    ) -> ContractCall {
        let data = calculateWinningsCall {
            betAmount: bet_amount_wei,
            totalMines: total_mines,
            revealedSafeTiles: revealed_safe_tiles,
        }
        .abi_encode();
        ContractCall::new(self.contract, data)
    }
}

pub fn validate_mine_count(mine_count: u8) -> Result<()> {
    if !(MIN_MINES..=MAX_MINES).contains(&mine_count) {
        return Err(GameError::validation(format!(
            "Mines must be between {MIN_MINES} and {MAX_MINES}."
        )));
    }
    Ok(())
}

pub fn validate_tile_index(tile_index: u8) -> Result<()> {
    if usize::from(tile_index) >= GRID_SIZE {
        return Err(GameError::validation(format!(
            "Tile {tile_index} is outside the {GRID_SIZE}-cell board."
        )));
    }
    Ok(())
}

pub fn decode_game_status(data: &[u8]) -> Result<Game> {
    getGameStatusCall::abi_decode_returns(data)
        .map_err(|e| GameError::decode(format!("getGameStatus result: {e}")))
}

pub fn decode_pool_balance(data: &[u8]) -> Result<U256> {
    getSharedPoolBalanceCall::abi_decode_returns(data)
        .map_err(|e| GameError::decode(format!("getSharedPoolBalance result: {e}")))
}

pub fn decode_winnings(data: &[u8]) -> Result<U256> {
    calculateWinningsCall::abi_decode_returns(data)
        .map_err(|e| GameError::decode(format!("calculateWinnings result: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy_primitives::{
        address,
        keccak256,
    };
    use alloy_sol_types::SolValue;

    const CONTRACT: Address = address!("4e1403ac9af1d0b19af331e08cdc0ee28eeddbb2");

    fn selector(signature: &str) -> [u8; 4] {
        let hash = keccak256(signature.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    #[test]
    fn start_game__encodes_selector_argument_and_value() {
        // given
        let builder = CallBuilder::new(CONTRACT);
        let bet = U256::from(100_000_000_000_000_000u128);

        // when
        let call = builder.start_game(3, bet).unwrap();

        // then
        assert_eq!(call.to, CONTRACT);
        assert_eq!(call.value, Some(bet));
        assert_eq!(call.data[..4], selector("startGame(uint8)"));
        assert_eq!(call.data.len(), 4 + 32);
        assert_eq!(call.data[35], 3);
    }

    #[test]
    fn start_game__rejects_mine_count_out_of_range() {
        let builder = CallBuilder::new(CONTRACT);
        for mines in [0u8, 25, 200] {
            let err = builder.start_game(mines, U256::from(1)).unwrap_err();
            assert!(matches!(err, GameError::Validation(_)), "mines={mines}");
        }
    }

    #[test]
    fn start_game__rejects_zero_bet() {
        let builder = CallBuilder::new(CONTRACT);
        let err = builder.start_game(5, U256::ZERO).unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
    }

    #[test]
    fn reveal_tile__accepts_every_cell_and_rejects_beyond_grid() {
        let builder = CallBuilder::new(CONTRACT);
        for tile in 0..GRID_SIZE as u8 {
            let call = builder.reveal_tile(tile).unwrap();
            assert_eq!(call.data[..4], selector("revealTile(uint8)"));
            assert_eq!(call.data[35], tile);
            assert_eq!(call.value, None);
        }
        let err = builder.reveal_tile(25).unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
    }

    #[test]
    fn read_calls__use_canonical_signatures() {
        let builder = CallBuilder::new(CONTRACT);
        let player = address!("00000000000000000000000000000000000000aa");

        assert_eq!(builder.cash_out().data.as_ref(), &selector("cashOut()")[..]);
        assert_eq!(
            builder.get_shared_pool_balance().data.as_ref(),
            &selector("getSharedPoolBalance()")[..]
        );
        let status = builder.get_game_status(player);
        assert_eq!(status.data[..4], selector("getGameStatus(address)"));
        assert_eq!(status.data[16..36], player[..]);
        let winnings = builder.calculate_winnings(U256::from(10), 3, 2);
        assert_eq!(
            winnings.data[..4],
            selector("calculateWinnings(uint256,uint8,uint8)")
        );
        assert_eq!(winnings.data.len(), 4 + 3 * 32);
    }

    #[test]
    fn enveloped_data__wraps_calldata() {
        // given
        let call = CallBuilder::new(CONTRACT).cash_out();

        // when
        let enveloped = call.enveloped_data().unwrap();

        // then
        let envelope = envelope::decode_envelope(&enveloped).unwrap();
        assert_eq!(envelope.evm_calldata(), Some(call.data.as_ref()));
    }

    #[test]
    fn decode_pool_balance__reads_single_word() {
        // given
        let encoded = U256::from(1_000_000_000_000_000_000u128).abi_encode();

        // when
        let balance = decode_pool_balance(&encoded).unwrap();

        // then
        assert_eq!(balance, U256::from(1_000_000_000_000_000_000u128));
    }

    #[test]
    fn decode_winnings__rejects_truncated_word() {
        let err = decode_winnings(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, GameError::Decode(_)));
    }

    #[test]
    fn decode_game_status__reads_struct() {
        // given
        let mut revealed = [false; GRID_SIZE];
        revealed[7] = true;
        let game = Game {
            player: address!("00000000000000000000000000000000000000aa"),
            betAmount: U256::from(5),
            totalMines: 3,
            revealedSafeTiles: 1,
            revealedTiles: revealed,
            mineLocations: vec![],
            isActive: true,
        };
        let encoded = game.abi_encode();

        // when
        let decoded = decode_game_status(&encoded).unwrap();

        // then
        assert_eq!(decoded, game);
    }
}
