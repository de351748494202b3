use crate::{
    GRID_SIZE,
    envelope::{
        self,
        RawCallData,
    },
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
    transport::{
        CallResponse,
        ReadRequest,
        ReceiptStatus,
        TransactionReceipt,
        TransactionRequest,
        Transport,
    },
};
use alloy_primitives::{
    Address,
    TxHash,
    U256,
    address,
};
use alloy_sol_types::{
    SolCall,
    SolValue,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{
        BTreeSet,
        HashMap,
        VecDeque,
    },
    sync::Arc,
};
use tokio::sync::Notify;

pub const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;
pub const TENTH_ETH: u128 = ONE_ETH / 10;

/// Where a [`MockChain`] can be paused mid-request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum GatePoint {
    Receipt,
    StatusRead,
}

/// One-shot pause. The chain signals `reached` and then waits for `release`.
#[derive(Debug, Default)]
pub struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

#[derive(Debug)]
struct ChainState {
    accounts: Vec<Address>,
    connect_rejection: Option<String>,
    send_rejections: VecDeque<String>,
    receipt_statuses: VecDeque<ReceiptStatus>,
    receipt_errors: VecDeque<String>,
    apply_effects: bool,
    game: Option<Game>,
    mines: BTreeSet<u8>,
    pool: U256,
    balance: U256,
    winnings: U256,
    fail_pool_reads: bool,
    fail_status_reads: bool,
    pending: HashMap<TxHash, TransactionRequest>,
    submitted: Vec<TransactionRequest>,
    status_reads: usize,
    next_tx: u64,
    gates: HashMap<GatePoint, Arc<Gate>>,
}

/// In-memory wallet and mines contract.
///
/// Transactions take effect when their receipt is awaited, and only when the
/// receipt reports success. Read calls answer with numeric byte arrays, the
/// way the Umi node does.
#[derive(Debug)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                accounts: vec![ALICE],
                connect_rejection: None,
                send_rejections: VecDeque::new(),
                receipt_statuses: VecDeque::new(),
                receipt_errors: VecDeque::new(),
                apply_effects: true,
                game: None,
                mines: BTreeSet::from([0, 1, 2]),
                pool: U256::from(ONE_ETH),
                balance: U256::from(10 * ONE_ETH),
                winnings: U256::ZERO,
                fail_pool_reads: false,
                fail_status_reads: false,
                pending: HashMap::new(),
                submitted: Vec::new(),
                status_reads: 0,
                next_tx: 1,
                gates: HashMap::new(),
            }),
        }
    }

    pub fn with_mines(self, mines: &[u8]) -> Self {
        self.state.lock().mines = mines.iter().copied().collect();
        self
    }

    pub fn with_pool(self, pool: U256) -> Self {
        self.state.lock().pool = pool;
        self
    }

    pub fn with_winnings(self, winnings: U256) -> Self {
        self.state.lock().winnings = winnings;
        self
    }

    pub fn with_game(self, game: Game) -> Self {
        self.state.lock().game = Some(game);
        self
    }

    pub fn without_accounts(self) -> Self {
        self.state.lock().accounts.clear();
        self
    }

    pub fn reject_connect(&self, reason: &str) {
        self.state.lock().connect_rejection = Some(reason.to_string());
    }

    /// The next submission is refused by the wallet.
    pub fn reject_next_send(&self, reason: &str) {
        self.state.lock().send_rejections.push_back(reason.to_string());
    }

    /// The next receipt reports `status`.
    pub fn push_receipt_status(&self, status: ReceiptStatus) {
        self.state.lock().receipt_statuses.push_back(status);
    }

    /// Waiting for the next receipt fails with `reason`. The transaction is
    /// dropped without taking effect.
    pub fn fail_next_receipt(&self, reason: &str) {
        self.state.lock().receipt_errors.push_back(reason.to_string());
    }

    /// Confirmed transactions stop changing contract state, as if another
    /// transaction had raced them.
    pub fn freeze_contract(&self) {
        self.state.lock().apply_effects = false;
    }

    pub fn set_game(&self, game: Option<Game>) {
        self.state.lock().game = game;
    }

    pub fn set_pool(&self, pool: U256) {
        self.state.lock().pool = pool;
    }

    pub fn set_winnings(&self, winnings: U256) {
        self.state.lock().winnings = winnings;
    }

    pub fn fail_pool_reads(&self, fail: bool) {
        self.state.lock().fail_pool_reads = fail;
    }

    pub fn fail_status_reads(&self, fail: bool) {
        self.state.lock().fail_status_reads = fail;
    }

    /// Pauses the next request that reaches `point`.
    pub fn arm_gate(&self, point: GatePoint) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.state.lock().gates.insert(point, gate.clone());
        gate
    }

    pub fn game(&self) -> Option<Game> {
        self.state.lock().game.clone()
    }

    pub fn pool(&self) -> U256 {
        self.state.lock().pool
    }

    pub fn balance(&self) -> U256 {
        self.state.lock().balance
    }

    pub fn submitted(&self) -> Vec<TransactionRequest> {
        self.state.lock().submitted.clone()
    }

    pub fn status_reads(&self) -> usize {
        self.state.lock().status_reads
    }

    async fn pass_gate(&self, point: GatePoint) {
        let gate = self.state.lock().gates.remove(&point);
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }
}

pub fn active_game(player: Address, bet: U256, mines: u8, revealed: &[u8]) -> Game {
    let mut revealed_tiles = [false; GRID_SIZE];
    for tile in revealed {
        revealed_tiles[usize::from(*tile)] = true;
    }
    Game {
        player,
        betAmount: bet,
        totalMines: mines,
        revealedSafeTiles: revealed.len() as u8,
        revealedTiles: revealed_tiles,
        mineLocations: vec![],
        isActive: true,
    }
}

fn empty_game() -> Game {
    Game {
        player: Address::ZERO,
        betAmount: U256::ZERO,
        totalMines: 0,
        revealedSafeTiles: 0,
        revealedTiles: [false; GRID_SIZE],
        mineLocations: vec![],
        isActive: false,
    }
}

fn calldata(encoded: &str) -> Result<Vec<u8>> {
    let envelope = envelope::decode_envelope(encoded)?;
    envelope
        .evm_calldata()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| GameError::format("expected an EVM contract envelope"))
}

fn selector(data: &[u8]) -> Result<[u8; 4]> {
    data.get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| GameError::format("calldata shorter than a selector"))
}

fn decode_err(e: alloy_sol_types::Error) -> GameError {
    GameError::decode(e.to_string())
}

impl ChainState {
    fn execute(&mut self, request: &TransactionRequest) -> Result<()> {
        let data = calldata(&request.data)?;
        let value = request.value.unwrap_or(U256::ZERO);
        match selector(&data)? {
            startGameCall::SELECTOR => {
                let call = startGameCall::abi_decode(&data).map_err(decode_err)?;
                self.balance = self.balance.saturating_sub(value);
                self.pool += value;
                self.game = Some(active_game(request.from, value, call.mineCount, &[]));
            }
            revealTileCall::SELECTOR => {
                let call = revealTileCall::abi_decode(&data).map_err(decode_err)?;
                let mines: Vec<u8> = self.mines.iter().copied().collect();
                if let Some(game) = self.game.as_mut().filter(|game| game.isActive) {
                    let tile = usize::from(call.tileIndex);
                    game.revealedTiles[tile] = true;
                    if mines.contains(&call.tileIndex) {
                        game.isActive = false;
                        game.mineLocations = mines;
                    } else {
                        game.revealedSafeTiles += 1;
                    }
                }
            }
            cashOutCall::SELECTOR => {
                let pool = self.pool;
                let winnings = self.winnings;
                let mines: Vec<u8> = self.mines.iter().copied().collect();
                if let Some(game) = self.game.as_mut().filter(|game| game.isActive) {
                    let payout = (game.betAmount + winnings).min(pool.saturating_sub(game.betAmount));
                    game.isActive = false;
                    game.mineLocations = mines;
                    self.pool = pool.saturating_sub(payout);
                    self.balance += payout;
                }
            }
            other => {
                return Err(GameError::format(format!(
                    "unknown selector 0x{}",
                    hex::encode(other)
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockChain {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let state = self.state.lock();
        match &state.connect_rejection {
            Some(reason) => Err(GameError::transport(reason.clone())),
            None => Ok(state.accounts.clone()),
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.state.lock().accounts.clone())
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash> {
        let mut state = self.state.lock();
        if let Some(reason) = state.send_rejections.pop_front() {
            return Err(GameError::transport(reason));
        }
        let tx_hash = TxHash::left_padding_from(&state.next_tx.to_be_bytes());
        state.next_tx += 1;
        state.submitted.push(request.clone());
        state.pending.insert(tx_hash, request.clone());
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt> {
        self.pass_gate(GatePoint::Receipt).await;
        let mut state = self.state.lock();
        let request = state
            .pending
            .remove(&tx_hash)
            .ok_or_else(|| GameError::transport(format!("unknown transaction {tx_hash}")))?;
        if let Some(reason) = state.receipt_errors.pop_front() {
            return Err(GameError::transport(reason));
        }
        let status = state
            .receipt_statuses
            .pop_front()
            .unwrap_or(ReceiptStatus::Success);
        if status == ReceiptStatus::Success && state.apply_effects {
            state.execute(&request)?;
        }
        Ok(TransactionReceipt { tx_hash, status })
    }

    async fn call(&self, request: &ReadRequest) -> Result<CallResponse> {
        let data = calldata(&request.data)?;
        let encoded = match selector(&data)? {
            getGameStatusCall::SELECTOR => {
                let call = getGameStatusCall::abi_decode(&data).map_err(decode_err)?;
                self.pass_gate(GatePoint::StatusRead).await;
                let mut state = self.state.lock();
                state.status_reads += 1;
                if state.fail_status_reads {
                    return Err(GameError::transport("status read timed out"));
                }
                state
                    .game
                    .clone()
                    .filter(|game| game.player == call.player)
                    .unwrap_or_else(empty_game)
                    .abi_encode()
            }
            getSharedPoolBalanceCall::SELECTOR => {
                let state = self.state.lock();
                if state.fail_pool_reads {
                    return Err(GameError::transport("pool read timed out"));
                }
                state.pool.abi_encode()
            }
            calculateWinningsCall::SELECTOR => self.state.lock().winnings.abi_encode(),
            other => {
                return Err(GameError::format(format!(
                    "unknown selector 0x{}",
                    hex::encode(other)
                )));
            }
        };
        Ok(CallResponse {
            data: Some(RawCallData::ByteArray(encoded)),
        })
    }

    async fn get_balance(&self, _address: Address) -> Result<U256> {
        Ok(self.state.lock().balance)
    }
}
