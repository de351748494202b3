use crate::{
    calls::{
        self,
        CallBuilder,
        ContractCall,
    },
    config::{
        AppConfig,
        DEFAULT_SETTLE_DELAY,
    },
    envelope,
    error::{
        GameError,
        Result,
    },
    session::{
        self,
        CappedPayout,
        GameSnapshot,
        OutcomeKind,
        PendingAction,
        SessionOutcome,
        SessionPhase,
        TrackedSnapshot,
        compute_capped_payout,
    },
    transport::{
        ReadRequest,
        ReceiptStatus,
        TransactionReceipt,
        TransactionRequest,
        Transport,
    },
};
use alloy_primitives::{
    Address,
    Bytes,
    TxHash,
    U256,
    utils::format_ether,
};
use futures::future::join3;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time;
use tracing::{
    debug,
    error,
    info,
    warn,
};

const CONNECT_FAILED: &str = "Failed to connect wallet.";
const STATUS_UNAVAILABLE: &str = "Could not fetch game status. The network may be busy.";
const START_SUBMITTED: &str = "Game started! Waiting for confirmation...";
const START_CONFIRMED: &str = "Transaction confirmed! Your game is ready.";
const TX_SUBMITTED: &str = "Transaction sent! Waiting for confirmation...";
const TX_CONFIRMED: &str = "Transaction confirmed!";
const LOSS_MESSAGE: &str = "You hit a mine. Better luck next time!";
const CASHED_OUT: &str = "You cashed out.";

/// Everything a view needs to render the session, copied out of the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ViewState {
    pub loading: bool,
    pub error: Option<String>,
    pub notification: Option<String>,
    pub account: Option<Address>,
    pub wallet_balance: Option<U256>,
    pub pool_balance: Option<U256>,
    /// Only active games are shown; a finished game lives on in `last_outcome`.
    pub game: Option<TrackedSnapshot>,
    pub payout: Option<CappedPayout>,
    /// Capped profit in wei, as a decimal string.
    pub live_profit: String,
    pub phase: SessionPhase,
    pub pending_tile: Option<u8>,
    pub in_flight: Option<PendingAction>,
    pub last_outcome: Option<SessionOutcome>,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    id: u64,
    action: PendingAction,
}

/// Identifies one connection of one account. Every reset starts a new epoch,
/// so work begun before a disconnect never lands in a later session, even for
/// the same account.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct SessionKey {
    epoch: u64,
    account: Address,
}

#[derive(Debug, Default)]
struct EngineState {
    loading: bool,
    error: Option<String>,
    notification: Option<String>,
    account: Option<Address>,
    wallet_balance: Option<U256>,
    pool_balance: Option<U256>,
    game: Option<TrackedSnapshot>,
    theoretical_profit: Option<U256>,
    payout: Option<CappedPayout>,
    phase: SessionPhase,
    in_flight: Option<InFlight>,
    next_action_id: u64,
    epoch: u64,
    last_outcome: Option<SessionOutcome>,
}

impl EngineState {
    fn clear_messages(&mut self) {
        self.error = None;
        self.notification = None;
    }

    fn fail(&mut self, err: GameError) -> GameError {
        self.error = Some(err.to_string());
        err
    }

    /// Drops everything tied to the current account and opens a new epoch.
    /// Action ids keep counting so a slot claimed before the reset can never
    /// release a newer one.
    fn reset(&mut self, account: Option<Address>) {
        let next_action_id = self.next_action_id;
        let epoch = self.epoch + 1;
        *self = EngineState {
            account,
            next_action_id,
            epoch,
            ..Default::default()
        };
    }

    fn session(&self) -> Option<SessionKey> {
        self.account.map(|account| SessionKey {
            epoch: self.epoch,
            account,
        })
    }

    fn is_current(&self, session: SessionKey) -> bool {
        self.session() == Some(session)
    }

    fn finish_loading(&mut self) {
        if self.in_flight.is_none() {
            self.loading = false;
        }
    }

    fn recompute_payout(&mut self) {
        self.payout = match (&self.game, self.pool_balance) {
            (Some(game), Some(pool)) if game.snapshot.is_active => Some(compute_capped_payout(
                &game.snapshot,
                pool,
                self.theoretical_profit.unwrap_or(U256::ZERO),
            )),
            _ => None,
        };
    }

    fn view(&self) -> ViewState {
        let pending_tile = match self.phase {
            SessionPhase::PendingReveal { tile } => Some(tile),
            _ => None,
        };
        ViewState {
            loading: self.loading,
            error: self.error.clone(),
            notification: self.notification.clone(),
            account: self.account,
            wallet_balance: self.wallet_balance,
            pool_balance: self.pool_balance,
            game: self.game.clone(),
            payout: self.payout,
            live_profit: self
                .payout
                .map(|payout| payout.actual_profit)
                .unwrap_or(U256::ZERO)
                .to_string(),
            phase: self.phase,
            pending_tile,
            in_flight: self.in_flight.map(|in_flight| in_flight.action),
            last_outcome: self.last_outcome.clone(),
        }
    }
}

/// How an authoritative read moves the session phase.
#[derive(Clone, Copy, Debug)]
enum PhaseUpdate {
    Reconcile,
    Settle {
        restore: SessionPhase,
        expected_payout: Option<U256>,
    },
}

struct Refresh {
    session: SessionKey,
    status: Result<Option<GameSnapshot>>,
    wallet_balance: Result<U256>,
    pool_balance: Result<U256>,
    winnings: Option<Result<U256>>,
}

/// Holds the session's single in-flight slot. Releasing happens on drop so
/// every exit path, including `?`, frees the pending tile.
struct ActionSlot<'a, T> {
    engine: &'a GameEngine<T>,
    id: u64,
    restore: SessionPhase,
}

impl<T> Drop for ActionSlot<'_, T> {
    fn drop(&mut self) {
        let mut state = self.engine.state.lock();
        if state
            .in_flight
            .is_some_and(|in_flight| in_flight.id == self.id)
        {
            state.in_flight = None;
            if state.phase.pending_action().is_some() {
                state.phase = self.restore;
            }
            state.loading = false;
        }
    }
}

struct Claimed<'a, T> {
    slot: ActionSlot<'a, T>,
    action: PendingAction,
    session: SessionKey,
    request: TransactionRequest,
    expected_payout: Option<U256>,
}

/// Drives start, reveal and cash-out through submit, confirm and refresh for
/// one player, keeping the displayed state coherent with the chain.
pub struct GameEngine<T> {
    transport: T,
    calls: CallBuilder,
    settle_delay: Duration,
    state: Mutex<EngineState>,
}

impl<T: Transport> GameEngine<T> {
    pub fn new(transport: T, contract: Address) -> Self {
        Self {
            transport,
            calls: CallBuilder::new(contract),
            settle_delay: DEFAULT_SETTLE_DELAY,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn from_config(transport: T, config: &AppConfig) -> Self {
        Self::new(transport, config.contract).with_settle_delay(config.settle_delay)
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn view(&self) -> ViewState {
        self.state.lock().view()
    }

    pub fn is_tile_pending(&self, tile: u8) -> bool {
        matches!(
            self.state.lock().phase,
            SessionPhase::PendingReveal { tile: pending } if pending == tile
        )
    }

    /// Picks up an account the wallet has already authorised, without
    /// prompting.
    pub async fn restore_connection(&self) -> Result<Option<Address>> {
        self.state.lock().loading = true;
        let accounts = match self.transport.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "could not check for an existing connection");
                self.state.lock().finish_loading();
                return Err(e);
            }
        };
        let Some(account) = accounts.into_iter().next() else {
            debug!("no previously authorised account");
            self.state.lock().finish_loading();
            return Ok(None);
        };
        info!(%account, "restored wallet connection");
        let session = self.adopt_account(account);
        self.refresh_after(session, PhaseUpdate::Reconcile).await;
        self.state.lock().finish_loading();
        Ok(Some(account))
    }

    pub async fn connect_wallet(&self) -> Result<Address> {
        {
            let mut state = self.state.lock();
            if let Some(in_flight) = state.in_flight {
                return Err(GameError::ActionInFlight(in_flight.action));
            }
            state.clear_messages();
            state.loading = true;
        }
        let account = match self.transport.request_accounts().await.and_then(|accounts| {
            accounts
                .into_iter()
                .next()
                .ok_or_else(|| GameError::transport("wallet returned no accounts"))
        }) {
            Ok(account) => account,
            Err(e) => {
                error!(error = %e, "failed to connect wallet");
                let mut state = self.state.lock();
                state.error = Some(CONNECT_FAILED.to_string());
                state.finish_loading();
                return Err(e);
            }
        };
        info!(%account, "wallet connected");
        let session = self.adopt_account(account);
        self.refresh_after(session, PhaseUpdate::Reconcile).await;
        self.state.lock().finish_loading();
        Ok(account)
    }

    /// Forgets the account and every piece of session state. An action still
    /// awaiting its receipt finishes, but its results are discarded, also when
    /// the same account connects again in the meantime.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        if let Some(account) = state.account {
            info!(%account, "wallet disconnected");
        }
        state.reset(None);
    }

    pub fn dismiss_outcome(&self) {
        let mut state = self.state.lock();
        state.last_outcome = None;
        if state.phase.is_resolved() {
            state.phase = SessionPhase::NoGame;
        }
    }

    /// Authoritative read of game status, balances and winnings.
    pub async fn refresh(&self) -> Result<()> {
        let session = {
            let mut state = self.state.lock();
            if state.in_flight.is_none() {
                state.clear_messages();
            }
            match state.session() {
                Some(session) => {
                    state.loading = true;
                    session
                }
                None => {
                    state.game = None;
                    state.recompute_payout();
                    return Ok(());
                }
            }
        };
        let refresh = self.fetch_refresh(session).await;
        let result = self.apply_refresh(refresh, PhaseUpdate::Reconcile);
        self.state.lock().finish_loading();
        result
    }

    pub async fn start_game(&self, mine_count: u8, bet_amount_wei: U256) -> Result<()> {
        let claimed = self.claim(PendingAction::StartGame, |_| {
            self.calls.start_game(mine_count, bet_amount_wei)
        })?;
        info!(
            account = %claimed.session.account,
            mine_count,
            bet = %format_ether(bet_amount_wei),
            "starting game"
        );
        let receipt = self.submit(&claimed, START_SUBMITTED).await?;
        let result = match receipt.status {
            ReceiptStatus::Success => {
                info!(tx_hash = %receipt.tx_hash, "start game confirmed");
                let mut state = self.state.lock();
                if state.is_current(claimed.session) {
                    state.phase = state.phase.confirm_start();
                    state.game = Some(TrackedSnapshot::optimistic(GameSnapshot::optimistic(
                        claimed.session.account,
                        bet_amount_wei,
                        mine_count,
                    )));
                    state.theoretical_profit = None;
                    state.last_outcome = None;
                    state.recompute_payout();
                    state.notification = Some(START_CONFIRMED.to_string());
                }
                Ok(())
            }
            ReceiptStatus::Failure => Err(self.confirmation_failed(&claimed, receipt.tx_hash)),
        };
        time::sleep(self.settle_delay).await;
        self.refresh_after(claimed.session, PhaseUpdate::Reconcile)
            .await;
        result
    }

    pub async fn reveal_tile(&self, tile: u8) -> Result<()> {
        let claimed = self.claim(PendingAction::RevealTile(tile), |state| {
            let call = self.calls.reveal_tile(tile)?;
            if state
                .game
                .as_ref()
                .is_some_and(|game| game.snapshot.is_revealed(usize::from(tile)))
            {
                return Err(GameError::validation(format!(
                    "Tile {tile} is already revealed."
                )));
            }
            Ok(call)
        })?;
        info!(account = %claimed.session.account, tile, "revealing tile");
        self.confirm_and_settle(claimed).await
    }

    pub async fn cash_out(&self) -> Result<()> {
        let claimed = self.claim(PendingAction::CashOut, |state| {
            if state
                .game
                .as_ref()
                .is_some_and(|game| !game.snapshot.can_cash_out())
            {
                return Err(GameError::validation(
                    "Reveal at least one safe tile before cashing out.",
                ));
            }
            Ok(self.calls.cash_out())
        })?;
        info!(
            account = %claimed.session.account,
            expected_payout = ?claimed.expected_payout.map(format_ether),
            "cashing out"
        );
        self.confirm_and_settle(claimed).await
    }

    /// Reveal and cash-out never guess: the slot, and with it the pending
    /// tile, is held until the authoritative read has been applied.
    async fn confirm_and_settle(&self, claimed: Claimed<'_, T>) -> Result<()> {
        let receipt = self.submit(&claimed, TX_SUBMITTED).await?;
        match receipt.status {
            ReceiptStatus::Success => {
                info!(tx_hash = %receipt.tx_hash, action = %claimed.action, "transaction confirmed");
                self.with_session(claimed.session, |state| {
                    state.notification = Some(TX_CONFIRMED.to_string());
                });
                let update = PhaseUpdate::Settle {
                    restore: claimed.slot.restore,
                    expected_payout: claimed.expected_payout,
                };
                self.refresh_after(claimed.session, update).await;
                Ok(())
            }
            ReceiptStatus::Failure => {
                let err = self.confirmation_failed(&claimed, receipt.tx_hash);
                self.refresh_after(claimed.session, PhaseUpdate::Reconcile)
                    .await;
                Err(err)
            }
        }
    }

    /// Claims the in-flight slot and prepares the wallet request. A busy slot
    /// is rejected before the previous messages are touched; any other
    /// failure is recorded for the view.
    fn claim<F>(&self, action: PendingAction, build: F) -> Result<Claimed<'_, T>>
    where
        F: FnOnce(&EngineState) -> Result<ContractCall>,
    {
        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight {
            warn!(requested = %action, in_flight = %in_flight.action, "rejecting concurrent action");
            return Err(GameError::ActionInFlight(in_flight.action));
        }
        state.clear_messages();
        let Some(session) = state.session() else {
            return Err(state.fail(GameError::NotConnected));
        };
        let prepared = build(&state).and_then(|call| {
            let next = state.phase.begin(action)?;
            let request = TransactionRequest::from_call(&call, session.account)?;
            Ok((next, request))
        });
        let (next, request) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, %action, "action rejected");
                return Err(state.fail(e));
            }
        };
        let id = state.next_action_id;
        state.next_action_id += 1;
        let restore = state.phase;
        state.in_flight = Some(InFlight { id, action });
        state.phase = next;
        state.loading = true;
        let expected_payout = state.payout.map(|payout| payout.actual_payout);
        drop(state);
        Ok(Claimed {
            slot: ActionSlot {
                engine: self,
                id,
                restore,
            },
            action,
            session,
            request,
            expected_payout,
        })
    }

    async fn submit(
        &self,
        claimed: &Claimed<'_, T>,
        submitted: &str,
    ) -> Result<TransactionReceipt> {
        let tx_hash = match self.transport.send_transaction(&claimed.request).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                error!(error = %e, action = %claimed.action, "transaction submission failed");
                return Err(self.record_failure(claimed.session, e));
            }
        };
        info!(%tx_hash, action = %claimed.action, "transaction submitted");
        self.with_session(claimed.session, |state| {
            state.notification = Some(submitted.to_string());
        });
        match self.transport.wait_for_receipt(tx_hash).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                error!(error = %e, %tx_hash, "waiting for receipt failed");
                Err(self.record_failure(claimed.session, e))
            }
        }
    }

    fn confirmation_failed(&self, claimed: &Claimed<'_, T>, tx_hash: TxHash) -> GameError {
        error!(%tx_hash, action = %claimed.action, "transaction reported failure");
        self.with_session(claimed.session, |state| {
            state.phase = claimed.slot.restore;
            if state.game.as_ref().is_some_and(TrackedSnapshot::is_optimistic) {
                state.game = None;
            }
            state.recompute_payout();
            state.notification = None;
            state.error = Some(format!(
                "{} transaction failed. Please check your wallet.",
                claimed.action.label()
            ));
        });
        GameError::ConfirmationFailure { tx_hash }
    }

    fn record_failure(&self, session: SessionKey, err: GameError) -> GameError {
        self.with_session(session, |state| {
            state.notification = None;
            state.error = Some(err.to_string());
        });
        err
    }

    /// Runs `f` only while `session` is still the open one.
    fn with_session(&self, session: SessionKey, f: impl FnOnce(&mut EngineState)) {
        let mut state = self.state.lock();
        if state.is_current(session) {
            f(&mut state);
        }
    }

    fn adopt_account(&self, account: Address) -> SessionKey {
        let mut state = self.state.lock();
        if state.account != Some(account) {
            state.reset(Some(account));
            state.loading = true;
        }
        SessionKey {
            epoch: state.epoch,
            account,
        }
    }

    async fn refresh_after(&self, session: SessionKey, update: PhaseUpdate) {
        let refresh = self.fetch_refresh(session).await;
        if let Err(e) = self.apply_refresh(refresh, update) {
            debug!(error = %e, "refresh kept previous game state");
        }
    }

    /// Status, wallet balance and pool balance are read together and only
    /// applied once all three are in, so the cap never mixes a fresh game
    /// with a stale pool.
    async fn fetch_refresh(&self, session: SessionKey) -> Refresh {
        let account = session.account;
        let (status, wallet_balance, pool_balance) = join3(
            self.read_status(account),
            self.transport.get_balance(account),
            self.read_pool_balance(),
        )
        .await;
        let winnings = match &status {
            Ok(Some(snapshot)) if snapshot.can_cash_out() => {
                Some(self.read_winnings(snapshot).await)
            }
            _ => None,
        };
        Refresh {
            session,
            status,
            wallet_balance,
            pool_balance,
            winnings,
        }
    }

    fn apply_refresh(&self, refresh: Refresh, update: PhaseUpdate) -> Result<()> {
        let mut state = self.state.lock();
        if !state.is_current(refresh.session) {
            debug!(
                account = %refresh.session.account,
                epoch = refresh.session.epoch,
                "discarding refresh for a previous session"
            );
            return Ok(());
        }

        match refresh.wallet_balance {
            Ok(balance) => state.wallet_balance = Some(balance),
            Err(e) => error!(error = %e, "failed to read wallet balance"),
        }
        match refresh.pool_balance {
            Ok(pool) => state.pool_balance = Some(pool),
            Err(e) => {
                error!(error = %e, "failed to read shared pool balance");
                state.pool_balance = None;
            }
        }

        let status = match refresh.status {
            Ok(status) => {
                state.game = status
                    .as_ref()
                    .filter(|snapshot| snapshot.is_active)
                    .cloned()
                    .map(TrackedSnapshot::authoritative);
                match refresh.winnings {
                    Some(Ok(profit)) => state.theoretical_profit = Some(profit),
                    Some(Err(e)) => error!(error = %e, "failed to read winnings"),
                    None => state.theoretical_profit = None,
                }
                Ok(status)
            }
            Err(e) => {
                error!(error = %e, "failed to read game status");
                if state.game.as_ref().is_some_and(TrackedSnapshot::is_optimistic) {
                    state.game = None;
                }
                if state.error.is_none() {
                    state.error = Some(STATUS_UNAVAILABLE.to_string());
                }
                Err(e)
            }
        };
        state.recompute_payout();

        let phase = state.phase;
        match (&status, update) {
            (Ok(game), PhaseUpdate::Reconcile) => {
                state.phase = phase.reconcile(game.as_ref());
            }
            (Err(_), PhaseUpdate::Reconcile) => {
                let shown = state.game.as_ref().map(|game| game.snapshot.clone());
                state.phase = phase.reconcile(shown.as_ref());
            }
            (
                Ok(game),
                PhaseUpdate::Settle {
                    expected_payout, ..
                },
            ) => {
                let next = phase.settle(game.as_ref(), expected_payout);
                if let Some(outcome) = SessionOutcome::from_phase(next, game.clone()) {
                    let message = match outcome.kind {
                        OutcomeKind::Loss => LOSS_MESSAGE.to_string(),
                        OutcomeKind::Win {
                            payout: Some(payout),
                        } => format!("You cashed out {} ETH.", format_ether(payout)),
                        OutcomeKind::Win { payout: None } => CASHED_OUT.to_string(),
                    };
                    info!(account = %refresh.session.account, ?outcome.kind, "game resolved");
                    state.notification = Some(message);
                    state.last_outcome = Some(outcome);
                }
                state.phase = next;
            }
            (Err(_), PhaseUpdate::Settle { restore, .. }) => {
                state.phase = restore;
            }
        }
        status.map(|_| ())
    }

    async fn read(&self, call: &ContractCall) -> Result<Bytes> {
        let request = ReadRequest::from_call(call)?;
        let response = self.transport.call(&request).await?;
        envelope::decode_call_result(response.data.as_ref())
    }

    async fn read_status(&self, account: Address) -> Result<Option<GameSnapshot>> {
        let data = self.read(&self.calls.get_game_status(account)).await?;
        session::decode_status(&data)
    }

    async fn read_pool_balance(&self) -> Result<U256> {
        let data = self.read(&self.calls.get_shared_pool_balance()).await?;
        calls::decode_pool_balance(&data)
    }

    async fn read_winnings(&self, snapshot: &GameSnapshot) -> Result<U256> {
        let call = self.calls.calculate_winnings(
            snapshot.bet_amount_wei,
            snapshot.total_mines,
            snapshot.revealed_safe_tiles,
        );
        let data = self.read(&call).await?;
        calls::decode_winnings(&data)
    }
}
