use alloy_primitives::{
    Address,
    U256,
    utils::format_ether,
};
use std::fmt::Write;
use umi_mines::{
    GRID_SIZE,
    engine::ViewState,
    session::{
        GameSnapshot,
        OutcomeKind,
    },
};

const GRID_WIDTH: usize = 5;

/// `0x1234...abcd`
pub fn truncate_address(address: &Address) -> String {
    let full = hex::encode(address);
    format!("0x{}...{}", &full[..4], &full[full.len() - 4..])
}

fn eth(amount: Option<U256>) -> String {
    amount
        .map(|wei| format!("{} ETH", format_ether(wei)))
        .unwrap_or_else(|| "-".to_string())
}

fn cell(snapshot: &GameSnapshot, tile: usize, pending: Option<u8>) -> char {
    if pending.is_some_and(|p| usize::from(p) == tile) {
        '~'
    } else if snapshot.is_mine(tile) {
        'X'
    } else if snapshot.is_revealed(tile) {
        '*'
    } else {
        '.'
    }
}

pub fn draw_grid(snapshot: &GameSnapshot, pending: Option<u8>) -> String {
    let mut out = String::new();
    for row in 0..GRID_SIZE / GRID_WIDTH {
        let line: Vec<String> = (0..GRID_WIDTH)
            .map(|col| {
                let tile = row * GRID_WIDTH + col;
                format!("{:>2}{}", tile, cell(snapshot, tile, pending))
            })
            .collect();
        let _ = writeln!(out, "  {}", line.join("  "));
    }
    out
}

pub fn draw(view: &ViewState, network: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Umi Mines on {network}");
    match view.account {
        Some(account) => {
            let _ = writeln!(out, "Connected: {}", truncate_address(&account));
        }
        None => {
            let _ = writeln!(out, "Not connected");
        }
    }
    let _ = writeln!(
        out,
        "Wallet: {}   Pool: {}",
        eth(view.wallet_balance),
        eth(view.pool_balance)
    );
    if let Some(error) = &view.error {
        let _ = writeln!(out, "Error: {error}");
    }
    if let Some(notification) = &view.notification {
        let _ = writeln!(out, "{notification}");
    }

    if let Some(outcome) = &view.last_outcome {
        match outcome.kind {
            OutcomeKind::Win {
                payout: Some(payout),
            } => {
                let _ = writeln!(out, "You Won! Cashed out {} ETH", format_ether(payout));
            }
            OutcomeKind::Win { payout: None } => {
                let _ = writeln!(out, "You Won!");
            }
            OutcomeKind::Loss => {
                let _ = writeln!(out, "Game Over");
            }
        }
        if let Some(final_snapshot) = &outcome.final_snapshot {
            out.push_str(&draw_grid(final_snapshot, None));
        }
    }

    match &view.game {
        Some(game) => {
            let snapshot = &game.snapshot;
            let _ = writeln!(
                out,
                "Bet: {}   Mines: {}   Safe tiles found: {}{}",
                eth(Some(snapshot.bet_amount_wei)),
                snapshot.total_mines,
                snapshot.revealed_safe_tiles,
                if game.is_optimistic() { "   (confirming)" } else { "" }
            );
            out.push_str(&draw_grid(snapshot, view.pending_tile));
            let profit = view.payout.map(|payout| payout.actual_profit);
            let _ = writeln!(out, "Live profit: {}", eth(Some(profit.unwrap_or(U256::ZERO))));
            if let Some(payout) = view.payout
                && payout.actual_payout < payout.theoretical_payout
            {
                let _ = writeln!(
                    out,
                    "Payout capped by the shared pool at {}",
                    eth(Some(payout.actual_payout))
                );
            }
        }
        None if view.account.is_some() => {
            let _ = writeln!(
                out,
                "No active game. Start one with `umi-mines start --mines <1-24> --bet <ETH>`."
            );
        }
        None => {}
    }
    out
}
